#![cfg(feature = "inmem-store")]

use actix_web::{test, App};
use agora::auth::{create_jwt, Role};
use agora::models::NewUserRecord;
use agora::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use agora::repo::{inmem::InMemRepo, UserRepo};
use agora::{config, AppState};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn ensure_secret() {
    if std::env::var("JWT_SECRET").is_err() { std::env::set_var("JWT_SECRET", "testsecret-abcdefghijklmnopqrstuvwxyz012345"); }
}

#[actix_web::test]
#[serial_test::serial]
async fn rate_limit_thread_creation() {
    ensure_secret();
    let repo = InMemRepo::ephemeral();
    let user = repo
        .create_user(NewUserRecord {
            username: "spammer".into(),
            email: "spam@example.com".into(),
            name: None,
            password_hash: "x".into(),
            is_admin: false,
        })
        .await
        .unwrap();

    // limiter: only 1 thread per large window so second immediately denied
    let cfg = RateLimitConfig {
        thread_limit: 1,
        thread_window: Duration::from_secs(300),
        comment_limit: 100,
        comment_window: Duration::from_secs(60),
        vote_limit: 1,
        vote_window: Duration::from_secs(60),
    };
    let limiter = RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg);
    let state = AppState { repo: Arc::new(repo), rate_limiter: Some(limiter) };
    let app = test::init_service(App::new().app_data(actix_web::web::Data::new(state)).configure(config)).await;

    let token = create_jwt(user.id, &user.username, vec![Role::User]).unwrap();
    let post = || {
        test::TestRequest::post()
            .uri("/api/threads")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .set_json(json!({ "title": "buy now", "content": "cheap", "categoryId": 1 }))
            .to_request()
    };

    let resp = test::call_service(&app, post()).await;
    assert_eq!(resp.status(), 201);
    let thread: serde_json::Value = test::read_body_json(resp).await;
    let resp = test::call_service(&app, post()).await;
    assert_eq!(resp.status(), 429);

    // votes have their own budget
    let vote = || {
        test::TestRequest::post()
            .uri("/api/votes")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .set_json(json!({ "threadId": thread["id"], "value": 1 }))
            .to_request()
    };
    assert_eq!(test::call_service(&app, vote()).await.status(), 201);
    assert_eq!(test::call_service(&app, vote()).await.status(), 429);
}
