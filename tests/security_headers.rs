#![cfg(feature = "inmem-store")]

use actix_web::{test, App};
use agora::repo::inmem::InMemRepo;
use agora::{config, AppState, SecurityHeaders};
use std::sync::Arc;

fn state() -> actix_web::web::Data<AppState> {
    actix_web::web::Data::new(AppState { repo: Arc::new(InMemRepo::ephemeral()), rate_limiter: None })
}

#[actix_web::test]
#[serial_test::serial]
async fn test_security_headers_present() {
    std::env::remove_var("ENABLE_HSTS");
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::from_env())
            .app_data(state())
            .configure(config)
    ).await;
    let req = test::TestRequest::get().uri("/api/categories").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let headers = resp.headers();
    assert_eq!(headers.get("content-security-policy").unwrap(), "default-src 'none'; frame-ancestors 'none'");
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("referrer-policy").unwrap(), "no-referrer");
    assert!(headers.get("strict-transport-security").is_none()); // not enabled
    assert!(headers.get("cache-control").is_none()); // anonymous request
}

#[actix_web::test]
#[serial_test::serial]
async fn test_hsts_and_no_store_for_authenticated() {
    std::env::set_var("ENABLE_HSTS", "true");
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::from_env())
            .app_data(state())
            .configure(config)
    ).await;
    std::env::remove_var("ENABLE_HSTS");
    // a bad token still marks the response private
    let req = test::TestRequest::get()
        .uri("/api/categories")
        .insert_header(("Authorization", "Bearer whatever"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.headers().get("strict-transport-security").is_some());
    assert_eq!(resp.headers().get("cache-control").unwrap(), "no-store");
}
