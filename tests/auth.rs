use actix_web::{dev::Payload, test, FromRequest};
use agora::auth::{create_jwt, create_user_jwt, roles_for, Auth, Role};
use agora::models::User;
use std::env;

// Helper that guarantees a sufficiently long secret for tests.
fn set_secret() {
    env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
}

fn sample_user(is_admin: bool) -> User {
    User {
        id: 7,
        username: "ada".into(),
        email: "ada@example.com".into(),
        name: None,
        bio: None,
        avatar_url: None,
        reputation: 0,
        is_admin,
        created_at: chrono::Utc::now(),
    }
}

#[actix_web::test]
#[serial_test::serial]
async fn jwt_roundtrip_ok() {
    set_secret();
    let token = create_jwt(42, "tester", vec![Role::User]).expect("token");
    let req = test::TestRequest::default()
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .to_http_request();
    let mut pl = Payload::None;
    let auth = Auth::from_request(&req, &mut pl).await.expect("extract");
    assert_eq!(auth.0.sub, "42");
    assert_eq!(auth.0.username, "tester");
    assert_eq!(auth.user_id(), Some(42));
    assert!(!auth.is_admin());
}

#[actix_web::test]
#[serial_test::serial]
async fn extractor_rejects_invalid_token() {
    set_secret();
    let req = test::TestRequest::default()
        .insert_header(("Authorization", "Bearer notatoken"))
        .to_http_request();
    let mut pl = Payload::None;
    assert!(Auth::from_request(&req, &mut pl).await.is_err());
}

#[actix_web::test]
#[serial_test::serial]
async fn extractor_requires_header() {
    set_secret();
    let req = test::TestRequest::default().to_http_request();
    let mut pl = Payload::None;
    assert!(Auth::from_request(&req, &mut pl).await.is_err());
}

#[actix_web::test]
#[serial_test::serial]
async fn token_signed_with_other_secret_is_rejected() {
    env::set_var("JWT_SECRET", "another-secret-that-is-long-enough-xx");
    let token = create_jwt(1, "mallory", vec![Role::Admin]).unwrap();
    set_secret();
    let req = test::TestRequest::default()
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_http_request();
    let mut pl = Payload::None;
    assert!(Auth::from_request(&req, &mut pl).await.is_err());
}

#[actix_web::test]
#[serial_test::serial]
async fn admin_users_get_admin_role() {
    set_secret();
    assert_eq!(roles_for(&sample_user(false)), vec![Role::User]);
    assert!(roles_for(&sample_user(true)).contains(&Role::Admin));

    let token = create_user_jwt(&sample_user(true)).unwrap();
    let req = test::TestRequest::default()
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_http_request();
    let mut pl = Payload::None;
    let auth = Auth::from_request(&req, &mut pl).await.unwrap();
    assert!(auth.is_admin());
    assert_eq!(auth.user_id(), Some(7));
}
