mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use http_body_util::BodyExt;

use common::{get, json_body, location, send, FakeSubscriptionCheck, TestAppBuilder};

#[tokio::test]
async fn signed_out_visitors_are_sent_to_sign_up() {
    let app = TestAppBuilder::new().build();

    for path in ["/mealplan", "/account", "/api/profile/subscription-status"] {
        let response = send(&app, get(path, None)).await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT, "{path}");
        assert_eq!(location(&response), Some("/sign-up"), "{path}");
    }
}

#[tokio::test]
async fn public_paths_pass_through_when_signed_out() {
    let app = TestAppBuilder::new().build();

    for path in ["/", "/sign-up", "/subscribe"] {
        let response = send(&app, get(path, None)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");
    }
}

#[tokio::test]
async fn static_assets_skip_the_gate() {
    let app = TestAppBuilder::new().build();

    for path in ["/logo.png", "/_next/static/chunk", "/fonts/inter.woff2"] {
        let response = send(&app, get(path, None)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");
        assert_eq!(location(&response), None, "{path}");
    }
}

#[tokio::test]
async fn signed_in_users_skip_sign_up() {
    let app = TestAppBuilder::new().build();

    let response = send(&app, get("/sign-up", Some("u1"))).await;

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), Some("/mealplan"));
}

#[tokio::test]
async fn inactive_subscribers_are_sent_to_subscribe() {
    let app = TestAppBuilder::new()
        .subscription_check(FakeSubscriptionCheck::Active(false))
        .build();

    let response = send(&app, get("/mealplan", Some("u1"))).await;

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), Some("/subscribe"));
}

#[tokio::test]
async fn failing_subscription_check_is_treated_as_inactive() {
    let app = TestAppBuilder::new()
        .subscription_check(FakeSubscriptionCheck::Unreachable)
        .build();

    let response = send(&app, get("/mealplan/today", Some("u1"))).await;

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), Some("/subscribe"));
}

#[tokio::test]
async fn active_subscribers_reach_the_meal_plan() {
    let app = TestAppBuilder::new()
        .subscription_check(FakeSubscriptionCheck::Active(true))
        .build();

    let response = send(&app, get("/mealplan", Some("u1"))).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(location(&response), None);
}

#[tokio::test]
async fn session_cookie_is_accepted() {
    let app = TestAppBuilder::new().build();

    let request = Request::builder()
        .uri("/sign-up")
        .header(header::COOKIE, "theme=dark; __session=user:u1")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), Some("/mealplan"));
}

#[tokio::test]
async fn invalid_session_is_treated_as_signed_out() {
    let app = TestAppBuilder::new().build();

    let request = Request::builder()
        .uri("/mealplan")
        .header(header::AUTHORIZATION, "Bearer forged")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), Some("/sign-up"));
}

#[tokio::test]
async fn check_subscription_is_reachable_without_session() {
    let app = TestAppBuilder::new()
        .profile(common::subscribed_profile("u1", "sub_1", "week"))
        .build();

    let response = send(&app, get("/api/check-subscription?userId=u1", None)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        serde_json::json!({ "subscriptionActive": true })
    );
}

#[tokio::test]
async fn health_is_not_gated() {
    let app = TestAppBuilder::new().build();

    let response = send(&app, get("/health", None)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"ok");
}
