#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use anyhow::anyhow;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, Response},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use mealplan_api_server::{
    auth::{SessionClaims, SessionVerifier},
    build_router,
    clerk::UserDirectory,
    config::Config,
    profiles::{MemoryProfileStore, Profile},
    state::{AppState, Services},
    stripe_api::{
        BillingProvider, CheckoutRequest, StripeCheckoutSession, StripePrice, StripeSubscription,
        StripeSubscriptionItem, StripeSubscriptionItems,
    },
    subscription_check::SubscriptionCheck,
};
use parking_lot::Mutex;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

pub fn test_config() -> Config {
    Config {
        port: 3000,
        app_url: "http://localhost:3000".to_string(),
        production: false,
        database_url: None,
        database_max_connections: 1,
        clerk_secret_key: None,
        clerk_issuer: None,
        clerk_api_base: "http://clerk.invalid/v1".to_string(),
        stripe_secret_key: Some("sk_test".to_string()),
        stripe_webhook_secret: Some(WEBHOOK_SECRET.to_string()),
        stripe_api_base: "http://stripe.invalid/v1".to_string(),
        stripe_price_weekly: Some("price_week".to_string()),
        stripe_price_monthly: Some("price_month".to_string()),
        stripe_price_yearly: Some("price_year".to_string()),
        subscription_check_timeout: Duration::from_secs(1),
    }
}

/// Accepts tokens of the form `user:<id>`.
pub struct FakeSessions;

#[async_trait]
impl SessionVerifier for FakeSessions {
    async fn verify_token(&self, token: &str) -> anyhow::Result<SessionClaims> {
        let user_id = token
            .strip_prefix("user:")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow!("invalid session token"))?;
        Ok(SessionClaims {
            sub: user_id.to_string(),
            iss: "https://clerk.test".to_string(),
            exp: usize::MAX,
            nbf: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingCall {
    Retrieve(String),
    ChangePrice {
        subscription_id: String,
        item_id: String,
        price_id: String,
    },
    Cancel(String),
    Checkout(CheckoutRequest),
}

/// Records every call and answers with canned subscriptions.
#[derive(Default)]
pub struct FakeBilling {
    pub calls: Mutex<Vec<BillingCall>>,
    pub without_items: bool,
    pub fail_price_change: bool,
}

impl FakeBilling {
    pub fn calls(&self) -> Vec<BillingCall> {
        self.calls.lock().clone()
    }

    fn subscription(
        &self,
        id: &str,
        price_id: &str,
        cancel_at_period_end: bool,
    ) -> StripeSubscription {
        let data = if self.without_items {
            Vec::new()
        } else {
            vec![StripeSubscriptionItem {
                id: format!("si_{id}"),
                price: Some(StripePrice {
                    id: Some(price_id.to_string()),
                }),
            }]
        };
        StripeSubscription {
            id: id.to_string(),
            customer: None,
            status: Some("active".to_string()),
            cancel_at_period_end,
            items: StripeSubscriptionItems { data },
        }
    }
}

#[async_trait]
impl BillingProvider for FakeBilling {
    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> anyhow::Result<StripeSubscription> {
        self.calls
            .lock()
            .push(BillingCall::Retrieve(subscription_id.to_string()));
        Ok(self.subscription(subscription_id, "price_week", false))
    }

    async fn change_subscription_price(
        &self,
        subscription_id: &str,
        item_id: &str,
        price_id: &str,
    ) -> anyhow::Result<StripeSubscription> {
        self.calls.lock().push(BillingCall::ChangePrice {
            subscription_id: subscription_id.to_string(),
            item_id: item_id.to_string(),
            price_id: price_id.to_string(),
        });
        if self.fail_price_change {
            return Err(anyhow!("Your card was declined."));
        }
        Ok(self.subscription(subscription_id, price_id, false))
    }

    async fn cancel_at_period_end(
        &self,
        subscription_id: &str,
    ) -> anyhow::Result<StripeSubscription> {
        self.calls
            .lock()
            .push(BillingCall::Cancel(subscription_id.to_string()));
        Ok(self.subscription(subscription_id, "price_week", true))
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> anyhow::Result<StripeCheckoutSession> {
        self.calls
            .lock()
            .push(BillingCall::Checkout(request.clone()));
        Ok(StripeCheckoutSession {
            id: "cs_test_1".to_string(),
            url: Some("https://checkout.stripe.test/cs_test_1".to_string()),
        })
    }
}

#[derive(Default)]
pub struct FakeUsers {
    pub email: Option<String>,
}

#[async_trait]
impl UserDirectory for FakeUsers {
    async fn primary_email(&self, _user_id: &str) -> anyhow::Result<Option<String>> {
        Ok(self.email.clone())
    }
}

pub enum FakeSubscriptionCheck {
    Active(bool),
    Unreachable,
}

#[async_trait]
impl SubscriptionCheck for FakeSubscriptionCheck {
    async fn is_active(&self, _user_id: &str) -> anyhow::Result<bool> {
        match self {
            FakeSubscriptionCheck::Active(active) => Ok(*active),
            FakeSubscriptionCheck::Unreachable => Err(anyhow!("connection refused")),
        }
    }
}

pub struct TestApp {
    pub router: Router,
    pub profiles: Arc<MemoryProfileStore>,
    pub billing: Arc<FakeBilling>,
}

pub struct TestAppBuilder {
    config: Config,
    billing: FakeBilling,
    users: FakeUsers,
    subscription_check: FakeSubscriptionCheck,
    profiles: Vec<Profile>,
}

impl TestAppBuilder {
    pub fn new() -> Self {
        Self {
            config: test_config(),
            billing: FakeBilling::default(),
            users: FakeUsers {
                email: Some("cook@example.com".to_string()),
            },
            subscription_check: FakeSubscriptionCheck::Active(true),
            profiles: Vec::new(),
        }
    }

    pub fn config(mut self, update: impl FnOnce(&mut Config)) -> Self {
        update(&mut self.config);
        self
    }

    pub fn billing(mut self, billing: FakeBilling) -> Self {
        self.billing = billing;
        self
    }

    pub fn users(mut self, users: FakeUsers) -> Self {
        self.users = users;
        self
    }

    pub fn subscription_check(mut self, check: FakeSubscriptionCheck) -> Self {
        self.subscription_check = check;
        self
    }

    pub fn profile(mut self, profile: Profile) -> Self {
        self.profiles.push(profile);
        self
    }

    pub fn build(self) -> TestApp {
        let profiles = Arc::new(MemoryProfileStore::new());
        for profile in self.profiles {
            profiles.insert(profile);
        }
        let billing = Arc::new(self.billing);

        let state = AppState::new(
            self.config,
            Services {
                profiles: profiles.clone(),
                billing: billing.clone(),
                sessions: Arc::new(FakeSessions),
                users: Arc::new(self.users),
                subscription_check: Arc::new(self.subscription_check),
            },
        );

        TestApp {
            router: build_router(state),
            profiles,
            billing,
        }
    }
}

pub fn profile(user_id: &str) -> Profile {
    let now = Utc::now();
    Profile {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        email: Some(format!("{user_id}@example.com")),
        subscription_tier: None,
        subscription_active: false,
        stripe_subscription_id: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn subscribed_profile(user_id: &str, subscription_id: &str, tier: &str) -> Profile {
    Profile {
        subscription_tier: Some(tier.to_string()),
        subscription_active: true,
        stripe_subscription_id: Some(subscription_id.to_string()),
        ..profile(user_id)
    }
}

pub fn get(uri: &str, user_id: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(user_id) = user_id {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer user:{user_id}"));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, user_id: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(user_id) = user_id {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer user:{user_id}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn send(app: &TestApp, request: Request<Body>) -> Response<Body> {
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn location(response: &Response<Body>) -> Option<&str> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
}
