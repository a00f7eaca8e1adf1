use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::Deserialize;

/// Answers "does this user currently have an active subscription".
#[async_trait]
pub trait SubscriptionCheck: Send + Sync {
    async fn is_active(&self, user_id: &str) -> anyhow::Result<bool>;
}

/// Calls this service's own `/api/check-subscription` endpoint.
#[derive(Clone)]
pub struct HttpSubscriptionCheck {
    http: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckSubscriptionResponse {
    #[serde(default)]
    subscription_active: bool,
}

impl HttpSubscriptionCheck {
    pub fn new(app_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build subscription check HTTP client")?;

        Ok(Self {
            http,
            endpoint: format!("{}/api/check-subscription", app_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl SubscriptionCheck for HttpSubscriptionCheck {
    async fn is_active(&self, user_id: &str) -> anyhow::Result<bool> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("userId", user_id)])
            .send()
            .await
            .with_context(|| format!("failed to call {}", self.endpoint))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "{} responded with status {}",
                self.endpoint,
                response.status()
            ));
        }

        let body: CheckSubscriptionResponse = response
            .json()
            .await
            .context("invalid check-subscription response")?;
        Ok(body.subscription_active)
    }
}
