use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;

/// Lookup of user details held by the identity provider.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn primary_email(&self, user_id: &str) -> anyhow::Result<Option<String>>;
}

#[derive(Clone)]
pub struct ClerkClient {
    http: reqwest::Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct ClerkUser {
    primary_email_address_id: Option<String>,
    #[serde(default)]
    email_addresses: Vec<ClerkEmailAddress>,
}

#[derive(Debug, Deserialize)]
struct ClerkEmailAddress {
    id: String,
    email_address: String,
}

impl ClerkUser {
    fn into_primary_email(self) -> Option<String> {
        let primary_id = self.primary_email_address_id?;
        self.email_addresses
            .into_iter()
            .find(|entry| entry.id == primary_id)
            .map(|entry| entry.email_address)
    }
}

impl ClerkClient {
    pub fn new(api_base: String, secret_key: Option<&str>) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(secret) = secret_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {secret}"))
                    .context("invalid CLERK_SECRET_KEY for header")?,
            );
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to build Clerk HTTP client")?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl UserDirectory for ClerkClient {
    async fn primary_email(&self, user_id: &str) -> anyhow::Result<Option<String>> {
        let url = format!("{}/users/{}", self.api_base, user_id);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to call Clerk API for user {user_id}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Clerk API get user failed with status {}: {}",
                status,
                body
            ));
        }

        let user = response
            .json::<ClerkUser>()
            .await
            .context("failed to decode Clerk user response")?;
        Ok(user.into_primary_email())
    }
}
