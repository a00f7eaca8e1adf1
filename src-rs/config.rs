use std::{env, time::Duration};

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub app_url: String,
    pub production: bool,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub clerk_secret_key: Option<String>,
    pub clerk_issuer: Option<String>,
    pub clerk_api_base: String,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub stripe_api_base: String,
    pub stripe_price_weekly: Option<String>,
    pub stripe_price_monthly: Option<String>,
    pub stripe_price_yearly: Option<String>,
    pub subscription_check_timeout: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = parse_u16(env::var("PORT").ok(), 3000);

        let app_url = env::var("APP_URL")
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| format!("http://127.0.0.1:{port}"));

        let production = env::var("APP_ENV")
            .ok()
            .map(|value| value.eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        let subscription_check_timeout = Duration::from_secs(parse_u64(
            env::var("SUBSCRIPTION_CHECK_TIMEOUT_SECS").ok(),
            5,
        ));

        Ok(Self {
            port,
            app_url,
            production,
            database_url: non_empty_var("DATABASE_URL"),
            database_max_connections: parse_u32(env::var("DATABASE_MAX_CONNECTIONS").ok(), 5),
            clerk_secret_key: non_empty_var("CLERK_SECRET_KEY"),
            clerk_issuer: non_empty_var("CLERK_ISSUER"),
            clerk_api_base: env::var("CLERK_API_BASE")
                .unwrap_or_else(|_| "https://api.clerk.com/v1".to_string()),
            stripe_secret_key: non_empty_var("STRIPE_SECRET_KEY"),
            stripe_webhook_secret: non_empty_var("STRIPE_WEBHOOK_SECRET"),
            stripe_api_base: env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com/v1".to_string()),
            stripe_price_weekly: non_empty_var("STRIPE_PRICE_WEEKLY"),
            stripe_price_monthly: non_empty_var("STRIPE_PRICE_MONTHLY"),
            stripe_price_yearly: non_empty_var("STRIPE_PRICE_YEARLY"),
            subscription_check_timeout,
        })
    }

    /// Fails fast on settings that only warn in development.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.production {
            return Ok(());
        }
        if self.database_url.is_none() {
            return Err(anyhow::anyhow!(
                "DATABASE_URL environment variable is not set"
            ));
        }
        if self.clerk_issuer.is_none() {
            return Err(anyhow::anyhow!(
                "CLERK_ISSUER environment variable is not set"
            ));
        }
        if self.stripe_secret_key.is_none() {
            return Err(anyhow::anyhow!(
                "STRIPE_SECRET_KEY environment variable is not set"
            ));
        }
        if self.stripe_webhook_secret.is_none() {
            return Err(anyhow::anyhow!(
                "STRIPE_WEBHOOK_SECRET environment variable is not set"
            ));
        }
        Ok(())
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_u16(value: Option<String>, fallback: u16) -> u16 {
    value
        .and_then(|v| v.parse::<u16>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(fallback)
}

fn parse_u32(value: Option<String>, fallback: u32) -> u32 {
    value
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(fallback)
}

fn parse_u64(value: Option<String>, fallback: u64) -> u64 {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(fallback)
}
