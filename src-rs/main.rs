use std::{collections::HashSet, env, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use mealplan_api_server::{
    auth::AuthService,
    build_router,
    clerk::ClerkClient,
    config::Config,
    profiles::{MemoryProfileStore, PostgresProfileStore, ProfileStore},
    state::{AppState, Services},
    stripe_api::StripeApi,
    subscription_check::HttpSubscriptionCheck,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loaded_env_files = load_env_files()?;
    init_tracing();
    if loaded_env_files.is_empty() {
        tracing::warn!("No .env or .env.local file found. Using process environment only.");
    } else {
        let files = loaded_env_files
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!(files = %files, "Loaded environment files");
    }

    let config = Config::from_env()?;
    config.validate()?;
    warn_on_missing_settings(&config);

    let profiles: Arc<dyn ProfileStore> = match config.database_url.as_deref() {
        Some(database_url) => {
            let store =
                PostgresProfileStore::connect(database_url, config.database_max_connections)
                    .await?;
            tracing::info!("Connected to Postgres profile store");
            Arc::new(store)
        }
        None => {
            tracing::warn!(
                "DATABASE_URL is not set. Profiles are kept in memory and lost on restart."
            );
            Arc::new(MemoryProfileStore::new())
        }
    };

    let services = Services {
        profiles,
        billing: Arc::new(StripeApi::new(
            config.stripe_secret_key.clone(),
            config.stripe_api_base.clone(),
        )?),
        sessions: Arc::new(AuthService::new(config.clerk_issuer.clone())?),
        users: Arc::new(ClerkClient::new(
            config.clerk_api_base.clone(),
            config.clerk_secret_key.as_deref(),
        )?),
        subscription_check: Arc::new(HttpSubscriptionCheck::new(
            &config.app_url,
            config.subscription_check_timeout,
        )?),
    };

    let state = AppState::new(config.clone(), services);
    if state.plans.is_empty() {
        tracing::warn!("No STRIPE_PRICE_* variables set. Plan changes and checkout will be rejected.");
    }

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(port = config.port, app_url = %config.app_url, "Listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind TCP listener")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    Ok(())
}

fn warn_on_missing_settings(config: &Config) {
    if config.stripe_secret_key.is_none() {
        tracing::warn!(
            "STRIPE_SECRET_KEY is not set. Stripe functionality will not work until it is provided."
        );
    }
    if config.stripe_webhook_secret.is_none() {
        tracing::warn!("STRIPE_WEBHOOK_SECRET is not set. Every webhook delivery will be rejected.");
    }
    if config.clerk_issuer.is_none() {
        tracing::warn!("CLERK_ISSUER is not set. Every session token will be rejected.");
    }
    if config.clerk_secret_key.is_none() {
        tracing::warn!("CLERK_SECRET_KEY is not set. Profile creation cannot look up user emails.");
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn load_env_files() -> anyhow::Result<Vec<PathBuf>> {
    let mut roots = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        roots.push(cwd);
    }
    if let Some(executable_dir) = env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(PathBuf::from))
    {
        roots.push(executable_dir);
    }
    roots.push(PathBuf::from(env!("CARGO_MANIFEST_DIR")));

    let mut seen_roots = HashSet::new();
    let mut loaded = Vec::new();

    for root in roots.into_iter().filter(|root| seen_roots.insert(root.clone())) {
        for filename in [".env", ".env.local"] {
            let path = root.join(filename);
            if path.is_file() {
                dotenvy::from_path(&path)
                    .with_context(|| format!("failed to load {}", path.display()))?;
                loaded.push(path);
            }
        }
    }

    Ok(loaded)
}
