use std::sync::Arc;

use crate::{
    auth::SessionVerifier, clerk::UserDirectory, config::Config, plans::PlanCatalog,
    profiles::ProfileStore, stripe_api::BillingProvider, subscription_check::SubscriptionCheck,
    webhook::WebhookVerifier,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub profiles: Arc<dyn ProfileStore>,
    pub billing: Arc<dyn BillingProvider>,
    pub sessions: Arc<dyn SessionVerifier>,
    pub users: Arc<dyn UserDirectory>,
    pub subscription_check: Arc<dyn SubscriptionCheck>,
    pub webhook_verifier: WebhookVerifier,
    pub plans: PlanCatalog,
}

/// External collaborators the service is wired against.
pub struct Services {
    pub profiles: Arc<dyn ProfileStore>,
    pub billing: Arc<dyn BillingProvider>,
    pub sessions: Arc<dyn SessionVerifier>,
    pub users: Arc<dyn UserDirectory>,
    pub subscription_check: Arc<dyn SubscriptionCheck>,
}

impl AppState {
    pub fn new(config: Config, services: Services) -> Self {
        let plans = PlanCatalog::from_config(&config);
        let webhook_verifier = WebhookVerifier::new(config.stripe_webhook_secret.clone());
        Self {
            config: Arc::new(config),
            profiles: services.profiles,
            billing: services.billing,
            sessions: services.sessions,
            users: services.users,
            subscription_check: services.subscription_check,
            webhook_verifier,
            plans,
        }
    }
}
