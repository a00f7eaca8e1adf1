mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryProfileStore;
pub use postgres::PostgresProfileStore;

/// Local mirror of a user's billing state.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub id: Uuid,
    pub user_id: String,
    pub email: Option<String>,
    pub subscription_tier: Option<String>,
    pub subscription_active: bool,
    pub stripe_subscription_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProfile {
    pub user_id: String,
    pub email: Option<String>,
}

/// Sparse update: `None` leaves a column untouched, `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub subscription_tier: Option<Option<String>>,
    pub subscription_active: Option<bool>,
    pub stripe_subscription_id: Option<Option<String>>,
}

impl ProfileUpdate {
    pub fn activate(subscription_id: impl Into<String>, tier: Option<String>) -> Self {
        Self {
            subscription_tier: Some(tier),
            subscription_active: Some(true),
            stripe_subscription_id: Some(Some(subscription_id.into())),
        }
    }

    pub fn deactivate() -> Self {
        Self {
            subscription_active: Some(false),
            ..Self::default()
        }
    }

    /// Back to the unsubscribed state; the row itself is kept.
    pub fn clear_subscription() -> Self {
        Self {
            subscription_tier: Some(None),
            subscription_active: Some(false),
            stripe_subscription_id: Some(None),
        }
    }

    pub fn apply(&self, profile: &mut Profile) {
        if let Some(tier) = &self.subscription_tier {
            profile.subscription_tier = tier.clone();
        }
        if let Some(active) = self.subscription_active {
            profile.subscription_active = active;
        }
        if let Some(subscription_id) = &self.stripe_subscription_id {
            profile.stripe_subscription_id = subscription_id.clone();
        }
        profile.updated_at = Utc::now();
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("profile not found")]
    NotFound,
    #[error("{0}")]
    Conflict(String),
    #[error("an active subscription requires a subscription id")]
    Invariant,
    #[error("database error: {0}")]
    Database(String),
}

/// Backed by PostgreSQL in deployments and by [`MemoryProfileStore`] in
/// development and tests.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn find_by_user_id(&self, user_id: &str) -> Result<Option<Profile>, StoreError>;

    async fn find_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> Result<Option<Profile>, StoreError>;

    /// Fails with [`StoreError::Conflict`] when the user already has a profile.
    async fn create(&self, profile: NewProfile) -> Result<Profile, StoreError>;

    /// Fails with [`StoreError::NotFound`] when no profile exists for `user_id`.
    async fn update(&self, user_id: &str, update: ProfileUpdate) -> Result<Profile, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_profile() -> Profile {
        let now = Utc::now();
        Profile {
            id: Uuid::new_v4(),
            user_id: "user_1".to_string(),
            email: None,
            subscription_tier: Some("week".to_string()),
            subscription_active: false,
            stripe_subscription_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn deactivate_leaves_other_fields_alone() {
        let mut profile = blank_profile();
        ProfileUpdate::activate("sub_1", Some("month".into())).apply(&mut profile);
        ProfileUpdate::deactivate().apply(&mut profile);

        assert!(!profile.subscription_active);
        assert_eq!(profile.stripe_subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(profile.subscription_tier.as_deref(), Some("month"));
    }

    #[test]
    fn clear_subscription_nulls_everything() {
        let mut profile = blank_profile();
        ProfileUpdate::activate("sub_1", None).apply(&mut profile);
        assert_eq!(profile.subscription_tier, None);

        ProfileUpdate::clear_subscription().apply(&mut profile);
        assert!(!profile.subscription_active);
        assert_eq!(profile.stripe_subscription_id, None);
        assert_eq!(profile.subscription_tier, None);
    }
}
