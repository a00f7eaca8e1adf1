use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{NewProfile, Profile, ProfileStore, ProfileUpdate, StoreError};

/// Process-local store keyed by user id. Enforces the same uniqueness rules
/// as the database schema.
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    profiles: Mutex<HashMap<String, Profile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a profile as-is.
    pub fn insert(&self, profile: Profile) {
        self.profiles.lock().insert(profile.user_id.clone(), profile);
    }

    pub fn get(&self, user_id: &str) -> Option<Profile> {
        self.profiles.lock().get(user_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.profiles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn find_by_user_id(&self, user_id: &str) -> Result<Option<Profile>, StoreError> {
        Ok(self.get(user_id))
    }

    async fn find_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> Result<Option<Profile>, StoreError> {
        let profiles = self.profiles.lock();
        Ok(profiles
            .values()
            .find(|profile| profile.stripe_subscription_id.as_deref() == Some(subscription_id))
            .cloned())
    }

    async fn create(&self, profile: NewProfile) -> Result<Profile, StoreError> {
        let mut profiles = self.profiles.lock();
        if profiles.contains_key(&profile.user_id) {
            return Err(StoreError::Conflict(format!(
                "profile already exists for user {}",
                profile.user_id
            )));
        }

        let now = Utc::now();
        let created = Profile {
            id: Uuid::new_v4(),
            user_id: profile.user_id,
            email: profile.email,
            subscription_tier: None,
            subscription_active: false,
            stripe_subscription_id: None,
            created_at: now,
            updated_at: now,
        };
        profiles.insert(created.user_id.clone(), created.clone());
        Ok(created)
    }

    async fn update(&self, user_id: &str, update: ProfileUpdate) -> Result<Profile, StoreError> {
        let mut profiles = self.profiles.lock();

        if let Some(Some(subscription_id)) = &update.stripe_subscription_id {
            let taken = profiles.values().any(|profile| {
                profile.user_id != user_id
                    && profile.stripe_subscription_id.as_deref() == Some(subscription_id.as_str())
            });
            if taken {
                return Err(StoreError::Conflict(format!(
                    "subscription {subscription_id} belongs to another profile"
                )));
            }
        }

        let profile = profiles.get_mut(user_id).ok_or(StoreError::NotFound)?;
        let mut updated = profile.clone();
        update.apply(&mut updated);
        if updated.subscription_active && updated.stripe_subscription_id.is_none() {
            return Err(StoreError::Invariant);
        }

        *profile = updated.clone();
        Ok(updated)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_profile(user_id: &str) -> NewProfile {
        NewProfile {
            user_id: user_id.to_string(),
            email: Some(format!("{user_id}@example.com")),
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_user() {
        let store = MemoryProfileStore::new();
        store.create(new_profile("u1")).await.unwrap();

        let err = store.create(new_profile("u1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn subscription_id_is_unique_across_profiles() {
        let store = MemoryProfileStore::new();
        store.create(new_profile("u1")).await.unwrap();
        store.create(new_profile("u2")).await.unwrap();

        store
            .update("u1", ProfileUpdate::activate("sub_1", None))
            .await
            .unwrap();
        let err = store
            .update("u2", ProfileUpdate::activate("sub_1", None))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // re-applying to the owner is fine
        store
            .update("u1", ProfileUpdate::activate("sub_1", Some("week".into())))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn active_without_subscription_is_rejected() {
        let store = MemoryProfileStore::new();
        store.create(new_profile("u1")).await.unwrap();

        let update = ProfileUpdate {
            subscription_active: Some(true),
            ..ProfileUpdate::default()
        };
        let err = store.update("u1", update).await.unwrap_err();
        assert!(matches!(err, StoreError::Invariant));
        assert!(!store.get("u1").unwrap().subscription_active);
    }

    #[tokio::test]
    async fn update_missing_profile_is_not_found() {
        let store = MemoryProfileStore::new();
        let err = store
            .update("ghost", ProfileUpdate::deactivate())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn lookup_by_subscription_id() {
        let store = MemoryProfileStore::new();
        store.create(new_profile("u1")).await.unwrap();
        store
            .update("u1", ProfileUpdate::activate("sub_9", None))
            .await
            .unwrap();

        let found = store.find_by_subscription_id("sub_9").await.unwrap();
        assert_eq!(found.map(|p| p.user_id).as_deref(), Some("u1"));
        assert!(store
            .find_by_subscription_id("sub_other")
            .await
            .unwrap()
            .is_none());
    }
}
