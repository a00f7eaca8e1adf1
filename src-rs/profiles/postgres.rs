use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use super::{NewProfile, Profile, ProfileStore, ProfileUpdate, StoreError};

const PROFILE_COLUMNS: &str = "id, user_id, email, subscription_tier, subscription_active, \
     stripe_subscription_id, created_at, updated_at";

pub struct PostgresProfileStore {
    pool: PgPool,
}

impl PostgresProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects and brings the schema up to date.
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        Ok(Self::new(pool))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProfileRow {
    id: Uuid,
    user_id: String,
    email: Option<String>,
    subscription_tier: Option<String>,
    subscription_active: bool,
    stripe_subscription_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            email: row.email,
            subscription_tier: row.subscription_tier,
            subscription_active: row.subscription_active,
            stripe_subscription_id: row.stripe_subscription_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn map_db_error(action: &str, error: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &error {
        match db_err.constraint() {
            Some("profiles_user_id_key") => {
                return StoreError::Conflict("profile already exists for user".to_string())
            }
            Some("profiles_stripe_subscription_id_key") => {
                return StoreError::Conflict(
                    "subscription belongs to another profile".to_string(),
                )
            }
            Some("profiles_active_requires_subscription") => return StoreError::Invariant,
            _ => {}
        }
    }
    StoreError::Database(format!("failed to {action}: {error}"))
}

#[async_trait]
impl ProfileStore for PostgresProfileStore {
    async fn find_by_user_id(&self, user_id: &str) -> Result<Option<Profile>, StoreError> {
        let row: Option<ProfileRow> = sqlx::query_as(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_error("find profile", e))?;

        Ok(row.map(Profile::from))
    }

    async fn find_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> Result<Option<Profile>, StoreError> {
        let row: Option<ProfileRow> = sqlx::query_as(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE stripe_subscription_id = $1"
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_error("find profile by subscription", e))?;

        Ok(row.map(Profile::from))
    }

    async fn create(&self, profile: NewProfile) -> Result<Profile, StoreError> {
        let row: ProfileRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO profiles (id, user_id, email, subscription_active)
            VALUES ($1, $2, $3, FALSE)
            RETURNING {PROFILE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&profile.user_id)
        .bind(&profile.email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_error("create profile", e))?;

        Ok(row.into())
    }

    async fn update(&self, user_id: &str, update: ProfileUpdate) -> Result<Profile, StoreError> {
        let row: Option<ProfileRow> = sqlx::query_as(&format!(
            r#"
            UPDATE profiles SET
                subscription_tier = CASE WHEN $2 THEN $3 ELSE subscription_tier END,
                subscription_active = COALESCE($4, subscription_active),
                stripe_subscription_id = CASE WHEN $5 THEN $6 ELSE stripe_subscription_id END,
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING {PROFILE_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(update.subscription_tier.is_some())
        .bind(update.subscription_tier.clone().flatten())
        .bind(update.subscription_active)
        .bind(update.stripe_subscription_id.is_some())
        .bind(update.stripe_subscription_id.clone().flatten())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_error("update profile", e))?;

        row.map(Profile::from).ok_or(StoreError::NotFound)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error("reach database", e))?;
        Ok(())
    }
}
