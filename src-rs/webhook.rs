use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::{
    profiles::{ProfileStore, ProfileUpdate, StoreError},
    stripe_api::{IdOrObject, Metadata},
};

const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("STRIPE_WEBHOOK_SECRET is not configured.")]
    NotConfigured,
    #[error("Missing Stripe signature.")]
    MissingHeader,
    #[error("Missing Stripe timestamp in signature.")]
    MissingTimestamp,
    #[error("Missing Stripe v1 signature.")]
    MissingSignature,
    #[error("Stripe signature timestamp outside tolerance.")]
    OutsideTolerance,
    #[error("Invalid Stripe signature.")]
    Mismatch,
}

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Option<String>,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|value| !value.trim().is_empty()),
            tolerance_secs: SIGNATURE_TOLERANCE_SECS,
        }
    }

    pub fn verify(
        &self,
        signature_header: Option<&str>,
        payload: &[u8],
    ) -> Result<(), SignatureError> {
        self.verify_at(signature_header, payload, Utc::now().timestamp())
    }

    pub fn verify_at(
        &self,
        signature_header: Option<&str>,
        payload: &[u8],
        now: i64,
    ) -> Result<(), SignatureError> {
        let secret = self.secret.as_deref().ok_or(SignatureError::NotConfigured)?;
        let signature_header = signature_header
            .filter(|value| !value.trim().is_empty())
            .ok_or(SignatureError::MissingHeader)?;

        let mut timestamp: Option<i64> = None;
        let mut v1_signatures: Vec<&str> = Vec::new();

        for part in signature_header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => timestamp = value.parse::<i64>().ok(),
                "v1" => v1_signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
        if v1_signatures.is_empty() {
            return Err(SignatureError::MissingSignature);
        }
        // only the age is bounded; a sender clock running ahead is accepted
        if now - timestamp > self.tolerance_secs {
            return Err(SignatureError::OutsideTolerance);
        }

        let expected =
            sign_payload(secret, timestamp, payload).ok_or(SignatureError::Mismatch)?;
        let is_match = v1_signatures
            .into_iter()
            .filter(|candidate| !candidate.is_empty())
            .any(|candidate| expected.as_bytes().ct_eq(candidate.as_bytes()).into());

        if is_match {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`, as Stripe computes `v1`.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> Option<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionObject {
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub subscription: Option<IdOrObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceObject {
    #[serde(default)]
    pub subscription: Option<IdOrObject>,
    #[serde(default)]
    pub parent: Option<InvoiceParent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceParent {
    #[serde(default)]
    pub subscription_details: Option<InvoiceSubscriptionDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceSubscriptionDetails {
    #[serde(default)]
    pub subscription: Option<IdOrObject>,
}

impl InvoiceObject {
    /// Older API versions put the id at the top level, newer ones under
    /// `parent.subscription_details`.
    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription
            .as_ref()
            .or_else(|| {
                self.parent
                    .as_ref()
                    .and_then(|parent| parent.subscription_details.as_ref())
                    .and_then(|details| details.subscription.as_ref())
            })
            .map(IdOrObject::id)
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
}

#[derive(Debug, Clone)]
pub enum BillingEvent {
    CheckoutCompleted(CheckoutSessionObject),
    InvoicePaymentFailed(InvoiceObject),
    SubscriptionDeleted(SubscriptionObject),
    Unhandled(String),
}

impl BillingEvent {
    pub fn from_envelope(envelope: EventEnvelope) -> Result<Self, serde_json::Error> {
        let object = envelope.data.object;
        let event = match envelope.event_type.as_str() {
            "checkout.session.completed" => {
                BillingEvent::CheckoutCompleted(serde_json::from_value(object)?)
            }
            "invoice.payment_failed" => {
                BillingEvent::InvoicePaymentFailed(serde_json::from_value(object)?)
            }
            "customer.subscription.deleted" => {
                BillingEvent::SubscriptionDeleted(serde_json::from_value(object)?)
            }
            _ => BillingEvent::Unhandled(envelope.event_type),
        };
        Ok(event)
    }

    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        let envelope: EventEnvelope = serde_json::from_slice(payload)?;
        Self::from_envelope(envelope)
    }

    pub fn kind(&self) -> &str {
        match self {
            BillingEvent::CheckoutCompleted(_) => "checkout.session.completed",
            BillingEvent::InvoicePaymentFailed(_) => "invoice.payment_failed",
            BillingEvent::SubscriptionDeleted(_) => "customer.subscription.deleted",
            BillingEvent::Unhandled(kind) => kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Updated { user_id: String },
    Skipped(&'static str),
    Unhandled,
    Failed,
}

/// Applies one event to the profile store. Every handler writes absolute
/// values, so replays converge on the same state. Never fails: persistence
/// errors are logged and reported as [`SyncOutcome::Failed`].
pub async fn apply_event(store: &dyn ProfileStore, event: BillingEvent) -> SyncOutcome {
    let kind = event.kind().to_string();
    let result = match event {
        BillingEvent::CheckoutCompleted(session) => checkout_completed(store, session).await,
        BillingEvent::InvoicePaymentFailed(invoice) => payment_failed(store, invoice).await,
        BillingEvent::SubscriptionDeleted(subscription) => {
            subscription_deleted(store, subscription).await
        }
        BillingEvent::Unhandled(kind) => {
            tracing::info!(event_type = %kind, "unhandled Stripe event type");
            Ok(SyncOutcome::Unhandled)
        }
    };

    match result {
        Ok(outcome) => {
            match &outcome {
                SyncOutcome::Updated { user_id } => {
                    tracing::info!(event_type = %kind, user_id = %user_id, "profile synced from Stripe event");
                }
                SyncOutcome::Skipped(reason) => {
                    tracing::info!(event_type = %kind, reason = *reason, "Stripe event skipped");
                }
                SyncOutcome::Unhandled | SyncOutcome::Failed => {}
            }
            outcome
        }
        Err(error) => {
            tracing::error!(event_type = %kind, error = %error, "failed to apply Stripe event to profile");
            SyncOutcome::Failed
        }
    }
}

async fn checkout_completed(
    store: &dyn ProfileStore,
    session: CheckoutSessionObject,
) -> Result<SyncOutcome, StoreError> {
    let metadata = session.metadata.unwrap_or_default();

    let user_id = match metadata.get("clerkUserId").filter(|v| !v.is_empty()) {
        Some(value) => value.clone(),
        None => return Ok(SyncOutcome::Skipped("no user id in session metadata")),
    };

    let subscription_id = match session
        .subscription
        .as_ref()
        .map(IdOrObject::id)
        .filter(|id| !id.is_empty())
    {
        Some(value) => value.to_string(),
        None => return Ok(SyncOutcome::Skipped("no subscription id in session")),
    };

    let plan_type = metadata
        .get("planType")
        .filter(|v| !v.is_empty())
        .cloned();

    store
        .update(&user_id, ProfileUpdate::activate(subscription_id, plan_type))
        .await?;
    Ok(SyncOutcome::Updated { user_id })
}

async fn payment_failed(
    store: &dyn ProfileStore,
    invoice: InvoiceObject,
) -> Result<SyncOutcome, StoreError> {
    let subscription_id = match invoice.subscription_id() {
        Some(value) => value,
        None => return Ok(SyncOutcome::Skipped("no subscription id on invoice")),
    };

    let profile = match store.find_by_subscription_id(subscription_id).await? {
        Some(profile) => profile,
        None => return Ok(SyncOutcome::Skipped("no profile found for subscription")),
    };

    store
        .update(&profile.user_id, ProfileUpdate::deactivate())
        .await?;
    Ok(SyncOutcome::Updated {
        user_id: profile.user_id,
    })
}

async fn subscription_deleted(
    store: &dyn ProfileStore,
    subscription: SubscriptionObject,
) -> Result<SyncOutcome, StoreError> {
    let profile = match store.find_by_subscription_id(&subscription.id).await? {
        Some(profile) => profile,
        None => return Ok(SyncOutcome::Skipped("no profile found for subscription")),
    };

    store
        .update(&profile.user_id, ProfileUpdate::clear_subscription())
        .await?;
    Ok(SyncOutcome::Updated {
        user_id: profile.user_id,
    })
}
