use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    error::ApiError,
    middleware::AuthenticatedUser,
    plans::PlanId,
    profiles::{NewProfile, ProfileUpdate, StoreError},
    state::AppState,
    stripe_api::CheckoutRequest,
    webhook::{self, BillingEvent, EventEnvelope},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePlanRequest {
    pub new_plan: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutBody {
    pub plan_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSubscriptionQuery {
    pub user_id: Option<String>,
}

pub async fn health(State(state): State<AppState>) -> Response {
    match state.profiles.ping().await {
        Ok(()) => (StatusCode::OK, "ok").into_response(),
        Err(error) => {
            tracing::error!(error = %error, "profile store health check failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "profile store unavailable").into_response()
        }
    }
}

pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

pub async fn check_subscription(
    State(state): State<AppState>,
    Query(query): Query<CheckSubscriptionQuery>,
) -> Response {
    let user_id = match query.user_id.filter(|value| !value.trim().is_empty()) {
        Some(value) => value,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Missing userId" })),
            )
                .into_response()
        }
    };

    match state.profiles.find_by_user_id(&user_id).await {
        Ok(profile) => {
            let active = profile
                .map(|profile| profile.subscription_active)
                .unwrap_or(false);
            (StatusCode::OK, Json(json!({ "subscriptionActive": active }))).into_response()
        }
        Err(error) => {
            tracing::error!(error = %error, user_id = %user_id, "failed to check subscription");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal error" })),
            )
                .into_response()
        }
    }
}

pub async fn create_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Response, ApiError> {
    if state.profiles.find_by_user_id(&user.user_id).await?.is_some() {
        return Ok(already_exists());
    }

    let email = state
        .users
        .primary_email(&user.user_id)
        .await
        .map_err(ApiError::Upstream)?
        .ok_or_else(|| ApiError::BadRequest("User does not have an email address.".into()))?;

    let created = state
        .profiles
        .create(NewProfile {
            user_id: user.user_id.clone(),
            email: Some(email),
        })
        .await;

    match created {
        Ok(_) => {
            tracing::info!(user_id = %user.user_id, "profile created");
            Ok((
                StatusCode::CREATED,
                Json(json!({ "message": "Profile created successfully." })),
            )
                .into_response())
        }
        // lost a race with a concurrent request for the same user
        Err(StoreError::Conflict(_)) => Ok(already_exists()),
        Err(error) => Err(error.into()),
    }
}

fn already_exists() -> Response {
    (
        StatusCode::OK,
        Json(json!({ "message": "Profile already exists." })),
    )
        .into_response()
}

pub async fn subscription_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Value>, ApiError> {
    let profile = state
        .profiles
        .find_by_user_id(&user.user_id)
        .await?
        .ok_or(ApiError::ProfileNotFound)?;

    Ok(Json(json!({
        "subscription": {
            "subscriptionActive": profile.subscription_active,
            "subscriptionTier": profile.subscription_tier,
            "stripeSubscriptionId": profile.stripe_subscription_id,
        }
    })))
}

pub async fn create_checkout_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    body: Result<Json<CheckoutBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let plan_type = required_field(body.ok().and_then(|Json(body)| body.plan_type))
        .ok_or_else(|| ApiError::BadRequest("Plan type is required.".into()))?;
    let (plan_id, price_id) = resolve_plan(&state, &plan_type)?;

    let profile = state
        .profiles
        .find_by_user_id(&user.user_id)
        .await?
        .ok_or(ApiError::ProfileNotFound)?;

    let app_url = state.config.app_url.trim_end_matches('/');
    let request = CheckoutRequest {
        user_id: user.user_id.clone(),
        plan_type: plan_id.as_str().to_string(),
        price_id,
        customer_email: profile.email,
        success_url: format!("{app_url}/success?session_id={{CHECKOUT_SESSION_ID}}"),
        cancel_url: format!("{app_url}/subscribe"),
    };

    let session = state
        .billing
        .create_checkout_session(&request)
        .await
        .map_err(ApiError::Upstream)?;

    let url = session.url.ok_or_else(|| {
        ApiError::Upstream(anyhow::anyhow!("Error creating Stripe checkout session."))
    })?;

    tracing::info!(
        user_id = %user.user_id,
        plan = plan_id.as_str(),
        session_id = %session.id,
        "checkout session created"
    );
    Ok(Json(json!({ "url": url })))
}

/// Moves the caller's subscription to another plan with immediate proration.
pub async fn change_plan(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    body: Result<Json<ChangePlanRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let new_plan = required_field(body.ok().and_then(|Json(body)| body.new_plan))
        .ok_or_else(|| ApiError::BadRequest("New plan is required.".into()))?;
    let (plan_id, price_id) = resolve_plan(&state, &new_plan)?;

    let subscription_id = current_subscription_id(&state, &user).await?;

    let subscription = state
        .billing
        .retrieve_subscription(&subscription_id)
        .await
        .map_err(ApiError::Upstream)?;
    let item_id = subscription
        .first_item_id()
        .ok_or(ApiError::SubscriptionItemNotFound)?;

    let updated = state
        .billing
        .change_subscription_price(&subscription_id, item_id, &price_id)
        .await
        .map_err(ApiError::Upstream)?;

    state
        .profiles
        .update(
            &user.user_id,
            ProfileUpdate::activate(updated.id.clone(), Some(plan_id.as_str().to_string())),
        )
        .await?;

    tracing::info!(
        user_id = %user.user_id,
        subscription_id = %updated.id,
        plan = plan_id.as_str(),
        "subscription plan changed"
    );
    Ok(Json(json!({ "subscription": updated })))
}

/// Schedules cancellation at period end and clears the local profile.
pub async fn unsubscribe(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Value>, ApiError> {
    let subscription_id = current_subscription_id(&state, &user).await?;

    let canceled = state
        .billing
        .cancel_at_period_end(&subscription_id)
        .await
        .map_err(ApiError::Upstream)?;

    state
        .profiles
        .update(&user.user_id, ProfileUpdate::clear_subscription())
        .await?;

    tracing::info!(
        user_id = %user.user_id,
        subscription_id = %subscription_id,
        "subscription cancellation scheduled"
    );
    Ok(Json(json!({ "subscription": canceled })))
}

pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok());

    if let Err(error) = state.webhook_verifier.verify(signature, &body) {
        tracing::error!(error = %error, "Stripe webhook signature verification failed");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": error.to_string() })),
        )
            .into_response();
    }

    let event = match serde_json::from_slice::<EventEnvelope>(&body).and_then(|envelope| {
        tracing::debug!(
            event_id = ?envelope.id,
            event_type = %envelope.event_type,
            "Stripe webhook received"
        );
        BillingEvent::from_envelope(envelope)
    }) {
        Ok(event) => event,
        Err(error) => {
            tracing::error!(error = %error, "invalid Stripe webhook payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("Invalid webhook payload: {error}") })),
            )
                .into_response();
        }
    };

    let outcome = webhook::apply_event(state.profiles.as_ref(), event).await;
    tracing::debug!(outcome = ?outcome, "Stripe webhook processed");

    (StatusCode::OK, Json(json!({}))).into_response()
}

fn required_field(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn resolve_plan(state: &AppState, plan: &str) -> Result<(PlanId, String), ApiError> {
    state
        .plans
        .resolve(plan)
        .map(|(plan_id, price_id)| (plan_id, price_id.to_string()))
        .ok_or_else(|| ApiError::UnknownPlan(plan.to_string()))
}

async fn current_subscription_id(
    state: &AppState,
    user: &AuthenticatedUser,
) -> Result<String, ApiError> {
    let profile = state
        .profiles
        .find_by_user_id(&user.user_id)
        .await?
        .ok_or(ApiError::ProfileNotFound)?;

    profile
        .stripe_subscription_id
        .filter(|value| !value.is_empty())
        .ok_or(ApiError::NoActiveSubscription)
}
