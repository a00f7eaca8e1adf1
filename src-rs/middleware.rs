use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use crate::{auth::session_token, error::ApiError, state::AppState};

pub const SIGN_UP_PATH: &str = "/sign-up";
pub const FEATURE_PATH: &str = "/mealplan";
pub const SUBSCRIBE_PATH: &str = "/subscribe";
pub const CHECK_SUBSCRIPTION_PATH: &str = "/api/check-subscription";

const PUBLIC_PREFIXES: &[&str] = &[
    SIGN_UP_PATH,
    SUBSCRIBE_PATH,
    "/api/webhook",
    CHECK_SUBSCRIPTION_PATH,
];

const STATIC_EXTENSIONS: &[&str] = &[
    "html", "htm", "css", "js", "jpg", "jpeg", "webp", "png", "gif", "svg", "ttf", "woff",
    "woff2", "ico", "csv", "doc", "docx", "xls", "xlsx", "zip", "webmanifest",
];

/// The signed-in caller, attached to the request by [`gate_access`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or(ApiError::Unauthorized)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Pass,
    Redirect(&'static str),
    CheckSubscription,
}

fn gate_for(path: &str, signed_in: bool) -> Gate {
    if path == CHECK_SUBSCRIPTION_PATH {
        return Gate::Pass;
    }
    if !signed_in && !is_public(path) {
        return Gate::Redirect(SIGN_UP_PATH);
    }
    if signed_in && path.starts_with(SIGN_UP_PATH) {
        return Gate::Redirect(FEATURE_PATH);
    }
    if signed_in && path.starts_with(FEATURE_PATH) {
        return Gate::CheckSubscription;
    }
    Gate::Pass
}

fn is_public(path: &str) -> bool {
    path == "/" || PUBLIC_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

fn is_static_asset(path: &str) -> bool {
    if path.starts_with("/api/") {
        return false;
    }
    if path.starts_with("/_next/") {
        return true;
    }

    let last_segment = path.rsplit('/').next().unwrap_or_default();
    last_segment
        .rsplit_once('.')
        .map(|(_, extension)| {
            STATIC_EXTENSIONS
                .iter()
                .any(|candidate| extension.eq_ignore_ascii_case(candidate))
        })
        .unwrap_or(false)
}

async fn resolve_user(state: &AppState, headers: &HeaderMap) -> Option<AuthenticatedUser> {
    let token = session_token(headers)?;
    match state.sessions.verify_token(token).await {
        Ok(claims) => Some(AuthenticatedUser {
            user_id: claims.sub,
        }),
        Err(error) => {
            tracing::warn!(error = %error, "session verification failed");
            None
        }
    }
}

/// Redirects signed-out visitors to sign-up, signed-in visitors away from
/// sign-up, and unsubscribed users away from the meal plan.
pub async fn gate_access(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if is_static_asset(&path) {
        return next.run(request).await;
    }

    let user = resolve_user(&state, request.headers()).await;
    tracing::debug!(
        user_id = ?user.as_ref().map(|user| user.user_id.as_str()),
        path = %path,
        "access gate"
    );

    match gate_for(&path, user.is_some()) {
        Gate::Redirect(target) => return Redirect::temporary(target).into_response(),
        Gate::CheckSubscription => {
            let user_id = user
                .as_ref()
                .map(|user| user.user_id.as_str())
                .unwrap_or_default();
            match state.subscription_check.is_active(user_id).await {
                Ok(true) => {}
                Ok(false) => return Redirect::temporary(SUBSCRIBE_PATH).into_response(),
                Err(error) => {
                    tracing::warn!(error = %error, user_id = %user_id, "subscription check failed");
                    return Redirect::temporary(SUBSCRIBE_PATH).into_response();
                }
            }
        }
        Gate::Pass => {}
    }

    if let Some(user) = user {
        request.extensions_mut().insert(user);
    }
    next.run(request).await
}
