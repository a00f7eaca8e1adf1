use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use axum::http::{
    header::{AUTHORIZATION, COOKIE},
    HeaderMap,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;

/// Cookie Clerk's frontend SDK stores the short-lived session JWT in.
pub const SESSION_COOKIE: &str = "__session";

#[derive(Debug, Deserialize, Clone)]
pub struct SessionClaims {
    pub sub: String,
    pub iss: String,
    pub exp: usize,
    pub nbf: Option<usize>,
}

/// Turns a session token into the identity-provider user it belongs to.
#[async_trait]
pub trait SessionVerifier: Send + Sync {
    async fn verify_token(&self, token: &str) -> anyhow::Result<SessionClaims>;
}

/// Verifies Clerk session JWTs against the issuer's published JWKS.
#[derive(Clone)]
pub struct AuthService {
    http: reqwest::Client,
    jwks_cache: Arc<RwLock<HashMap<String, CachedJwks>>>,
    jwks_ttl: Duration,
    expected_issuer: Option<String>,
}

#[derive(Clone)]
struct CachedJwks {
    keys: Vec<Jwk>,
    fetched_at: Instant,
}

#[derive(Debug, Deserialize, Clone)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize, Clone)]
struct Jwk {
    kid: Option<String>,
    kty: String,
    n: Option<String>,
    e: Option<String>,
    alg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnverifiedClaims {
    iss: Option<String>,
}

impl AuthService {
    pub fn new(expected_issuer: Option<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build auth HTTP client")?;

        Ok(Self {
            http,
            jwks_cache: Arc::new(RwLock::new(HashMap::new())),
            jwks_ttl: Duration::from_secs(10 * 60),
            expected_issuer: expected_issuer
                .map(|value| normalize_issuer(&value))
                .filter(|value| !value.is_empty()),
        })
    }

    fn decoding_key(jwk: &Jwk) -> anyhow::Result<DecodingKey> {
        if jwk.kty != "RSA" {
            return Err(anyhow!("Unsupported JWK type: {}", jwk.kty));
        }
        if let Some(alg) = jwk.alg.as_deref().filter(|alg| *alg != "RS256") {
            return Err(anyhow!("Unsupported JWK alg: {}", alg));
        }

        let (n, e) = match (jwk.n.as_deref(), jwk.e.as_deref()) {
            (Some(n), Some(e)) => (n, e),
            _ => return Err(anyhow!("JWK is missing RSA components")),
        };

        DecodingKey::from_rsa_components(n, e).context("failed to build RSA decoding key")
    }

    async fn get_jwks(&self, issuer: &str) -> anyhow::Result<Vec<Jwk>> {
        if let Some(cached) = self.jwks_cache.read().await.get(issuer) {
            if cached.fetched_at.elapsed() < self.jwks_ttl {
                return Ok(cached.keys.clone());
            }
        }

        let jwks_url = format!("{issuer}/.well-known/jwks.json");
        let response = self
            .http
            .get(&jwks_url)
            .send()
            .await
            .with_context(|| format!("failed to fetch JWKS from {jwks_url}"))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "failed to fetch JWKS from {}: HTTP {}",
                jwks_url,
                response.status()
            ));
        }

        let jwks: Jwks = response
            .json()
            .await
            .with_context(|| format!("invalid JWKS response from {jwks_url}"))?;

        self.jwks_cache.write().await.insert(
            issuer.to_string(),
            CachedJwks {
                keys: jwks.keys.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(jwks.keys)
    }
}

#[async_trait]
impl SessionVerifier for AuthService {
    async fn verify_token(&self, token: &str) -> anyhow::Result<SessionClaims> {
        // keys are only ever fetched from the configured issuer
        let expected_issuer = self
            .expected_issuer
            .as_deref()
            .ok_or_else(|| anyhow!("CLERK_ISSUER is not configured; rejecting session token"))?;

        let kid = decode_header(token)
            .context("invalid JWT header")?
            .kid
            .ok_or_else(|| anyhow!("JWT header missing kid"))?;

        let issuer = unverified_issuer(token)?;
        if issuer != expected_issuer {
            return Err(anyhow!(
                "JWT issuer mismatch. expected={}, got={}",
                expected_issuer,
                issuer
            ));
        }

        let jwks = self.get_jwks(expected_issuer).await?;
        let jwk = jwks
            .iter()
            .find(|candidate| candidate.kid.as_deref() == Some(kid.as_str()))
            .ok_or_else(|| anyhow!("No matching JWK found for kid"))?;
        let decoding_key = Self::decoding_key(jwk)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_nbf = true;
        validation.set_issuer(&[expected_issuer]);

        let claims = decode::<SessionClaims>(token, &decoding_key, &validation)
            .context("JWT signature validation failed")?
            .claims;

        tracing::debug!(
            user_id = %claims.sub,
            exp = claims.exp,
            "verified Clerk session token"
        );
        Ok(claims)
    }
}

/// Bearer token from `Authorization`, falling back to the session cookie.
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    if let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| extract_bearer_token(value).ok())
    {
        return Some(token);
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value)
}

pub fn extract_bearer_token(value: &str) -> anyhow::Result<&str> {
    let (scheme, token) = value.split_once(' ').unwrap_or((value, ""));

    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(anyhow!("Invalid Authorization header format"));
    }

    Ok(token.trim())
}

fn normalize_issuer(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn unverified_issuer(token: &str) -> anyhow::Result<String> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| anyhow!("JWT payload segment missing"))?;

    let decoded = URL_SAFE_NO_PAD
        .decode(payload.as_bytes())
        .context("failed to decode JWT payload")?;

    let claims = serde_json::from_slice::<UnverifiedClaims>(&decoded)
        .context("failed to parse unverified JWT claims")?;

    claims
        .iss
        .map(|iss| normalize_issuer(&iss))
        .ok_or_else(|| anyhow!("JWT missing iss claim"))
}
