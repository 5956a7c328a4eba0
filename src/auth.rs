//! 凭证校验与认证中间件。

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use axum::extract::Extension;
use axum::http::{HeaderMap, Method, Request};
use axum::{middleware, response::Response};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::vault::{Caller, IsolationPolicy};

/// Header carrying the caller identity under the `header` isolation policy.
pub const USER_ID_HEADER: &str = "x-user-id";
const JWKS_TTL: Duration = Duration::from_secs(60 * 60);
const JWKS_MISS_REFETCH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing credential")]
    MissingCredential,
    #[error("invalid credential: {0}")]
    InvalidToken(String),
    #[error("credential verifier unavailable: {0}")]
    Unavailable(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub subject: String,
    pub email: Option<String>,
}

#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError>;
}

#[derive(Deserialize)]
struct IdTokenClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

enum KeySource {
    Secret(DecodingKey),
    Jwks {
        url: String,
        client: reqwest::Client,
        cache: Mutex<Option<CachedJwks>>,
    },
}

/// 校验 JWT 形式的 ID 令牌（RS256 + JWKS，或开发用的 HS256 共享密钥）。
pub struct JwtVerifier {
    keys: KeySource,
    audience: Option<String>,
    issuer: Option<String>,
}

impl JwtVerifier {
    pub fn with_secret(secret: &str) -> Self {
        Self {
            keys: KeySource::Secret(DecodingKey::from_secret(secret.as_bytes())),
            audience: None,
            issuer: None,
        }
    }

    pub fn with_jwks(url: impl Into<String>) -> Self {
        Self {
            keys: KeySource::Jwks {
                url: url.into(),
                client: reqwest::Client::new(),
                cache: Mutex::new(None),
            },
            audience: None,
            issuer: None,
        }
    }

    #[cfg(test)]
    pub(crate) async fn seed_jwks(&self, keys: JwkSet) {
        if let KeySource::Jwks { cache, .. } = &self.keys {
            *cache.lock().await = Some(CachedJwks {
                keys,
                fetched_at: Instant::now(),
            });
        }
    }

    /// Expects tokens minted for `project_id` by the Google secure token service.
    pub fn for_project(mut self, project_id: &str) -> Self {
        self.audience = Some(project_id.to_string());
        self.issuer = Some(format!("https://securetoken.google.com/{project_id}"));
        self
    }

    fn validation(&self) -> Validation {
        let algorithm = match self.keys {
            KeySource::Secret(_) => Algorithm::HS256,
            KeySource::Jwks { .. } => Algorithm::RS256,
        };
        let mut validation = Validation::new(algorithm);
        let mut required = vec!["exp", "sub"];
        match &self.audience {
            Some(audience) => {
                validation.set_audience(&[audience]);
                required.push("aud");
            }
            None => validation.validate_aud = false,
        }
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
            required.push("iss");
        }
        validation.set_required_spec_claims(&required);
        validation
    }

    async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, AuthError> {
        let (url, client, cache) = match &self.keys {
            KeySource::Secret(key) => return Ok(key.clone()),
            KeySource::Jwks { url, client, cache } => (url, client, cache),
        };
        let kid = kid.ok_or_else(|| AuthError::InvalidToken("token has no key id".into()))?;

        let mut cache = cache.lock().await;
        if let Some(cached) = cache.as_ref()
            && cached.fetched_at.elapsed() < JWKS_TTL
        {
            if let Some(jwk) = cached.keys.find(kid) {
                return DecodingKey::from_jwk(jwk)
                    .map_err(|err| AuthError::InvalidToken(err.to_string()));
            }
            // Unknown kids may only force a refetch once per interval.
            if cached.fetched_at.elapsed() < JWKS_MISS_REFETCH_INTERVAL {
                debug!(kid, "unknown signing key, refetch throttled");
                return Err(AuthError::InvalidToken("unknown signing key".into()));
            }
        }

        let keys = fetch_jwks(client, url).await?;
        let key = keys
            .find(kid)
            .map(DecodingKey::from_jwk)
            .transpose()
            .map_err(|err| AuthError::InvalidToken(err.to_string()))?;
        *cache = Some(CachedJwks {
            keys,
            fetched_at: Instant::now(),
        });
        key.ok_or_else(|| AuthError::InvalidToken("unknown signing key".into()))
    }
}

async fn fetch_jwks(client: &reqwest::Client, url: &str) -> Result<JwkSet, AuthError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|err| AuthError::Unavailable(err.to_string()))?;
    if !response.status().is_success() {
        return Err(AuthError::Unavailable(format!(
            "jwks fetch failed: {}",
            response.status()
        )));
    }
    let keys: JwkSet = response
        .json()
        .await
        .map_err(|err| AuthError::Unavailable(err.to_string()))?;
    info!(url, count = keys.keys.len(), "signing keys refreshed");
    Ok(keys)
}

#[async_trait]
impl CredentialVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        let header = decode_header(token).map_err(|err| AuthError::InvalidToken(err.to_string()))?;
        let key = self.decoding_key(header.kid.as_deref()).await?;
        let data = decode::<IdTokenClaims>(token, &key, &self.validation())
            .map_err(|err| AuthError::InvalidToken(err.to_string()))?;
        let subject = data.claims.sub.trim().to_string();
        if subject.is_empty() {
            return Err(AuthError::InvalidToken("empty subject".into()));
        }
        Ok(VerifiedIdentity {
            subject,
            email: data.claims.email,
        })
    }
}

/// 按隔离策略从请求中识别调用者。
pub struct Authenticator {
    pub policy: IsolationPolicy,
    pub verifier: Option<Arc<dyn CredentialVerifier>>,
}

impl Authenticator {
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Caller, AuthError> {
        if self.policy == IsolationPolicy::Header {
            let value = headers
                .get(USER_ID_HEADER)
                .ok_or(AuthError::MissingCredential)?;
            let identity = value
                .to_str()
                .map(str::trim)
                .ok()
                .filter(|identity| !identity.is_empty())
                .ok_or_else(|| AuthError::InvalidToken(format!("invalid {USER_ID_HEADER} header")))?;
            return Ok(Caller {
                identity: identity.to_string(),
                email: None,
            });
        }

        let bearer = headers
            .typed_get::<Authorization<Bearer>>()
            .ok_or(AuthError::MissingCredential)?;
        let verifier = self
            .verifier
            .as_ref()
            .ok_or_else(|| AuthError::Unavailable("no credential verifier configured".into()))?;
        let identity = verifier.verify(bearer.token()).await?;
        Ok(Caller {
            identity: identity.subject,
            email: identity.email,
        })
    }
}

/// 认证中间件：校验凭证并把调用者写入请求扩展。
pub async fn auth_middleware(
    Extension(auth): Extension<Arc<Authenticator>>,
    mut req: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, ApiError> {
    if req.method() == Method::OPTIONS || is_auth_exempt_path(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let caller = auth.authenticate(req.headers()).await?;
    debug!(identity = caller.identity, "caller authenticated");
    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}

fn is_auth_exempt_path(path: &str) -> bool {
    path == "/health"
}
