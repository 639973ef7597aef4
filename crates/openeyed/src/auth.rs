//! Bearer-token roles. Tokens are configured per role and compared by digest.

use axum::extract::FromRequestParts;
use axum::http::{header::AUTHORIZATION, request::Parts};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::error::ApiError;
use crate::state::AppState;

/// Ordered so that a higher role satisfies a lower requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Viewer,
    User,
    Admin,
}

type Digest32 = [u8; 32];

fn digest(token: &str) -> Digest32 {
    Sha256::digest(token.as_bytes()).into()
}

pub struct Authenticator {
    tokens: HashMap<Digest32, Role>,
}

impl Authenticator {
    pub fn from_config(config: &Config) -> Self {
        let mut tokens = HashMap::new();
        // Insert lowest first so a token listed under several roles gets the highest.
        for (list, role) in [
            (&config.viewer_tokens, Role::Viewer),
            (&config.user_tokens, Role::User),
            (&config.admin_tokens, Role::Admin),
        ] {
            for token in list {
                tokens.insert(digest(token), role);
            }
        }
        if tokens.is_empty() {
            tracing::warn!("no API tokens configured; every request is treated as admin");
        } else {
            tracing::info!(tokens = tokens.len(), "API tokens loaded");
        }
        Self { tokens }
    }

    /// Role for an `Authorization` header value, if the token is known.
    pub fn role_for(&self, header: Option<&str>) -> Option<Role> {
        if self.tokens.is_empty() {
            return Some(Role::Admin);
        }
        let token = header?.strip_prefix("Bearer ")?.trim();
        self.tokens.get(&digest(token)).copied()
    }
}

/// The authenticated caller of a request.
pub struct Caller {
    pub role: Role,
}

impl Caller {
    pub fn require(&self, needed: Role) -> Result<(), ApiError> {
        if self.role >= needed {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let header = parts.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        let role = state.auth.role_for(header).ok_or(ApiError::Unauthorized)?;
        Ok(Caller { role })
    }
}
