use axum::http::{header, HeaderMap};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Viewer,
}

/// Caller identity resolved from request headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Result of authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated(Principal),
    /// No usable credentials, or credentials nobody issued. Carries the reason.
    Rejected(String),
}

/// Resolves the caller of an HTTP request.
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(&self, headers: &HeaderMap) -> AuthOutcome;
}

/// Static bearer tokens from configuration: one admin token and an optional
/// read-only viewer token.
#[derive(Clone, Default)]
pub struct TokenAuthenticator {
    admin_token: Option<String>,
    viewer_token: Option<String>,
}

impl std::fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthenticator")
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .field("viewer_token", &self.viewer_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl TokenAuthenticator {
    pub fn new(admin_token: Option<String>, viewer_token: Option<String>) -> Self {
        let clean = |t: Option<String>| t.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        Self {
            admin_token: clean(admin_token),
            viewer_token: clean(viewer_token),
        }
    }
}

impl Authenticator for TokenAuthenticator {
    fn authenticate(&self, headers: &HeaderMap) -> AuthOutcome {
        let Some(token) = bearer_token(headers) else {
            return AuthOutcome::Rejected("missing bearer token".into());
        };

        if matches_token(self.admin_token.as_deref(), token) {
            return AuthOutcome::Authenticated(Principal {
                name: "admin".into(),
                role: Role::Admin,
            });
        }
        if matches_token(self.viewer_token.as_deref(), token) {
            return AuthOutcome::Authenticated(Principal {
                name: "viewer".into(),
                role: Role::Viewer,
            });
        }
        AuthOutcome::Rejected("unknown bearer token".into())
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim()).filter(|t| !t.is_empty())
}

/// Compare without short-circuiting on the first differing byte.
fn matches_token(expected: Option<&str>, given: &str) -> bool {
    let Some(expected) = expected else {
        return false;
    };
    let (a, b) = (expected.as_bytes(), given.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
