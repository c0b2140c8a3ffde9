//! Token authentication for the HTTP surface.
//!
//! Callers present a static bearer token, either as an `Authorization:
//! Bearer <token>` header or a `token` query parameter. The token maps to
//! a role; unknown or missing tokens are anonymous and every document
//! endpoint rejects them with 401.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ServiceError;

/// Caller role derived from the presented token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    User,
    Anonymous,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::Anonymous => "anonymous",
        }
    }
}

/// Static token table resolved at startup.
#[derive(Debug, Clone)]
pub struct TokenTable {
    admin_token: String,
    user_token: String,
}

impl TokenTable {
    pub fn new(admin_token: String, user_token: String) -> Self {
        Self {
            admin_token,
            user_token,
        }
    }

    /// Map a presented token to a role. Comparison order matters when the
    /// two tokens are configured equal: the stronger role wins.
    pub fn resolve(&self, token: Option<&str>) -> Role {
        match token {
            Some(t) if t == self.admin_token => Role::Admin,
            Some(t) if t == self.user_token => Role::User,
            _ => Role::Anonymous,
        }
    }
}

/// An authenticated caller, extracted from the request.
///
/// Extraction itself never fails; handlers call [`Caller::require_user`]
/// to reject anonymous callers.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub role: Role,
}

impl Caller {
    /// Reject anonymous callers with 401.
    pub fn require_user(&self) -> Result<(), ServiceError> {
        if self.role == Role::Anonymous {
            return Err(ServiceError::Unauthorized);
        }
        Ok(())
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let header = parts.headers.get(axum::http::header::AUTHORIZATION)?;
    let value = header.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

fn query_token(parts: &Parts) -> Option<String> {
    let query = parts.uri.query()?;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == "token").then(|| value.to_string())
    })
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
    Arc<TokenTable>: axum::extract::FromRef<S>,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let table: Arc<TokenTable> = axum::extract::FromRef::from_ref(state);
        let token = bearer_token(parts).or_else(|| query_token(parts));
        Ok(Caller {
            role: table.resolve(token.as_deref()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TokenTable {
        TokenTable::new("admin-secret".to_string(), "user-secret".to_string())
    }

    #[test]
    fn tokens_map_to_roles() {
        let table = table();
        assert_eq!(table.resolve(Some("admin-secret")), Role::Admin);
        assert_eq!(table.resolve(Some("user-secret")), Role::User);
        assert_eq!(table.resolve(Some("wrong")), Role::Anonymous);
        assert_eq!(table.resolve(None), Role::Anonymous);
    }

    #[test]
    fn anonymous_is_rejected() {
        let caller = Caller {
            role: Role::Anonymous,
        };
        assert!(matches!(
            caller.require_user(),
            Err(ServiceError::Unauthorized)
        ));
        assert!(Caller { role: Role::User }.require_user().is_ok());
    }
}
