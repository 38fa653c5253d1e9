//! Request authorization.
//!
//! Read routes are open. Running playbooks and syncing projects need a user
//! or admin token; creating, updating and deleting projects needs the admin
//! token. When no tokens are configured every request is allowed.

use axum::http::HeaderMap;

use crate::config::AuthSection;

/// Access level a route requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    User,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denied {
    /// No usable credentials were presented.
    Unauthenticated,
    /// Credentials were valid but below the required level.
    Forbidden,
}

/// Decides whether a caller presenting `token` may perform an action.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, token: Option<&str>, access: Access) -> Result<(), Denied>;
}

/// Static bearer tokens from configuration.
#[derive(Debug, Clone, Default)]
pub struct TokenAuthorizer {
    admin_token: Option<String>,
    user_token: Option<String>,
}

impl TokenAuthorizer {
    pub fn new(admin_token: Option<String>, user_token: Option<String>) -> Self {
        Self {
            admin_token: admin_token.filter(|t| !t.is_empty()),
            user_token: user_token.filter(|t| !t.is_empty()),
        }
    }

    pub fn from_config(auth: &AuthSection) -> Self {
        Self::new(auth.admin_token.clone(), auth.user_token.clone())
    }

    pub fn is_open(&self) -> bool {
        self.admin_token.is_none() && self.user_token.is_none()
    }

    fn level_of(&self, token: &str) -> Option<Access> {
        if self.admin_token.as_deref() == Some(token) {
            Some(Access::Admin)
        } else if self.user_token.as_deref() == Some(token) {
            Some(Access::User)
        } else {
            None
        }
    }
}

impl Authorizer for TokenAuthorizer {
    fn authorize(&self, token: Option<&str>, access: Access) -> Result<(), Denied> {
        if access == Access::Read || self.is_open() {
            return Ok(());
        }
        let granted = token
            .and_then(|t| self.level_of(t))
            .ok_or(Denied::Unauthenticated)?;
        match (access, granted) {
            (Access::Admin, Access::Admin) => Ok(()),
            (Access::Admin, _) => Err(Denied::Forbidden),
            _ => Ok(()),
        }
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get("authorization")?.to_str().ok()?.trim();
    let token = raw.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}
