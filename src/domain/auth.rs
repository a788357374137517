//! Users and the caller identity passed into every core operation.

use std::fmt;
use std::str::FromStr;

use super::error::StocksimError;

pub type UserId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = StocksimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(StocksimError::validation(format!("unknown role '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub role: Role,
    pub suspended: bool,
}

impl User {
    /// Identity for operations performed on this user's behalf.
    pub fn auth_context(&self) -> AuthContext {
        AuthContext {
            user_id: Some(self.id),
            role: self.role,
            suspended: self.suspended,
        }
    }
}

/// Caller identity. Built by the request layer (or by a background driver acting
/// for a user) and passed explicitly; the core never reads ambient session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: Option<UserId>,
    pub role: Role,
    pub suspended: bool,
}

impl AuthContext {
    pub fn user(user_id: UserId) -> Self {
        AuthContext {
            user_id: Some(user_id),
            role: Role::User,
            suspended: false,
        }
    }

    pub fn admin(user_id: UserId) -> Self {
        AuthContext {
            user_id: Some(user_id),
            role: Role::Admin,
            suspended: false,
        }
    }

    pub fn anonymous() -> Self {
        AuthContext {
            user_id: None,
            role: Role::User,
            suspended: false,
        }
    }

    /// Identity of the scheduled drivers: administrative, but owns no portfolios.
    pub fn system() -> Self {
        AuthContext {
            user_id: None,
            role: Role::Admin,
            suspended: false,
        }
    }

    /// Gate for mutating user operations.
    pub fn require_active(&self) -> Result<UserId, StocksimError> {
        let user_id = self.user_id.ok_or(StocksimError::AuthenticationRequired)?;
        if self.suspended {
            return Err(StocksimError::UserSuspended { user_id });
        }
        Ok(user_id)
    }

    /// Gate for administrative operations. The system identity passes.
    pub fn require_admin(&self) -> Result<(), StocksimError> {
        if self.suspended {
            if let Some(user_id) = self.user_id {
                return Err(StocksimError::UserSuspended { user_id });
            }
        }
        if self.role != Role::Admin {
            return Err(StocksimError::PermissionDenied {
                reason: "administrator role required".into(),
            });
        }
        Ok(())
    }
}
