//! Domain error types.

use std::fmt;

/// Kinds of record a lookup can fail to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    User,
    Portfolio,
    Position,
    Asset,
    Dividend,
    Alert,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::User => "user",
            Entity::Portfolio => "portfolio",
            Entity::Position => "position",
            Entity::Asset => "asset",
            Entity::Dividend => "dividend",
            Entity::Alert => "alert",
        };
        f.write_str(name)
    }
}

/// Top-level error type for stocksim.
#[derive(Debug, thiserror::Error)]
pub enum StocksimError {
    #[error("authentication required")]
    AuthenticationRequired,

    #[error("user {user_id} is suspended")]
    UserSuspended { user_id: i64 },

    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("validation error: {reason}")]
    Validation { reason: String },

    #[error("{entity} {key} not found")]
    NotFound { entity: Entity, key: String },

    #[error("insufficient funds: need {required:.2}, have {available:.2}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("insufficient holdings: requested {requested}, held {held}")]
    InsufficientHoldings { requested: i64, held: i64 },

    #[error("price unavailable for asset {asset_id}")]
    PriceUnavailable { asset_id: i64 },

    #[error("invalid state transition for {entity} {id}: {from} -> {to}")]
    InvalidStateTransition {
        entity: Entity,
        id: i64,
        from: String,
        to: String,
    },

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StocksimError {
    pub fn not_found(entity: Entity, key: impl ToString) -> Self {
        StocksimError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        StocksimError::Validation {
            reason: reason.into(),
        }
    }

    /// Storage-level failure: the unit of work was rolled back and the caller may retry.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            StocksimError::Database { .. } | StocksimError::DatabaseQuery { .. }
        )
    }

    /// Process exit status for this error family.
    pub fn exit_status(&self) -> u8 {
        match self {
            StocksimError::Io(_) => 1,
            StocksimError::ConfigParse { .. }
            | StocksimError::ConfigMissing { .. }
            | StocksimError::ConfigInvalid { .. } => 2,
            StocksimError::Database { .. } | StocksimError::DatabaseQuery { .. } => 3,
            StocksimError::AuthenticationRequired
            | StocksimError::UserSuspended { .. }
            | StocksimError::PermissionDenied { .. } => 4,
            StocksimError::Validation { .. }
            | StocksimError::InsufficientFunds { .. }
            | StocksimError::InsufficientHoldings { .. }
            | StocksimError::PriceUnavailable { .. }
            | StocksimError::InvalidStateTransition { .. } => 5,
            StocksimError::NotFound { .. } => 6,
        }
    }
}

impl From<&StocksimError> for std::process::ExitCode {
    fn from(err: &StocksimError) -> Self {
        std::process::ExitCode::from(err.exit_status())
    }
}
