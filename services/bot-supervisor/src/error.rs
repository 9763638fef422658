//! Error taxonomy for the supervisor and its collaborators

use uuid::Uuid;

/// Errors surfaced by the lifecycle API
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Invalid bot configuration: {0}")]
    Validation(String),

    #[error("Bot not found: {0}")]
    NotFound(Uuid),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SupervisorError {
    /// HTTP status the external API layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            SupervisorError::Validation(_) => 400,
            SupervisorError::NotFound(_) => 404,
            SupervisorError::Internal(_) => 500,
        }
    }
}

impl From<StoreError> for SupervisorError {
    fn from(e: StoreError) -> Self {
        SupervisorError::Internal(e.to_string())
    }
}

/// Rejected position-sizing input
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RiskError {
    #[error("Invalid risk input: {0}")]
    InvalidRiskInput(String),
}

/// How hard a fault hits the bot that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Critical,
    Recoverable,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Critical => "critical",
            ErrorSeverity::Recoverable => "recoverable",
        }
    }
}

/// Failures reported by an execution gateway
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Order submission timed out after {0}s")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance {
        needed: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Exchange unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    /// Classify for the bot state machine
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            GatewayError::Rejected(_) | GatewayError::Timeout(_) | GatewayError::Network(_) => {
                ErrorSeverity::Recoverable
            }
            GatewayError::InsufficientBalance { .. }
            | GatewayError::Authentication(_)
            | GatewayError::Unavailable(_) => ErrorSeverity::Critical,
        }
    }
}

/// Fault raised inside a running bot
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BotError {
    #[error("critical: {0}")]
    Critical(String),

    #[error("recoverable: {0}")]
    Recoverable(String),
}

impl BotError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            BotError::Critical(_) => ErrorSeverity::Critical,
            BotError::Recoverable(_) => ErrorSeverity::Recoverable,
        }
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, BotError::Critical(_))
    }

    pub fn message(&self) -> &str {
        match self {
            BotError::Critical(m) | BotError::Recoverable(m) => m,
        }
    }
}

impl From<GatewayError> for BotError {
    fn from(e: GatewayError) -> Self {
        match e.severity() {
            ErrorSeverity::Critical => BotError::Critical(e.to_string()),
            ErrorSeverity::Recoverable => BotError::Recoverable(e.to_string()),
        }
    }
}

/// Persistence failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store encoding failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Bot not persisted: {0}")]
    NotFound(Uuid),

    #[error("Rejected update: {0}")]
    Invalid(String),
}

/// Configuration loading and validation failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
