//! Error types for the trading session.

use thiserror::Error;

/// Top-level trading session error.
#[derive(Error, Debug)]
pub enum TradingError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Risk gate rejected order: {reason}")]
    RiskRejected { reason: RejectReason },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Token issuance and refresh errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Credential exchange rejected: [{code}] {message}")]
    Rejected { code: String, message: String },

    #[error("Token request failed: {0}")]
    Network(String),

    #[error("No valid access token available")]
    MissingToken,
}

/// REST request errors.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Non-auth HTTP failure (4xx other than 401, or 5xx after retries).
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Business-level rejection inside a 200 envelope (rt_cd != "0").
    #[error("Trade rejected: [{code}] {message}")]
    TradeRejected { code: String, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Response parse error: {0}")]
    Parse(String),
}

/// WebSocket lifecycle errors.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Reconnection attempts exhausted after {attempts} tries")]
    AttemptsExhausted { attempts: u32 },

    #[error("Stream channel not connected")]
    NotConnected,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Reason for a risk gate rejection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("daily loss limit reached")]
    DailyLossLimitReached,

    #[error("order notional below minimum")]
    BelowMinimumOrder,

    #[error("quantity is zero after sizing")]
    ZeroQuantity,
}

/// Result type alias for trading operations.
pub type TradingResult<T> = Result<T, TradingError>;
