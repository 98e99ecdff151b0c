//! Core types and traits for the KIS trading session.
//!
//! This crate provides the foundational building blocks including:
//! - Credentials, environments and access tokens
//! - Order, position and real-time market data types
//! - Strategy signals and the strategy trait
//! - The error taxonomy shared by every component

pub mod backoff;
pub mod error;
pub mod traits;
pub mod types;

pub use backoff::ExponentialBackoff;
pub use error::{ApiError, AuthError, RejectReason, StreamError, TradingError, TradingResult};
pub use traits::*;
pub use types::*;
