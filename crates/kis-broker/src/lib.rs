//! Authenticated, rate-limited REST access to the KIS OpenAPI.
//!
//! Three layers, bottom-up:
//! - [`TokenManager`] owns OAuth2 token issuance, caching and refresh
//! - [`RateLimitedDispatcher`] serializes calls under a request-per-second
//!   ceiling and retries transient failures
//! - [`RestGateway`] builds the per-endpoint authenticated requests

mod dispatch;
mod gateway;
mod token;

pub use dispatch::RateLimitedDispatcher;
pub use gateway::{Balance, Holding, OrderHistoryEntry, PriceQuote, RestGateway};
pub use token::{RestTokenIssuer, TokenIssuer, TokenManager, DEFAULT_SAFETY_MARGIN_SECS};
