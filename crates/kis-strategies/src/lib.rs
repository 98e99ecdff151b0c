//! Trading strategy implementations.
//!
//! Each strategy owns per-symbol rolling state behind the
//! [`kis_core::traits::Strategy`] trait:
//! - Moving average crossover (reference variant)
//! - Rate-of-change momentum

mod ma_crossover;
mod momentum;

pub use ma_crossover::{MaCrossoverConfig, MaCrossoverStrategy};
pub use momentum::{MomentumConfig, MomentumStrategy};
