//! Core traits for the trading session.

mod strategy;

pub use strategy::Strategy;
