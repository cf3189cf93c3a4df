//! # Zenith Executor Crate
//!
//! Post-trade order cleanup against the unified `exchange-adapters` trait
//! (§4.H): once a `Trade` closes, its recorded protective orders need to be
//! cancelled so a crash mid-cycle never leaves a stray SL/TP resting on the
//! book.

pub mod cleanup;

pub use cleanup::{CleanupResult, cleanup_protective_orders};