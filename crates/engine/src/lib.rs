//! # Zenith Engine
//!
//! The three always-on processes that turn a stored `Subscription` into
//! trading activity on a real exchange:
//!
//! - [`orchestrator::run_cycle`] — one full trading cycle for one
//!   subscription (§4.E): preflight, multi-timeframe data crawl, strategy
//!   invocation, risk-managed sizing, order placement, persistence.
//! - [`scheduler::run_scheduler`] / [`scheduler::run_maintenance`] — the 60s
//!   sweep that decides which subscriptions are due and fires `run_cycle`
//!   for them under a per-subscription Redis lock, plus the periodic
//!   `action_logs` retention sweep (§4.F).
//! - [`reconciler::run_reconciler`] — the loop that reconciles every `OPEN`
//!   `Trade` row against the exchange's own position report (§4.G).
//!
//! [`context::Context`] is the explicit, per-process bundle of shared state
//! (database, cache, object store, capital/risk/LLM components, event bus)
//! each of the above is handed; there are no global statics.

pub mod context;
pub mod error;
pub mod orchestrator;
pub mod reconciler;
pub mod scheduler;
pub mod timeframe;

pub use context::Context;
pub use error::EngineError;
pub use orchestrator::run_cycle;
pub use reconciler::run_reconciler;
pub use scheduler::{run_maintenance, run_scheduler};
