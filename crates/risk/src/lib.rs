//! Portfolio safety net, separate from per-trade position sizing
//! (`capital-management`): `circuit_breaker::GlobalRiskManager` halts a
//! symbol after repeated losses, or a whole account after a daily drawdown
//! breach (§10.H).

pub mod circuit_breaker;
pub mod error;

// Note: `simple_manager.rs` still lives in this directory but isn't
// declared as a module here. It ported per-trade sizing against a config
// shape (`configuration::RiskManagement`) that capital-management's sizing
// methods have since superseded — left on disk pending the final trim
// pass rather than wired in and immediately dead.

pub use circuit_breaker::GlobalRiskManager;
pub use error::RiskError;
