//! # Database
//!
//! High-level, application-specific interface to the PostgreSQL database: the
//! platform's permanent archive of users, bots, subscriptions, credentials,
//! trades, and the action-log audit trail (§3).
//!
//! ## Architectural Principles
//!
//! - **Layer 3 Adapter:** encapsulates all database-specific logic behind a
//!   clean API; the rest of the application never sees raw SQL.
//! - **Runtime-checked queries:** every method binds and executes through
//!   `sqlx::query`/`query_as` against the entity shapes already declared in
//!   `core_types` (`sqlx::FromRow`), rather than the compile-time `query!`
//!   macros, which would require a live database at build time.
//! - **Asynchronous & pooled:** every operation is async, backed by a shared
//!   `PgPool`.
//!
//! ## Public API
//!
//! - `connect`: establishes the connection pool.
//! - `run_migrations`: applies pending migrations (also exposed as the
//!   `migrate` CLI subcommand).
//! - `DbRepository`: the main struct exposing all data-access methods.
//! - `DbError`: this crate's error type.

pub mod connection;
pub mod error;
pub mod repository;

pub use connection::{connect, run_migrations};
pub use error::DbError;
pub use repository::DbRepository;