//! # vigil-runtime
//!
//! Runs built environments over a stream of events.
//!
//! ## Overview
//!
//! - [`ThreadPool`] is a fixed set of event loops. [`ThreadPool::create_worker`]
//!   hands out [`Worker`]s round-robin; every task a worker schedules is
//!   bound to a [`Lifetime`] and skipped once that lifetime is cancelled.
//! - [`EnvironmentSlot`] holds the active environment and swaps it
//!   atomically on reload.
//! - [`Dispatcher`] evaluates events on the pool against the active
//!   environment.
//! - [`EngineConfig`] is the TOML configuration the demo binary starts from.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let pool = Arc::new(ThreadPool::new(config.engine.threads)?);
//! let slot = Arc::new(EnvironmentSlot::new());
//! slot.install(environment)?;
//! let dispatcher = Dispatcher::new(pool, slot);
//! dispatcher.dispatch(event, |processed| println!("{}", processed.success))?;
//! ```

pub mod config;
pub mod lifetime;
pub mod router;
pub mod thread_pool;

pub use config::{CatalogSection, DatabaseConfig, EngineConfig, EngineSection, KvdbSection};
pub use lifetime::Lifetime;
pub use router::{Dispatcher, EnvironmentSlot};
pub use thread_pool::{default_thread_factory, ThreadFactory, ThreadPool, ThreadStart, Worker};

// ── Tests ─────────────────────────────────────────────────────────────────────
