//! Routing events to the active environment.
//!
//! `EnvironmentSlot` holds the environment currently serving traffic and
//! swaps it atomically; a failed rebuild leaves the previous one in place.
//! `Dispatcher` evaluates each event on the thread pool against whatever
//! environment is installed when the task runs.

use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use vigil_builder::Environment;
use vigil_contracts::{
    error::{VigilError, VigilResult},
    Event, ProcessedEvent,
};

use crate::lifetime::Lifetime;
use crate::thread_pool::ThreadPool;

// ── Slot ──────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct EnvironmentSlot {
    current: RwLock<Option<Arc<Environment>>>,
}

impl EnvironmentSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `environment` the active one and return the one it replaces.
    pub fn install(&self, environment: Environment) -> VigilResult<Option<Arc<Environment>>> {
        let environment = Arc::new(environment);
        let mut current = self.current.write().map_err(|e| VigilError::Runtime {
            reason: format!("environment slot lock poisoned: {}", e),
        })?;
        let previous = current.replace(Arc::clone(&environment));

        info!(
            environment = %environment.name(),
            id = %environment.id(),
            fingerprint = %environment.fingerprint(),
            replaced = %previous.as_ref().map(|p| p.fingerprint().to_string()).unwrap_or_default(),
            "environment installed"
        );
        Ok(previous)
    }

    /// Build a new environment with `build` and install it. On failure the
    /// active environment keeps serving and the build error is returned.
    pub fn reload<F>(&self, build: F) -> VigilResult<Arc<Environment>>
    where
        F: FnOnce() -> VigilResult<Environment>,
    {
        match build() {
            Ok(environment) => {
                self.install(environment)?;
                self.current().ok_or_else(|| VigilError::Runtime {
                    reason: "environment vanished after install".to_string(),
                })
            }
            Err(e) => {
                warn!(error = %e, "environment reload rejected; keeping the active environment");
                Err(e)
            }
        }
    }

    pub fn current(&self) -> Option<Arc<Environment>> {
        self.current.read().ok().and_then(|current| current.clone())
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

pub struct Dispatcher {
    pool: Arc<ThreadPool>,
    slot: Arc<EnvironmentSlot>,
    lifetime: Lifetime,
}

impl Dispatcher {
    pub fn new(pool: Arc<ThreadPool>, slot: Arc<EnvironmentSlot>) -> Self {
        Self {
            pool,
            slot,
            lifetime: Lifetime::new(),
        }
    }

    pub fn slot(&self) -> &Arc<EnvironmentSlot> {
        &self.slot
    }

    /// Evaluate `event` on the next loop and pass the result to `on_done`.
    ///
    /// The event is evaluated against the environment installed when the
    /// task runs, which may be newer than the one installed now.
    pub fn dispatch<F>(&self, event: Event, on_done: F) -> VigilResult<()>
    where
        F: FnOnce(ProcessedEvent) + Send + 'static,
    {
        if self.lifetime.is_cancelled() {
            return Err(VigilError::Runtime {
                reason: "dispatcher is shut down".to_string(),
            });
        }
        if self.slot.current().is_none() {
            return Err(VigilError::Runtime {
                reason: "no environment installed".to_string(),
            });
        }

        let worker = self.pool.create_worker(&self.lifetime);
        debug!(loop_index = worker.loop_index(), "event dispatched");

        let slot = Arc::clone(&self.slot);
        worker.schedule(move || match slot.current() {
            Some(environment) => on_done(environment.evaluate(event)),
            None => warn!("event dropped: no environment installed"),
        })
    }

    /// Skip every event dispatched so far that has not been evaluated, and
    /// reject new ones.
    pub fn shutdown(&self) {
        self.lifetime.cancel();
        info!("dispatcher shut down");
    }
}
