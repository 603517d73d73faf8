/// Evaluation phases of a session and their transitions.
pub mod state_machine;

use std::{sync::Arc, time::SystemTime};

use tokio::sync::{RwLock, watch};

use crate::{
    clock::{Clock, SystemClock},
    config::AppConfig,
    dao::store::DebateStore,
    error::ServiceError,
    services::scoring::ScoringService,
};

/// Handle cloned into every handler and background task.
pub type SharedState = Arc<AppState>;

/// Central application state: the store handle, configuration and collaborators.
pub struct AppState {
    store: RwLock<Option<Arc<dyn DebateStore>>>,
    degraded: watch::Sender<bool>,
    config: AppConfig,
    scoring: Arc<dyn ScoringService>,
    clock: Arc<dyn Clock>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a store is installed.
    pub fn new(config: AppConfig, scoring: Arc<dyn ScoringService>) -> SharedState {
        Self::with_clock(config, scoring, Arc::new(SystemClock))
    }

    /// Same as [`AppState::new`] with an explicit time source.
    pub fn with_clock(
        config: AppConfig,
        scoring: Arc<dyn ScoringService>,
        clock: Arc<dyn Clock>,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            store: RwLock::new(None),
            degraded: degraded_tx,
            config,
            scoring,
            clock,
        })
    }

    /// Obtain a handle to the current store, if one is installed.
    pub async fn store(&self) -> Option<Arc<dyn DebateStore>> {
        let guard = self.store.read().await;
        guard.as_ref().cloned()
    }

    /// Current store, or [`ServiceError::Degraded`] while none is installed.
    pub async fn require_store(&self) -> Result<Arc<dyn DebateStore>, ServiceError> {
        self.store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a store implementation and leave degraded mode.
    pub async fn install_store(&self, store: Arc<dyn DebateStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current store and enter degraded mode.
    pub async fn clear_store(&self) {
        {
            let mut guard = self.store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.store.read().await;
        guard.is_none()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Scoring backend.
    pub fn scoring(&self) -> Arc<dyn ScoringService> {
        Arc::clone(&self.scoring)
    }

    /// Server time used for every timer decision.
    pub fn now(&self) -> SystemTime {
        self.clock.now()
    }

    fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dao::store::memory::MemoryStore, services::scoring::UnconfiguredScoring};

    #[tokio::test]
    async fn degraded_until_store_installed() {
        let state = AppState::new(AppConfig::default(), Arc::new(UnconfiguredScoring));
        let watcher = state.degraded_watcher();
        assert!(state.is_degraded().await);
        assert!(matches!(
            state.require_store().await,
            Err(ServiceError::Degraded)
        ));

        state.install_store(Arc::new(MemoryStore::new())).await;
        assert!(!state.is_degraded().await);
        assert!(!*watcher.borrow());

        state.clear_store().await;
        assert!(*watcher.borrow());
    }
}
