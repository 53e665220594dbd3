//! Gateway shared state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use viva_agent::{SessionBackends, SessionOrchestrator, SessionSettings};
use viva_core::config::Config;

/// Shared gateway state accessible from all connections and handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub backends: SessionBackends,
    pub settings: SessionSettings,
    active_sessions: AtomicUsize,
    completed_sessions: AtomicU64,
    #[cfg(feature = "metrics")]
    pub prometheus: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl GatewayState {
    pub fn new(config: Arc<Config>, backends: SessionBackends) -> Self {
        let settings = SessionSettings::from_config(&config);
        Self {
            config,
            backends,
            settings,
            active_sessions: AtomicUsize::new(0),
            completed_sessions: AtomicU64::new(0),
            #[cfg(feature = "metrics")]
            prometheus: None,
        }
    }

    /// A fresh orchestrator for one connection.
    pub fn orchestrator(&self) -> SessionOrchestrator {
        SessionOrchestrator::new(self.settings.clone(), self.backends.clone())
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    pub fn completed_sessions(&self) -> u64 {
        self.completed_sessions.load(Ordering::SeqCst)
    }

    /// Count a session as live until the returned guard is dropped.
    pub fn track_session(self: &Arc<Self>) -> SessionGuard {
        self.active_sessions.fetch_add(1, Ordering::SeqCst);
        SessionGuard {
            state: self.clone(),
        }
    }
}

pub struct SessionGuard {
    state: Arc<GatewayState>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.state.active_sessions.fetch_sub(1, Ordering::SeqCst);
        self.state.completed_sessions.fetch_add(1, Ordering::SeqCst);
    }
}
