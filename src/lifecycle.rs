//! Startup and shutdown sequencing:
//! `Uninitialized -> CoreReady -> Serving -> Draining -> Closed`.

use crate::config::TenancyConfig;
use crate::db::Db;
use crate::error::TenancyError;
use crate::registry::{PoolConnector, PoolRegistry};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Uninitialized,
    CoreReady,
    Serving,
    Draining,
    Closed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Uninitialized => "uninitialized",
            Phase::CoreReady => "core_ready",
            Phase::Serving => "serving",
            Phase::Draining => "draining",
            Phase::Closed => "closed",
        }
    }
}

/// Owns the registry for the life of the process.
pub struct Lifecycle {
    registry: Arc<PoolRegistry>,
    phase: watch::Sender<Phase>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    shutdown_gate: tokio::sync::Mutex<()>,
}

impl Lifecycle {
    pub fn new(registry: Arc<PoolRegistry>) -> Self {
        let (phase, _) = watch::channel(Phase::Uninitialized);
        Lifecycle {
            registry,
            phase,
            sweeper: Mutex::new(None),
            shutdown_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Build a registry against PostgreSQL and bring the core pool up.
    pub async fn bootstrap(config: TenancyConfig) -> Result<Self, TenancyError> {
        let lifecycle = Lifecycle::new(Arc::new(PoolRegistry::new(Arc::new(config))));
        lifecycle.start().await?;
        Ok(lifecycle)
    }

    /// Same as [`Lifecycle::bootstrap`] with a custom connector.
    pub async fn bootstrap_with(
        config: TenancyConfig,
        connector: Arc<dyn PoolConnector>,
    ) -> Result<Self, TenancyError> {
        let registry = PoolRegistry::with_connector(Arc::new(config), connector);
        let lifecycle = Lifecycle::new(Arc::new(registry));
        lifecycle.start().await?;
        Ok(lifecycle)
    }

    /// `Uninitialized -> CoreReady`. A core pool failure here is fatal to startup.
    pub async fn start(&self) -> Result<(), TenancyError> {
        self.expect_phase(Phase::Uninitialized, Phase::CoreReady)?;
        if let Err(e) = self.registry.get_or_create_core_pool().await {
            tracing::error!(error = %e, "core pool bootstrap failed");
            return Err(e);
        }
        self.phase.send_replace(Phase::CoreReady);
        if let Some(idle) = self.registry.config().tenant_idle_timeout {
            self.spawn_idle_sweeper(idle);
        }
        Ok(())
    }

    /// `CoreReady -> Serving`.
    pub fn mark_serving(&self) -> Result<(), TenancyError> {
        self.expect_phase(Phase::CoreReady, Phase::Serving)?;
        self.phase.send_replace(Phase::Serving);
        tracing::info!("accepting traffic");
        Ok(())
    }

    /// `Serving | CoreReady -> Draining -> Closed`. Closes every pool; repeated calls are no-ops.
    /// Concurrent callers wait until the pools are actually closed.
    pub async fn shutdown(&self) -> Result<(), TenancyError> {
        let _gate = self.shutdown_gate.lock().await;
        if self.phase() == Phase::Closed {
            return Ok(());
        }
        self.phase.send_replace(Phase::Draining);
        tracing::info!("draining pools");
        if let Some(handle) = self.sweeper.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
        let result = self.registry.shutdown_all().await;
        self.phase.send_replace(Phase::Closed);
        if let Err(e) = &result {
            tracing::warn!(error = %e, "shutdown completed with errors");
        }
        result
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Receiver that observes every phase change.
    pub fn watch(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    pub fn db(&self) -> Db {
        Db::new(self.registry.clone())
    }

    fn expect_phase(&self, from: Phase, to: Phase) -> Result<(), TenancyError> {
        let current = self.phase();
        if current == from {
            Ok(())
        } else {
            Err(TenancyError::InvalidTransition {
                from: current.as_str(),
                to: to.as_str(),
            })
        }
    }

    fn spawn_idle_sweeper(&self, idle: Duration) {
        let registry = self.registry.clone();
        let every = (idle / 2).max(Duration::from_secs(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if registry.is_closed() {
                    break;
                }
                let evicted = registry.evict_idle(idle).await;
                if !evicted.is_empty() {
                    tracing::debug!(count = evicted.len(), "idle sweep");
                }
            }
        });
        *self.sweeper.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::testing::CountingConnector;

    fn config() -> TenancyConfig {
        TenancyConfig::with_database_url("postgres://127.0.0.1:1/core")
    }

    #[tokio::test]
    async fn walks_the_happy_path() {
        let lc = Lifecycle::bootstrap_with(config(), Arc::new(CountingConnector::default()))
            .await
            .unwrap();
        let mut phases = lc.watch();
        assert_eq!(lc.phase(), Phase::CoreReady);
        assert!(lc.registry().get_core_pool().is_ok());

        lc.mark_serving().unwrap();
        assert_eq!(*phases.borrow_and_update(), Phase::Serving);

        lc.registry().get_or_create_tenant_pool("tzolak").await.unwrap();
        lc.shutdown().await.unwrap();
        assert_eq!(lc.phase(), Phase::Closed);
        assert!(lc.registry().is_empty());

        lc.shutdown().await.unwrap();
        assert_eq!(lc.phase(), Phase::Closed);
    }

    #[tokio::test]
    async fn concurrent_shutdown_callers_see_closed_pools() {
        let lc = Arc::new(
            Lifecycle::bootstrap_with(config(), Arc::new(CountingConnector::default()))
                .await
                .unwrap(),
        );
        lc.mark_serving().unwrap();
        let pool = lc.registry().get_or_create_tenant_pool("tzolak").await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..4 {
            let lc = lc.clone();
            let pool = pool.clone();
            tasks.spawn(async move {
                lc.shutdown().await.unwrap();
                assert_eq!(lc.phase(), Phase::Closed);
                assert!(pool.is_closed());
                assert!(lc.registry().is_empty());
            });
        }
        while let Some(res) = tasks.join_next().await {
            res.unwrap();
        }
    }

    #[tokio::test]
    async fn core_failure_is_fatal() {
        let connector = Arc::new(CountingConnector {
            core_down: true,
            ..Default::default()
        });
        let err = Lifecycle::bootstrap_with(config(), connector).await.err().unwrap();
        assert!(matches!(err, TenancyError::Connectivity(_)));
    }

    #[tokio::test]
    async fn cannot_serve_before_core_is_ready() {
        let registry = Arc::new(PoolRegistry::with_connector(
            Arc::new(config()),
            Arc::new(CountingConnector::default()),
        ));
        let lc = Lifecycle::new(registry);
        assert!(matches!(
            lc.mark_serving(),
            Err(TenancyError::InvalidTransition { from: "uninitialized", to: "serving" })
        ));
        lc.start().await.unwrap();
        assert!(lc.start().await.is_err());
        lc.mark_serving().unwrap();
        assert!(lc.mark_serving().is_err());
    }

    #[tokio::test]
    async fn idle_sweeper_evicts_unused_pools() {
        let mut cfg = config();
        cfg.tenant_idle_timeout = Some(Duration::from_millis(10));
        let lc = Lifecycle::bootstrap_with(cfg, Arc::new(CountingConnector::default()))
            .await
            .unwrap();
        lc.registry().get_or_create_tenant_pool("sleepy").await.unwrap();
        // Sweeps run at most once per second.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!lc.registry().is_warm("sleepy"));
        lc.shutdown().await.unwrap();
    }
}
