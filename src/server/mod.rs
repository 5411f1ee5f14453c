//! Server orchestration: wires the store, router, engine, bridge and
//! portals together and owns the startup/recovery lifecycle.

mod portals;

pub use portals::game_portal;

use futures_util::future::BoxFuture;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bridge::{spawn_bridge_pump, InMemoryBridge, InterprocessBridge};
use crate::codec::{JsonCodec, PacketCodec};
use crate::config::Config;
use crate::engine::{
    CycleRate, EngineError, ReadyState, TickEngine, TickEngineConfig,
};
use crate::metrics::ServerMetrics;
use crate::portal::{Portal, PortalError, PortalRegistry};
use crate::protocol::ProcessId;
use crate::retry::{RetryConfig, RetryExecutor};
use crate::router::Router;
use crate::store::{ConnectionStore, InMemorySharedTier};
use crate::sync::SyncError;
use crate::transport::GatewayContext;
use crate::world::{GameWorldCoordinator, GameWorldManager, WorldError};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Portal(#[from] PortalError),
    #[error(transparent)]
    World(#[from] WorldError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("required external services not ready within {0:?}")]
    StartupTimeout(Duration),
    #[error("transport failed: {0}")]
    Transport(#[source] anyhow::Error),
}

/// A required external collaborator probed during startup and steady state.
struct ExternalService {
    name: &'static str,
    probe: Box<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>,
}

impl ExternalService {
    async fn is_ready(&self) -> bool {
        (self.probe)().await
    }
}

/// Assembles an [`AltruistServer`]; portal and world registration errors
/// surface here, at boot.
pub struct AltruistServerBuilder {
    config: Config,
    codec: Arc<dyn PacketCodec>,
    worlds: Vec<GameWorldManager>,
}

impl AltruistServerBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            codec: Arc::new(JsonCodec),
            worlds: Vec::new(),
        }
    }

    pub fn codec(mut self, codec: Arc<dyn PacketCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn world(mut self, manager: GameWorldManager) -> Self {
        self.worlds.push(manager);
        self
    }

    pub fn build(self) -> Result<AltruistServer, ServerError> {
        let metrics = Arc::new(ServerMetrics::new());
        let process_id: ProcessId = Uuid::new_v4();

        let coordinator = Arc::new(GameWorldCoordinator::new());
        for manager in self.worlds {
            coordinator.register(manager)?;
        }

        let (store, bridge, externals) = if self.config.bridge.enabled {
            let shared = Arc::new(InMemorySharedTier::new());
            let bridge = Arc::new(InMemoryBridge::new());
            let store = Arc::new(ConnectionStore::with_shared_tier(
                self.config.world.default_room_capacity,
                Arc::clone(&shared) as _,
            ));

            let shared_probe = Arc::clone(&shared);
            let bridge_probe = Arc::clone(&bridge);
            let externals = vec![
                ExternalService {
                    name: "shared-tier",
                    probe: Box::new(move || -> BoxFuture<'static, bool> {
                        let shared = Arc::clone(&shared_probe);
                        Box::pin(async move {
                            use crate::store::SharedTier;
                            shared.health_check().await
                        })
                    }),
                },
                ExternalService {
                    name: "bridge",
                    probe: Box::new(move || -> BoxFuture<'static, bool> {
                        let bridge = Arc::clone(&bridge_probe);
                        Box::pin(async move { bridge.health_check().await })
                    }),
                },
            ];
            (store, Some(bridge), externals)
        } else {
            (
                Arc::new(ConnectionStore::new(self.config.world.default_room_capacity)),
                None,
                Vec::new(),
            )
        };

        let engine = Arc::new(TickEngine::new(
            TickEngineConfig {
                engine_rate: self.config.engine.engine_rate(),
                physics_rate: self.config.engine.physics_rate(),
                prune_interval_ticks: self.config.engine.prune_interval_ticks,
            },
            Arc::clone(&coordinator),
            Arc::clone(&metrics),
        ));

        let router = Arc::new(Router::new(
            Arc::clone(&store),
            Arc::clone(&self.codec),
            bridge
                .as_ref()
                .map(|b| Arc::clone(b) as Arc<dyn InterprocessBridge>),
            process_id,
            engine.dynamic_tasks(),
            engine.tick_clock(),
            Arc::clone(&metrics),
        ));

        engine.register_service(Arc::clone(&store));
        engine.register_service(Arc::clone(&metrics));
        engine.register_service(Arc::clone(&router));
        engine.register_service(Arc::clone(&coordinator));

        Ok(AltruistServer {
            config: self.config,
            process_id,
            codec: self.codec,
            store,
            metrics,
            coordinator,
            engine,
            router,
            bridge,
            externals,
            portals: PortalRegistry::new(),
            cancel: CancellationToken::new(),
        })
    }
}

pub struct AltruistServer {
    config: Config,
    process_id: ProcessId,
    codec: Arc<dyn PacketCodec>,
    store: Arc<ConnectionStore>,
    metrics: Arc<ServerMetrics>,
    coordinator: Arc<GameWorldCoordinator>,
    engine: Arc<TickEngine>,
    router: Arc<Router>,
    bridge: Option<Arc<InMemoryBridge>>,
    externals: Vec<ExternalService>,
    portals: PortalRegistry,
    cancel: CancellationToken,
}

impl AltruistServer {
    pub fn builder(config: Config) -> AltruistServerBuilder {
        AltruistServerBuilder::new(config)
    }

    /// Register a portal; portals are wired against the running router and
    /// store, so registration happens on the built server. Duplicate paths
    /// fail here, at boot.
    pub fn with_portal(mut self, portal: Portal) -> Result<Self, ServerError> {
        self.portals.register(portal)?;
        Ok(self)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    pub fn store(&self) -> &Arc<ConnectionStore> {
        &self.store
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn engine(&self) -> &Arc<TickEngine> {
        &self.engine
    }

    pub fn coordinator(&self) -> &Arc<GameWorldCoordinator> {
        &self.coordinator
    }

    pub fn metrics(&self) -> &Arc<ServerMetrics> {
        &self.metrics
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Run the startup sequence and start the engine.
    ///
    /// Every required external service must report ready within the
    /// configured window; expiry is fatal and the caller exits non-zero.
    pub async fn start(&self) -> Result<(), ServerError> {
        self.engine.readiness().set(ReadyState::Starting);

        self.await_externals(self.config.engine.startup_timeout())
            .await?;
        let pump_token = self.run_startup_actions()?;

        self.engine.readiness().set(ReadyState::Alive);
        self.engine.start()?;
        self.spawn_health_watchdog(pump_token);
        info!(process_id = %self.process_id, "Server started");
        Ok(())
    }

    /// Start, then serve the transport until shutdown.
    pub async fn run(self) -> Result<(), ServerError> {
        self.start().await?;

        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let ctx = Arc::new(GatewayContext {
            store: Arc::clone(&self.store),
            codec: Arc::clone(&self.codec),
            portals: Arc::new(self.portals),
            readiness: self.engine.readiness().clone(),
            metrics: Arc::clone(&self.metrics),
            cancel: self.cancel.child_token(),
        });
        crate::transport::serve(ctx, addr)
            .await
            .map_err(ServerError::Transport)?;

        self.engine.shutdown();
        Ok(())
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.engine.shutdown();
    }

    async fn await_externals(&self, timeout: Duration) -> Result<(), ServerError> {
        if self.externals.is_empty() {
            return Ok(());
        }

        let deadline = Instant::now() + timeout;
        for service in &self.externals {
            loop {
                if service.is_ready().await {
                    info!(service = service.name, "External service ready");
                    break;
                }
                if Instant::now() >= deadline {
                    error!(
                        service = service.name,
                        timeout_secs = timeout.as_secs(),
                        "External service not ready within the startup window"
                    );
                    return Err(ServerError::StartupTimeout(timeout));
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        }
        Ok(())
    }

    /// Build the closure that (re-)subscribes the bridge pump; called at
    /// startup and after every recovery, each run under a fresh child token
    /// so the previous pump can be cancelled first.
    fn pump_spawner(&self) -> Option<Arc<dyn Fn() -> CancellationToken + Send + Sync>> {
        let bridge = self.bridge.clone()?;
        let codec = Arc::clone(&self.codec);
        let client = Arc::clone(&self.router.client);
        let process_id = self.process_id;
        let metrics = Arc::clone(&self.metrics);
        let root = self.cancel.clone();

        Some(Arc::new(move || {
            let token = root.child_token();
            spawn_bridge_pump(
                Arc::clone(&bridge) as Arc<dyn InterprocessBridge>,
                Arc::clone(&codec),
                Arc::clone(&client),
                process_id,
                Arc::clone(&metrics),
                token.clone(),
            );
            token
        }))
    }

    /// Startup actions, re-run after every recovery: subscribe the bridge
    /// pump and (once) register the cleanup cyclic job.
    fn run_startup_actions(&self) -> Result<Option<CancellationToken>, ServerError> {
        let pump_token = self.pump_spawner().map(|spawn| spawn());

        let cleanup_registered = self
            .engine
            .schedule_task(
                "connection-cleanup",
                CycleRate::Seconds(self.config.engine.cleanup_interval_secs.max(1)),
                |store: Arc<ConnectionStore>, metrics: Arc<ServerMetrics>| async move {
                    let removed = store.cleanup().await;
                    if removed > 0 {
                        metrics
                            .expired_connections_cleaned
                            .fetch_add(removed as u64, Ordering::Relaxed);
                        info!(removed, "Cleaned up disconnected clients");
                    }
                },
            );
        match cleanup_registered {
            Ok(_) => Ok(pump_token),
            // Recovery path: the engine is already running with the job.
            Err(EngineError::AlreadyStarted | EngineError::DuplicateJob(_)) => Ok(pump_token),
            Err(err) => Err(err.into()),
        }
    }

    /// Steady-state monitor: an external outage flips readiness to
    /// `Failed` (pausing the engine), recovery retries re-run the startup
    /// actions and flip back to `Alive`; exhausted retries shut down.
    fn spawn_health_watchdog(&self, mut pump_token: Option<CancellationToken>) {
        if self.externals.is_empty() {
            return;
        }

        let bridge = self.bridge.clone();
        let respawn_pump = self.pump_spawner();
        let readiness = self.engine.readiness().clone();
        let cancel = self.cancel.child_token();
        let metrics = Arc::clone(&self.metrics);
        let shutdown = self.cancel.clone();

        tokio::spawn(async move {
            let mut probe_interval = tokio::time::interval(Duration::from_secs(2));
            probe_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    _ = probe_interval.tick() => {}
                }

                let healthy = match &bridge {
                    Some(bridge) => bridge.health_check().await,
                    None => true,
                };
                if healthy || !readiness.is_alive() {
                    continue;
                }

                warn!("External service lost; stopping the tick engine");
                readiness.set(ReadyState::Failed);
                if let Some(token) = pump_token.take() {
                    token.cancel();
                }
                readiness.set(ReadyState::Starting);

                let executor =
                    RetryExecutor::with_metrics(RetryConfig::persistent(), Arc::clone(&metrics));
                let bridge_for_retry = bridge.clone();
                let recovered = executor
                    .execute("reconnect-externals", move || {
                        let bridge = bridge_for_retry.clone();
                        async move {
                            let ready = match &bridge {
                                Some(bridge) => bridge.health_check().await,
                                None => true,
                            };
                            if ready {
                                Ok(())
                            } else {
                                Err("external services still unreachable")
                            }
                        }
                    })
                    .await;

                match recovered {
                    Ok(()) => {
                        info!("External services restored; re-running startup actions");
                        pump_token = respawn_pump.as_ref().map(|spawn| spawn());
                        readiness.set(ReadyState::Alive);
                    }
                    Err(err) => {
                        error!(error = err, "Recovery retries exhausted; shutting down");
                        shutdown.cancel();
                        return;
                    }
                }
            }
        });
    }
}
