//! Portals and gates.
//!
//! A portal groups the packet handlers served on one transport path; a gate
//! binds one handler to one packet `type` string. Handlers come in the two
//! supported shapes: packet-only, or packet plus sending connection id —
//! both register through the builder, which is the only way to construct a
//! portal, so any other signature is rejected at compile time.
//!
//! Dispatch failures are not fatal: an unknown discriminator or a handler
//! error is logged and the connection stays open.

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, warn};

use crate::protocol::{ConnectionId, Packet};

type GateHandler =
    Arc<dyn Fn(Packet, ConnectionId) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Startup validation failures in portal wiring.
#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    #[error("portal {path}: gate {event:?} bound twice")]
    DuplicateGate { path: String, event: String },
    #[error("portal path {0:?} registered twice")]
    DuplicatePortal(String),
}

/// Outcome of dispatching one inbound packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    UnknownType(String),
    HandlerFailed,
}

pub struct Portal {
    path: String,
    gates: HashMap<String, GateHandler>,
}

impl std::fmt::Debug for Portal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Portal")
            .field("path", &self.path)
            .field("gates", &self.gates.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Portal {
    pub fn builder(path: impl Into<String>) -> PortalBuilder {
        PortalBuilder {
            path: path.into(),
            gates: HashMap::new(),
            error: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn gate_count(&self) -> usize {
        self.gates.len()
    }

    pub fn handles(&self, event: &str) -> bool {
        self.gates.contains_key(event)
    }

    /// Route a decoded packet to its gate.
    pub async fn dispatch(&self, packet: Packet, sender: ConnectionId) -> DispatchOutcome {
        let event = packet.type_name();
        let Some(handler) = self.gates.get(event) else {
            warn!(path = %self.path, packet_type = event, %sender, "No gate bound for packet type");
            return DispatchOutcome::UnknownType(event.to_string());
        };

        match handler(packet, sender).await {
            Ok(()) => DispatchOutcome::Handled,
            Err(err) => {
                error!(
                    path = %self.path,
                    packet_type = event,
                    client_id = %sender,
                    error = %err,
                    "Gate handler failed"
                );
                DispatchOutcome::HandlerFailed
            }
        }
    }
}

pub struct PortalBuilder {
    path: String,
    gates: HashMap<String, GateHandler>,
    error: Option<PortalError>,
}

impl PortalBuilder {
    /// Bind a packet-only handler to `event`.
    pub fn gate<F, Fut>(self, event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Packet) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.bind(event.into(), Arc::new(move |packet, _sender| {
            Box::pin(handler(packet)) as BoxFuture<'static, anyhow::Result<()>>
        }))
    }

    /// Bind a handler that also receives the sending connection id.
    pub fn gate_with_sender<F, Fut>(self, event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Packet, ConnectionId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.bind(event.into(), Arc::new(move |packet, sender| {
            Box::pin(handler(packet, sender)) as BoxFuture<'static, anyhow::Result<()>>
        }))
    }

    fn bind(mut self, event: String, handler: GateHandler) -> Self {
        if self.error.is_some() {
            return self;
        }
        if self.gates.contains_key(&event) {
            self.error = Some(PortalError::DuplicateGate {
                path: self.path.clone(),
                event,
            });
            return self;
        }
        self.gates.insert(event, handler);
        self
    }

    pub fn build(self) -> Result<Portal, PortalError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        Ok(Portal {
            path: self.path,
            gates: self.gates,
        })
    }
}

/// All portals of one server, keyed by transport path.
#[derive(Default)]
pub struct PortalRegistry {
    portals: HashMap<String, Arc<Portal>>,
}

impl PortalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, portal: Portal) -> Result<Arc<Portal>, PortalError> {
        let path = portal.path.clone();
        if self.portals.contains_key(&path) {
            return Err(PortalError::DuplicatePortal(path));
        }
        let portal = Arc::new(portal);
        self.portals.insert(path, Arc::clone(&portal));
        Ok(portal)
    }

    pub fn get(&self, path: &str) -> Option<Arc<Portal>> {
        self.portals.get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.portals.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.portals.is_empty()
    }
}
