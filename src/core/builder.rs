use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{config::Config, registry::Registry, supervisor::Supervisor};
use crate::events::Bus;
use crate::spawn::{IdentityResolver, SystemIdentity};
use crate::subscribers::Subscribe;

/// Builder for constructing a [`Supervisor`] with optional features.
pub struct SupervisorBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    identity: Arc<dyn IdentityResolver>,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            identity: Arc::new(SystemIdentity),
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Each subscriber is attached to the bus with its own worker task and
    /// receives the events matching its [`Subscribe::pattern`].
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Replaces the user/group lookup (defaults to the system account database).
    pub fn with_identity(mut self, identity: Arc<dyn IdentityResolver>) -> Self {
        self.identity = identity;
        self
    }

    /// Builds and returns the Supervisor instance.
    ///
    /// Must be called within a Tokio runtime: subscriber workers are spawned here.
    pub fn build(self) -> Arc<Supervisor> {
        let bus = Bus::new();
        for sub in self.subscribers {
            bus.attach(sub);
        }
        let runtime_token = CancellationToken::new();
        let registry = Registry::new(
            self.cfg.clone(),
            bus.clone(),
            self.identity,
            runtime_token.clone(),
        );

        Arc::new(Supervisor::new_internal(
            self.cfg,
            bus,
            registry,
            runtime_token,
        ))
    }
}
