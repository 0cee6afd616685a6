//! Bounded pool of one-shot listeners with per-offer expiry and shutdown.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sharecode_core::{Registry, RegistryError, ShareCode};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::listener::{ServeError, SessionOutcome, TransferSession};

/// Fresh codes tried when a drawn port turns out to be taken by another process.
const BIND_ATTEMPTS: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum OfferError {
    #[error("too many outstanding offers")]
    PoolFull,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Serve(#[from] ServeError),
    #[error("no bindable share code after {0} attempts")]
    NoFreePort(usize),
}

/// Reserved capacity for one listener. Dropping it frees the slot.
pub struct ListenerSlot(OwnedSemaphorePermit);

pub struct Supervisor {
    registry: Arc<Registry>,
    slots: Arc<Semaphore>,
    max_listeners: usize,
    ttl: Duration,
    bind_host: String,
    shutdown: watch::Sender<bool>,
}

impl Supervisor {
    pub fn new(
        registry: Arc<Registry>,
        max_listeners: usize,
        ttl: Duration,
        bind_host: impl Into<String>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry,
            slots: Arc::new(Semaphore::new(max_listeners)),
            max_listeners,
            ttl,
            bind_host: bind_host.into(),
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Listeners currently holding a slot.
    pub fn active(&self) -> usize {
        self.max_listeners - self.slots.available_permits()
    }

    /// Claim a slot up front so a full pool is detected before anything is stored.
    pub fn try_reserve(&self) -> Result<ListenerSlot, OfferError> {
        self.slots
            .clone()
            .try_acquire_owned()
            .map(ListenerSlot)
            .map_err(|_| OfferError::PoolFull)
    }

    /// Register `path`, bind its listener and start the session in the background.
    /// A code whose port is taken is withdrawn and replaced by a fresh one.
    pub async fn offer_and_listen(
        &self,
        slot: ListenerSlot,
        path: &Path,
        file_name: &str,
    ) -> Result<ShareCode, OfferError> {
        for _ in 0..BIND_ATTEMPTS {
            let code = self.registry.offer(path, file_name)?;
            let mut session = TransferSession::new(code);
            match session.bind(&self.registry, &self.bind_host).await {
                Ok(()) => {
                    self.spawn(slot, session);
                    return Ok(code);
                }
                Err(ServeError::PortInUse(code)) => {
                    tracing::warn!(code, "port already in use, drawing another code");
                    self.registry.withdraw(code);
                }
                Err(e) => {
                    self.registry.withdraw(code);
                    return Err(e.into());
                }
            }
        }
        Err(OfferError::NoFreePort(BIND_ATTEMPTS))
    }

    /// Run `serve` for an already registered code. Bind errors are only logged.
    #[cfg(test)]
    pub fn serve_detached(&self, slot: ListenerSlot, code: ShareCode) -> JoinHandle<SessionOutcome> {
        let registry = self.registry.clone();
        let host = self.bind_host.clone();
        let ttl = self.ttl;
        let shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let _slot = slot;
            crate::listener::serve(registry, code, &host, ttl, shutdown).await
        })
    }

    fn spawn(&self, slot: ListenerSlot, session: TransferSession) -> JoinHandle<SessionOutcome> {
        let registry = self.registry.clone();
        let ttl = self.ttl;
        let shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let _slot = slot;
            let code = session.code();
            let outcome = session.run(registry, ttl, shutdown).await;
            tracing::debug!(code, ?outcome, "transfer session finished");
            outcome
        })
    }

    /// Close every listener still waiting for a peer.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wait for every session to release its slot. False if `grace` ran out first.
    pub async fn drain(&self, grace: Duration) -> bool {
        let all = u32::try_from(self.max_listeners).unwrap_or(u32::MAX);
        matches!(
            tokio::time::timeout(grace, self.slots.acquire_many(all)).await,
            Ok(Ok(_))
        )
    }
}
