//! One-shot transfer listener: bind the code's port, accept exactly one peer,
//! stream the file, close.
//!
//! `Idle -> Listening -> Serving -> Closed`. `Idle -> Closed` when there is no
//! offer or the bind fails; `Listening -> Closed` on expiry or shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sharecode_core::{wire, FileOffer, Registry, ShareCode};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listening,
    Serving,
    Closed,
}

impl SessionState {
    fn can_move_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Listening) | (Idle, Closed) | (Listening, Serving) | (Listening, Closed) | (Serving, Closed)
        )
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    NoOffer,
    /// The code's port is held by another socket. The offer stays registered.
    PortInUse,
    BindFailed,
    /// Nobody connected before the offer's deadline.
    Expired,
    /// Node shutdown while still listening.
    Cancelled,
    Served { bytes: u64 },
    /// The peer connected but the header or body could not be sent.
    SendFailed,
    AcceptFailed,
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("no file is associated with code {0}")]
    NoOffer(ShareCode),
    #[error("port {0} is already in use")]
    PortInUse(ShareCode),
    #[error("cannot bind port {code}: {source}")]
    Bind {
        code: ShareCode,
        source: std::io::Error,
    },
    #[error("session for code {0} is not idle")]
    NotIdle(ShareCode),
}

enum Wake {
    Accepted(std::io::Result<(TcpStream, SocketAddr)>),
    Expired,
    Stopped,
}

/// One listener for one code. Serves at most one connection, ever.
#[derive(Debug)]
pub struct TransferSession {
    code: ShareCode,
    state: SessionState,
    offer: Option<FileOffer>,
    listener: Option<TcpListener>,
}

impl TransferSession {
    pub fn new(code: ShareCode) -> Self {
        Self {
            code,
            state: SessionState::Idle,
            offer: None,
            listener: None,
        }
    }

    pub fn code(&self) -> ShareCode {
        self.code
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_move_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::trace!(code = self.code, from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    /// Look up the offer and bind its port on `host`.
    pub async fn bind(&mut self, registry: &Registry, host: &str) -> Result<(), ServeError> {
        if self.state != SessionState::Idle {
            return Err(ServeError::NotIdle(self.code));
        }
        let offer = match registry.lookup(self.code) {
            Some(o) => o,
            None => {
                self.transition(SessionState::Closed);
                return Err(ServeError::NoOffer(self.code));
            }
        };
        match TcpListener::bind((host, self.code)).await {
            Ok(listener) => {
                self.listener = Some(listener);
                self.offer = Some(offer);
                self.transition(SessionState::Listening);
                Ok(())
            }
            Err(e) => {
                self.transition(SessionState::Closed);
                if e.kind() == std::io::ErrorKind::AddrInUse {
                    Err(ServeError::PortInUse(self.code))
                } else {
                    Err(ServeError::Bind {
                        code: self.code,
                        source: e,
                    })
                }
            }
        }
    }

    /// Wait for one peer (or `ttl`, or shutdown), then send the file.
    /// The offer is withdrawn and its blob removed unless the node is shutting down.
    pub async fn run(
        mut self,
        registry: Arc<Registry>,
        ttl: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> SessionOutcome {
        let (listener, offer) = match (self.listener.take(), self.offer.take()) {
            (Some(l), Some(o)) => (l, o),
            _ => {
                tracing::warn!(code = self.code, state = ?self.state, "session run without bind");
                return SessionOutcome::BindFailed;
            }
        };
        tracing::info!(code = self.code, file = %offer.file_name, "serving file");

        let stopped = async {
            // A dropped sender means no shutdown will ever be signalled.
            if shutdown.wait_for(|&stop| stop).await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        let wake = tokio::select! {
            r = listener.accept() => Wake::Accepted(r),
            _ = tokio::time::sleep(ttl) => Wake::Expired,
            _ = stopped => Wake::Stopped,
        };
        // Stop accepting before anything is sent.
        drop(listener);

        let (stream, peer) = match wake {
            Wake::Accepted(Ok(pair)) => pair,
            Wake::Accepted(Err(e)) => {
                self.transition(SessionState::Closed);
                tracing::error!(code = self.code, error = %e, "accept failed");
                registry.withdraw(self.code);
                storage::discard(&offer.path).await;
                return SessionOutcome::AcceptFailed;
            }
            Wake::Expired => {
                self.transition(SessionState::Closed);
                tracing::info!(code = self.code, "offer expired without a download");
                registry.withdraw(self.code);
                storage::discard(&offer.path).await;
                return SessionOutcome::Expired;
            }
            Wake::Stopped => {
                self.transition(SessionState::Closed);
                tracing::debug!(code = self.code, "listener cancelled by shutdown");
                registry.withdraw(self.code);
                return SessionOutcome::Cancelled;
            }
        };

        self.transition(SessionState::Serving);
        registry.withdraw(self.code);
        tracing::info!(code = self.code, %peer, "client connected");
        let outcome = match send_file(stream, &offer).await {
            Ok(bytes) => {
                tracing::info!(code = self.code, file = %offer.file_name, bytes, %peer, "file sent");
                SessionOutcome::Served { bytes }
            }
            Err(e) => {
                tracing::error!(code = self.code, error = %e, %peer, "error sending file to client");
                SessionOutcome::SendFailed
            }
        };
        storage::discard(&offer.path).await;
        self.transition(SessionState::Closed);
        outcome
    }
}

/// Header line, then the file body. The connection closes when this returns.
async fn send_file(mut stream: TcpStream, offer: &FileOffer) -> std::io::Result<u64> {
    let mut file = tokio::fs::File::open(&offer.path).await?;
    stream.write_all(&wire::encode_header(&offer.file_name)).await?;
    let bytes = tokio::io::copy(&mut file, &mut stream).await?;
    stream.flush().await?;
    stream.shutdown().await?;
    Ok(bytes)
}

/// Bind and run a session for an already registered code, logging instead of
/// returning errors. A port conflict leaves the offer registered.
/// The upload path binds through `TransferSession` directly so it can retry.
#[cfg_attr(not(test), allow(dead_code))]
pub async fn serve(
    registry: Arc<Registry>,
    code: ShareCode,
    host: &str,
    ttl: Duration,
    shutdown: watch::Receiver<bool>,
) -> SessionOutcome {
    let mut session = TransferSession::new(code);
    match session.bind(&registry, host).await {
        Ok(()) => session.run(registry, ttl, shutdown).await,
        Err(ServeError::NoOffer(code)) => {
            tracing::info!(code, "no file is associated with this code");
            SessionOutcome::NoOffer
        }
        Err(ServeError::PortInUse(code)) => {
            tracing::warn!(code, "port already in use, offer left registered");
            SessionOutcome::PortInUse
        }
        Err(e) => {
            tracing::error!(code, error = %e, "transfer listener not started");
            SessionOutcome::BindFailed
        }
    }
}
