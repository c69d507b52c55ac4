//! Per-context camera stream relay.
//!
//! Each context with a camera owns exactly one relay: a local TCP listener
//! that fans the printer's MJPEG stream out to any number of local viewers,
//! so the printer itself only ever sees one consumer.

use futures_util::StreamExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ResourceError;

/// Timeout for the initial upstream connection.
const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Parameters for one context's relay.
#[derive(Debug, Clone)]
pub struct CameraRelayParams {
    /// Upstream MJPEG stream URL (the printer's camera).
    pub source_url: String,
    /// Local address to serve viewers on; port 0 picks an ephemeral port.
    pub bind_addr: SocketAddr,
}

struct CameraRelay {
    instance_id: u64,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl CameraRelay {
    fn shut_down(self) {
        let _ = self.shutdown.send(true);
        self.accept_task.abort();
    }
}

/// Owns at most one camera relay per context id.
pub struct CameraRelayManager {
    relays: Mutex<HashMap<String, CameraRelay>>,
    next_instance: AtomicU64,
}

impl CameraRelayManager {
    pub fn new() -> Self {
        Self {
            relays: Mutex::new(HashMap::new()),
            next_instance: AtomicU64::new(1),
        }
    }

    /// Create (or replace) the relay for a context. Idempotent: an existing
    /// relay for the same id is torn down before the new one is created, so
    /// the old listener never leaks.
    pub async fn setup(
        &self,
        context_id: &str,
        params: CameraRelayParams,
    ) -> Result<SocketAddr, ResourceError> {
        let listener =
            TcpListener::bind(params.bind_addr)
                .await
                .map_err(|source| ResourceError::CameraBind {
                    context_id: context_id.to_string(),
                    bind_addr: params.bind_addr.to_string(),
                    source,
                })?;
        let local_addr = listener.local_addr().map_err(|source| ResourceError::CameraBind {
            context_id: context_id.to_string(),
            bind_addr: params.bind_addr.to_string(),
            source,
        })?;

        let instance_id = self.next_instance.fetch_add(1, Ordering::SeqCst);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let source_url = params.source_url.clone();
        let accept_task = tokio::spawn(async move {
            accept_loop(listener, source_url, shutdown_rx).await;
        });

        let relay = CameraRelay {
            instance_id,
            local_addr,
            shutdown: shutdown_tx,
            accept_task,
        };

        let previous = self
            .relays
            .lock()
            .unwrap()
            .insert(context_id.to_string(), relay);
        if let Some(previous) = previous {
            debug!(context_id = %context_id, "replacing existing camera relay");
            previous.shut_down();
        }

        info!(context_id = %context_id, addr = %local_addr, source = %params.source_url, "camera relay ready");
        Ok(local_addr)
    }

    /// Tear down a context's relay. No-op when none was set up.
    pub fn remove(&self, context_id: &str) {
        let relay = self.relays.lock().unwrap().remove(context_id);
        if let Some(relay) = relay {
            info!(context_id = %context_id, "camera relay removed");
            relay.shut_down();
        }
    }

    /// Local address viewers should connect to, if a relay exists.
    pub fn local_addr(&self, context_id: &str) -> Option<SocketAddr> {
        self.relays
            .lock()
            .unwrap()
            .get(context_id)
            .map(|r| r.local_addr)
    }

    /// Opaque identity of a context's relay instance. Two context ids never
    /// resolve to the same instance.
    pub fn instance_id(&self, context_id: &str) -> Option<u64> {
        self.relays
            .lock()
            .unwrap()
            .get(context_id)
            .map(|r| r.instance_id)
    }

    pub fn shutdown_all(&self) {
        let relays: Vec<CameraRelay> = {
            let mut map = self.relays.lock().unwrap();
            map.drain().map(|(_, relay)| relay).collect()
        };
        for relay in relays {
            relay.shut_down();
        }
    }
}

impl Default for CameraRelayManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn accept_loop(
    listener: TcpListener,
    source_url: String,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((client, peer)) => {
                        debug!(peer = %peer, "camera viewer connected");
                        let url = source_url.clone();
                        let client_shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(err) = serve_viewer(client, &url, client_shutdown).await {
                                debug!(peer = %peer, error = %err, "camera viewer disconnected");
                            }
                        });
                    }
                    Err(err) => {
                        warn!(error = %err, "camera relay accept failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                break;
            }
        }
    }
}

/// Proxy the upstream stream to a single connected viewer until either side
/// closes or the relay shuts down.
async fn serve_viewer(
    mut client: TcpStream,
    source_url: &str,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), CoreRelayIoError> {
    let response = tokio::time::timeout(UPSTREAM_CONNECT_TIMEOUT, reqwest::get(source_url))
        .await
        .map_err(|_| CoreRelayIoError::UpstreamTimeout)?
        .map_err(CoreRelayIoError::Upstream)?;

    if !response.status().is_success() {
        client
            .write_all(b"HTTP/1.0 502 Bad Gateway\r\nConnection: close\r\n\r\n")
            .await
            .map_err(CoreRelayIoError::Client)?;
        return Err(CoreRelayIoError::UpstreamStatus(response.status().as_u16()));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let header = format!(
        "HTTP/1.0 200 OK\r\nContent-Type: {}\r\nConnection: close\r\n\r\n",
        content_type
    );
    client
        .write_all(header.as_bytes())
        .await
        .map_err(CoreRelayIoError::Client)?;

    let mut stream = response.bytes_stream();
    loop {
        tokio::select! {
            chunk = stream.next() => {
                match chunk {
                    Some(Ok(bytes)) => {
                        client.write_all(&bytes).await.map_err(CoreRelayIoError::Client)?;
                    }
                    Some(Err(err)) => return Err(CoreRelayIoError::Upstream(err)),
                    None => return Ok(()),
                }
            }
            _ = shutdown.changed() => {
                return Ok(());
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum CoreRelayIoError {
    #[error("upstream connect timed out")]
    UpstreamTimeout,
    #[error("upstream error: {0}")]
    Upstream(reqwest::Error),
    #[error("upstream returned HTTP {0}")]
    UpstreamStatus(u16),
    #[error("client write failed: {0}")]
    Client(std::io::Error),
}
