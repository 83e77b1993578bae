//! Acknowledged control endpoint of the classification engine.
//!
//! Each connection carries exactly one request frame. Add and Remove are
//! answered with a status byte once the store has been updated; View is
//! answered with one frame per stored rule and a zero-length terminator.

use super::config::EngineConfig;
use super::matcher::Matcher;
use super::store::RuleStore;
use crate::codec::{self, Operation, Record, RECORD_LEN};
use crate::control::{STATUS_FULL, STATUS_MALFORMED, STATUS_OK, STATUS_UNSUPPORTED};
use crate::error::{MfwError, Result};
use std::future::Future;
use std::io::{self, ErrorKind};
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::time;

/// How long a client may take to deliver its request frame.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after a failed accept, so descriptor exhaustion does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

fn refuse(path: &Path, source: io::Error) -> MfwError {
    MfwError::ChannelOpen {
        path: path.display().to_string(),
        source,
    }
}

/// Binds the control socket. A socket file nobody listens on is replaced;
/// anything else at the path is left alone and reported.
pub fn bind(path: &Path) -> Result<UnixListener> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) => {
            if !meta.file_type().is_socket() {
                return Err(refuse(
                    path,
                    io::Error::new(ErrorKind::AlreadyExists, "path exists and is not a socket"),
                ));
            }
            if std::os::unix::net::UnixStream::connect(path).is_ok() {
                return Err(refuse(
                    path,
                    io::Error::new(ErrorKind::AddrInUse, "another engine is listening"),
                ));
            }
            log::warn!("Removing stale control socket {}", path.display());
            std::fs::remove_file(path).map_err(|e| refuse(path, e))?;
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(refuse(path, e)),
    }

    UnixListener::bind(path).map_err(|e| refuse(path, e))
}

/// Source of incoming control connections.
pub trait Incoming {
    fn next_connection(&mut self) -> impl Future<Output = io::Result<UnixStream>> + Send;
}

impl Incoming for UnixListener {
    async fn next_connection(&mut self) -> io::Result<UnixStream> {
        self.accept().await.map(|(stream, _)| stream)
    }
}

/// Runs the engine until Ctrl-C. The matcher's store is the one the control
/// socket edits.
pub async fn run(config: &EngineConfig, matcher: Matcher) -> Result<()> {
    let listener = bind(&config.socket_path)?;
    let policy = matcher.policy();
    log::info!(
        "Engine listening on {} (on_match={:?}, on_miss={:?})",
        config.socket_path.display(),
        policy.on_match,
        policy.on_miss
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };
    serve_with_timeout(
        listener,
        Arc::clone(matcher.store()),
        config.request_timeout(),
        shutdown,
    )
    .await?;

    if let Err(e) = std::fs::remove_file(&config.socket_path) {
        log::debug!("Could not remove control socket: {}", e);
    }
    Ok(())
}

/// Accepts connections until `shutdown` resolves, with the default request
/// deadline.
pub async fn serve_until<I, F>(incoming: I, store: Arc<RuleStore>, shutdown: F) -> Result<()>
where
    I: Incoming,
    F: Future<Output = ()>,
{
    serve_with_timeout(incoming, store, DEFAULT_REQUEST_TIMEOUT, shutdown).await
}

/// Accepts connections until `shutdown` resolves. Each connection is
/// handled on its own task. Accept failures are logged and do not stop the
/// engine, since the store lives only as long as this loop.
pub async fn serve_with_timeout<I, F>(
    mut incoming: I,
    store: Arc<RuleStore>,
    request_timeout: Duration,
    shutdown: F,
) -> Result<()>
where
    I: Incoming,
    F: Future<Output = ()>,
{
    let next_id = AtomicU64::new(1);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                log::info!("Engine shutting down with {} rules installed", store.len());
                return Ok(());
            }
            accepted = incoming.next_connection() => {
                let stream = match accepted {
                    Ok(stream) => stream,
                    Err(e) => {
                        log::warn!("Accept failed: {}", e);
                        time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };
                let id = next_id.fetch_add(1, Ordering::Relaxed);
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, store, request_timeout).await {
                        log::warn!("Connection {} failed: {}", id, e);
                    }
                });
            }
        }
    }
}

/// Reads one request frame. `None` means the length prefix was wrong.
async fn read_frame(stream: &mut UnixStream) -> io::Result<Option<[u8; RECORD_LEN]>> {
    let len = stream.read_u16().await? as usize;
    if len != RECORD_LEN {
        log::warn!("Rejecting frame of {} bytes", len);
        return Ok(None);
    }

    let mut buf = [0u8; RECORD_LEN];
    stream.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

async fn handle_connection(
    mut stream: UnixStream,
    store: Arc<RuleStore>,
    request_timeout: Duration,
) -> io::Result<()> {
    let frame = match time::timeout(request_timeout, read_frame(&mut stream)).await {
        Ok(frame) => frame?,
        Err(_) => {
            log::debug!("Dropping client silent for {:?}", request_timeout);
            return Ok(());
        }
    };

    let Some(buf) = frame else {
        return stream.write_u8(STATUS_MALFORMED).await;
    };

    let record = match Record::decode(&buf) {
        Ok(record) => record,
        Err(e) => {
            log::warn!("Rejecting request: {}", e);
            return stream.write_u8(STATUS_MALFORMED).await;
        }
    };

    match record.operation {
        Operation::Add | Operation::Remove => {
            let status = match store.apply(&record) {
                Ok(()) => STATUS_OK,
                Err(MfwError::StoreFull(limit)) => {
                    log::warn!("Refusing Add: store holds {} rules", limit);
                    STATUS_FULL
                }
                Err(e) => {
                    log::warn!("Request failed: {}", e);
                    STATUS_MALFORMED
                }
            };
            stream.write_u8(status).await?;
        }
        Operation::View => {
            let snapshot = store.enumerate();
            for rule in &snapshot {
                stream.write_u16(RECORD_LEN as u16).await?;
                stream.write_all(&codec::encode(rule, Operation::View)).await?;
            }
            stream.write_u16(0).await?;
            log::debug!("Sent {} rules", snapshot.len());
        }
        Operation::None => {
            stream.write_u8(STATUS_UNSUPPORTED).await?;
        }
    }

    stream.flush().await
}
