use crate::orchestrator::TabEvent;
use crate::router::{Dispatch, Router, SenderContext};
use shield_gateway::Gateway;
use std::{io, path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::{mpsc, watch};

#[cfg(unix)]
use shield_core::protocol::{decode_frame, encode_frame, HostFrame, HostReply, Reply};
#[cfg(unix)]
use std::{
    fs,
    os::unix::fs::{FileTypeExt, PermissionsExt},
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};
#[cfg(unix)]
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{unix::OwnedWriteHalf, UnixListener, UnixStream},
};
#[cfg(unix)]
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct HostConfig {
    pub socket_path: PathBuf,
    pub write_timeout: Duration,
    pub queue_capacity: usize,
    pub max_frame_bytes: usize,
}

#[cfg(not(unix))]
pub async fn run<G: Gateway>(
    _config: HostConfig,
    _router: Arc<Router<G>>,
    _tab_events: mpsc::Sender<TabEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let _ = shutdown.changed().await;
    Ok(())
}

/// Serves the extension protocol over a Unix socket until `shutdown` flips.
/// Tab closures arriving on the socket are forwarded to `tab_events`.
#[cfg(unix)]
pub async fn run<G: Gateway>(
    config: HostConfig,
    router: Arc<Router<G>>,
    tab_events: mpsc::Sender<TabEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    if let Some(parent) = config.socket_path.parent() {
        // Only tighten directories we create; an existing one may be shared.
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o700));
        }
    }

    remove_stale_socket(&config.socket_path)?;

    let listener = UnixListener::bind(&config.socket_path)?;
    let _ = fs::set_permissions(&config.socket_path, fs::Permissions::from_mode(0o600));

    info!(
        event = "host_start",
        socket = %config.socket_path.display(),
        queue_capacity = config.queue_capacity
    );

    let conn_counter = AtomicU64::new(0);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accept = listener.accept() => {
                match accept {
                    Ok((stream, _addr)) => {
                        let id = conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
                        let conn_id = format!("host-conn-{id}");
                        let router = Arc::clone(&router);
                        let tab_events = tab_events.clone();
                        let config = config.clone();
                        tokio::spawn(async move {
                            handle_connection(router, tab_events, config, conn_id, stream).await;
                        });
                    }
                    Err(err) => {
                        warn!(event = "host_accept_error", error = %err);
                    }
                }
            }
        }
    }

    if let Err(err) = remove_stale_socket(&config.socket_path) {
        warn!(event = "host_socket_cleanup_error", error = %err);
    }
    info!(event = "host_stop");
    Ok(())
}

/// Removes a leftover socket at `path`. Anything else living there is an
/// error; it is never deleted.
#[cfg(unix)]
fn remove_stale_socket(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => fs::remove_file(path),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("refusing to replace non-socket path: {}", path.display()),
        )),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(unix)]
async fn handle_connection<G: Gateway>(
    router: Arc<Router<G>>,
    tab_events: mpsc::Sender<TabEvent>,
    config: HostConfig,
    conn_id: String,
    stream: UnixStream,
) {
    let (reader_half, writer_half) = stream.into_split();
    let mut reader = BufReader::new(reader_half);
    let (tx, rx) = mpsc::channel::<HostReply>(config.queue_capacity.max(1));
    let writer_task = tokio::spawn(writer_loop(
        conn_id.clone(),
        writer_half,
        rx,
        config.write_timeout,
        config.max_frame_bytes,
    ));
    info!(event = "host_client_connected", conn_id = %conn_id);

    // Room for the payload plus a trailing "\r\n".
    let line_limit = config.max_frame_bytes as u64 + 2;
    loop {
        let mut line = Vec::new();
        let mut limited = (&mut reader).take(line_limit);
        let read = tokio::select! {
            _ = tx.closed() => break,
            read = limited.read_until(b'\n', &mut line) => read,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(event = "host_read_error", conn_id = %conn_id, error = %err);
                break;
            }
        }
        if !line.ends_with(b"\n") && line.len() as u64 >= line_limit {
            warn!(
                event = "host_frame_too_large",
                conn_id = %conn_id,
                max = config.max_frame_bytes
            );
            break;
        }
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }

        let frame = match decode_frame::<HostFrame>(&line, config.max_frame_bytes) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(event = "host_decode_error", conn_id = %conn_id, error = %err);
                continue;
            }
        };

        match frame {
            HostFrame::TabRemoved { tab_id } => {
                if tab_events.send(TabEvent::Removed(tab_id)).await.is_err() {
                    warn!(event = "host_tab_monitor_gone", conn_id = %conn_id, tab_id);
                }
            }
            HostFrame::Message {
                request_id,
                tab_id,
                message,
            } => match router.dispatch(message, SenderContext { tab_id }).await {
                Dispatch::NoReply => {}
                Dispatch::Immediate(reply) => {
                    enqueue_reply(&tx, &conn_id, request_id, reply);
                }
                Dispatch::Deferred(pending) => {
                    let tx = tx.clone();
                    let conn_id = conn_id.clone();
                    tokio::spawn(async move {
                        let reply = pending.await;
                        enqueue_reply(&tx, &conn_id, request_id, reply);
                    });
                }
            },
        }
    }

    drop(tx);
    let _ = writer_task.await;
    info!(event = "host_client_disconnected", conn_id = %conn_id);
}

#[cfg(unix)]
fn enqueue_reply(
    tx: &mpsc::Sender<HostReply>,
    conn_id: &str,
    request_id: Option<String>,
    reply: Reply,
) {
    let reply = match reply.to_value() {
        Ok(value) => value,
        Err(err) => {
            warn!(event = "host_encode_error", conn_id = %conn_id, error = %err);
            return;
        }
    };
    match tx.try_send(HostReply { request_id, reply }) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(event = "host_reply_after_close", conn_id = %conn_id);
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(event = "host_slow_consumer", conn_id = %conn_id);
        }
    }
}

#[cfg(unix)]
async fn writer_loop(
    conn_id: String,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<HostReply>,
    write_timeout: Duration,
    max_frame_bytes: usize,
) {
    while let Some(reply) = rx.recv().await {
        let frame = match encode_frame(&reply, max_frame_bytes) {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "host_encode_error", conn_id = %conn_id, error = %err);
                continue;
            }
        };
        let send = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        };
        match tokio::time::timeout(write_timeout, send).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(event = "host_write_error", conn_id = %conn_id, error = %err);
                break;
            }
            Err(_) => {
                warn!(event = "host_write_timeout", conn_id = %conn_id);
                break;
            }
        }
    }
}
