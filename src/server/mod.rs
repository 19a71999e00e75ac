//! TCP accept loop and process lifecycle (spec.md §4.7; SPEC_FULL.md
//! §4.7-EXPANDED).
//!
//! Grounded on the teacher's `app/server.rs` accept loop and signal
//! handling, reduced to what this mock server needs: no daemonization, no
//! binary upgrade, no TLS/PAM/JWT negotiation, no Prometheus exporter. What
//! remains is the shape that matters for spec.md §4.7: accept unconditionally,
//! hand each connection a session slot, and shut down gracefully on
//! SIGTERM/SIGINT.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[cfg(not(windows))]
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::net::TcpListener;

use crate::config::Config;
use crate::notify::{NotificationHub, HUB};
use crate::pool::Pool;
use crate::protocol::{self, ConnectionContext};
use crate::stats::Stats;

/// Set once a shutdown signal has been observed; the accept loop checks it
/// on every iteration so in-flight connections are never force-dropped.
pub static SHUTDOWN_IN_PROGRESS: AtomicBool = AtomicBool::new(false);

/// Everything `run` needs to bring the server up. Built by `main.rs` from
/// `Args` + `Config`; exposed here (rather than inlined in `run`) so
/// integration tests can construct one against an ephemeral port.
pub struct ServerHandle {
    pub config: Arc<Config>,
    pub pool: Pool,
    pub hub: &'static NotificationHub,
    pub stats: Arc<dyn Stats>,
    /// Path `run`'s SIGHUP handler re-reads on a reload. Defaults to the
    /// same file `Config::load` was built from; `None` disables reload
    /// (e.g. in integration tests that never write a config file).
    pub config_path: Option<String>,
}

impl ServerHandle {
    pub fn new(config: Config, stats: Arc<dyn Stats>) -> Self {
        Self::with_config_path(config, stats, None)
    }

    pub fn with_config_path(config: Config, stats: Arc<dyn Stats>, config_path: Option<String>) -> Self {
        let pool = Pool::new(config.pool.clone());
        ServerHandle {
            config: Arc::new(config),
            pool,
            hub: &HUB,
            stats,
            config_path,
        }
    }
}

/// Bind the listener, pre-warm the pool, spawn the pool's periodic cleanup
/// and validation tasks, and accept connections until a shutdown signal
/// arrives or `config.server.shutdown_timeout_ms` elapses while draining
/// (spec.md §4.7, §4.6 `cleanup`/`validateIdleConnections`).
pub async fn run(handle: ServerHandle) -> Result<(), crate::errors::Error> {
    let ServerHandle {
        config,
        pool,
        hub,
        stats,
        config_path,
    } = handle;

    pool.initialize()?;
    hub.configure(&config.notifications);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    log::info!("listening on {addr}");

    spawn_pool_timers(pool.clone(), config.clone());

    let next_client_id = Arc::new(AtomicU64::new(1));
    let mut shutdown = shutdown_signal();
    let mut reload = reload_signal();

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                log::info!("shutdown signal received, draining connections");
                SHUTDOWN_IN_PROGRESS.store(true, Ordering::SeqCst);
                break;
            }

            _ = reload.recv() => {
                reload_config(config_path.as_deref(), &pool, hub);
            }

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        log::warn!("accept failed: {e}");
                        continue;
                    }
                };
                let client_id = next_client_id.fetch_add(1, Ordering::Relaxed);
                log::debug!("accepted connection {client_id} from {peer}");

                let ctx = ConnectionContext {
                    pool: pool.clone(),
                    hub,
                    config: config.clone(),
                    stats: stats.clone(),
                };
                tokio::spawn(async move {
                    if let Err(e) = protocol::run_connection(stream, client_id, ctx).await {
                        log::debug!("connection {client_id} ended: {e}");
                    }
                });
            }
        }
    }

    pool.shutdown(config.server.shutdown_timeout_ms).await;
    Ok(())
}

/// Spawn the pool's periodic idle-reaping and revalidation tasks (spec.md
/// §4.6 `cleanup`/`validateIdleConnections` timers).
fn spawn_pool_timers(pool: Pool, config: Arc<Config>) {
    let cleanup_pool = pool.clone();
    let cleanup_interval = Duration::from_millis(config.pool.cleanup_interval_ms);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cleanup_interval);
        loop {
            ticker.tick().await;
            if SHUTDOWN_IN_PROGRESS.load(Ordering::Relaxed) {
                return;
            }
            cleanup_pool.cleanup();
        }
    });

    let validation_interval = Duration::from_millis(config.pool.validation_interval_ms);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(validation_interval);
        loop {
            ticker.tick().await;
            if SHUTDOWN_IN_PROGRESS.load(Ordering::Relaxed) {
                return;
            }
            pool.validate_idle_connections();
        }
    });
}

/// Resolves once SIGTERM or SIGINT (Unix) / Ctrl-C (Windows) is observed
/// (spec.md §4.7 "coordinates shutdown").
#[cfg(not(windows))]
fn shutdown_signal() -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async {
        let mut term = unix_signal(SignalKind::terminate()).expect("install SIGTERM handler");
        let mut interrupt = unix_signal(SignalKind::interrupt()).expect("install SIGINT handler");
        tokio::select! {
            _ = term.recv() => log::info!("received SIGTERM"),
            _ = interrupt.recv() => log::info!("received SIGINT"),
        }
    })
}

#[cfg(windows)]
fn shutdown_signal() -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async {
        let _ = tokio::signal::ctrl_c().await;
        log::info!("received ctrl-c");
    })
}

/// SIGHUP listener (Unix only; never fires on Windows) that `run`'s accept
/// loop selects on alongside shutdown and incoming connections.
#[cfg(not(windows))]
struct ReloadSignal(tokio::signal::unix::Signal);

#[cfg(not(windows))]
fn reload_signal() -> ReloadSignal {
    ReloadSignal(unix_signal(SignalKind::hangup()).expect("install SIGHUP handler"))
}

#[cfg(not(windows))]
impl ReloadSignal {
    async fn recv(&mut self) {
        self.0.recv().await;
    }
}

#[cfg(windows)]
struct ReloadSignal;

#[cfg(windows)]
fn reload_signal() -> ReloadSignal {
    ReloadSignal
}

#[cfg(windows)]
impl ReloadSignal {
    async fn recv(&mut self) {
        std::future::pending::<()>().await
    }
}

/// Reload pool sizing and notification limits from `config_path` without
/// restarting the listener (spec.md §4.7, SPEC_FULL.md §4.7-EXPANDED SIGHUP
/// reload; grounded on the teacher's `reload_config`). The listener address
/// is not hot-swappable and is left untouched even if it changed on disk.
fn reload_config(config_path: Option<&str>, pool: &Pool, hub: &'static NotificationHub) {
    let Some(path) = config_path else {
        log::warn!("SIGHUP received but no config file path is known; ignoring");
        return;
    };
    match Config::load(path) {
        Ok(new_config) => {
            pool.reload_config(new_config.pool.clone());
            hub.configure(&new_config.notifications);
            log::info!("reloaded configuration from {path}");
        }
        Err(e) => log::error!("failed to reload config from {path}: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::NoopStats;

    #[tokio::test]
    async fn server_handle_pre_warms_pool_on_run() {
        let mut config = Config::default();
        config.server.port = 0; // bind an ephemeral port
        config.pool.min_connections = 2;
        let handle = ServerHandle::new(config, Arc::new(NoopStats));
        let pool = handle.pool.clone();

        let task = tokio::spawn(run(handle));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.idle_count(), 2);
        task.abort();
    }
}
