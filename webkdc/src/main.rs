//! Binary entry point: load configuration, stand up logging, bootstrap the keyring,
//! bind the HTTP front door, and run every long-lived piece as a supervised
//! [`webkdc_task::Task`] until a shutdown signal arrives. No Windows service, no CLI
//! service register/unregister — a WebKDC runs as a plain long-lived foreground/daemon
//! process, not a managed service.

#[macro_use]
extern crate tracing;

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context as _;
use async_trait::async_trait;
use camino::Utf8PathBuf;
use webkdc::config::ConfHandle;
use webkdc::keyring::KeyringHandle;
use webkdc::log::WebKdcLog;
use webkdc::WebKdcState;
use webkdc_task::{spawn_task, ChildTask, ShutdownHandle, ShutdownSignal, Task};

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn config_path() -> anyhow::Result<Utf8PathBuf> {
    let mut args = std::env::args().skip(1);
    if let Some(path) = args.next() {
        return Ok(Utf8PathBuf::from(path));
    }
    std::env::var("WEBKDC_CONFIG_PATH")
        .map(Utf8PathBuf::from)
        .context("no config path given: pass it as the first argument or via WEBKDC_CONFIG_PATH")
}

/// Periodically rotates the keyring's signing key once it has aged past
/// `key_lifetime`.
struct KeyringRotationTask {
    keyring: KeyringHandle,
    key_lifetime: std::time::Duration,
}

#[async_trait]
impl Task for KeyringRotationTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "keyring rotation";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        const CHECK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60 * 60);
        let lifetime_secs = i64::try_from(self.key_lifetime.as_secs()).unwrap_or(i64::MAX);

        loop {
            match self.keyring.maybe_rotate(now(), lifetime_secs) {
                Ok(status) => debug!(?status, "keyring rotation check completed"),
                Err(error) => warn!(%error, "keyring rotation check failed"),
            }

            tokio::select! {
                () = tokio::time::sleep(CHECK_INTERVAL) => {}
                () = shutdown_signal.wait() => return Ok(()),
            }
        }
    }
}

/// Runs the axum server, shutting down gracefully once `shutdown_signal` fires.
struct HttpServerTask {
    state: WebKdcState,
}

#[async_trait]
impl Task for HttpServerTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "http listener";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        let listen_address = self.state.conf_handle.get_conf().listen_address.clone();
        let listener = tokio::net::TcpListener::bind(&listen_address)
            .await
            .with_context(|| format!("failed to bind {listen_address}"))?;
        info!(%listen_address, "listening");

        let router = webkdc::http::make_router(self.state);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown_signal.wait().await })
            .await
            .context("http server failed")
    }
}

struct Tasks {
    inner: Vec<ChildTask<anyhow::Result<()>>>,
    shutdown_handle: ShutdownHandle,
    shutdown_signal: ShutdownSignal,
}

impl Tasks {
    fn new() -> Self {
        let (shutdown_handle, shutdown_signal) = ShutdownHandle::new();
        Self {
            inner: Vec::new(),
            shutdown_handle,
            shutdown_signal,
        }
    }

    fn register<T>(&mut self, task: T)
    where
        T: Task<Output = anyhow::Result<()>> + 'static,
    {
        let child = spawn_task(task, self.shutdown_signal.clone());
        self.inner.push(child);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = config_path()?;
    let conf_handle = ConfHandle::load(&config_path).context("failed to load configuration")?;
    let conf = conf_handle.get_conf();

    let log_filter = if conf.debug { "debug" } else { "info" };
    let _logger_guard =
        webkdc_log::init::<WebKdcLog>(&conf.log_file, log_filter, conf.log_directive.as_deref()).context("failed to initialize logging")?;

    info!("starting up");

    let keyring = KeyringHandle::load_or_create(&conf.keyring_path, now()).context("failed to load or create keyring")?;
    let state = WebKdcState::new(conf_handle.clone(), keyring.clone());

    let mut tasks = Tasks::new();
    tasks.register(HttpServerTask { state });
    tasks.register(KeyringRotationTask {
        keyring,
        key_lifetime: conf.key_lifetime,
    });
    tasks.register(webkdc_log::LogDeleterTask::<WebKdcLog>::new(conf.log_file.clone()));

    build_signals_fut().await?;
    info!("shutdown signal received, stopping");

    tasks.shutdown_handle.signal();
    for task in tasks.inner {
        let _ = task.join().await;
    }

    Ok(())
}

#[cfg(unix)]
async fn build_signals_fut() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate_signal = signal(SignalKind::terminate()).context("failed to create terminate signal stream")?;
    let mut interrupt_signal = signal(SignalKind::interrupt()).context("failed to create interrupt signal stream")?;

    tokio::select! {
        _ = terminate_signal.recv() => {}
        _ = interrupt_signal.recv() => {}
    }

    Ok(())
}

#[cfg(not(unix))]
async fn build_signals_fut() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await.context("CTRL_C signal failed")
}
