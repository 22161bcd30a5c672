use clap::Parser;
use shield_core::protocol::DEFAULT_MAX_FRAME_BYTES;
use shield_gateway::{
    CredentialStore, Gateway, GatewayConfig, HttpGateway, StubGateway, DEFAULT_API_BASE,
};
use shield_hub::{host_uds, HostConfig, Orchestrator, OrchestratorConfig, Router};
use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

const LOG_FILE_NAME: &str = "shield-hub.log";

#[derive(Clone, Debug)]
struct Config {
    socket_path: PathBuf,
    api_base: String,
    credentials_path: PathBuf,
    use_stubs: bool,
    assess_timeout: Option<Duration>,
    request_timeout: Duration,
    queue_capacity: usize,
    write_timeout: Duration,
    log_dir: String,
    debug: bool,
}

#[derive(Parser, Debug)]
#[command(name = "shield-hub")]
struct Args {
    #[arg(long, default_value = "")]
    socket: String,
    #[arg(long, default_value = "")]
    api_base: String,
    #[arg(long, default_value = "")]
    credentials: String,
    #[arg(long, default_value_t = false)]
    use_stubs: bool,
    /// 0 waits for the backend indefinitely.
    #[arg(long, default_value_t = 0)]
    assess_timeout_ms: u64,
    #[arg(long, default_value_t = 15)]
    request_timeout_secs: u64,
    #[arg(long, default_value_t = 64)]
    queue_capacity: usize,
    #[arg(long, default_value_t = 2)]
    write_timeout_secs: u64,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = load_config();
    let _log_guard = init_logging(&config);

    let credentials = CredentialStore::file(config.credentials_path.clone());
    let orchestrator_config = OrchestratorConfig {
        assess_timeout: config.assess_timeout,
    };

    let result = if config.use_stubs {
        info!(event = "gateway_selected", gateway = "stub");
        serve(&config, StubGateway::new(credentials), orchestrator_config).await
    } else {
        let gateway_config = GatewayConfig {
            base_url: config.api_base.clone(),
            request_timeout: config.request_timeout,
        };
        match HttpGateway::new(gateway_config, credentials) {
            Ok(gateway) => {
                info!(event = "gateway_selected", gateway = "http", api_base = %config.api_base);
                serve(&config, gateway, orchestrator_config).await
            }
            Err(err) => {
                error!(event = "gateway_config_error", kind = %err.kind, error = %err);
                return ExitCode::FAILURE;
            }
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(event = "hub_error", error = %err);
            ExitCode::FAILURE
        }
    }
}

async fn serve<G: Gateway>(
    config: &Config,
    gateway: G,
    orchestrator_config: OrchestratorConfig,
) -> io::Result<()> {
    let orchestrator = Arc::new(Orchestrator::new(Arc::new(gateway), orchestrator_config));
    let router = Arc::new(Router::new(Arc::clone(&orchestrator)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!(event = "shutdown_requested");
        let _ = shutdown_tx.send(true);
    });

    let (tab_events_tx, tab_events_rx) = mpsc::channel(config.queue_capacity);
    let monitor = orchestrator.spawn_tab_monitor(tab_events_rx, shutdown_rx.clone());

    let result = host_uds::run(
        HostConfig {
            socket_path: config.socket_path.clone(),
            write_timeout: config.write_timeout,
            queue_capacity: config.queue_capacity,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        },
        router,
        tab_events_tx,
        shutdown_rx,
    )
    .await;
    monitor.abort();
    result
}

fn load_config() -> Config {
    let args = Args::parse();
    let assess_timeout =
        (args.assess_timeout_ms > 0).then(|| Duration::from_millis(args.assess_timeout_ms));
    Config {
        socket_path: resolve_socket_path(&args.socket),
        api_base: resolve_flag(&args.api_base, "SHIELD_API_BASE")
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        credentials_path: resolve_flag(&args.credentials, "SHIELD_CREDENTIALS")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".shield").join("credentials.json")),
        use_stubs: args.use_stubs || env_true("SHIELD_USE_STUBS"),
        assess_timeout,
        request_timeout: Duration::from_secs(args.request_timeout_secs.max(1)),
        queue_capacity: args.queue_capacity.max(1),
        write_timeout: Duration::from_secs(args.write_timeout_secs.max(1)),
        log_dir: resolve_flag(&args.log_dir, "SHIELD_LOG_DIR")
            .unwrap_or_else(|| ".shield/logs".to_string()),
        debug: args.debug || env_true("SHIELD_DEBUG"),
    }
}

/// Flag first, then the environment. Blank values count as unset.
fn resolve_flag(flag: &str, env_key: &str) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.to_string());
    }
    std::env::var(env_key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn resolve_socket_path(socket_flag: &str) -> PathBuf {
    if let Some(value) = resolve_flag(socket_flag, "SHIELD_SOCKET") {
        return PathBuf::from(value);
    }
    let runtime_dir = match std::env::var("XDG_RUNTIME_DIR") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => PathBuf::from("/tmp"),
    };
    runtime_dir.join("browseshield").join("shield-hub.sock")
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn init_logging(config: &Config) -> Option<LogGuard> {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("SHIELD_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = match open_log_file(&config.log_dir) {
        Ok(log_guard) => log_guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = writer.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(writer)
}

struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

struct MultiWriter {
    stdout: io::Stdout,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            stdout: io::stdout(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    if std::fs::create_dir_all(&dir).is_err() {
        return Ok(LogGuard { file: None });
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}
