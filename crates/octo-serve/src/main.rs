use std::io::{self, Write};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use octo_serve::{AppState, AuthMode, ConflictPolicy, ServerConfig, create_router};

const APP_NAME: &str = "octo-serve";
const ENV_PREFIX: &str = "OCTO_SERVE";

#[derive(Parser, Debug)]
#[command(name = APP_NAME)]
#[command(about = "Serve a directory tree over HTTP with listings, uploads and auth")]
#[command(version)]
struct Cli {
    /// Config file (TOML or YAML, chosen by extension)
    #[arg(long, env = "OCTO_SERVE_CONFIG")]
    conf: Option<String>,

    /// Root directory to serve
    #[arg(short, long)]
    root: Option<String>,

    /// URL prefix to mount under, e.g. /files
    #[arg(long)]
    prefix: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind to: host:port, :port or host
    #[arg(short, long)]
    addr: Option<String>,

    /// UI theme
    #[arg(long)]
    theme: Option<String>,

    /// Page title
    #[arg(long)]
    title: Option<String>,

    /// Allow uploads
    #[arg(long)]
    upload: bool,

    /// Allow deletes
    #[arg(long)]
    delete: bool,

    /// Allow cross-origin requests
    #[arg(long)]
    cors: bool,

    /// Require HTTP basic auth (user:pass)
    #[arg(long, value_name = "USER:PASS", conflicts_with = "auth_token")]
    auth_basic: Option<String>,

    /// Require a token cookie, set via <prefix>/-/login/<token>
    #[arg(long, value_name = "TOKEN")]
    auth_token: Option<String>,

    /// What to do when an upload targets an existing file
    #[arg(long, value_name = "overwrite|reject")]
    upload_conflict: Option<ConflictPolicy>,

    /// Refuse to delete non-empty directories
    #[arg(long)]
    no_recursive_delete: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct AppConfig {
    addr: String,
    port: u16,
    cors: bool,
    logging: LoggingConfig,
    server: ServerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0".to_string(),
            port: 8080,
            cors: false,
            logging: LoggingConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct LoggingConfig {
    level: String,
    json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config.logging, cli.verbose);
    serve(config)
}

fn expand_path(raw: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(raw).with_context(|| format!("expanding path {raw}"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.toml"))
}

/// Defaults, then the config file, then environment, then CLI flags.
fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut builder = Config::builder().add_source(
        Config::try_from(&AppConfig::default()).context("building default config")?,
    );

    if let Some(conf) = &cli.conf {
        let path = expand_path(conf)?;
        builder = builder.add_source(File::from(path.as_path()).required(true));
    } else if let Some(path) = default_config_path().filter(|p| p.exists()) {
        builder = builder.add_source(File::from(path.as_path()).required(false));
    }

    let built = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("loading configuration")?;

    let mut config: AppConfig = built
        .try_deserialize()
        .context("parsing configuration")?;
    apply_cli(&mut config, cli)?;
    Ok(config)
}

fn apply_cli(config: &mut AppConfig, cli: &Cli) -> Result<()> {
    let server = &mut config.server;

    if let Some(root) = &cli.root {
        server.root = expand_path(root)?;
    }
    if let Some(prefix) = &cli.prefix {
        server.prefix = prefix.clone();
    }
    if let Some(theme) = &cli.theme {
        server.theme = theme.clone();
    }
    if let Some(title) = &cli.title {
        server.title = title.clone();
    }
    if cli.upload {
        server.upload = true;
    }
    if cli.delete {
        server.delete = true;
    }
    if let Some(policy) = cli.upload_conflict {
        server.upload_conflict = policy;
    }
    if cli.no_recursive_delete {
        server.recursive_delete = false;
    }

    if let Some(credentials) = &cli.auth_basic {
        let Some((username, password)) = credentials.split_once(':') else {
            bail!("--auth-basic expects USER:PASS");
        };
        server.auth = AuthMode::Basic {
            username: username.to_string(),
            password: password.to_string(),
        };
    } else if let Some(token) = &cli.auth_token {
        server.auth = AuthMode::Token {
            token: token.clone(),
        };
    }

    if let Some(addr) = &cli.addr {
        config.addr = addr.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.cors {
        config.cors = true;
    }
    if cli.json_logs {
        config.logging.json = true;
    }

    Ok(())
}

/// Combine `--addr` and `--port` into a bindable address.
fn listen_addr(addr: &str, port: u16) -> String {
    match addr.parse::<IpAddr>() {
        Ok(IpAddr::V6(ip)) => return format!("[{ip}]:{port}"),
        Ok(IpAddr::V4(ip)) => return format!("{ip}:{port}"),
        Err(_) => {}
    }
    if let Some(only_port) = addr
        .strip_prefix(':')
        .filter(|p| p.parse::<u16>().is_ok())
    {
        return format!("0.0.0.0:{only_port}");
    }
    if addr.parse::<SocketAddr>().is_ok() {
        return addr.to_string();
    }
    let has_port = addr
        .rsplit_once(':')
        .is_some_and(|(host, port)| !host.contains(':') && port.parse::<u16>().is_ok());
    if has_port {
        return addr.to_string();
    }
    if addr.contains(':') && !addr.starts_with('[') {
        return format!("[{addr}]:{port}");
    }
    format!("{addr}:{port}")
}

fn init_logging(logging: &LoggingConfig, verbose: u8) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let level = match verbose {
        0 => logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("octo_serve={level},tower_http={level}")));

    if logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .ok();
    }
}

#[tokio::main]
async fn serve(config: AppConfig) -> Result<()> {
    let state = AppState::new(config.server.clone()).context("invalid server configuration")?;

    info!("Serving files from: {}", state.root.display());
    info!(
        "Prefix: {}, auth: {}, upload: {}, delete: {}",
        state.prefix.app_root(),
        state.config.auth.name(),
        state.config.upload,
        state.config.delete
    );

    let mut app = create_router(state);
    if config.cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }
    let app = app.layer(TraceLayer::new_for_http());

    let addr = listen_addr(&config.addr, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(
        "Listening on http://{}",
        listener.local_addr().context("reading bound address")?
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running server")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
