use std::env;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::{LevelFilter, debug, info, warn};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use lanchat::api::{AppState, create_router};
use lanchat::chat::ChatRepository;
use lanchat::db::Database;
use lanchat::identity::IdentityResolver;
use lanchat::retention::RetentionSweeper;
use lanchat::settings::{
    APP_NAME, AppConfig, ResolvedPaths, discover_config_file, load_or_init_config,
    write_default_config,
};
use lanchat::storage::{BlobStore, LocalStorage};
use lanchat::ws::ChatHub;

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_serve(ctx: RuntimeContext, cmd: ServeCommand) -> Result<()> {
    handle_serve(&ctx, cmd).await
}

#[tokio::main]
async fn async_sweep(ctx: RuntimeContext) -> Result<()> {
    handle_sweep(&ctx).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("resolved paths: {:#?}", ctx.paths);

    match cli.command {
        Command::Serve(cmd) => async_serve(ctx, cmd),
        Command::Sweep => async_sweep(ctx),
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "LAN chat relay with allow-listed peers, history and file sharing.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true)]
    json: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the chat server
    Serve(ServeCommand),
    /// Run one retention sweep and exit
    Sweep,
    /// Create config directories and default files
    Init(InitCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Host address to bind to (overrides server.host)
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides server.port)
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Recreate configuration even if it already exists
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
    /// Regenerate the default configuration file
    Reset,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: ResolvedPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let config_file = discover_config_file(common.config.clone())?;
        let config = load_or_init_config(&config_file)?;
        let paths = ResolvedPaths::resolve(&config_file, &config)?;
        Ok(Self {
            common,
            paths,
            config,
        })
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = match self.effective_log_level() {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("lanchat={level},tower_http={level}")));

        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_ansi(!disable_color))
                .try_init()
                .ok();
        }

        // The `log` facade is used by the socket and storage paths.
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
        builder.filter_level(self.effective_log_level());
        builder.try_init().ok();

        Ok(())
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => self
                    .config
                    .logging
                    .level
                    .parse()
                    .unwrap_or(LevelFilter::Info),
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.paths.data_dir).with_context(|| {
            format!("creating data directory {}", self.paths.data_dir.display())
        })?;
        if let Some(parent) = self.paths.database.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }
        Ok(())
    }

    async fn open_chat_log(&self) -> Result<(Database, ChatRepository, Arc<dyn BlobStore>)> {
        self.ensure_directories()?;
        let db = Database::new(&self.paths.database)
            .await
            .with_context(|| format!("opening database {}", self.paths.database.display()))?;
        let repo = ChatRepository::new(db.pool().clone());

        let storage = LocalStorage::new(&self.paths.upload_dir);
        storage.ensure_dir().await.with_context(|| {
            format!(
                "creating upload directory {}",
                self.paths.upload_dir.display()
            )
        })?;
        Ok((db, repo, Arc::new(storage)))
    }
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    // The context has already written a default config if none existed.
    if cmd.force {
        write_default_config(&ctx.paths.config_file)?;
        info!("Rewrote default config at {}", ctx.paths.config_file.display());
    } else {
        info!("Using config at {}", ctx.paths.config_file.display());
    }
    ctx.ensure_directories()?;

    if ctx.paths.allowlist.exists() {
        info!("Allow-list already present at {}", ctx.paths.allowlist.display());
        return Ok(());
    }
    if let Some(parent) = ctx.paths.allowlist.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating allow-list directory {}", parent.display()))?;
    }
    fs::write(
        &ctx.paths.allowlist,
        "# One entry per line: <address>-<nickname>\n127.0.0.1-localhost\n",
    )
    .with_context(|| format!("writing allow-list {}", ctx.paths.allowlist.display()))?;
    info!("Wrote allow-list to {}", ctx.paths.allowlist.display());
    Ok(())
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.config)
                        .context("serializing config to JSON")?
                );
            } else {
                println!(
                    "{}",
                    toml::to_string_pretty(&ctx.config).context("serializing config to TOML")?
                );
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Reset => write_default_config(&ctx.paths.config_file),
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

async fn handle_sweep(ctx: &RuntimeContext) -> Result<()> {
    let (_db, repo, storage) = ctx.open_chat_log().await?;
    let sweeper = RetentionSweeper::new(repo, storage, ctx.config.retention_max_age());
    let report = sweeper.run_once().await?;

    if ctx.common.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serializing sweep report")?
        );
    } else {
        println!(
            "Deleted {} message(s) and {} file(s) ({} blob deletion failure(s))",
            report.messages_deleted,
            report.stored_names.len(),
            report.blobs_failed
        );
    }
    Ok(())
}

async fn handle_serve(ctx: &RuntimeContext, cmd: ServeCommand) -> Result<()> {
    let cfg = &ctx.config;
    let (_db, repo, storage) = ctx.open_chat_log().await?;

    let identities = Arc::new(
        IdentityResolver::from_file(&ctx.paths.allowlist)
            .await
            .with_context(|| format!("loading allow-list {}", ctx.paths.allowlist.display()))?,
    );
    let hub = Arc::new(ChatHub::new(cfg.hub.queue_capacity));

    let shutdown = CancellationToken::new();
    let mut background = vec![
        identities
            .clone()
            .spawn_reload(cfg.reload_interval(), shutdown.clone()),
    ];
    if cfg.retention.enabled {
        let sweeper = RetentionSweeper::new(repo.clone(), storage.clone(), cfg.retention_max_age());
        background.push(sweeper.spawn(cfg.sweep_interval(), shutdown.clone()));
    } else {
        info!("Retention sweep disabled");
    }

    let max_upload_bytes = usize::try_from(cfg.server.max_upload_bytes).unwrap_or(usize::MAX);
    let state = AppState::new(repo, hub, storage, identities)
        .with_ping_interval(cfg.ping_interval())
        .with_max_upload_bytes(max_upload_bytes)
        .with_static_dir(ctx.paths.static_dir.clone());
    let app = create_router(state);

    let host = cmd.host.unwrap_or_else(|| cfg.server.host.clone());
    let port = cmd.port.unwrap_or(cfg.server.port);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!("Server is listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("running server")?;

    shutdown.cancel();
    for task in background {
        if let Err(e) = task.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
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

    info!("Shutdown signal received");
}
