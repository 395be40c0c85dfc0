use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{anyhow, Context as _};
use beacon::session_store::SessionStore;
use beacon::tui::{self, Settings};
use beacon_core::config::ConfigFile;
use beacon_core::paths::{compute_paths, BeaconPaths, PathInputs};
use clap::{Parser, Subcommand};
use directories::BaseDirs;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "bcn",
    version,
    about = "Beacon: terminal client for the beacon assistant service"
)]
struct Cli {
    #[arg(long, global = true, value_name = "DIR", env = "BEACON_DIR")]
    beacon_dir: Option<PathBuf>,

    /// Server to talk to; overrides the config file.
    #[arg(long, global = true, value_name = "URL")]
    server_url: Option<String>,

    #[arg(long, global = true, env = "BEACON_LOG", value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open the interactive client (default).
    Tui,
    /// Show the stored session.
    Status,
    /// Forget the stored session.
    Logout,
    /// Print the version.
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Tui);
    let paths = resolve_paths(cli.beacon_dir.as_ref())?;
    let config = ConfigFile::load(&paths.config_file)
        .with_context(|| format!("load {}", paths.config_file.display()))?;
    let enable_stderr_logging = !matches!(command, Command::Tui);
    init_logging(
        &paths,
        cli.log_level.as_deref(),
        config.log_level.as_deref(),
        enable_stderr_logging,
    )?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "beacon starting");

    match command {
        Command::Tui => {
            let settings = Settings::from_config(&config, cli.server_url.as_deref());
            let timeout = Duration::from_secs(config.effective_request_timeout_secs());
            tui::run(&paths, settings, timeout).await
        }
        Command::Status => status(&paths).await,
        Command::Logout => logout(&paths).await,
        Command::Version => version(),
    }
}

fn resolve_paths(beacon_dir_override: Option<&PathBuf>) -> anyhow::Result<BeaconPaths> {
    let base_dirs = BaseDirs::new().ok_or_else(|| anyhow!("could not determine home directory"))?;
    let home_dir = base_dirs.home_dir().to_path_buf();

    let xdg_config_home = match env::var_os("XDG_CONFIG_HOME") {
        Some(v) => Some(PathBuf::from(v)),
        None => Some(base_dirs.config_dir().to_path_buf()),
    };

    let beacon_dir_override = beacon_dir_override
        .cloned()
        .or_else(|| env::var_os("BEACON_DIR").map(PathBuf::from));

    Ok(compute_paths(PathInputs {
        home_dir,
        xdg_config_home,
        beacon_dir_override,
    }))
}

fn init_logging(
    paths: &BeaconPaths,
    log_level: Option<&str>,
    config_level: Option<&str>,
    enable_stderr_logging: bool,
) -> anyhow::Result<()> {
    let log_dir = paths.log_path.parent().unwrap_or(paths.beacon_dir.as_path());
    let log_name = paths.log_path.file_name().and_then(|name| name.to_str());
    let dir_ok = fs::create_dir_all(log_dir).is_ok();

    let level = log_level
        .map(str::to_owned)
        .or_else(|| env::var("BEACON_LOG").ok())
        .or_else(|| env::var("RUST_LOG").ok())
        .or_else(|| config_level.map(str::to_owned))
        .unwrap_or_else(|| "info".to_owned());

    let filter = EnvFilter::try_new(level).context("parse log level")?;

    let file_layer = match log_name {
        Some(log_name) if dir_ok => tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(tracing_appender::rolling::Rotation::NEVER)
            .filename_prefix(log_name)
            .build(log_dir)
            .ok()
            .map(|file_appender| {
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(file_appender)
            }),
        _ => None,
    };

    if enable_stderr_logging {
        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_writer(io::stderr);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(stderr_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();
    }

    Ok(())
}

fn version() -> anyhow::Result<()> {
    println!("bcn {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}

async fn status(paths: &BeaconPaths) -> anyhow::Result<()> {
    let store = SessionStore::new(paths.session_file.clone());
    let Some(session) = store.load().await else {
        println!("Not logged in");
        return Ok(());
    };

    println!("server\t{}", session.server_url);
    let Some(expiry) = session.token_expiry else {
        println!("expires\t-");
        return Ok(());
    };
    let fmt = time::format_description::parse("[year]-[month]-[day] [hour]:[minute] UTC")
        .context("build time format")?;
    let expires = time::OffsetDateTime::from_unix_timestamp(expiry)
        .ok()
        .and_then(|when| when.format(&fmt).ok())
        .unwrap_or_else(|| "-".to_owned());
    let now = time::OffsetDateTime::now_utc().unix_timestamp();
    let note = if session.is_expired(now) { " (expired)" } else { "" };
    println!("expires\t{expires}{note}");
    Ok(())
}

async fn logout(paths: &BeaconPaths) -> anyhow::Result<()> {
    let store = SessionStore::new(paths.session_file.clone());
    if store.wipe().await? {
        tracing::info!(path = %store.path().display(), "removed stored session");
        println!("Logged out");
    } else {
        println!("Not logged in");
    }
    Ok(())
}
