//! Command-line front end: argument parsing, credential lookup and the run loop.

mod progress;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::catalog::{ClientCredentials, SpotifyCatalog};
use crate::config::{AppConfig, DEFAULT_CONCURRENCY};
use crate::credentials::{CredentialStore, FileCredentialStore};
use crate::download::{BatchOrchestrator, BatchOutcome, BatchProgress};
use crate::error::{Error, Result};
use crate::event::ChannelProgress;
use crate::fetch::YtDlpFetcher;
use crate::pipeline::Pipeline;
use crate::resolve::MetadataResolver;

/// Exit code for a batch stopped by Ctrl-C.
const EXIT_CANCELLED: u8 = 130;

const CLIENT_ID_VAR: &str = "SPOTIFY_CLIENT_ID";
const CLIENT_SECRET_VAR: &str = "SPOTIFY_CLIENT_SECRET";
const DEVELOPER_DASHBOARD: &str = "https://developer.spotify.com/";

// ============================================================================
// CLI Configuration
// ============================================================================

/// Options from the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliConfig {
    pub url: String,
    pub output: PathBuf,
    pub parallel: Option<usize>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub save_credentials: bool,
    pub config_path: Option<PathBuf>,
    pub ytdlp_path: Option<PathBuf>,
    pub ffmpeg_location: Option<PathBuf>,
}

/// What the command line asks for.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    Run(CliConfig),
}

/// Parses arguments (without the program name).
///
/// # Errors
///
/// Returns a message for unknown options, missing values, a missing URL or
/// output path, or a non-numeric `--parallel`.
pub fn parse_args<I>(args: I) -> std::result::Result<Command, String>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut cli = CliConfig::default();
    let mut url = None;
    let mut output = None;

    while let Some(arg) = args.next() {
        let mut value = |name: &str| {
            args.next()
                .ok_or_else(|| format!("{name} requires a value"))
        };
        match arg.as_str() {
            "-o" | "--output" => output = Some(PathBuf::from(value(&arg)?)),
            "-p" | "--parallel" => {
                let raw = value(&arg)?;
                cli.parallel = Some(
                    raw.parse()
                        .map_err(|_| format!("invalid value for {arg}: {raw}"))?,
                );
            }
            "--client-id" => cli.client_id = Some(value(&arg)?),
            "--client-secret" => cli.client_secret = Some(value(&arg)?),
            "--save-credentials" => cli.save_credentials = true,
            "--config" => cli.config_path = Some(PathBuf::from(value(&arg)?)),
            "--yt-dlp" => cli.ytdlp_path = Some(PathBuf::from(value(&arg)?)),
            "--ffmpeg" => cli.ffmpeg_location = Some(PathBuf::from(value(&arg)?)),
            "-h" | "--help" => return Ok(Command::Help),
            positional if !positional.starts_with('-') => {
                if url.replace(positional.to_string()).is_some() {
                    return Err("only one URL may be given".to_string());
                }
            }
            unknown => return Err(format!("unknown option: {unknown}")),
        }
    }

    cli.url = url.ok_or("missing URL")?;
    cli.output = output.ok_or("missing --output <zip>")?;
    Ok(Command::Run(cli))
}

fn print_usage() {
    eprintln!("Usage: sytadel [OPTIONS] -o <zip> <url>");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  <url>                   Spotify track, album or playlist URL");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -o, --output <zip>      Archive to write (a single track is copied next to it)");
    eprintln!(
        "  -p, --parallel <N>      Concurrent downloads (default: {DEFAULT_CONCURRENCY})"
    );
    eprintln!("      --client-id <ID>    Spotify client id");
    eprintln!("      --client-secret <S> Spotify client secret");
    eprintln!("      --save-credentials  Store the client id and secret for later runs");
    eprintln!("      --config <path>     Configuration file");
    eprintln!("      --yt-dlp <path>     yt-dlp executable");
    eprintln!("      --ffmpeg <path>     ffmpeg executable or directory");
    eprintln!("  -h, --help              Show this help");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  {CLIENT_ID_VAR}       Spotify client id");
    eprintln!("  {CLIENT_SECRET_VAR}   Spotify client secret");
    eprintln!("  RUST_LOG                Log filter (default: warn)");
}

// ============================================================================
// Setup
// ============================================================================

/// Builds the HTTP client used for catalog requests.
fn build_http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("sytadel/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .pool_idle_timeout(Duration::from_secs(60))
        .tcp_keepalive(Duration::from_secs(30))
        .build()
}

/// Loads the configuration file and applies command-line overrides.
fn load_config(cli: &CliConfig) -> Result<AppConfig> {
    let path = cli.config_path.clone().unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load_from(&path)?;

    if let Some(parallel) = cli.parallel {
        config.batch = config.batch.with_concurrency(parallel);
    }
    if let Some(path) = &cli.ytdlp_path {
        config.batch = config.batch.with_ytdlp_path(path);
    }
    if let Some(path) = &cli.ffmpeg_location {
        config.batch = config.batch.with_ffmpeg_location(path);
    }
    Ok(config)
}

/// Picks the client id and secret: flags, then environment, then the store.
///
/// Flags and environment variables are considered per value, so an id given
/// on the command line can pair with a secret from the environment. The store
/// is only used when neither source supplied anything.
fn resolve_credentials<S, E>(cli: &CliConfig, env: E, store: &S) -> Result<Option<(String, String)>>
where
    S: CredentialStore,
    E: Fn(&str) -> Option<String>,
{
    let id = cli.client_id.clone().or_else(|| env(CLIENT_ID_VAR));
    let secret = cli.client_secret.clone().or_else(|| env(CLIENT_SECRET_VAR));

    match (id, secret) {
        (Some(id), Some(secret)) => Ok(Some((id, secret))),
        (None, None) => store.load(),
        (Some(_), None) => Err(Error::Credentials("client secret is missing".to_string())),
        (None, Some(_)) => Err(Error::Credentials("client id is missing".to_string())),
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Cancels `cancel` on the first Ctrl-C.
fn spawn_ctrl_c(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling, waiting for running downloads to be abandoned...");
            cancel.cancel();
        }
    })
}

// ============================================================================
// Entry point
// ============================================================================

/// Runs the command line program.
///
/// # Errors
///
/// Returns configuration, credential, resolution and batch errors; the binary
/// prints them and exits with status 1.
pub async fn run() -> Result<ExitCode> {
    let cli = match parse_args(std::env::args().skip(1)) {
        Ok(Command::Run(cli)) => cli,
        Ok(Command::Help) => {
            print_usage();
            return Ok(ExitCode::SUCCESS);
        }
        Err(message) => {
            eprintln!("Error: {message}");
            eprintln!();
            print_usage();
            return Ok(ExitCode::FAILURE);
        }
    };

    let config = load_config(&cli)?;
    let store = FileCredentialStore::new(&config.paths.credentials_file);
    let Some((id, secret)) = resolve_credentials(&cli, env_var, &store)? else {
        eprintln!("No Spotify credentials found.");
        eprintln!("Create an app at {DEVELOPER_DASHBOARD} and pass its client id and secret");
        eprintln!(
            "with --client-id/--client-secret (add --save-credentials to remember them) or set {CLIENT_ID_VAR}/{CLIENT_SECRET_VAR}."
        );
        return Ok(ExitCode::FAILURE);
    };
    if cli.save_credentials {
        store.save(&id, &secret)?;
        println!("Credentials saved to {}", store.path().display());
    }

    let catalog = SpotifyCatalog::new(build_http_client()?, ClientCredentials::new(id, secret)?);
    let fetcher = YtDlpFetcher::new(config.batch.clone());
    let orchestrator = BatchOrchestrator::new(Arc::new(fetcher), config.batch.clone());
    let mut pipeline = Pipeline::new(
        MetadataResolver::new(Arc::new(catalog)),
        orchestrator,
        &config.paths.staging_dir,
    );

    let cancel = CancellationToken::new();
    let ctrl_c = spawn_ctrl_c(cancel.clone());
    let (sink, events) = ChannelProgress::channel();
    let progress: Arc<dyn BatchProgress> = Arc::new(sink);
    let ui = tokio::spawn(progress::drive(events));

    println!("Resolving {} ...", cli.url);
    let result = pipeline.run(&cli.url, &cli.output, &progress, &cancel).await;
    drop(progress);
    ctrl_c.abort();
    let stats = ui.await.unwrap_or_default();

    let report = result?;
    progress::print_summary(&report, &stats);

    Ok(match report.outcome {
        BatchOutcome::Cancelled { .. } => ExitCode::from(EXIT_CANCELLED),
        _ => ExitCode::SUCCESS,
    })
}
