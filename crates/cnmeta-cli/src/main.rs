use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use cnmeta_core::error::ExitCode;
use cnmeta_core::{
    AppConfig, CoreError, FilePreferences, NoopReload, PrefKey, PreferenceStore, Record, RecordId,
};
use cnmeta_resolve::{
    HttpTransport, PdfTitleExtractor, Provider, ProviderRegistry, QueryInput, ResolveError,
    SyncEvent, TitleExtractor, TranslatorSync, search_candidates,
};

// ─── CLI Definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "cnmeta",
    about = "Look up Chinese papers on CNKI and keep metadata translators current",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format (for scripts).
    /// Also enabled by setting CNMETA_JSON=1.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the search request built for a document file.
    Query {
        file: PathBuf,
        /// Search for this title instead of the one derived from the filename.
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        oversea: bool,
        #[arg(long, default_value = "cnki")]
        provider: String,
    },

    /// Search a provider for a document file and list the candidates.
    Search {
        file: PathBuf,
        #[arg(long)]
        title: Option<String>,
        /// Use the overseas site whatever the isOversea preference says.
        #[arg(long)]
        oversea: bool,
        #[arg(long, default_value = "cnki")]
        provider: String,
        /// Do not read titles out of PDF files.
        #[arg(long)]
        no_pdf_title: bool,
    },

    /// Translator repository synchronisation.
    Translators {
        #[command(subcommand)]
        action: TranslatorsAction,
    },

    /// Config management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

// ─── Translators Actions ────────────────────────────────────────────────────

#[derive(Subcommand)]
enum TranslatorsAction {
    /// Compare installed translators with the remote manifest.
    Status,
    /// Download stale translators.
    Sync {
        /// Download every translator, current or not.
        #[arg(long)]
        force: bool,
    },
}

// ─── Config Actions ──────────────────────────────────────────────────────────

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the config file location.
    Path,
    /// Show the effective configuration.
    Show,
}

// ─── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli).await {
        eprintln!("error: {err:#}");
        std::process::exit(exit_code(&err) as i32);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let start = Instant::now();
    let json_output = cli.json || std::env::var("CNMETA_JSON").as_deref() == Ok("1");

    let config = AppConfig::load()?;
    config.validate()?;
    debug!("config loaded from {}", AppConfig::config_path().display());

    match cli.command {
        // ── Query ──────────────────────────────────────────────────────────

        Commands::Query { file, title, oversea, provider } => {
            let provider = lookup_provider(&provider).await?;
            let input = QueryInput::new(file_name(&file)?).with_title(title);
            let request = provider.build_query(&input, oversea)?;
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": { "provider": provider.name(), "request": request },
                    "meta": { "duration_ms": dur }
                }))?;
            } else {
                println!("{} {}", request.method(), request.url());
                for (name, value) in request.headers() {
                    println!("{name}: {value}");
                }
                println!();
                println!("{}", request.body());
            }
        }

        // ── Search ─────────────────────────────────────────────────────────

        Commands::Search { file, title, oversea, provider, no_pdf_title } => {
            let provider = lookup_provider(&provider).await?;
            let prefs = FilePreferences::open(config.prefs_path())?;
            let oversea = oversea
                || prefs
                    .get_bool(PrefKey::IsOversea)
                    .unwrap_or(config.resolver.is_oversea);

            let mut record = Record::attachment(RecordId(0), file_name(&file)?);
            if let Some(info) = record.attachment.as_mut() {
                info.path = Some(std::path::absolute(&file)?);
            }
            let title = match title {
                Some(title) => Some(title),
                None if no_pdf_title => None,
                None => PdfTitleExtractor.extract_title(&record).await,
            };
            let input = QueryInput::new(file_name(&file)?).with_title(title);

            let transport = HttpTransport::new(&config.http)?;
            let candidates =
                search_candidates(provider.as_ref(), &transport, &input, oversea).await?;
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": {
                        "provider": provider.name(),
                        "title": input.title,
                        "oversea": oversea,
                        "items": candidates,
                        "total": candidates.len()
                    },
                    "meta": { "duration_ms": dur }
                }))?;
            } else if candidates.is_empty() {
                println!("No results for: {}", file.display());
            } else {
                println!("Found {} results:", candidates.len());
                for (i, candidate) in candidates.iter().enumerate() {
                    println!("  {:>2}. {}", i + 1, candidate.summary);
                    println!("      {}", candidate.url);
                }
            }
        }

        // ── Translators ────────────────────────────────────────────────────

        Commands::Translators { action } => {
            let transport = Arc::new(HttpTransport::new(&config.http)?);
            let prefs = Arc::new(FilePreferences::open(config.prefs_path())?);
            let mut sync =
                TranslatorSync::new(transport, prefs, Arc::new(NoopReload), &config.translators);
            if !json_output {
                sync = sync.with_progress(Arc::new(print_sync_event));
            }

            match action {
                TranslatorsAction::Status => {
                    let rows = sync.refresh_manifest().await?;
                    let dur = start.elapsed().as_millis();
                    if json_output {
                        print_json(&serde_json::json!({
                            "status": "ok",
                            "data": { "items": rows, "total": rows.len(), "base_url": sync.base_url() },
                            "meta": { "duration_ms": dur }
                        }))?;
                    } else {
                        for row in &rows {
                            println!(
                                "{status} {label:<30}  local {local}  remote {remote}",
                                status = row.status,
                                label = row.short_label,
                                local = row.local_updated,
                                remote = row.remote_updated,
                            );
                        }
                    }
                }

                TranslatorsAction::Sync { force } => {
                    let summary = sync.download_all(force).await?;
                    let dur = start.elapsed().as_millis();
                    if json_output {
                        print_json(&serde_json::json!({
                            "status": if summary.failed.is_empty() { "ok" } else { "partial" },
                            "data": summary,
                            "meta": { "duration_ms": dur }
                        }))?;
                    } else {
                        println!(
                            "Downloaded {} of {} translators ({} already current).",
                            summary.succeeded.len(),
                            summary.attempted,
                            summary.skipped
                        );
                        for (filename, reason) in &summary.failed {
                            println!("  ✗ {filename}: {reason}");
                        }
                    }
                    if !summary.failed.is_empty() {
                        std::process::exit(ExitCode::NetworkError as i32);
                    }
                }
            }
        }

        // ── Config ─────────────────────────────────────────────────────────

        Commands::Config { action } => match action {
            ConfigAction::Path => {
                let path = AppConfig::config_path();
                if json_output {
                    print_json(&serde_json::json!({
                        "status": "ok",
                        "data": { "path": path, "exists": path.exists() }
                    }))?;
                } else {
                    println!("{}", path.display());
                }
            }
            ConfigAction::Show => {
                if json_output {
                    print_json(&serde_json::json!({"status":"ok","data":config}))?;
                } else {
                    print!("{}", toml::to_string_pretty(&config)?);
                }
            }
        },
    }

    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn print_json(val: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(val)?);
    Ok(())
}

fn print_sync_event(event: &SyncEvent) {
    match event {
        SyncEvent::ManifestLoaded { entries, from_cache } => {
            let source = if *from_cache { "cache" } else { "remote" };
            eprintln!("manifest: {entries} translators ({source})");
        }
        SyncEvent::DownloadStarted { total } => eprintln!("downloading {total} translators"),
        SyncEvent::Downloaded { filename, progress } => {
            eprintln!("[{progress:>5.1}%] ✓ {filename}");
        }
        SyncEvent::DownloadFailed { filename, error, progress } => {
            eprintln!("[{progress:>5.1}%] ✗ {filename}: {error}");
        }
        SyncEvent::Finished { .. } => {}
    }
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("not a file path: {}", path.display()))
}

async fn lookup_provider(name: &str) -> Result<Arc<dyn Provider>> {
    let registry = ProviderRegistry::with_defaults();
    match registry.get(name).await? {
        Some(provider) => Ok(provider),
        None => {
            let known = registry.names().join(", ");
            Err(CoreError::ConfigError(format!("unknown provider {name:?} (known: {known})")).into())
        }
    }
}

fn exit_code(err: &anyhow::Error) -> ExitCode {
    if let Some(err) = err.downcast_ref::<ResolveError>() {
        return match err {
            e if e.is_transport() => ExitCode::NetworkError,
            ResolveError::Io(_) => ExitCode::FileSystemError,
            _ => ExitCode::GeneralError,
        };
    }
    match err.downcast_ref::<CoreError>() {
        Some(CoreError::ConfigError(_)) => ExitCode::InvalidArgs,
        Some(CoreError::Io(_)) => ExitCode::FileSystemError,
        Some(CoreError::RecordNotFound(_)) => ExitCode::NotFound,
        _ if err.downcast_ref::<std::io::Error>().is_some() => ExitCode::FileSystemError,
        _ => ExitCode::GeneralError,
    }
}
