//! lumina - replay generation streams against a project and preview them
//!
//! `apply` runs a recorded stream through a turn, commits what applied
//! cleanly and writes the sandbox bundle. `locate` and `resolve` map
//! positions reported by the sandbox back to source files.

mod status;
mod turn_lock;

use std::io::{self, BufRead, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lumina_core::protocol::{decode_sandbox_message, PreviewEvent};
use lumina_core::store::{CommitSummary, METADATA_DIR};
use lumina_core::{
    BundleOutput, Config, DirectoryStore, ErrorLocator, ProjectStore, SandboxBundler,
    SourceMapIndex, Turn,
};
use serde::Serialize;

use crate::status::StatusPrinter;
use crate::turn_lock::TurnLock;

const DEFAULT_BUNDLE_FILE: &str = "preview.html";

#[derive(Parser)]
#[command(name = "lumina")]
#[command(about = "Apply generation streams to a project and build sandbox previews")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a generation stream against a project
    Apply {
        /// Project directory (created if missing)
        #[arg(short, long)]
        project: PathBuf,

        /// Stream file to replay; reads stdin when omitted
        #[arg(short, long)]
        stream: Option<PathBuf>,

        /// Bytes per chunk fed to the parser
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Pause between chunks, in milliseconds
        #[arg(long, default_value = "0")]
        delay_ms: u64,

        /// Bundle output path (default: <project>/.lumina/preview.html)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Apply in memory only; nothing is committed to the project
        #[arg(long)]
        dry_run: bool,

        /// Output format: text (default) or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Bundle the committed project into a preview document
    Bundle {
        #[arg(short, long)]
        project: PathBuf,

        /// Bundle output path (default: <project>/.lumina/preview.html)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Map a bundle line to its source file and line
    Locate {
        /// Source map written next to the bundle
        #[arg(short, long)]
        map: PathBuf,

        /// 1-based line in the bundle
        #[arg(short, long)]
        line: usize,
    },

    /// Read sandbox messages (one JSON object per line) from stdin and print
    /// them with source positions
    Resolve {
        #[arg(short, long)]
        map: PathBuf,

        /// Output format: text (default) or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

/// Machine-readable result of `lumina apply`.
#[derive(Serialize)]
struct ApplyReport<'a> {
    turn: String,
    cancelled: bool,
    dry_run: bool,
    files: Vec<FileReport<'a>>,
    dependencies: &'a lumina_core::DependencyMap,
    conflicts: &'a [lumina_core::PatchConflict],
    warnings: &'a [String],
    committed: Option<CommitSummary>,
    bundle: Option<BundleReport>,
}

#[derive(Serialize)]
struct FileReport<'a> {
    name: &'a str,
    status: lumina_core::FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

#[derive(Serialize)]
struct BundleReport {
    html: PathBuf,
    map: PathBuf,
    fingerprint: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    Config::ensure_xdg_env();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        lumina_core::logging::init(&config.logging).context("failed to initialize logging")?;

    match cli.command {
        Command::Apply {
            project,
            stream,
            chunk_size,
            delay_ms,
            out,
            dry_run,
            format,
        } => {
            let json = parse_format(&format)?;
            let options = ApplyOptions {
                stream,
                chunk_size: chunk_size.unwrap_or(config.stream.replay_chunk_size),
                delay: Duration::from_millis(delay_ms),
                out,
                dry_run,
                json,
            };
            apply(&config, &project, options)
        }
        Command::Bundle { project, out } => bundle_project(&config, &project, out),
        Command::Locate { map, line } => locate(&map, line),
        Command::Resolve { map, format } => {
            let json = parse_format(&format)?;
            resolve(&config, &map, json)
        }
    }
}

fn parse_format(format: &str) -> Result<bool> {
    match format {
        "text" => Ok(false),
        "json" => Ok(true),
        other => anyhow::bail!("unknown format '{}' (expected text or json)", other),
    }
}

struct ApplyOptions {
    stream: Option<PathBuf>,
    chunk_size: usize,
    delay: Duration,
    out: Option<PathBuf>,
    dry_run: bool,
    json: bool,
}

fn apply(config: &Config, project: &Path, options: ApplyOptions) -> Result<()> {
    if options.chunk_size == 0 {
        anyhow::bail!("--chunk-size must be greater than 0");
    }

    std::fs::create_dir_all(project)
        .with_context(|| format!("failed to create project directory {}", project.display()))?;
    let _lock = TurnLock::acquire(project)?;

    let store = DirectoryStore::new(project);
    let snapshot = store.load().context("failed to load project")?;
    let text = read_stream(options.stream.as_deref())?;

    // Ctrl-C cancels the turn; whatever streamed so far is discarded.
    let abort = Arc::new(AtomicBool::new(false));
    let flag = abort.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling turn...");
        flag.store(true, Ordering::SeqCst);
    })
    .context("failed to set Ctrl+C handler")?;

    if !options.json {
        println!(
            "Applying {} bytes to {} ({} files committed)",
            text.len(),
            project.display(),
            snapshot.files.len()
        );
    }

    let turn = Turn::with_config(
        snapshot.files,
        snapshot.dependencies,
        StatusPrinter::new(options.json),
        &config.stream,
    );
    let delay = options.delay;
    let chunks = text.chunks(options.chunk_size).inspect(|_| {
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    });
    let outcome = turn.run(chunks, &abort);

    let mut committed = None;
    let mut written_bundle = None;
    if outcome.cancelled {
        tracing::info!(turn = %outcome.id, "Turn discarded after cancel");
    } else {
        if !options.dry_run {
            committed = Some(
                store
                    .commit(&outcome.files, &outcome.dependencies)
                    .context("failed to commit project")?,
            );
        }
        let output =
            SandboxBundler::new(config.bundler.clone()).bundle(&outcome.files, &outcome.dependencies);
        let html_path = options
            .out
            .unwrap_or_else(|| default_bundle_path(project));
        written_bundle = Some(write_bundle(&output, &html_path)?);
    }

    if options.json {
        let report = ApplyReport {
            turn: outcome.id.to_string(),
            cancelled: outcome.cancelled,
            dry_run: options.dry_run,
            files: outcome
                .files
                .iter()
                .map(|f| FileReport {
                    name: &f.name,
                    status: f.status,
                    error: f.error.as_deref(),
                })
                .collect(),
            dependencies: &outcome.dependencies,
            conflicts: &outcome.conflicts,
            warnings: &outcome.warnings,
            committed,
            bundle: written_bundle,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    status::print_outcome(&outcome);
    println!();
    if outcome.cancelled {
        println!("Turn cancelled; nothing was committed.");
    } else if let Some(summary) = &committed {
        println!(
            "Committed: {} written, {} unchanged, {} skipped",
            summary.written.len(),
            summary.unchanged,
            summary.skipped.len()
        );
        for name in &summary.rejected {
            println!("  rejected {} (outside the project)", name);
        }
    } else {
        println!("Dry run; nothing was committed.");
    }
    if let Some(report) = &written_bundle {
        println!("Bundle: {}", report.html.display());
        println!("Source map: {}", report.map.display());
    }
    Ok(())
}

fn bundle_project(config: &Config, project: &Path, out: Option<PathBuf>) -> Result<()> {
    let store = DirectoryStore::new(project);
    let snapshot = store.load().context("failed to load project")?;

    let output = SandboxBundler::new(config.bundler.clone())
        .bundle(&snapshot.files, &snapshot.dependencies);
    let html_path = out.unwrap_or_else(|| default_bundle_path(project));
    let report = write_bundle(&output, &html_path)?;

    println!(
        "Bundled {} files ({} mapped) into {}",
        snapshot.files.len(),
        output.source_map.len(),
        report.html.display()
    );
    println!("Source map: {}", report.map.display());
    println!("Fingerprint: {}", report.fingerprint);
    Ok(())
}

fn locate(map: &Path, line: usize) -> Result<()> {
    let locator = load_locator(map)?;
    match locator.locate(line) {
        Some(location) => println!("{}", location),
        None => println!("line {} is not part of any source file", line),
    }
    Ok(())
}

fn resolve(config: &Config, map: &Path, json: bool) -> Result<()> {
    let locator = load_locator(map)?;
    let stdin = io::stdin();

    for (n, line) in stdin.lock().lines().enumerate() {
        let line = line.context("failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        let message = match decode_sandbox_message(&line, config.protocol.max_message_len) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(line = n + 1, error = %e, "Ignoring sandbox message");
                eprintln!("skipping message on line {}: {}", n + 1, e);
                continue;
            }
        };

        let event = PreviewEvent::from_message(message, &locator);
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            print_event(&event);
        }
    }
    Ok(())
}

fn print_event(event: &PreviewEvent) {
    match event {
        PreviewEvent::Console(log) => println!("{}", log),
        PreviewEvent::DependenciesLoading { count } => {
            println!("[deps] loading {} dependencies", count)
        }
        PreviewEvent::DependenciesLoaded => println!("[deps] all dependencies loaded"),
        PreviewEvent::DependencyErrors { errors } => {
            for error in errors {
                println!("[deps] {}", error);
            }
        }
        PreviewEvent::ElementSelected {
            intent,
            selector,
            styles,
        } => println!(
            "[select] {} for {:?} ({} styles)",
            selector,
            intent,
            styles.len()
        ),
    }
}

fn read_stream(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) => std::fs::read(path)
            .with_context(|| format!("failed to read stream file {}", path.display())),
        None => {
            let mut buf = Vec::new();
            io::stdin()
                .read_to_end(&mut buf)
                .context("failed to read stream from stdin")?;
            Ok(buf)
        }
    }
}

fn default_bundle_path(project: &Path) -> PathBuf {
    project.join(METADATA_DIR).join(DEFAULT_BUNDLE_FILE)
}

/// The source map is written next to the bundle as `<stem>.map.json`.
fn map_path_for(html_path: &Path) -> PathBuf {
    html_path.with_extension("map.json")
}

fn write_bundle(output: &BundleOutput, html_path: &Path) -> Result<BundleReport> {
    if let Some(parent) = html_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(html_path, &output.html)
        .with_context(|| format!("failed to write bundle {}", html_path.display()))?;

    let map_path = map_path_for(html_path);
    std::fs::write(&map_path, output.source_map.to_json()?)
        .with_context(|| format!("failed to write source map {}", map_path.display()))?;

    let fingerprint = output.fingerprint();
    tracing::info!(
        bundle = %html_path.display(),
        ranges = output.source_map.len(),
        %fingerprint,
        "Bundle written"
    );
    Ok(BundleReport {
        html: html_path.to_path_buf(),
        map: map_path,
        fingerprint,
    })
}

fn load_locator(map: &Path) -> Result<ErrorLocator> {
    let json = std::fs::read_to_string(map)
        .with_context(|| format!("failed to read source map {}", map.display()))?;
    let index = SourceMapIndex::from_json(&json)
        .with_context(|| format!("invalid source map {}", map.display()))?;
    Ok(ErrorLocator::new(index))
}
