//! Wires the config directory, catalog client and pipeline together for each
//! subcommand.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use showrenamer_config::{ConfigStore, ConfigWatcher, load_or_create_settings};
use showrenamer_core::fs_watch::collect_video_files;
use showrenamer_core::{
    ConfigObserver, FileCoalescer, FileExecutor, FileProcessor, JsonLinesOperationLog,
    MetadataCache, OperationRecord, Pipeline, ProcessOutcome, RenamerSettings, SeriesMatcher,
    ShowDirectoryResolver, TvdbClient, UndoReport, UndoStep, WatchService, plan_undo,
};
use tracing::{info, warn};

use crate::cli::{Cli, Command};
use crate::confirm::{TerminalConfirmer, confirm_undo};

/// `$XDG_CONFIG_HOME/showrenamer`, else `~/.config/showrenamer`.
pub fn default_config_dir() -> PathBuf {
    let base = env::var_os("XDG_CONFIG_HOME")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("showrenamer")
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_dir = cli.config_dir.clone().unwrap_or_else(default_config_dir);
    let store = Arc::new(ConfigStore::open(&config_dir)?);
    let mut settings = load_or_create_settings(&store.settings_path())?;
    cli.apply_overrides(&mut settings);
    info!(config_dir = %store.dir().display(), mode = ?cli.mode(), "configuration loaded");

    match &cli.command {
        Command::History { limit, file } => print_history(&store, *limit, file.as_deref()),
        Command::Undo { limit, file } => undo(&cli, &store, *limit, file.as_deref()),
        Command::ClearCache => clear_cache(&store, &settings),
        Command::Run { paths } => run_once(&cli, &store, &settings, paths).await,
        Command::Watch { paths } => watch(&cli, store, &settings, paths.clone()).await,
    }
}

fn build_pipeline(cli: &Cli, store: &ConfigStore, settings: &RenamerSettings) -> anyhow::Result<Arc<Pipeline>> {
    let Some(api_key) = cli.api_key.clone().filter(|key| !key.trim().is_empty()) else {
        bail!("no TheTVDB API key; pass --api-key or set TVDB_API_KEY");
    };

    let mode = cli.mode();
    let catalog = TvdbClient::new(&settings.catalog_base_url, api_key, settings.language.clone())
        .context("failed to create catalog client")?;
    let cache = MetadataCache::open(store.cache_path(), settings.cache_ttl_days)
        .context("failed to open metadata cache")?;

    let mut matcher = SeriesMatcher::new(Arc::new(catalog), Arc::new(cache), settings.language.clone())
        .with_threshold(settings.match_threshold);
    if cli.interactive() {
        matcher = matcher.with_confirmer(Arc::new(TerminalConfirmer));
    }

    let show_directories = store.show_directories();
    if mode.relocates() && show_directories.base_directories.is_empty() {
        warn!(
            file = %store.dir().join(showrenamer_config::store::SHOW_DIRECTORIES_FILE).display(),
            "no library folders configured; renamed files cannot be moved"
        );
    }

    let log = Arc::new(JsonLinesOperationLog::new(store.operation_log_path()));
    let executor = Arc::new(FileExecutor::new(
        ShowDirectoryResolver::new(&show_directories),
        log,
        mode.is_dry_run(),
    ));

    let pipeline = Pipeline::new(store.patterns(), store.mapping(), matcher, executor, mode)
        .with_video_extensions(settings.video_extensions.clone());
    Ok(Arc::new(pipeline))
}

#[derive(Debug, Default)]
struct RunTally {
    completed: usize,
    deferred: usize,
    failed: usize,
    skipped: usize,
}

async fn run_once(
    cli: &Cli,
    store: &ConfigStore,
    settings: &RenamerSettings,
    paths: &[PathBuf],
) -> anyhow::Result<()> {
    let pipeline = build_pipeline(cli, store, settings)?;
    let files = collect_video_files(paths, &settings.video_extensions);
    info!(files = files.len(), "processing existing files");

    let mut tally = RunTally::default();
    for file in &files {
        match pipeline.process(file).await {
            Ok(ProcessOutcome::Completed { path }) => {
                tally.completed += 1;
                println!("done      {} -> {}", file.display(), path.display());
            }
            Ok(ProcessOutcome::Deferred { path, reason }) => {
                tally.deferred += 1;
                println!("deferred  {} ({reason})", path.display());
            }
            Ok(ProcessOutcome::Ignored | ProcessOutcome::Vanished) => tally.skipped += 1,
            Err(err) => {
                tally.failed += 1;
                warn!(path = %file.display(), error = %err, "processing failed");
            }
        }
    }

    println!(
        "{} completed, {} deferred, {} failed, {} skipped",
        tally.completed, tally.deferred, tally.failed, tally.skipped
    );
    Ok(())
}

async fn watch(
    cli: &Cli,
    store: Arc<ConfigStore>,
    settings: &RenamerSettings,
    paths: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let pipeline = build_pipeline(cli, &store, settings)?;

    let observers: Vec<Arc<dyn ConfigObserver>> = vec![pipeline.clone()];
    let config_watcher =
        ConfigWatcher::start(store.clone(), observers).context("failed to watch config directory")?;

    let coalescer = Arc::new(FileCoalescer::new(
        pipeline,
        settings.watch,
        settings.video_extensions.clone(),
    ));
    let service = WatchService::start(coalescer, paths).context("failed to start watching")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    service.shutdown().await;
    config_watcher.stop().await;
    Ok(())
}

fn print_history(store: &ConfigStore, limit: usize, file: Option<&Path>) -> anyhow::Result<()> {
    let log = JsonLinesOperationLog::new(store.operation_log_path());
    let records = match file {
        Some(path) => log.for_file(path),
        None => log.recent(limit),
    }
    .with_context(|| format!("failed to read {}", log.path().display()))?;

    if records.is_empty() {
        println!("no recorded operations");
    }
    for record in &records {
        println!("{}", history_line(record));
    }
    Ok(())
}

fn history_line(record: &OperationRecord) -> String {
    let status = if record.success { "ok" } else { "FAILED" };
    let destination = record
        .destination
        .as_deref()
        .map(|dest| format!(" -> {}", dest.display()))
        .unwrap_or_default();
    let mut line = format!(
        "{} {:<6} {:<6} {}{destination}",
        record.timestamp.format("%Y-%m-%d %H:%M:%S"),
        record.operation,
        status,
        record.source.display(),
    );
    if let Some(error) = record.details.get("error").and_then(|err| err.as_str()) {
        line.push_str(&format!(" ({error})"));
    }
    line
}

fn undo(cli: &Cli, store: &ConfigStore, limit: usize, file: Option<&Path>) -> anyhow::Result<()> {
    let log = Arc::new(JsonLinesOperationLog::new(store.operation_log_path()));
    let records = match file {
        Some(path) => log.lineage(path),
        None => log.recent(limit),
    }
    .with_context(|| format!("failed to read {}", log.path().display()))?;

    let steps = plan_undo(&records);
    if steps.is_empty() {
        println!("nothing to undo");
        return Ok(());
    }
    for step in &steps {
        println!("{}", undo_line(step));
    }

    if cli.interactive() && !cli.dry_run && !confirm_undo(steps.len())? {
        println!("aborted");
        return Ok(());
    }

    let executor = FileExecutor::new(
        ShowDirectoryResolver::new(&store.show_directories()),
        log,
        cli.dry_run,
    );
    let report = executor.undo(&steps);
    println!("{}", undo_summary(&report, cli.dry_run));
    Ok(())
}

fn undo_line(step: &UndoStep) -> String {
    format!(
        "{:<6} {} -> {}",
        step.operation,
        step.current.display(),
        step.original.display()
    )
}

fn undo_summary(report: &UndoReport, dry_run: bool) -> String {
    let verb = if dry_run { "would restore" } else { "restored" };
    let mut summary = format!(
        "{verb} {}, {} missing, {} conflicts, {} failed",
        report.restored.len(),
        report.missing.len(),
        report.conflicts.len(),
        report.failed.len()
    );
    for (path, reason) in &report.failed {
        summary.push_str(&format!("\n  {}: {reason}", path.display()));
    }
    summary
}

fn clear_cache(store: &ConfigStore, settings: &RenamerSettings) -> anyhow::Result<()> {
    let cache = MetadataCache::open(store.cache_path(), settings.cache_ttl_days)
        .context("failed to open metadata cache")?;
    let entries = cache.len();
    cache.clear().context("failed to clear metadata cache")?;
    println!("removed {entries} cached entries from {}", cache.path().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serde_json::json;
    use showrenamer_core::oplog::OperationKind;
    use tempfile::TempDir;

    #[test]
    fn history_line_shows_failure_reason() {
        let record = OperationRecord::new(
            OperationKind::Move,
            Path::new("/in/a.mkv"),
            Some(PathBuf::from("/tv/A/Season 1/a.mkv")),
            false,
        )
        .with_details(json!({"error": "destination exists"}));

        let line = history_line(&record);
        assert!(line.contains("move   FAILED /in/a.mkv -> /tv/A/Season 1/a.mkv"));
        assert!(line.ends_with("(destination exists)"));
    }

    #[tokio::test]
    async fn run_without_api_key_fails_early() {
        let dir = TempDir::new().unwrap();
        let inbox = TempDir::new().unwrap();
        let mut cli = Cli::try_parse_from([
            "showrenamer",
            "--config-dir",
            dir.path().to_str().unwrap(),
            "run",
            inbox.path().to_str().unwrap(),
        ])
        .unwrap();
        cli.api_key = None;

        let err = run(cli).await.unwrap_err();
        assert!(err.to_string().contains("API key"));
        assert!(dir.path().join("settings.toml").exists());
    }

    #[tokio::test]
    async fn undo_command_restores_logged_rename() {
        let dir = TempDir::new().unwrap();
        let inbox = TempDir::new().unwrap();
        let store = ConfigStore::open(dir.path()).unwrap();

        let original = inbox.path().join("lost.s01e01.mkv");
        std::fs::write(&original, b"x").unwrap();
        let executor = FileExecutor::new(
            ShowDirectoryResolver::new(&store.show_directories()),
            Arc::new(JsonLinesOperationLog::new(store.operation_log_path())),
            false,
        );
        let renamed = executor.rename(&original, "Lost - S01E01.mkv").unwrap();

        let args = ["showrenamer", "--config-dir", dir.path().to_str().unwrap(), "--no-interactive"];
        let dry = Cli::try_parse_from(args.iter().copied().chain(["--dry-run", "undo"])).unwrap();
        run(dry).await.unwrap();
        assert!(renamed.exists());

        let cli = Cli::try_parse_from(args.iter().copied().chain(["undo"])).unwrap();
        run(cli).await.unwrap();
        assert!(original.exists());
        assert!(!renamed.exists());
    }

    #[test]
    fn undo_summary_lists_failures() {
        let report = UndoReport {
            restored: vec![PathBuf::from("/in/a.mkv")],
            failed: vec![(PathBuf::from("/tv/b.mkv"), "permission denied".into())],
            ..UndoReport::default()
        };
        assert_eq!(
            undo_summary(&report, false),
            "restored 1, 0 missing, 0 conflicts, 1 failed\n  /tv/b.mkv: permission denied"
        );
        assert!(undo_summary(&UndoReport::default(), true).starts_with("would restore 0"));
    }

    #[tokio::test]
    async fn clear_cache_empties_cache_file() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::open(dir.path()).unwrap();
        let cache = MetadataCache::open(store.cache_path(), 7).unwrap();
        cache.set("series_x", json!({"id": 1, "name": "X"})).unwrap();

        clear_cache(&store, &RenamerSettings::default()).unwrap();
        assert!(MetadataCache::open(store.cache_path(), 7).unwrap().is_empty());
    }
}
