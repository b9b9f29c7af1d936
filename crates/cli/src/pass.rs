//! `gstate run`, `validate` and `dump`: config-driven reconciliation passes.

use std::cell::Cell;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use gatherstate_recon::config::InputFormat;
use gatherstate_recon::{
    measure_json_size, BatchKind, BatchSummary, DiffResults, DiffSummary, LogHooks, PassConfig,
    PassStats, ReconcileError, ReconcileHooks, Reconciler, Record, StateStore, StoreError,
};
use gatherstate_sqlite::SqliteStore;

use crate::exit_codes::{
    reconcile_exit_code, EXIT_CHANGES, EXIT_INPUT_PARSE, EXIT_INVALID_CONFIG, EXIT_OUTPUT,
    EXIT_STORE, EXIT_USAGE,
};
use crate::input::{format_from_extension, load_records};
use crate::CliError;

pub struct RunArgs {
    pub config: PathBuf,
    pub input: Option<PathBuf>,
    pub format: Option<InputFormat>,
    pub json: bool,
    pub output: Option<PathBuf>,
    pub now: Option<String>,
    pub exit_code: bool,
}

fn pass_err(code: u8, msg: impl Into<String>) -> CliError {
    CliError { code, message: msg.into(), hint: None }
}

fn load_config(config_path: &Path) -> Result<PassConfig, CliError> {
    let config_str = std::fs::read_to_string(config_path).map_err(|e| {
        pass_err(EXIT_USAGE, format!("cannot read config {}: {e}", config_path.display()))
    })?;
    PassConfig::from_toml(&config_str).map_err(|e| pass_err(EXIT_INVALID_CONFIG, e.to_string()))
}

/// Relative paths in a config resolve against the config's own directory.
fn base_dir(config_path: &Path) -> &Path {
    config_path.parent().unwrap_or_else(|| Path::new("."))
}

fn open_store(config: &PassConfig, base: &Path) -> Result<SqliteStore, CliError> {
    let path = config.store_path(base);
    SqliteStore::open(&path, &config.store.table).map_err(|e| {
        pass_err(EXIT_STORE, format!("cannot open store {}: {e}", path.display()))
    })
}

fn parse_now(now: Option<&str>) -> Result<DateTime<Utc>, CliError> {
    match now {
        None => Ok(Utc::now()),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| {
                pass_err(EXIT_USAGE, format!("invalid --now '{s}': {e}"))
                    .with_hint("use RFC 3339, e.g. 2026-05-04T09:30:00Z")
            }),
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct RunMeta<'a> {
    pass: &'a str,
    table: &'a str,
    now: DateTime<Utc>,
    retention_seconds: i64,
    stats: PassStats,
    version: &'static str,
}

#[derive(Serialize)]
struct RunReport<'a> {
    meta: RunMeta<'a>,
    summary: DiffSummary,
    results: &'a DiffResults,
}

/// Logs like [`LogHooks`] and keeps the classification counts for the report.
struct ReportHooks {
    log: LogHooks,
    stats: Rc<Cell<PassStats>>,
}

impl ReconcileHooks for ReportHooks {
    fn fetched(&self, former: usize) {
        self.log.fetched(former);
    }

    fn duplicate_dropped(&self, record: &Record, position: usize, kept: usize) {
        self.log.duplicate_dropped(record, position, kept);
    }

    fn classified(&self, stats: &PassStats) {
        self.stats.set(*stats);
        self.log.classified(stats);
    }

    fn batch_submitted(&self, kind: BatchKind, ops: usize) {
        self.log.batch_submitted(kind, ops);
    }

    fn batch_completed(&self, kind: BatchKind, outcome: &Result<BatchSummary, StoreError>) {
        self.log.batch_completed(kind, outcome);
    }

    fn finished(&self, results: &DiffResults) {
        self.log.finished(results);
    }
}

pub fn cmd_run(args: RunArgs) -> Result<(), CliError> {
    let config = load_config(&args.config)?;
    let base = base_dir(&args.config);
    let now = parse_now(args.now.as_deref())?;
    let retention = config
        .retention_period()
        .map_err(|e| pass_err(EXIT_INVALID_CONFIG, e.to_string()))?;

    // --input beats [input].file; "-" is stdin
    let input_path = args
        .input
        .clone()
        .or_else(|| config.input_path(base))
        .ok_or_else(|| {
            pass_err(EXIT_USAGE, "no input file")
                .with_hint("pass --input FILE or set [input].file in the config")
        })?;
    let format = args
        .format
        .or_else(|| config.input_format())
        .or_else(|| format_from_extension(&input_path))
        .unwrap_or_default();

    let text = read_input(&input_path)?;
    let fresh = load_records(&text, format, &config.identifying_fields, now).map_err(|e| {
        pass_err(EXIT_INPUT_PARSE, format!("{}: {e}", input_path.display()))
            .with_hint(format!("input was read as {format}; override with --format"))
    })?;
    let fresh_count = fresh.len();
    log::debug!(
        "loaded {fresh_count} fresh record(s) from {} as {format}",
        input_path.display()
    );

    let mut store = open_store(&config, base)?;
    let stats = Rc::new(Cell::new(PassStats::default()));
    let engine = Reconciler::new().retention(retention).hooks(ReportHooks {
        log: LogHooks::new("gstate::pass"),
        stats: Rc::clone(&stats),
    });

    let results = engine
        .reconcile_at(fresh, &mut store, now)
        .map_err(reconcile_error)?;

    let summary = results.summary();
    let report = RunReport {
        meta: RunMeta {
            pass: &config.name,
            table: store.table(),
            now,
            retention_seconds: retention.num_seconds(),
            stats: stats.get(),
            version: env!("CARGO_PKG_VERSION"),
        },
        summary,
        results: &results,
    };

    let json_str = serde_json::to_string_pretty(&report)
        .map_err(|e| pass_err(EXIT_OUTPUT, format!("JSON serialization error: {e}")))?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &json_str)
            .map_err(|e| pass_err(EXIT_OUTPUT, format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }

    if args.json {
        println!("{json_str}");
    }

    // Human summary to stderr
    let payload = measure_json_size(&report).unwrap_or(json_str.len());
    let s = stats.get();
    eprintln!(
        "pass '{}': {summary} ({fresh_count} fresh, {} former, {} unchanged, {} retained; {payload} bytes)",
        config.name, s.former, s.unchanged, s.retained,
    );
    if s.duplicates > 0 {
        eprintln!("note: {} duplicate fresh record(s) dropped", s.duplicates);
    }

    if args.exit_code && !results.is_empty() {
        return Err(pass_err(EXIT_CHANGES, ""));
    }
    Ok(())
}

fn read_input(path: &Path) -> Result<String, CliError> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| pass_err(EXIT_USAGE, format!("cannot read stdin: {e}")))?;
        return Ok(buf);
    }
    std::fs::read_to_string(path)
        .map_err(|e| pass_err(EXIT_USAGE, format!("cannot read {}: {e}", path.display())))
}

fn reconcile_error(err: ReconcileError) -> CliError {
    let code = reconcile_exit_code(&err);
    let hint = match &err {
        ReconcileError::Record(_) => {
            Some("every fresh record must carry all of the config's identifying_fields".to_string())
        }
        ReconcileError::Fetch(_) => Some("nothing was written; check [store].path".to_string()),
        ReconcileError::Write { .. } => {
            Some("some mutations may have been applied; rerunning the pass is safe".to_string())
        }
    };
    CliError { code, message: err.to_string(), hint }
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let retention = config
        .retention_period()
        .map_err(|e| pass_err(EXIT_INVALID_CONFIG, e.to_string()))?;
    eprintln!(
        "valid: pass '{}' identified by [{}], retention {}s, store {}:{}",
        config.name,
        config.identifying_fields.join(", "),
        retention.num_seconds(),
        config.store.path,
        config.store.table,
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// dump
// ---------------------------------------------------------------------------

pub fn cmd_dump(config_path: PathBuf, json: bool) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let mut store = open_store(&config, base_dir(&config_path))?;
    let rows = store
        .fetch_all()
        .map_err(|e| pass_err(EXIT_STORE, format!("cannot fetch {}: {e}", store.table())))?;

    if json {
        let json_str = serde_json::to_string_pretty(&rows)
            .map_err(|e| pass_err(EXIT_OUTPUT, format!("JSON serialization error: {e}")))?;
        println!("{json_str}");
    } else {
        for row in &rows {
            let data = serde_json::to_string(&row.data)
                .map_err(|e| pass_err(EXIT_OUTPUT, format!("JSON serialization error: {e}")))?;
            println!("{}\t{data}", row.last_updated.to_rfc3339());
        }
    }
    eprintln!("{} row(s) in {}", rows.len(), store.table());
    Ok(())
}
