//! Run reporter: the single owner of run statistics, audit rows and output
//!
//! Workers hand finished tables over a channel; only the reporter counts,
//! prints, or writes files, so progress lines never interleave.

use crate::scheduler::{DispatchReport, GroupResult, TableIssue};
use chrono::Utc;
use colored::Colorize;
use colsync_catalog::{AuditSink, TableIdentifier};
use colsync_core::{
    iso_seconds, AuditLogRow, AuditWrite, ReconciliationAction, ReportVersion, RunContext,
    RunStats, RunSummary, UnmatchedReason,
};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Plain,
    Heading,
    Success,
    Info,
    Warning,
    Failure,
}

/// Append-only local copy of the progress stream
///
/// Lines are buffered and flushed once per table and at the end of the run.
struct LocalLog {
    path: PathBuf,
    file: BufWriter<File>,
}

impl LocalLog {
    fn open(path: PathBuf) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: BufWriter::new(file),
        })
    }

    fn append(&mut self, line: &str) -> std::io::Result<()> {
        writeln!(self.file, "{}  {}", iso_seconds(Utc::now()), line)
    }
}

/// What a finished run hands back to its caller
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub summary: RunSummary,

    /// Every progress line, uncolored, in output order
    pub transcript: Vec<String>,

    /// Local log file, if one was written
    pub log_path: Option<PathBuf>,
}

impl RunReport {
    /// Transcript joined into one block of text
    pub fn stdout(&self) -> String {
        let mut text = self.transcript.join("\n");
        text.push('\n');
        text
    }
}

/// Aggregates group results into stats, audit rows and progress output
pub struct RunReporter {
    context: RunContext,
    started: Instant,
    stats: RunStats,
    audit_rows: Vec<AuditLogRow>,
    transcript: Vec<String>,
    echo: bool,
    log: Option<LocalLog>,
}

impl RunReporter {
    /// Create a reporter; `echo` prints lines to stdout as they are produced
    pub fn new(context: RunContext, echo: bool) -> Self {
        Self {
            context,
            started: Instant::now(),
            stats: RunStats::default(),
            audit_rows: Vec::new(),
            transcript: Vec::new(),
            echo,
            log: None,
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Also append every line to `column_updates_<run_id>.log` in `dir`
    pub fn enable_local_log(&mut self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join(format!("column_updates_{}.log", self.context.run_id));
        self.log = Some(LocalLog::open(path.clone())?);
        self.emit(Tone::Info, format!("📝  Local log enabled → {}", path.display()));
        Ok(path)
    }

    /// Print the run header
    pub fn banner(&mut self, metadata_table: &TableIdentifier, audit_table: &TableIdentifier) {
        let context = self.context.clone();
        self.emit(
            Tone::Heading,
            format!("🚀  Starting column-description sync (run-id {})", context.run_id),
        );
        self.emit(Tone::Plain, format!("📑  Metadata table   : {}", metadata_table));
        self.emit(Tone::Plain, format!("📑  Job-run table    : {}", audit_table));
        self.emit(
            Tone::Plain,
            format!("⏱️   Sleep after DDL  : {} ms", context.sleep_interval.as_millis()),
        );
        self.emit(Tone::Plain, format!("🧵  Parallel tables  : {}", context.worker_count));
        self.emit(Tone::Plain, String::new());
    }

    /// Note how many catalog rows were loaded
    pub fn records_loaded(&mut self, records_read: usize, tables: usize, duplicates: usize) {
        let mut line = format!("📥  Loaded {} metadata rows across {} tables", records_read, tables);
        if duplicates > 0 {
            line.push_str(&format!(" ({} superseded duplicates)", duplicates));
        }
        self.emit(Tone::Info, line);
    }

    /// Merge one finished table
    ///
    /// Every outcome gets its own progress line; a missing or unreadable
    /// table is announced once before its rows.
    pub fn record_group(&mut self, result: GroupResult) {
        match &result.issue {
            Some(TableIssue::Missing) => {
                self.emit(Tone::Warning, format!("⚠️  Unmatched table   {}", result.table));
            }
            Some(TableIssue::Unreadable(cause)) => {
                self.emit(
                    Tone::Failure,
                    format!("❌  Error reading {}  →  {}", result.table, cause),
                );
            }
            None => {}
        }

        let unreadable = matches!(result.issue, Some(TableIssue::Unreadable(_)));
        let mut group_stats = RunStats::default();
        for outcome in &result.outcomes {
            group_stats.record(&outcome.action);
            self.audit_rows.push(AuditLogRow::new(
                &self.context.run_id,
                outcome.at,
                &outcome.record,
                &outcome.action,
            ));

            let path = format!("{}.{}", result.table, outcome.record.column);
            let (tone, line) = match &outcome.action {
                ReconciliationAction::Updated => {
                    (Tone::Success, format!("✅  Updated           {}", path))
                }
                ReconciliationAction::Skipped => {
                    (Tone::Info, format!("ℹ️  Skipped (no diff) {}", path))
                }
                ReconciliationAction::Unmatched(UnmatchedReason::ColumnNotFound) => {
                    (Tone::Warning, format!("⚠️  Unmatched column  {}", path))
                }
                ReconciliationAction::Unmatched(UnmatchedReason::TableNotFound) => {
                    (Tone::Warning, format!("⚠️  Unmatched table   {}", path))
                }
                ReconciliationAction::Error(cause) if unreadable => {
                    (Tone::Failure, format!("❌  Error reading {}  →  {}", path, cause))
                }
                ReconciliationAction::Error(cause) => {
                    (Tone::Failure, format!("❌  Failed {}  →  {}", path, cause))
                }
            };
            self.emit(tone, line);
        }

        self.stats.merge(&group_stats);
        self.flush_log();
    }

    /// Write the audit trail and produce the summary
    ///
    /// A sink failure is reported as a warning; it never changes the counts.
    pub async fn finish(
        mut self,
        sink: &dyn AuditSink,
        audit_table: &TableIdentifier,
        dispatch: &DispatchReport,
        records_read: usize,
        duplicates: usize,
    ) -> RunReport {
        if dispatch.interrupted {
            self.emit(
                Tone::Warning,
                format!(
                    "\n⏹️  Interrupted: {} records in undispatched tables were not processed",
                    dispatch.not_dispatched
                ),
            );
        }

        let audit = self.write_audit(sink, audit_table).await;

        let summary = RunSummary {
            version: ReportVersion::CURRENT,
            run_id: self.context.run_id.clone(),
            started_at: iso_seconds(self.context.started_at),
            duration_secs: self.started.elapsed().as_secs_f64(),
            stats: self.stats,
            records_read,
            duplicates,
            not_dispatched: dispatch.not_dispatched,
            interrupted: dispatch.interrupted,
            audit,
        };

        if !summary.is_conserved() {
            tracing::error!(
                outcomes = summary.stats.total(),
                planned = summary.planned_records(),
                not_dispatched = summary.not_dispatched,
                "outcome count does not match planned records"
            );
        }

        self.print_summary(&summary);
        self.flush_log();

        RunReport {
            summary,
            log_path: self.log.as_ref().map(|log| log.path.clone()),
            transcript: self.transcript,
        }
    }

    async fn write_audit(&mut self, sink: &dyn AuditSink, audit_table: &TableIdentifier) -> AuditWrite {
        if self.audit_rows.is_empty() {
            self.emit(Tone::Info, "\n📋  No job-run rows to write".to_string());
            return AuditWrite::Empty;
        }

        self.emit(Tone::Plain, "\n📋  Writing job-run log to BigQuery …".to_string());

        let result = match sink.ensure_table(audit_table).await {
            Ok(()) => sink.insert_rows(audit_table, &self.audit_rows).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.emit(Tone::Success, "✅  Log written successfully".to_string());
                AuditWrite::Written(self.audit_rows.len())
            }
            Err(e) => {
                tracing::warn!(table = %audit_table, rows = self.audit_rows.len(), "{}", e);
                self.emit(Tone::Warning, format!("⚠️  Job-run log not written: {}", e));
                AuditWrite::Failed(e.to_string())
            }
        }
    }

    fn print_summary(&mut self, summary: &RunSummary) {
        self.emit(Tone::Heading, "\n🏁  Run complete".to_string());
        for (status, count) in summary.stats.entries() {
            let label = capitalize(status.as_str());
            self.emit(Tone::Plain, format!("   {:<10}: {}", label, count));
        }
        self.emit(Tone::Plain, format!("   {:<10}: {}", "Total", summary.stats.total()));
        self.emit(Tone::Plain, format!("   {:<10}: {}", "Read", summary.records_read));
        if summary.duplicates > 0 {
            self.emit(Tone::Plain, format!("   {:<10}: {}", "Duplicates", summary.duplicates));
        }
        if summary.interrupted {
            self.emit(Tone::Warning, format!("   {:<10}: {}", "Skipped*", summary.not_dispatched));
        }
        self.emit(Tone::Plain, format!("   {:<10}: {}", "Run-id", summary.run_id));
        self.emit(
            Tone::Plain,
            format!(
                "   {:<10}: {:.1}s ({:.2} min)",
                "Duration",
                summary.duration_secs,
                summary.duration_secs / 60.0
            ),
        );
    }

    fn flush_log(&mut self) {
        if let Some(log) = self.log.as_mut() {
            if let Err(e) = log.file.flush() {
                tracing::warn!(path = %log.path.display(), "local log disabled: {}", e);
                self.log = None;
            }
        }
    }

    fn emit(&mut self, tone: Tone, line: String) {
        if self.echo {
            let painted = match tone {
                Tone::Plain => line.normal(),
                Tone::Heading => line.bold().bright_blue(),
                Tone::Success => line.green(),
                Tone::Info => line.cyan(),
                Tone::Warning => line.yellow(),
                Tone::Failure => line.red(),
            };
            println!("{}", painted);
        }

        if let Some(log) = self.log.as_mut() {
            if let Err(e) = log.append(&line) {
                tracing::warn!(path = %log.path.display(), "local log disabled: {}", e);
                self.log = None;
            }
        }

        self.transcript.push(line);
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
