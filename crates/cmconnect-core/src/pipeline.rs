//! Locate → read → normalize → validate → load, with a never-failing entry point
//! for presentation code.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use cmconnect_parser::{
    read_workbook, CalamineWorkbook, ParserError, RawWorkbook, SheetNames, WorkbookSource,
};
use serde::Serialize;
use tokio::task;
use tracing::{error, info};
use uuid::Uuid;

use crate::cleanup::{CleanupRules, CompiledRules};
use crate::config::{AppConfig, TableNames};
use crate::error::{PipelineError, Result};
use crate::locator::{locate_latest, SPREADSHEET_EXTENSION};
use crate::logging::log_file_path;
use crate::normalize::{normalize, NormalizedWorkbook};
use crate::progress::{report, ProgressCallback, ProgressEvent};
use crate::store::{LoadReport, StoreConnector, TableStore};
use crate::validate::validate_dataset;

/// Operator-facing text for a failed run, pointing at the configured log file.
pub fn failure_message(log_dir: &Path) -> String {
    format!(
        "Normalization failed. Check {} for details.",
        log_file_path(log_dir).display()
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub input_dir: PathBuf,
    pub log_dir: PathBuf,
    pub spreadsheet_extension: String,
    pub sheets: SheetNames,
    pub tables: TableNames,
    pub batch_size: usize,
    pub rules: CleanupRules,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            input_dir: config.paths.input_dir.clone(),
            log_dir: config.paths.log_dir.clone(),
            spreadsheet_extension: if config.paths.spreadsheet_extension.is_empty() {
                SPREADSHEET_EXTENSION.to_string()
            } else {
                config.paths.spreadsheet_extension.clone()
            },
            sheets: config.pipeline.sheets.clone(),
            tables: config.pipeline.tables.clone(),
            batch_size: config.pipeline.batch_size,
            rules: config.pipeline.rules.clone(),
        }
    }
}

/// A workbook read from its source, before normalization.
#[derive(Debug, Clone)]
pub struct SourceWorkbook {
    pub path: PathBuf,
    /// blake3 of the file bytes; absent for sources that are not files.
    pub hash: Option<String>,
    pub raw: RawWorkbook,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    pub table: String,
    pub rows: usize,
    pub columns: usize,
    pub batches: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReceipt {
    pub run_id: Uuid,
    pub source_file: PathBuf,
    pub source_hash: Option<String>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub tables: Vec<TableSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub success: bool,
    /// Operator-facing message; never contains error internals.
    pub message: Option<String>,
    /// Full error text for callers that choose to show it.
    pub detail: Option<String>,
    pub receipt: Option<RunReceipt>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.success
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    rules: CompiledRules,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let rules = config.rules.compile()?;
        Ok(Self { config, rules })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn locate(&self) -> Result<PathBuf> {
        Ok(locate_latest(
            &self.config.input_dir,
            &self.config.spreadsheet_extension,
        )?)
    }

    /// Parses both sheets from the spreadsheet at `path` on the blocking pool.
    pub async fn read(&self, path: &Path) -> Result<SourceWorkbook> {
        let path = path.to_path_buf();
        let sheets = self.config.sheets.clone();
        task::spawn_blocking(move || -> Result<SourceWorkbook> {
            let bytes = std::fs::read(&path).map_err(|source| ParserError::Io {
                path: path.clone(),
                source,
            })?;
            let hash = blake3::hash(&bytes).to_hex().to_string();
            let mut workbook = CalamineWorkbook::from_bytes(bytes)?;
            let raw = read_workbook(&mut workbook, &sheets)?;
            Ok(SourceWorkbook {
                path,
                hash: Some(hash),
                raw,
            })
        })
        .await?
    }

    pub async fn read_source<W>(&self, mut source: W, label: PathBuf) -> Result<SourceWorkbook>
    where
        W: WorkbookSource + Send + 'static,
    {
        let sheets = self.config.sheets.clone();
        task::spawn_blocking(move || -> Result<SourceWorkbook> {
            let raw = read_workbook(&mut source, &sheets)?;
            Ok(SourceWorkbook {
                path: label,
                hash: None,
                raw,
            })
        })
        .await?
    }

    pub fn normalize(&self, raw: &RawWorkbook) -> NormalizedWorkbook {
        normalize(raw, &self.rules)
    }

    pub fn validate(&self, normalized: &NormalizedWorkbook) -> Result<()> {
        validate_dataset(&self.config.tables.eps, &normalized.eps)?;
        validate_dataset(&self.config.tables.crm, &normalized.crm)?;
        Ok(())
    }

    /// Replaces the EPS table, then the CRM table. A CRM failure does not undo the EPS load.
    pub async fn load(
        &self,
        store: &dyn TableStore,
        normalized: &NormalizedWorkbook,
    ) -> Result<Vec<LoadReport>> {
        let targets = [
            (&self.config.tables.eps, &normalized.eps),
            (&self.config.tables.crm, &normalized.crm),
        ];

        let mut reports = Vec::with_capacity(targets.len());
        for (table, dataset) in targets {
            let report = store
                .replace_table(table, dataset, self.config.batch_size)
                .await
                .map_err(|source| PipelineError::Load {
                    table: table.clone(),
                    source,
                })?;
            info!(
                table = %report.table,
                rows = report.rows_written,
                batches = report.batches,
                "table replaced"
            );
            reports.push(report);
        }
        Ok(reports)
    }

    /// Runs every phase against the newest spreadsheet in the input directory.
    pub async fn execute(
        &self,
        connector: &dyn StoreConnector,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<RunReceipt> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();

        let path = self.locate()?;
        info!(%run_id, path = %path.display(), "input spreadsheet resolved");

        report(progress, ProgressEvent::ReadStarted { source: path.clone() });
        let source = self.read(&path).await?;
        self.finish(run_id, started_at, clock, source, connector, progress)
            .await
    }

    /// Same as [`execute`](Self::execute) for a workbook the caller already holds.
    pub async fn execute_workbook<W>(
        &self,
        workbook: W,
        label: impl Into<PathBuf>,
        connector: &dyn StoreConnector,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<RunReceipt>
    where
        W: WorkbookSource + Send + 'static,
    {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let label = label.into();

        report(progress, ProgressEvent::ReadStarted { source: label.clone() });
        let source = self.read_source(workbook, label).await?;
        self.finish(run_id, started_at, clock, source, connector, progress)
            .await
    }

    async fn finish(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        clock: Instant,
        source: SourceWorkbook,
        connector: &dyn StoreConnector,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<RunReceipt> {
        let eps_rows = source.raw.eps.row_count();
        let crm_rows = source.raw.crm.row_count();
        info!(%run_id, eps_rows, crm_rows, "sheets read");
        report(progress, ProgressEvent::ReadDone { eps_rows, crm_rows });

        let normalized = self.normalize(&source.raw);
        drop(source.raw);
        self.validate(&normalized)?;
        info!(
            %run_id,
            eps_columns = normalized.eps.column_count(),
            crm_columns = normalized.crm.column_count(),
            "column normalization completed"
        );
        report(
            progress,
            ProgressEvent::NormalizeDone {
                eps_columns: normalized.eps.column_count(),
                crm_columns: normalized.crm.column_count(),
            },
        );

        let store = connector.open().await.map_err(PipelineError::Connect)?;
        let reports = self.load(store.as_ref(), &normalized).await?;
        drop(store);

        report(
            progress,
            ProgressEvent::LoadDone {
                tables: reports.iter().map(|r| r.table.clone()).collect(),
            },
        );

        let datasets = [&normalized.eps, &normalized.crm];
        let tables = reports
            .into_iter()
            .zip(datasets)
            .map(|(report, dataset)| TableSummary {
                table: report.table,
                rows: report.rows_written,
                columns: dataset.column_count(),
                batches: report.batches,
            })
            .collect();

        Ok(RunReceipt {
            run_id,
            source_file: source.path,
            source_hash: source.hash,
            started_at,
            elapsed_ms: clock.elapsed().as_millis() as u64,
            tables,
        })
    }
}

/// Runs the whole pipeline and reports only success or failure.
///
/// Errors are logged with full context and never propagated; the outcome carries a
/// generic message for display.
pub async fn run_normalization(
    pipeline: &Pipeline,
    connector: &dyn StoreConnector,
    progress: Option<ProgressCallback<'_>>,
) -> RunOutcome {
    let clock = Instant::now();
    info!("normalization pipeline started");

    match pipeline.execute(connector, progress).await {
        Ok(receipt) => {
            info!(
                run_id = %receipt.run_id,
                elapsed_ms = receipt.elapsed_ms,
                "normalization pipeline completed successfully"
            );
            RunOutcome {
                success: true,
                message: None,
                detail: None,
                receipt: Some(receipt),
            }
        }
        Err(err) => {
            error!(
                kind = err.kind(),
                error = %err,
                details = ?err,
                elapsed_ms = clock.elapsed().as_millis() as u64,
                "error during normalization pipeline"
            );
            RunOutcome {
                success: false,
                message: Some(failure_message(&pipeline.config.log_dir)),
                detail: Some(err.to_string()),
                receipt: None,
            }
        }
    }
}
