use std::path::PathBuf;

use serde::Serialize;

/// Phase boundaries reported to an optional observer while the pipeline runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    ReadStarted { source: PathBuf },
    ReadDone { eps_rows: usize, crm_rows: usize },
    NormalizeDone { eps_columns: usize, crm_columns: usize },
    LoadDone { tables: Vec<String> },
}

impl ProgressEvent {
    /// Rough completion fraction for progress bars.
    pub fn fraction(&self) -> f32 {
        match self {
            ProgressEvent::ReadStarted { .. } => 0.1,
            ProgressEvent::ReadDone { .. } => 0.4,
            ProgressEvent::NormalizeDone { .. } => 0.6,
            ProgressEvent::LoadDone { .. } => 1.0,
        }
    }
}

pub type ProgressCallback<'a> = &'a (dyn Fn(&ProgressEvent) + Send + Sync);

pub(crate) fn report(progress: Option<ProgressCallback<'_>>, event: ProgressEvent) {
    if let Some(callback) = progress {
        callback(&event);
    }
}
