//! Export job state machine

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{BridgeError, BridgeResult, ErrorReport};
use crate::session::ExportRange;

/// Progress of one export job. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportState {
    Idle,
    TrackSelected,
    RangeSet,
    ExportTriggered,
    Completed,
    Failed,
}

impl ExportState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExportState::Completed | ExportState::Failed)
    }

    fn can_advance_to(self, next: ExportState) -> bool {
        use ExportState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Idle, TrackSelected)
            | (TrackSelected, RangeSet)
            | (RangeSet, ExportTriggered)
            | (ExportTriggered, Completed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExportState::Idle => "idle",
            ExportState::TrackSelected => "track_selected",
            ExportState::RangeSet => "range_set",
            ExportState::ExportTriggered => "export_triggered",
            ExportState::Completed => "completed",
            ExportState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ExportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportJob {
    pub id: u64,
    pub track_index: u32,
    pub track_name: String,
    pub state: ExportState,
    pub range: Option<ExportRange>,
    pub suggested_filename: String,
    /// File name (without extension) typed into the save dialog
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExportJob {
    pub fn new(id: u64, track_index: u32, track_name: String, suggested_filename: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            track_index,
            track_name,
            state: ExportState::Idle,
            range: None,
            suggested_filename,
            filename: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn advance(&mut self, next: ExportState) -> BridgeResult<()> {
        if !self.state.can_advance_to(next) {
            return Err(BridgeError::InvalidState(format!(
                "export job {} cannot move from {} to {}",
                self.id, self.state, next
            )));
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Move to `Failed`; a job that already finished keeps its outcome
    pub fn fail(&mut self, err: &BridgeError) {
        if self.state.is_terminal() {
            return;
        }
        self.state = ExportState::Failed;
        self.error = Some(err.report());
        self.updated_at = Utc::now();
    }
}
