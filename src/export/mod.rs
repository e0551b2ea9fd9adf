//! Stem export through Live's "Export Audio/Video" dialog
//!
//! Live exposes no export command over OSC, so the sequencer prepares the
//! track over OSC and then drives the dialogs with GUI automation. Only
//! macOS offers the accessibility scripting needed; other platforms get a
//! backend that refuses every call.

mod applescript;
pub mod automation;
pub mod job;
pub mod sequencer;
mod unsupported;

pub use applescript::AppleScriptAutomation;
pub use automation::{for_current_platform, GuiAutomation, UiAction, UiElement};
pub use job::{ExportJob, ExportState};
pub use sequencer::{
    ExportOutcome, ExportRequest, ExportSequencer, ExportStatus, GroupExportOutcome,
    GroupExportRequest, SkippedTrack, TrackExportResult,
};
pub use unsupported::UnsupportedAutomation;
