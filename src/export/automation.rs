//! GUI automation capability used by the export sequencer

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::applescript::AppleScriptAutomation;
use super::unsupported::UnsupportedAutomation;
use crate::config::ExportConfig;
use crate::error::BridgeResult;

/// UI state the sequencer waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiElement {
    /// Live is the frontmost application
    LiveFrontmost,
    /// Live's "Export Audio/Video" window (or its progress window)
    ExportDialog,
    /// The file save sheet that follows the export dialog
    SaveDialog,
}

impl std::fmt::Display for UiElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            UiElement::LiveFrontmost => "Live as frontmost app",
            UiElement::ExportDialog => "export dialog",
            UiElement::SaveDialog => "save dialog",
        })
    }
}

/// Input the sequencer sends to the GUI
#[derive(Debug, Clone, PartialEq)]
pub enum UiAction {
    ActivateLive,
    /// Cmd+Shift+R
    OpenExportDialog,
    /// Return key
    Confirm,
    /// Cmd+Shift+G in the save dialog, then the folder path
    GoToFolder(PathBuf),
    /// Replace the save dialog's filename field; refuses outside the save dialog
    TypeFilename(String),
    Escape,
}

/// Platform GUI primitives
///
/// `locate_element` looks once; callers own the retry budget.
#[async_trait]
pub trait GuiAutomation: Send + Sync {
    /// Whether this platform can drive Live's GUI at all
    fn is_supported(&self) -> bool;

    /// Human readable platform name for error messages
    fn platform(&self) -> String;

    /// Fails with `PermissionDenied` when accessibility access is missing
    async fn check_permission(&self) -> BridgeResult<()>;

    async fn locate_element(&self, element: UiElement) -> BridgeResult<bool>;

    async fn invoke_action(&self, action: &UiAction) -> BridgeResult<()>;

    /// Poll until none of `elements` is visible. Returns `false` if one is
    /// still visible when `timeout` elapses.
    async fn wait_for_dismissal(
        &self,
        elements: &[UiElement],
        timeout: Duration,
        interval: Duration,
    ) -> BridgeResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut visible = false;
            for element in elements {
                if self.locate_element(*element).await? {
                    visible = true;
                    break;
                }
            }
            if !visible {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(interval).await;
        }
    }
}

/// AppleScript on macOS, a refusing backend everywhere else
pub fn for_current_platform(config: &ExportConfig) -> Arc<dyn GuiAutomation> {
    if cfg!(target_os = "macos") {
        Arc::new(AppleScriptAutomation::new(config.clone()))
    } else {
        Arc::new(UnsupportedAutomation::new(std::env::consts::OS))
    }
}
