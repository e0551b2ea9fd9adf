//! macOS backend driving Live through `osascript` and System Events
//!
//! Live draws its own dialogs, so they are identified by the title of the
//! process's front window ("Export Audio/Video", "Save").

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, trace};

use super::automation::{GuiAutomation, UiAction, UiElement};
use crate::config::ExportConfig;
use crate::error::{BridgeError, BridgeResult};

/// Markers osascript prints when accessibility access is missing
const PERMISSION_MARKERS: &[&str] = &[
    "not allowed assistive access",
    "(-1719)",
    "(-25211)",
    "(-1743)",
];

/// Front-window titles of the export dialog and of the render progress
/// window that replaces it
const EXPORT_TITLES: &[&str] = &["Export Audio/Video", "Export Audio"];

const SAVE_TITLE: &str = "Save";

const PERMISSION_HINT: &str = "grant Accessibility access to the app running this bridge in \
     System Settings > Privacy & Security > Accessibility";

pub struct AppleScriptAutomation {
    config: ExportConfig,
}

impl AppleScriptAutomation {
    pub fn new(config: ExportConfig) -> Self {
        Self { config }
    }

    async fn run(&self, script: &str) -> BridgeResult<String> {
        trace!("osascript: {}", script);
        let child = Command::new("osascript")
            .arg("-e")
            .arg(script)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.config.script_timeout(), child)
            .await
            .map_err(|_| {
                BridgeError::Automation(format!(
                    "osascript did not finish within {} ms",
                    self.config.script_timeout_ms
                ))
            })?
            .map_err(|e| BridgeError::Automation(format!("cannot run osascript: {}", e)))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(classify_failure(&String::from_utf8_lossy(&output.stderr)))
        }
    }

    async fn front_window_title(&self) -> BridgeResult<Option<String>> {
        let script = format!(
            r#"tell application "System Events"
    tell process "{}"
        if (count of windows) is 0 then return ""
        return name of front window
    end tell
end tell"#,
            quote(&self.config.process_name)
        );
        match self.run(&script).await {
            Ok(title) => Ok(Some(title)),
            Err(e @ BridgeError::PermissionDenied(_)) => Err(e),
            // Live not running, or mid-redraw
            Err(e) => {
                debug!("front window lookup failed: {}", e);
                Ok(None)
            },
        }
    }

    fn action_script(&self, action: &UiAction) -> String {
        match action {
            UiAction::ActivateLive => format!(
                "tell application \"{}\" to activate",
                quote(&self.config.app_name)
            ),
            UiAction::OpenExportDialog => {
                system_events(r#"keystroke "r" using {shift down, command down}"#)
            },
            UiAction::Confirm => system_events("keystroke return"),
            UiAction::GoToFolder(path) => system_events(&format!(
                "keystroke \"g\" using {{shift down, command down}}\n    delay 0.5\n    keystroke \"{}\"\n    delay 0.3\n    keystroke return\n    delay 0.5",
                quote(&path.to_string_lossy())
            )),
            // Cmd+A would select every track if focus were on the arrangement,
            // so the script itself refuses outside the save dialog
            UiAction::TypeFilename(name) => format!(
                r#"tell application "System Events"
    tell process "{}"
        if name of front window is not "Save" then error "not in the Save dialog"
        keystroke "a" using {{command down}}
        delay 0.1
        keystroke "{}"
    end tell
end tell"#,
                quote(&self.config.process_name),
                quote(name)
            ),
            UiAction::Escape => system_events("key code 53"),
        }
    }
}

#[async_trait]
impl GuiAutomation for AppleScriptAutomation {
    fn is_supported(&self) -> bool {
        true
    }

    fn platform(&self) -> String {
        "macos".to_string()
    }

    async fn check_permission(&self) -> BridgeResult<()> {
        let enabled = self
            .run(r#"tell application "System Events" to get UI elements enabled"#)
            .await?;
        if enabled == "true" {
            Ok(())
        } else {
            Err(BridgeError::PermissionDenied(PERMISSION_HINT.to_string()))
        }
    }

    async fn locate_element(&self, element: UiElement) -> BridgeResult<bool> {
        match element {
            UiElement::LiveFrontmost => {
                let front = self
                    .run(r#"tell application "System Events" to get name of first application process whose frontmost is true"#)
                    .await?;
                Ok(front == self.config.process_name)
            },
            UiElement::ExportDialog | UiElement::SaveDialog => Ok(self
                .front_window_title()
                .await?
                .is_some_and(|t| title_matches(element, &t))),
        }
    }

    async fn invoke_action(&self, action: &UiAction) -> BridgeResult<()> {
        debug!("⌨️ {:?}", action);
        self.run(&self.action_script(action)).await.map(|_| ())
    }
}

/// Whole-title comparison; the main window carries the set's name, which
/// may well contain "Export" or "Save"
fn title_matches(element: UiElement, title: &str) -> bool {
    let title = title.trim();
    match element {
        UiElement::ExportDialog => EXPORT_TITLES.contains(&title),
        UiElement::SaveDialog => title == SAVE_TITLE,
        UiElement::LiveFrontmost => false,
    }
}

fn system_events(body: &str) -> String {
    format!("tell application \"System Events\"\n    {}\nend tell", body)
}

/// Escape text for an AppleScript string literal
fn quote(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn classify_failure(stderr: &str) -> BridgeError {
    let message = stderr.trim();
    if PERMISSION_MARKERS.iter().any(|m| message.contains(m)) {
        BridgeError::PermissionDenied(format!("{} ({})", PERMISSION_HINT, message))
    } else {
        BridgeError::Automation(format!("osascript failed: {}", message))
    }
}
