use async_trait::async_trait;

use super::automation::{GuiAutomation, UiAction, UiElement};
use crate::error::{BridgeError, BridgeResult};

/// Backend for platforms without scriptable accessibility; every call fails
#[derive(Debug, Clone)]
pub struct UnsupportedAutomation {
    os: String,
}

impl UnsupportedAutomation {
    pub fn new(os: impl Into<String>) -> Self {
        Self { os: os.into() }
    }

    fn refuse(&self) -> BridgeError {
        BridgeError::UnsupportedPlatform { os: self.os.clone() }
    }
}

#[async_trait]
impl GuiAutomation for UnsupportedAutomation {
    fn is_supported(&self) -> bool {
        false
    }

    fn platform(&self) -> String {
        self.os.clone()
    }

    async fn check_permission(&self) -> BridgeResult<()> {
        Err(self.refuse())
    }

    async fn locate_element(&self, _element: UiElement) -> BridgeResult<bool> {
        Err(self.refuse())
    }

    async fn invoke_action(&self, _action: &UiAction) -> BridgeResult<()> {
        Err(self.refuse())
    }
}
