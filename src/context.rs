//! Shared bridge state handed to the tool handlers and the CLI
//!
//! One context owns the OSC transport, the session facade and the export
//! sequencer. It is built once at startup and shared behind an `Arc`.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::export::{for_current_platform, ExportSequencer, GuiAutomation};
use crate::osc::{OscClient, OscTransport};
use crate::session::Session;

pub struct BridgeContext {
    osc: Arc<dyn OscTransport>,
    session: Session,
    sequencer: ExportSequencer,
}

impl BridgeContext {
    /// Build the production context: UDP transport plus the automation
    /// backend for this OS. Nothing touches the network until the first query.
    pub fn new(config: AppConfig) -> Self {
        let osc: Arc<dyn OscTransport> = Arc::new(OscClient::new(config.osc.clone()));
        let gui = for_current_platform(&config.export);
        info!(
            "Bridge targets AbletonOSC at {} (export automation: {})",
            config.osc.endpoint(),
            if gui.is_supported() { "available" } else { "unavailable" }
        );
        Self::with_parts(config, osc, gui)
    }

    pub fn with_parts(
        config: AppConfig,
        osc: Arc<dyn OscTransport>,
        gui: Arc<dyn GuiAutomation>,
    ) -> Self {
        let session = Session::new(Arc::clone(&osc));
        let sequencer = ExportSequencer::new(session.clone(), gui, config.export.clone());
        Self {
            osc,
            session,
            sequencer,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn sequencer(&self) -> &ExportSequencer {
        &self.sequencer
    }

    /// Cancel a running export and release the OSC channel
    pub async fn shutdown(&self) {
        if self.sequencer.export_status().busy {
            match self.sequencer.cancel_export() {
                Ok(status) => warn!("Cancelled export on shutdown ({})", status.state),
                Err(e) => debug!("Nothing to cancel: {}", e),
            }
        }
        self.osc.close().await;
        debug!("Bridge context shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportState;
    use crate::testing::{demo_set, FakeAutomation, FakeLive};
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_shutdown_cancels_running_export() {
        let gate = Arc::new(Notify::new());
        let ctx = Arc::new(BridgeContext::with_parts(
            AppConfig::default(),
            Arc::new(FakeLive::new(demo_set())),
            Arc::new(FakeAutomation::new().gated(Arc::clone(&gate))),
        ));
        ctx.sequencer().prepare_track_for_export(1).await.unwrap();

        let runner = Arc::clone(&ctx);
        let export = tokio::spawn(async move {
            runner
                .sequencer()
                .export_selected_track(Default::default())
                .await
        });
        while !ctx.sequencer().export_status().busy {
            tokio::task::yield_now().await;
        }

        ctx.shutdown().await;
        let result = export.await.unwrap();
        assert!(result.is_err());

        let status = ctx.sequencer().export_status();
        assert!(!status.busy);
        assert_eq!(status.state, ExportState::Failed);
    }

    #[tokio::test]
    async fn test_shutdown_when_idle_is_quiet() {
        let ctx = BridgeContext::with_parts(
            AppConfig::default(),
            Arc::new(FakeLive::new(demo_set())),
            Arc::new(FakeAutomation::new()),
        );
        ctx.shutdown().await;
        assert_eq!(ctx.sequencer().export_status().state, ExportState::Idle);
    }
}
