//! Export sequencer: prepares a track over OSC, then drives Live's export
//! dialogs through the GUI automation backend
//!
//! Every operation that changes Live (selection, loop region, dialogs) runs
//! under a lease. Only one lease exists at a time; anything else that wants
//! to change Live meanwhile fails with `ConflictError`.

use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::automation::{GuiAutomation, UiAction, UiElement};
use super::job::{ExportJob, ExportState};
use crate::config::ExportConfig;
use crate::error::{BridgeError, BridgeResult, ErrorReport};
use crate::session::{sanitize_filename, Clip, ExportRange, RangeReport, Session, Track};

/// Escape presses used to back out of half-open dialogs
const ESCAPE_PRESSES: usize = 3;

/// Options for `export_selected_track`
#[derive(Debug, Clone, Default)]
pub struct ExportRequest {
    /// Prepare this track first instead of using the prepared job
    pub track_index: Option<u32>,
    /// File name without extension; defaults to the job's suggested name
    pub filename: Option<String>,
    /// Folder to navigate to in the save dialog
    pub output_folder: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportOutcome {
    pub job: ExportJob,
    pub file_name: String,
    pub output_folder: Option<PathBuf>,
    pub message: String,
}

/// Options for `export_group`
#[derive(Debug, Clone, Default)]
pub struct GroupExportRequest {
    /// Case-insensitive part of the group's name; the first match wins
    pub group: String,
    pub output_folder: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackExportResult {
    pub track_index: u32,
    pub track_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedTrack {
    pub track_index: u32,
    pub track_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupExportOutcome {
    pub group_index: u32,
    pub group_name: String,
    pub range: RangeReport,
    pub output_folder: Option<PathBuf>,
    pub results: Vec<TrackExportResult>,
    pub skipped: Vec<SkippedTrack>,
    pub exported: usize,
    pub failed: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportStatus {
    pub state: ExportState,
    pub busy: bool,
    pub platform: String,
    pub platform_supported: bool,
    pub job: Option<ExportJob>,
}

struct ActiveExport {
    lease: u64,
    /// Job being driven, once one exists
    job_id: Option<u64>,
    cancel: Arc<Notify>,
}

#[derive(Default)]
struct SequencerState {
    job: Option<ExportJob>,
    active: Option<ActiveExport>,
    next_job_id: u64,
    next_lease: u64,
}

impl SequencerState {
    fn ensure_idle(&self) -> BridgeResult<()> {
        match self.active.as_ref().map(|a| a.job_id) {
            Some(Some(job_id)) => Err(BridgeError::Conflict(format!(
                "export job {} is already in progress",
                job_id
            ))),
            Some(None) => Err(BridgeError::Conflict(
                "an export is already in progress".to_string(),
            )),
            None => Ok(()),
        }
    }

    fn holds(&self, lease: u64) -> bool {
        self.active.as_ref().is_some_and(|a| a.lease == lease)
    }

    /// Update the job only if it is still the one we started with
    fn with_job(&mut self, job_id: u64, f: impl FnOnce(&mut ExportJob)) {
        if let Some(job) = self.job.as_mut().filter(|j| j.id == job_id) {
            f(job);
        }
    }
}

/// Exclusive hold on Live. Dropping it, including when the caller drops the
/// future, releases the marker and fails the job it was driving.
struct Lease {
    state: Arc<Mutex<SequencerState>>,
    id: u64,
    cancel: Arc<Notify>,
}

impl Lease {
    /// `Cancelled` once `cancel_export` took the marker away
    fn check(&self) -> BridgeResult<()> {
        if self.state.lock().holds(self.id) {
            Ok(())
        } else {
            Err(BridgeError::Cancelled)
        }
    }

    /// Give the marker back and leave the job as it is
    fn release(self) {
        let mut state = self.state.lock();
        if state.holds(self.id) {
            state.active = None;
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if !state.holds(self.id) {
            return;
        }
        if let Some(job_id) = state.active.take().and_then(|a| a.job_id) {
            state.with_job(job_id, |job| job.fail(&BridgeError::Cancelled));
        }
    }
}

#[derive(Clone)]
pub struct ExportSequencer {
    session: Session,
    gui: Arc<dyn GuiAutomation>,
    config: ExportConfig,
    state: Arc<Mutex<SequencerState>>,
}

impl ExportSequencer {
    pub fn new(session: Session, gui: Arc<dyn GuiAutomation>, config: ExportConfig) -> Self {
        Self {
            session,
            gui,
            config,
            state: Arc::new(Mutex::new(SequencerState::default())),
        }
    }

    fn acquire(&self) -> BridgeResult<Lease> {
        let mut state = self.state.lock();
        state.ensure_idle()?;
        state.next_lease += 1;
        let id = state.next_lease;
        let cancel = Arc::new(Notify::new());
        state.active = Some(ActiveExport {
            lease: id,
            job_id: None,
            cancel: Arc::clone(&cancel),
        });
        Ok(Lease {
            state: Arc::clone(&self.state),
            id,
            cancel,
        })
    }

    fn ensure_supported(&self) -> BridgeResult<()> {
        if self.gui.is_supported() {
            Ok(())
        } else {
            Err(BridgeError::UnsupportedPlatform {
                os: self.gui.platform(),
            })
        }
    }

    /// Select a track outside of an export
    pub async fn select_track(&self, index: u32) -> BridgeResult<Track> {
        let _lease = self.acquire()?;
        self.session.select_track(index).await
    }

    /// Set the loop region outside of an export
    pub async fn set_export_range(&self, start_beats: f64, length_beats: f64) -> BridgeResult<RangeReport> {
        let _lease = self.acquire()?;
        self.session.set_export_range(start_beats, length_beats).await
    }

    /// Select the track and set the loop to its clip extents.
    ///
    /// A track without arrangement clips fails with `NotFoundError` before
    /// anything in Live is changed.
    pub async fn prepare_track_for_export(&self, index: u32) -> BridgeResult<ExportJob> {
        let lease = self.acquire()?;
        let job = self.prepare_under(&lease, index).await?;
        lease.release();
        Ok(job)
    }

    async fn prepare_under(&self, lease: &Lease, index: u32) -> BridgeResult<ExportJob> {
        let info = self.session.get_track_info(index).await?;
        let range = info.audio_range().ok_or_else(|| {
            BridgeError::NotFound(format!(
                "track {} '{}' has no arrangement clips to export",
                index, info.track.name
            ))
        })?;
        let naming = self.session.track_export_info(index).await?;

        let mut job = self.start_job(lease, |id| {
            ExportJob::new(id, index, info.track.name.clone(), naming.suggested_filename)
        })?;
        self.apply_preparation(lease, &mut job, range, true).await?;

        info!(
            "📦 Prepared '{}' for export: {:.1} - {:.1} beats",
            job.track_name, range.start_beats, range.end_beats
        );
        Ok(job)
    }

    /// Create the next job and bind it to the lease
    fn start_job(&self, lease: &Lease, build: impl FnOnce(u64) -> ExportJob) -> BridgeResult<ExportJob> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let active = state
            .active
            .as_mut()
            .filter(|a| a.lease == lease.id)
            .ok_or(BridgeError::Cancelled)?;

        state.next_job_id += 1;
        let job = build(state.next_job_id);
        active.job_id = Some(job.id);
        state.job = Some(job.clone());
        Ok(job)
    }

    /// Select the job's track, then set (or just record) the loop region
    async fn apply_preparation(
        &self,
        lease: &Lease,
        job: &mut ExportJob,
        range: ExportRange,
        set_loop: bool,
    ) -> BridgeResult<()> {
        let result = tokio::select! {
            res = self.preparation_steps(lease, job, range, set_loop) => res,
            _ = lease.cancel.notified() => Err(BridgeError::Cancelled),
        };
        if let Err(e) = &result {
            job.fail(e);
            if *e != BridgeError::Cancelled {
                let _ = self.store(lease, job);
            }
        }
        result
    }

    async fn preparation_steps(
        &self,
        lease: &Lease,
        job: &mut ExportJob,
        range: ExportRange,
        set_loop: bool,
    ) -> BridgeResult<()> {
        self.session.select_track(job.track_index).await?;
        job.advance(ExportState::TrackSelected)?;
        self.store(lease, job)?;

        job.range = Some(if set_loop {
            self.session
                .set_export_range(range.start_beats, range.length_beats())
                .await?
                .range
        } else {
            range
        });
        job.advance(ExportState::RangeSet)?;
        self.store(lease, job)
    }

    /// Mirror the job into shared state while the lease is still held
    fn store(&self, lease: &Lease, job: &ExportJob) -> BridgeResult<()> {
        let mut state = self.state.lock();
        if !state.holds(lease.id) {
            return Err(BridgeError::Cancelled);
        }
        state.job = Some(job.clone());
        Ok(())
    }

    /// Run Live's export dialogs for the prepared track
    pub async fn export_selected_track(&self, request: ExportRequest) -> BridgeResult<ExportOutcome> {
        self.ensure_supported()?;
        let lease = self.acquire()?;

        if let Some(index) = request.track_index {
            self.prepare_under(&lease, index).await?;
        }

        let output_folder = request
            .output_folder
            .or_else(|| self.config.default_output_folder.clone());
        let (job_id, filename) = self.claim(&lease, request.filename.as_deref())?;

        let result = match self.gui.check_permission().await {
            Ok(()) => self.drive(&lease, job_id, &filename, output_folder.as_deref()).await,
            Err(e) => Err(e),
        };
        let job = self.record(job_id, &result);
        lease.release();
        result?;

        let job = job
            .filter(|j| j.state == ExportState::Completed)
            .ok_or(BridgeError::Cancelled)?;
        info!("✅ Export complete: {}.wav", filename);
        Ok(ExportOutcome {
            message: format!("Exported '{}' as {}.wav", job.track_name, filename),
            file_name: format!("{}.wav", filename),
            output_folder,
            job,
        })
    }

    /// Bind the prepared job to the lease and settle its file name
    fn claim(&self, lease: &Lease, filename: Option<&str>) -> BridgeResult<(u64, String)> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let active = state
            .active
            .as_mut()
            .filter(|a| a.lease == lease.id)
            .ok_or(BridgeError::Cancelled)?;

        let job = state.job.as_mut().ok_or_else(|| {
            BridgeError::InvalidState(
                "no track is prepared; call prepare_track_for_export first".to_string(),
            )
        })?;
        if job.state != ExportState::RangeSet {
            return Err(BridgeError::InvalidState(format!(
                "export job {} is {}; prepare the track again",
                job.id, job.state
            )));
        }

        let filename = filename
            .map(sanitize_filename)
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| job.suggested_filename.clone());
        job.filename = Some(filename.clone());
        active.job_id = Some(job.id);
        Ok((job.id, filename))
    }

    /// Run the dialogs until they finish or the lease is cancelled
    async fn drive(&self, lease: &Lease, job_id: u64, filename: &str, folder: Option<&Path>) -> BridgeResult<()> {
        info!("🎬 Exporting job {} as {}.wav", job_id, filename);
        let result = tokio::select! {
            res = self.run_dialogs(job_id, filename, folder) => res,
            _ = lease.cancel.notified() => Err(BridgeError::Cancelled),
        };

        if let Err(e) = &result {
            if !matches!(e, BridgeError::Cancelled | BridgeError::PermissionDenied(_)) {
                self.back_out().await;
            }
        }
        result
    }

    /// Settle the job on the outcome and return it
    fn record(&self, job_id: u64, result: &BridgeResult<()>) -> Option<ExportJob> {
        let mut state = self.state.lock();
        state.with_job(job_id, |job| match result {
            Ok(()) => {
                if let Err(e) = job.advance(ExportState::Completed) {
                    job.fail(&e);
                }
            },
            Err(e) => job.fail(e),
        });
        state.job.clone().filter(|j| j.id == job_id)
    }

    /// Export every unmuted child of a group that has arrangement clips.
    ///
    /// The loop is set once to cover all children's clips. A track that
    /// fails is recorded and the next one is tried; cancelling stops the
    /// whole run.
    pub async fn export_group(&self, request: GroupExportRequest) -> BridgeResult<GroupExportOutcome> {
        self.ensure_supported()?;
        let query = request.group.trim();
        if query.is_empty() {
            return Err(BridgeError::InvalidArgument(
                "group name cannot be empty".to_string(),
            ));
        }
        let lease = self.acquire()?;

        let group = self.session.find_group(query).await?;
        let members = self.session.group_members(group.index).await?;
        let clips: Vec<Clip> = members.iter().flat_map(|m| m.clips.iter().cloned()).collect();
        let range = ExportRange::covering(&clips).ok_or_else(|| {
            BridgeError::NotFound(format!("group '{}' has no arrangement clips", group.name))
        })?;

        let mut skipped = Vec::new();
        let mut tracks = Vec::new();
        for member in members {
            let reason = if member.track.is_group() {
                Some("nested group")
            } else if member.track.muted {
                Some("muted")
            } else if member.clips.is_empty() {
                Some("no arrangement clips")
            } else {
                None
            };
            match reason {
                Some(reason) => {
                    debug!("skipping '{}': {}", member.track.name, reason);
                    skipped.push(SkippedTrack {
                        track_index: member.track.index,
                        track_name: member.track.name,
                        reason: reason.to_string(),
                    });
                },
                None => tracks.push(member.track),
            }
        }
        if tracks.is_empty() {
            return Err(BridgeError::NotFound(format!(
                "group '{}' has no unmuted tracks with arrangement clips",
                group.name
            )));
        }

        self.gui.check_permission().await?;
        let output_folder = request
            .output_folder
            .or_else(|| self.config.default_output_folder.clone());
        let report = self
            .session
            .set_export_range(range.start_beats, range.length_beats())
            .await?;
        info!(
            "📦 Exporting {} track(s) from group '{}' ({} skipped)",
            tracks.len(),
            group.name,
            skipped.len()
        );

        let mut results = Vec::with_capacity(tracks.len());
        for (i, track) in tracks.iter().enumerate() {
            if i > 0 {
                self.pause_between(&lease).await?;
            }
            lease.check()?;
            match self.export_member(&lease, track, report.range, output_folder.as_deref()).await {
                Ok(file_name) => results.push(TrackExportResult {
                    track_index: track.index,
                    track_name: track.name.clone(),
                    success: true,
                    file_name: Some(file_name),
                    error: None,
                }),
                Err(BridgeError::Cancelled) => return Err(BridgeError::Cancelled),
                Err(e) => {
                    warn!("❌ Export of '{}' failed: {}", track.name, e);
                    results.push(TrackExportResult {
                        track_index: track.index,
                        track_name: track.name.clone(),
                        success: false,
                        file_name: None,
                        error: Some(e.report()),
                    });
                },
            }
        }
        lease.release();

        let exported = results.iter().filter(|r| r.success).count();
        let failed = results.len() - exported;
        info!(
            "✅ Group '{}': {} exported, {} failed, {} skipped",
            group.name,
            exported,
            failed,
            skipped.len()
        );
        Ok(GroupExportOutcome {
            message: format!(
                "Exported {} of {} track(s) from '{}'",
                exported,
                results.len(),
                group.name
            ),
            group_index: group.index,
            group_name: group.name,
            range: report,
            output_folder,
            results,
            skipped,
            exported,
            failed,
        })
    }

    /// One track of a group export; returns the written file name
    async fn export_member(
        &self,
        lease: &Lease,
        track: &Track,
        range: ExportRange,
        folder: Option<&Path>,
    ) -> BridgeResult<String> {
        let naming = self.session.track_export_info(track.index).await?;
        let mut job = self.start_job(lease, |id| {
            let mut job = ExportJob::new(id, track.index, track.name.clone(), naming.suggested_filename);
            job.filename = Some(job.suggested_filename.clone());
            job
        })?;
        self.apply_preparation(lease, &mut job, range, false).await?;

        let filename = job.suggested_filename.clone();
        let result = self.drive(lease, job.id, &filename, folder).await;
        let recorded = self.record(job.id, &result);
        result?;
        recorded
            .filter(|j| j.state == ExportState::Completed)
            .map(|_| format!("{}.wav", filename))
            .ok_or(BridgeError::Cancelled)
    }

    /// Let Live finish writing before the next track
    async fn pause_between(&self, lease: &Lease) -> BridgeResult<()> {
        tokio::select! {
            _ = tokio::time::sleep(self.config.group_export_delay()) => lease.check(),
            _ = lease.cancel.notified() => Err(BridgeError::Cancelled),
        }
    }

    async fn run_dialogs(&self, job_id: u64, filename: &str, folder: Option<&Path>) -> BridgeResult<()> {
        self.act(UiAction::ActivateLive).await?;
        self.wait_for(UiElement::LiveFrontmost).await?;

        self.act(UiAction::OpenExportDialog).await?;
        self.wait_for(UiElement::ExportDialog).await?;

        self.act(UiAction::Confirm).await?;
        self.state
            .lock()
            .with_job(job_id, |job| {
                if let Err(e) = job.advance(ExportState::ExportTriggered) {
                    warn!("{}", e);
                }
            });
        self.wait_for(UiElement::SaveDialog).await?;

        if let Some(folder) = folder {
            self.act(UiAction::GoToFolder(folder.to_path_buf())).await?;
        }
        self.act(UiAction::TypeFilename(filename.to_string())).await?;
        self.act(UiAction::Confirm).await?;

        let dismissed = self
            .gui
            .wait_for_dismissal(
                &[UiElement::SaveDialog, UiElement::ExportDialog],
                self.config.dismissal_timeout(),
                self.config.poll_interval(),
            )
            .await?;
        if !dismissed {
            return Err(BridgeError::Automation(format!(
                "export dialogs still open after {} ms",
                self.config.dismissal_timeout_ms
            )));
        }
        Ok(())
    }

    async fn act(&self, action: UiAction) -> BridgeResult<()> {
        self.gui.invoke_action(&action).await?;
        tokio::time::sleep(self.config.settle_delay()).await;
        Ok(())
    }

    /// Bounded poll for a UI element
    async fn wait_for(&self, element: UiElement) -> BridgeResult<()> {
        for attempt in 1..=self.config.poll_attempts {
            if self.gui.locate_element(element).await? {
                debug!("found {} after {} poll(s)", element, attempt);
                return Ok(());
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
        Err(BridgeError::Automation(format!(
            "{} did not appear after {} polls",
            element, self.config.poll_attempts
        )))
    }

    async fn back_out(&self) {
        for _ in 0..ESCAPE_PRESSES {
            if let Err(e) = self.act(UiAction::Escape).await {
                warn!("could not dismiss dialog: {}", e);
                break;
            }
        }
    }

    /// Stop whatever holds Live and return the status afterwards. The job
    /// fails; Live's selection and loop are left as they are.
    pub fn cancel_export(&self) -> BridgeResult<ExportStatus> {
        {
            let mut state = self.state.lock();
            let active = state
                .active
                .take()
                .ok_or_else(|| BridgeError::InvalidState("no export is in progress".to_string()))?;
            active.cancel.notify_one();
            match active.job_id {
                Some(job_id) => {
                    state.with_job(job_id, |job| job.fail(&BridgeError::Cancelled));
                    warn!("🛑 Export job {} cancelled", job_id);
                },
                None => warn!("🛑 Export cancelled before a job started"),
            }
        }
        Ok(self.export_status())
    }

    pub fn export_status(&self) -> ExportStatus {
        let state = self.state.lock();
        ExportStatus {
            state: state.job.as_ref().map_or(ExportState::Idle, |j| j.state),
            busy: state.active.is_some(),
            platform: self.gui.platform(),
            platform_supported: self.gui.is_supported(),
            job: state.job.clone(),
        }
    }
}
