//! In-memory stand-ins for Live and the GUI used by unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::error::{BridgeError, BridgeResult};
use crate::export::{GuiAutomation, UiAction, UiElement};
use crate::osc::{OscArg, OscMessage, OscTransport};
use crate::session::Clip;

#[derive(Debug, Clone, Default)]
pub struct FakeTrack {
    pub name: String,
    pub foldable: bool,
    pub midi: bool,
    pub muted: bool,
    pub group: Option<u32>,
    pub clips: Vec<Clip>,
}

impl FakeTrack {
    pub fn audio(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn midi(name: &str) -> Self {
        Self {
            midi: true,
            ..Self::audio(name)
        }
    }

    pub fn group(name: &str) -> Self {
        Self {
            foldable: true,
            ..Self::audio(name)
        }
    }

    pub fn in_group(mut self, group: u32) -> Self {
        self.group = Some(group);
        self
    }

    pub fn muted(mut self) -> Self {
        self.muted = true;
        self
    }

    pub fn with_clip(mut self, name: &str, start_time: f64, length: f64) -> Self {
        self.clips.push(Clip {
            name: name.to_string(),
            start_time,
            length,
        });
        self
    }
}

struct FakeState {
    tracks: Vec<FakeTrack>,
    tempo: f64,
    loop_start: f64,
    loop_length: f64,
    selected: Option<i64>,
    reachable: bool,
    silent: HashSet<String>,
    malformed: HashSet<String>,
    sent: Vec<OscMessage>,
    queries: Vec<OscMessage>,
}

/// Scriptable AbletonOSC replacement speaking the same addresses
pub struct FakeLive {
    state: Mutex<FakeState>,
    yielding: bool,
}

impl FakeLive {
    pub fn new(tracks: Vec<FakeTrack>) -> Self {
        Self {
            state: Mutex::new(FakeState {
                tracks,
                tempo: 120.0,
                loop_start: 0.0,
                loop_length: 16.0,
                selected: None,
                reachable: true,
                silent: HashSet::new(),
                malformed: HashSet::new(),
                sent: Vec::new(),
                queries: Vec::new(),
            }),
            yielding: false,
        }
    }

    pub fn with_tempo(self, tempo: f64) -> Self {
        self.state.lock().tempo = tempo;
        self
    }

    /// Every call fails as if nothing listened on the port
    pub fn unreachable(self) -> Self {
        self.state.lock().reachable = false;
        self
    }

    /// Hand control back to the scheduler before every call, the way a
    /// real socket round trip would
    pub fn yielding(mut self) -> Self {
        self.yielding = true;
        self
    }

    /// Never answer this address
    pub fn silence(&self, address: &str) {
        self.state.lock().silent.insert(address.to_string());
    }

    /// Answer this address with an empty argument list
    pub fn corrupt(&self, address: &str) {
        self.state.lock().malformed.insert(address.to_string());
    }

    pub fn sent(&self) -> Vec<OscMessage> {
        self.state.lock().sent.clone()
    }

    pub fn query_count(&self, address: &str) -> usize {
        self.state
            .lock()
            .queries
            .iter()
            .filter(|q| q.address == address)
            .count()
    }

    pub fn loop_range(&self) -> (f64, f64) {
        let state = self.state.lock();
        (state.loop_start, state.loop_length)
    }

    pub fn selected(&self) -> Option<i64> {
        self.state.lock().selected
    }
}

fn index_arg(args: &[OscArg]) -> Option<usize> {
    args.first()
        .and_then(OscArg::as_i64)
        .and_then(|i| usize::try_from(i).ok())
}

fn float_arg(args: &[OscArg]) -> Option<f64> {
    args.first().and_then(OscArg::as_f64)
}

#[async_trait]
impl OscTransport for FakeLive {
    async fn query(&self, address: &str, args: Vec<OscArg>) -> BridgeResult<Vec<OscArg>> {
        if self.yielding {
            tokio::task::yield_now().await;
        }
        let mut state = self.state.lock();
        if !state.reachable {
            return Err(BridgeError::Connection("nothing is listening".into()));
        }
        state.queries.push(OscMessage::new(address, args.clone()));

        let timeout = || BridgeError::Timeout {
            address: address.to_string(),
            timeout_ms: 2000,
        };
        if state.silent.contains(address) {
            return Err(timeout());
        }
        if state.malformed.contains(address) {
            return Ok(vec![]);
        }

        let reply = match address {
            "/live/test" => vec![OscArg::Str("ok".into())],
            "/live/song/get/num_tracks" => vec![OscArg::Int(state.tracks.len() as i32)],
            "/live/song/get/tempo" => vec![OscArg::Float(state.tempo as f32)],
            "/live/song/get/loop_start" => vec![OscArg::Float(state.loop_start as f32)],
            "/live/song/get/loop_length" => vec![OscArg::Float(state.loop_length as f32)],
            _ => {
                // Track queries; AbletonOSC raises on bad indices and never replies
                let track = index_arg(&args)
                    .and_then(|i| state.tracks.get(i))
                    .ok_or_else(timeout)?;
                match address {
                    "/live/track/get/name" => vec![OscArg::Str(track.name.clone())],
                    "/live/track/get/is_foldable" => vec![OscArg::Bool(track.foldable)],
                    "/live/track/get/has_midi_input" => vec![OscArg::Bool(track.midi)],
                    "/live/track/get/mute" => vec![OscArg::Int(i32::from(track.muted))],
                    "/live/track/get/is_grouped" => vec![OscArg::Bool(track.group.is_some())],
                    "/live/track/get/group_track" => match track.group {
                        Some(g) => vec![OscArg::Int(g as i32)],
                        None => vec![OscArg::Nil],
                    },
                    "/live/track/get/arrangement_clips/name" => {
                        track.clips.iter().map(|c| OscArg::Str(c.name.clone())).collect()
                    },
                    "/live/track/get/arrangement_clips/start_time" => track
                        .clips
                        .iter()
                        .map(|c| OscArg::Float(c.start_time as f32))
                        .collect(),
                    "/live/track/get/arrangement_clips/length" => track
                        .clips
                        .iter()
                        .map(|c| OscArg::Float(c.length as f32))
                        .collect(),
                    _ => return Err(timeout()),
                }
            },
        };
        Ok(reply)
    }

    async fn send(&self, address: &str, args: Vec<OscArg>) -> BridgeResult<()> {
        if self.yielding {
            tokio::task::yield_now().await;
        }
        let mut state = self.state.lock();
        if !state.reachable {
            return Err(BridgeError::Connection("nothing is listening".into()));
        }
        match address {
            "/live/view/set/selected_track" => state.selected = args.first().and_then(OscArg::as_i64),
            "/live/song/set/loop_start" => {
                state.loop_start = float_arg(&args).unwrap_or(state.loop_start)
            },
            "/live/song/set/loop_length" => {
                state.loop_length = float_arg(&args).unwrap_or(state.loop_length)
            },
            _ => {},
        }
        state.sent.push(OscMessage::new(address, args));
        Ok(())
    }
}

/// A small arrangement: one group with two children plus a clipless track
pub fn demo_set() -> Vec<FakeTrack> {
    vec![
        FakeTrack::group("Amin - 143bpm"),
        FakeTrack::audio("Bass 1")
            .in_group(0)
            .with_clip("bass a", 0.0, 16.0)
            .with_clip("bass b", 32.0, 32.0),
        FakeTrack::midi("Lead").in_group(0).with_clip("lead", 8.0, 8.0),
        FakeTrack::audio("Empty").muted(),
    ]
}

#[derive(Default)]
struct FakeScreen {
    live_front: bool,
    export_open: bool,
    save_open: bool,
    actions: Vec<UiAction>,
}

/// Simulated Live window stack; the render finishes as soon as the save
/// dialog is confirmed
pub struct FakeAutomation {
    permitted: bool,
    missing: Option<UiElement>,
    gate: Option<Arc<Notify>>,
    rejected: Option<String>,
    screen: Mutex<FakeScreen>,
}

impl FakeAutomation {
    pub fn new() -> Self {
        Self {
            permitted: true,
            missing: None,
            gate: None,
            rejected: None,
            screen: Mutex::new(FakeScreen::default()),
        }
    }

    /// Accessibility access is missing
    pub fn denied(mut self) -> Self {
        self.permitted = false;
        self
    }

    /// This element never shows up
    pub fn without(mut self, element: UiElement) -> Self {
        self.missing = Some(element);
        self
    }

    /// Opening the export dialog blocks until the gate is notified
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Typing this file name fails, as if the keystrokes went nowhere
    pub fn rejecting(mut self, filename: &str) -> Self {
        self.rejected = Some(filename.to_string());
        self
    }

    pub fn actions(&self) -> Vec<UiAction> {
        self.screen.lock().actions.clone()
    }

    pub fn count(&self, action: &UiAction) -> usize {
        self.screen.lock().actions.iter().filter(|a| *a == action).count()
    }

    fn shows(&self, element: UiElement) -> bool {
        self.missing != Some(element)
    }
}

impl Default for FakeAutomation {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GuiAutomation for FakeAutomation {
    fn is_supported(&self) -> bool {
        true
    }

    fn platform(&self) -> String {
        "fake".to_string()
    }

    async fn check_permission(&self) -> BridgeResult<()> {
        if self.permitted {
            Ok(())
        } else {
            Err(BridgeError::PermissionDenied("accessibility disabled".into()))
        }
    }

    async fn locate_element(&self, element: UiElement) -> BridgeResult<bool> {
        let screen = self.screen.lock();
        Ok(match element {
            UiElement::LiveFrontmost => screen.live_front,
            UiElement::ExportDialog => screen.export_open,
            UiElement::SaveDialog => screen.save_open,
        })
    }

    async fn invoke_action(&self, action: &UiAction) -> BridgeResult<()> {
        if *action == UiAction::OpenExportDialog {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
        }

        let mut screen = self.screen.lock();
        screen.actions.push(action.clone());
        match action {
            UiAction::ActivateLive => screen.live_front = self.shows(UiElement::LiveFrontmost),
            UiAction::OpenExportDialog => screen.export_open = self.shows(UiElement::ExportDialog),
            UiAction::Confirm => {
                if screen.save_open {
                    screen.save_open = false;
                    screen.export_open = false;
                } else if screen.export_open {
                    screen.save_open = self.shows(UiElement::SaveDialog);
                }
            },
            UiAction::TypeFilename(_) if !screen.save_open => {
                return Err(BridgeError::Automation("not in the Save dialog".into()));
            },
            UiAction::TypeFilename(name) if self.rejected.as_ref() == Some(name) => {
                return Err(BridgeError::Automation(format!("could not type '{}'", name)));
            },
            UiAction::Escape => {
                if screen.save_open {
                    screen.save_open = false;
                } else {
                    screen.export_open = false;
                }
            },
            UiAction::TypeFilename(_) | UiAction::GoToFolder(_) => {},
        }
        Ok(())
    }
}

/// A group whose children cover every skip rule, plus one track outside it
pub fn band_set() -> Vec<FakeTrack> {
    vec![
        FakeTrack::group("Dmin 120bpm"),
        FakeTrack::audio("Kick").in_group(0).with_clip("kick", 0.0, 16.0),
        FakeTrack::audio("Pad").in_group(0).muted().with_clip("pad", 0.0, 96.0),
        FakeTrack::audio("Sketch").in_group(0),
        FakeTrack::group("FX").in_group(0),
        FakeTrack::audio("Riser").in_group(4).with_clip("riser", 60.0, 4.0),
        FakeTrack::midi("Bass").in_group(0).with_clip("bass", 16.0, 48.0),
        FakeTrack::audio("Vocal").with_clip("vox", 0.0, 8.0),
    ]
}
