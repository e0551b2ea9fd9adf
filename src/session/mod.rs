//! Typed Live session queries built on the OSC transport
//!
//! AbletonOSC has no batch query, so every snapshot costs N+1 round trips.
//! Each operation either returns a complete snapshot or an error; partial
//! results never escape.

mod model;
pub mod naming;

use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{BridgeError, BridgeResult};
use crate::osc::{OscArg, OscTransport};

pub use model::{
    Clip, ConnectionStatus, ExportInfo, ExportRange, RangeReport, Track, TrackInfo, TrackKind,
};
pub use naming::{parse_key_and_bpm, sanitize_filename, suggested_filename};

/// Query and control operations against the running Live set
#[derive(Clone)]
pub struct Session {
    osc: Arc<dyn OscTransport>,
}

impl Session {
    pub fn new(osc: Arc<dyn OscTransport>) -> Self {
        Self { osc }
    }

    /// Probe AbletonOSC. An unreachable surface is reported, not raised.
    pub async fn test_connection(&self) -> BridgeResult<ConnectionStatus> {
        match self.osc.query("/live/test", vec![]).await {
            Ok(_) => {},
            Err(e) if e.is_unreachable() => {
                debug!("connection test failed: {}", e);
                return Ok(ConnectionStatus {
                    connected: false,
                    tempo: None,
                    track_count: None,
                    message: format!(
                        "Could not connect ({}). Make sure Ableton Live is running with AbletonOSC enabled.",
                        e
                    ),
                });
            },
            Err(e) => return Err(e),
        }

        let (tempo, count) = tokio::try_join!(self.tempo(), self.track_count())?;
        Ok(ConnectionStatus {
            connected: true,
            tempo: Some(tempo),
            track_count: Some(count),
            message: format!(
                "Connected to Ableton Live. Tempo: {} BPM, Tracks: {}",
                tempo, count
            ),
        })
    }

    pub async fn tempo(&self) -> BridgeResult<f64> {
        let reply = self.osc.query("/live/song/get/tempo", vec![]).await?;
        float_at("/live/song/get/tempo", &reply, 0)
    }

    pub async fn track_count(&self) -> BridgeResult<u32> {
        let address = "/live/song/get/num_tracks";
        let reply = self.osc.query(address, vec![]).await?;
        let count = int_at(address, &reply, 0)?;
        u32::try_from(count).map_err(|_| malformed(address, &reply))
    }

    /// All tracks in index order
    pub async fn list_tracks(&self, include_clip_counts: bool) -> BridgeResult<Vec<Track>> {
        let count = self.track_count().await?;
        let mut tracks = Vec::with_capacity(count as usize);
        for index in 0..count {
            let mut track = self.fetch_track(index).await?;
            if include_clip_counts {
                track.clip_count = Some(if track.is_group() {
                    0
                } else {
                    self.clip_names(index).await?.len()
                });
            }
            tracks.push(track);
        }
        debug!("listed {} tracks", tracks.len());
        Ok(tracks)
    }

    pub async fn list_groups(&self) -> BridgeResult<Vec<Track>> {
        let tracks = self.list_tracks(false).await?;
        Ok(tracks.into_iter().filter(Track::is_group).collect())
    }

    pub async fn get_track_info(&self, index: u32) -> BridgeResult<TrackInfo> {
        self.ensure_index(index).await?;
        self.track_info(index).await
    }

    /// First group whose name contains `name`, ignoring case
    pub async fn find_group(&self, name: &str) -> BridgeResult<Track> {
        let groups = self.list_groups().await?;
        let needle = name.to_lowercase();
        if let Some(group) = groups.iter().find(|g| g.name.to_lowercase().contains(&needle)) {
            return Ok(group.clone());
        }

        let available: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        Err(BridgeError::NotFound(if available.is_empty() {
            format!("no group matches '{}': the Live set has no groups", name)
        } else {
            format!(
                "no group matches '{}'; available groups: {}",
                name,
                available.join(", ")
            )
        }))
    }

    /// Direct children of a group track in index order. Nested groups are
    /// returned as members; their own children are not.
    pub async fn group_members(&self, group_index: u32) -> BridgeResult<Vec<TrackInfo>> {
        let count = self.ensure_index(group_index).await?;
        let mut members = Vec::new();
        for index in 0..count {
            if index == group_index {
                continue;
            }
            if self.grouping(index).await?.1 == Some(group_index) {
                members.push(self.track_info(index).await?);
            }
        }
        debug!("group {} has {} member(s)", group_index, members.len());
        Ok(members)
    }

    async fn track_info(&self, index: u32) -> BridgeResult<TrackInfo> {
        let track = self.fetch_track(index).await?;
        let (is_grouped, group_index) = self.grouping(index).await?;
        // Group tracks hold no arrangement clips of their own
        let clips = if track.is_group() {
            Vec::new()
        } else {
            self.arrangement_clips(index).await?
        };
        let range = ExportRange::covering(&clips);

        Ok(TrackInfo {
            track: Track {
                clip_count: Some(clips.len()),
                ..track
            },
            is_grouped,
            group_index,
            audio_start: range.map(|r| r.start_beats),
            audio_end: range.map(|r| r.end_beats),
            clips,
        })
    }

    /// Tracks whose name contains `text`, in track order
    pub async fn find_track(&self, text: &str, case_insensitive: bool) -> BridgeResult<Vec<Track>> {
        let tracks = self.list_tracks(false).await?;
        let needle = if case_insensitive {
            text.to_lowercase()
        } else {
            text.to_string()
        };
        Ok(tracks
            .into_iter()
            .filter(|t| {
                if case_insensitive {
                    t.name.to_lowercase().contains(&needle)
                } else {
                    t.name.contains(&needle)
                }
            })
            .collect())
    }

    /// Select a track in Live's UI and return what was selected
    pub async fn select_track(&self, index: u32) -> BridgeResult<Track> {
        self.ensure_index(index).await?;
        let track = self.fetch_track(index).await?;
        self.osc
            .send("/live/view/set/selected_track", vec![index.into()])
            .await?;
        info!("🎚️ Selected track {}: {}", index, track.name);
        Ok(track)
    }

    /// Set Live's loop region, which the export dialog renders
    pub async fn set_export_range(&self, start_beats: f64, length_beats: f64) -> BridgeResult<RangeReport> {
        validate_range(start_beats, length_beats)?;
        let tempo = self.tempo().await?;
        self.osc
            .send("/live/song/set/loop_start", vec![start_beats.into()])
            .await?;
        self.osc
            .send("/live/song/set/loop_length", vec![length_beats.into()])
            .await?;

        let report = RangeReport::new(ExportRange::new(start_beats, length_beats), tempo);
        info!(
            "🔁 Export range {:.1} - {:.1} beats ({:.1}s at {:.0} BPM)",
            report.range.start_beats, report.range.end_beats, report.duration_seconds, tempo
        );
        Ok(report)
    }

    /// Current loop region
    pub async fn get_export_range(&self) -> BridgeResult<RangeReport> {
        let (start, length, tempo) = tokio::try_join!(
            self.osc.query("/live/song/get/loop_start", vec![]),
            self.osc.query("/live/song/get/loop_length", vec![]),
            self.tempo(),
        )?;
        let start = float_at("/live/song/get/loop_start", &start, 0)?;
        let length = float_at("/live/song/get/loop_length", &length, 0)?;
        Ok(RangeReport::new(ExportRange::new(start, length), tempo))
    }

    /// Arrangement clips of one track, in Live's order
    pub async fn arrangement_clips(&self, index: u32) -> BridgeResult<Vec<Clip>> {
        let key = vec![OscArg::from(index)];
        let (names, starts, lengths) = tokio::try_join!(
            self.clip_names(index),
            self.osc
                .query("/live/track/get/arrangement_clips/start_time", key.clone()),
            self.osc.query("/live/track/get/arrangement_clips/length", key),
        )?;

        if starts.len() != names.len() || lengths.len() != names.len() {
            return Err(BridgeError::Protocol(format!(
                "track {} reported {} clip names, {} start times and {} lengths",
                index,
                names.len(),
                starts.len(),
                lengths.len()
            )));
        }

        names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                Ok(Clip {
                    name,
                    start_time: float_at("/live/track/get/arrangement_clips/start_time", &starts, i)?,
                    length: float_at("/live/track/get/arrangement_clips/length", &lengths, i)?,
                })
            })
            .collect()
    }

    /// Naming info for exporting a track: group hints win over track hints,
    /// and Live's tempo fills in a missing BPM
    pub async fn track_export_info(&self, index: u32) -> BridgeResult<ExportInfo> {
        self.ensure_index(index).await?;
        let track_name = self.track_name(index).await?;
        let (_, group_index) = self.grouping(index).await?;

        let mut group_name = None;
        let (mut key, mut bpm) = (None, None);
        if let Some(group) = group_index {
            let name = self.track_name(group).await?;
            (key, bpm) = parse_key_and_bpm(&name);
            group_name = Some(name);
        }
        if key.is_none() || bpm.is_none() {
            let (track_key, track_bpm) = parse_key_and_bpm(&track_name);
            key = key.or(track_key);
            bpm = bpm.or(track_bpm);
        }
        if bpm.is_none() {
            bpm = Some(self.tempo().await?.trunc() as u32);
        }

        let suggested_filename = suggested_filename(&track_name, key.as_deref(), bpm);
        Ok(ExportInfo {
            track_index: index,
            track_name,
            group_name,
            key,
            bpm,
            suggested_filename,
        })
    }

    async fn ensure_index(&self, index: u32) -> BridgeResult<u32> {
        let count = self.track_count().await?;
        if index >= count {
            return Err(if count == 0 {
                BridgeError::NotFound(format!("track {} not found: the Live set has no tracks", index))
            } else {
                BridgeError::NotFound(format!(
                    "track {} not found: valid indices are 0-{}",
                    index,
                    count - 1
                ))
            });
        }
        Ok(count)
    }

    async fn fetch_track(&self, index: u32) -> BridgeResult<Track> {
        let key = || vec![OscArg::from(index)];
        let (name, foldable, midi, mute) = tokio::try_join!(
            self.track_name(index),
            self.osc.query("/live/track/get/is_foldable", key()),
            self.osc.query("/live/track/get/has_midi_input", key()),
            self.osc.query("/live/track/get/mute", key()),
        )?;

        Ok(Track {
            index,
            name,
            kind: TrackKind::from_flags(
                bool_at("/live/track/get/is_foldable", &foldable)?,
                bool_at("/live/track/get/has_midi_input", &midi)?,
            ),
            muted: bool_at("/live/track/get/mute", &mute)?,
            clip_count: None,
        })
    }

    async fn track_name(&self, index: u32) -> BridgeResult<String> {
        let address = "/live/track/get/name";
        let reply = self.osc.query(address, vec![index.into()]).await?;
        reply
            .first()
            .and_then(OscArg::as_str)
            .map(str::to_string)
            .ok_or_else(|| malformed(address, &reply))
    }

    /// `(is_grouped, parent group index)`
    async fn grouping(&self, index: u32) -> BridgeResult<(bool, Option<u32>)> {
        let address = "/live/track/get/is_grouped";
        let reply = self.osc.query(address, vec![index.into()]).await?;
        if !bool_at(address, &reply)? {
            return Ok((false, None));
        }

        let address = "/live/track/get/group_track";
        let reply = self.osc.query(address, vec![index.into()]).await?;
        // AbletonOSC answers nil (or a negative index) for top-level tracks
        let group = match reply.first() {
            Some(OscArg::Nil) => None,
            Some(arg) => match arg.as_i64() {
                Some(i) => u32::try_from(i).ok(),
                None => return Err(malformed(address, &reply)),
            },
            None => return Err(malformed(address, &reply)),
        };
        Ok((true, group))
    }

    async fn clip_names(&self, index: u32) -> BridgeResult<Vec<String>> {
        let address = "/live/track/get/arrangement_clips/name";
        let reply = self.osc.query(address, vec![index.into()]).await?;
        reply
            .iter()
            .map(|arg| match arg {
                OscArg::Str(s) => Ok(s.clone()),
                OscArg::Nil => Ok(String::new()),
                _ => Err(malformed(address, &reply)),
            })
            .collect()
    }
}

pub(crate) fn validate_range(start_beats: f64, length_beats: f64) -> BridgeResult<()> {
    if !start_beats.is_finite() || start_beats < 0.0 {
        return Err(BridgeError::InvalidArgument(format!(
            "start must be a finite, non-negative beat position, got {}",
            start_beats
        )));
    }
    if !length_beats.is_finite() || length_beats <= 0.0 {
        return Err(BridgeError::InvalidArgument(format!(
            "length must be a positive number of beats, got {}",
            length_beats
        )));
    }
    Ok(())
}

fn malformed(address: &str, reply: &[OscArg]) -> BridgeError {
    let args: Vec<String> = reply.iter().map(|a| a.to_string()).collect();
    BridgeError::Protocol(format!("{} answered [{}]", address, args.join(", ")))
}

fn int_at(address: &str, reply: &[OscArg], i: usize) -> BridgeResult<i64> {
    reply
        .get(i)
        .and_then(OscArg::as_i64)
        .ok_or_else(|| malformed(address, reply))
}

fn float_at(address: &str, reply: &[OscArg], i: usize) -> BridgeResult<f64> {
    reply
        .get(i)
        .and_then(OscArg::as_f64)
        .ok_or_else(|| malformed(address, reply))
}

fn bool_at(address: &str, reply: &[OscArg]) -> BridgeResult<bool> {
    reply
        .first()
        .and_then(OscArg::as_bool)
        .ok_or_else(|| malformed(address, reply))
}
