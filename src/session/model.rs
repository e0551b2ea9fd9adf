//! Snapshots of Live session state returned by the query layer

use serde::Serialize;

/// What a track is, as far as exporting goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Midi,
    Group,
}

impl TrackKind {
    pub fn from_flags(is_foldable: bool, has_midi_input: bool) -> Self {
        if is_foldable {
            TrackKind::Group
        } else if has_midi_input {
            TrackKind::Midi
        } else {
            TrackKind::Audio
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Midi => "midi",
            TrackKind::Group => "group",
        }
    }
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One track; indices are only meaningful within the running Live set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    pub index: u32,
    pub name: String,
    pub kind: TrackKind,
    pub muted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip_count: Option<usize>,
}

impl Track {
    pub fn is_group(&self) -> bool {
        self.kind == TrackKind::Group
    }
}

/// Arrangement clip position, in beats
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Clip {
    pub name: String,
    pub start_time: f64,
    pub length: f64,
}

impl Clip {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.length
    }
}

/// Loop region used as the export range
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExportRange {
    pub start_beats: f64,
    pub end_beats: f64,
}

impl ExportRange {
    pub fn new(start_beats: f64, length_beats: f64) -> Self {
        Self {
            start_beats,
            end_beats: start_beats + length_beats,
        }
    }

    /// Range spanning every clip, `None` without clips
    pub fn covering(clips: &[Clip]) -> Option<Self> {
        let start = clips.iter().map(|c| c.start_time).reduce(f64::min)?;
        let end = clips.iter().map(Clip::end_time).reduce(f64::max)?;
        Some(Self {
            start_beats: start,
            end_beats: end,
        })
    }

    pub fn length_beats(&self) -> f64 {
        self.end_beats - self.start_beats
    }

    pub fn duration_seconds(&self, tempo: f64) -> f64 {
        if tempo > 0.0 {
            self.length_beats() / tempo * 60.0
        } else {
            0.0
        }
    }
}

/// Track details including clips and grouping
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackInfo {
    #[serde(flatten)]
    pub track: Track,
    pub is_grouped: bool,
    pub group_index: Option<u32>,
    pub clips: Vec<Clip>,
    pub audio_start: Option<f64>,
    pub audio_end: Option<f64>,
}

impl TrackInfo {
    pub fn audio_range(&self) -> Option<ExportRange> {
        ExportRange::covering(&self.clips)
    }
}

/// Export range together with its wall-clock length at the current tempo
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeReport {
    #[serde(flatten)]
    pub range: ExportRange,
    pub length_beats: f64,
    pub tempo: f64,
    pub duration_seconds: f64,
}

impl RangeReport {
    pub fn new(range: ExportRange, tempo: f64) -> Self {
        Self {
            range,
            length_beats: range.length_beats(),
            tempo,
            duration_seconds: range.duration_seconds(tempo),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub tempo: Option<f64>,
    pub track_count: Option<u32>,
    pub message: String,
}

/// Naming information for a stem export
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportInfo {
    pub track_index: u32,
    pub track_name: String,
    pub group_name: Option<String>,
    pub key: Option<String>,
    pub bpm: Option<u32>,
    pub suggested_filename: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(start: f64, length: f64) -> Clip {
        Clip {
            name: String::new(),
            start_time: start,
            length,
        }
    }

    #[test]
    fn test_range_covers_unordered_clips() {
        // A long early clip can end after a later short one
        let clips = vec![clip(16.0, 4.0), clip(0.0, 32.0), clip(8.0, 4.0)];
        let range = ExportRange::covering(&clips).unwrap();
        assert_eq!(range.start_beats, 0.0);
        assert_eq!(range.end_beats, 32.0);
        assert!(ExportRange::covering(&[]).is_none());
    }

    #[test]
    fn test_duration_at_tempo() {
        let report = RangeReport::new(ExportRange::new(4.0, 64.0), 128.0);
        assert_eq!(report.range.end_beats, 68.0);
        assert_eq!(report.duration_seconds, 30.0);
        assert_eq!(ExportRange::new(0.0, 8.0).duration_seconds(0.0), 0.0);
    }

    #[test]
    fn test_kind_from_flags() {
        assert_eq!(TrackKind::from_flags(true, true), TrackKind::Group);
        assert_eq!(TrackKind::from_flags(false, true), TrackKind::Midi);
        assert_eq!(TrackKind::from_flags(false, false), TrackKind::Audio);
        assert_eq!(serde_json::to_value(TrackKind::Midi).unwrap(), "midi");
    }
}
