//! Tool parameter structs. Their JSON schemas are generated with schemars
//! and published through `tools/list`; doc comments become descriptions.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

use crate::error::{BridgeError, BridgeResult};
use crate::export::{ExportRequest, GroupExportRequest};

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct NoParams {}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListTracksParams {
    /// Also count arrangement clips on each track (one extra query per track)
    #[serde(default, alias = "include_clip_counts")]
    pub include_clips: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TrackIndexParams {
    /// Zero-based track index as shown by list_tracks
    pub track_index: i64,
}

impl TrackIndexParams {
    pub fn index(&self) -> BridgeResult<u32> {
        track_index(self.track_index)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FindTrackParams {
    /// Text to look for inside track names
    #[serde(alias = "search", alias = "query")]
    pub text: String,
    /// Ignore letter case (default true)
    #[serde(default = "default_true")]
    pub case_insensitive: bool,
}

impl FindTrackParams {
    pub fn validate(&self) -> BridgeResult<()> {
        if self.text.trim().is_empty() {
            return Err(BridgeError::InvalidArgument("search text must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetExportRangeParams {
    /// Loop start in beats
    pub start_beats: f64,
    /// Loop length in beats, greater than zero
    pub length_beats: f64,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ExportParams {
    /// Prepare this track before exporting; omit to export the prepared track
    pub track_index: Option<i64>,
    /// File name without extension; defaults to `<track>_<key>_<bpm>bpm`
    pub filename: Option<String>,
    /// Folder to save into; defaults to the configured folder or Live's last one
    pub output_folder: Option<String>,
}

impl ExportParams {
    pub fn into_request(self) -> BridgeResult<ExportRequest> {
        Ok(ExportRequest {
            track_index: self.track_index.map(track_index).transpose()?,
            filename: self.filename,
            output_folder: output_folder(self.output_folder)?,
        })
    }
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ExportGroupParams {
    /// Part of the group's name, case-insensitive; the first matching group is used
    #[serde(alias = "group_name")]
    pub group: String,
    /// Folder to save into; defaults to the configured folder or Live's last one
    pub output_folder: Option<String>,
}

impl ExportGroupParams {
    pub fn into_request(self) -> BridgeResult<GroupExportRequest> {
        if self.group.trim().is_empty() {
            return Err(BridgeError::InvalidArgument("group name must not be empty".into()));
        }
        Ok(GroupExportRequest {
            group: self.group,
            output_folder: output_folder(self.output_folder)?,
        })
    }
}

/// Blank means unset; anything else must be absolute
fn output_folder(raw: Option<String>) -> BridgeResult<Option<PathBuf>> {
    match raw {
        Some(folder) if folder.trim().is_empty() => Ok(None),
        Some(folder) => {
            let path = PathBuf::from(folder);
            if !path.is_absolute() {
                return Err(BridgeError::InvalidArgument(format!(
                    "output_folder must be an absolute path, got {}",
                    path.display()
                )));
            }
            Ok(Some(path))
        },
        None => Ok(None),
    }
}

fn default_true() -> bool {
    true
}

pub fn track_index(raw: i64) -> BridgeResult<u32> {
    u32::try_from(raw).map_err(|_| {
        BridgeError::InvalidArgument(format!(
            "track_index must be a non-negative integer, got {}",
            raw
        ))
    })
}

/// Deserialize tool arguments; a missing or null argument object counts as `{}`
pub fn parse<T: DeserializeOwned>(args: &Value) -> BridgeResult<T> {
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args.clone()
    };
    serde_json::from_value(args).map_err(|e| BridgeError::InvalidArgument(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_negative_index_is_rejected() {
        let params: TrackIndexParams = parse(&json!({ "track_index": -1 })).unwrap();
        assert!(matches!(params.index(), Err(BridgeError::InvalidArgument(_))));

        let params: TrackIndexParams = parse(&json!({ "track_index": 3 })).unwrap();
        assert_eq!(params.index().unwrap(), 3);
    }

    #[test]
    fn test_wrong_types_are_invalid_arguments() {
        let err = parse::<TrackIndexParams>(&json!({ "track_index": "two" })).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));
        let err = parse::<TrackIndexParams>(&json!({})).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));
    }

    #[test]
    fn test_defaults_and_aliases() {
        let params: ListTracksParams = parse(&Value::Null).unwrap();
        assert!(!params.include_clips);
        let params: ListTracksParams = parse(&json!({ "include_clip_counts": true })).unwrap();
        assert!(params.include_clips);

        let params: FindTrackParams = parse(&json!({ "search": "bass" })).unwrap();
        assert_eq!(params.text, "bass");
        assert!(params.case_insensitive);
        let params: FindTrackParams = parse(&json!({ "text": "  " })).unwrap();
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_export_params_to_request() {
        let request = parse::<ExportParams>(&json!({ "track_index": 2, "output_folder": "/tmp/stems" }))
            .unwrap()
            .into_request()
            .unwrap();
        assert_eq!(request.track_index, Some(2));
        assert_eq!(request.output_folder, Some(PathBuf::from("/tmp/stems")));

        let err = parse::<ExportParams>(&json!({ "output_folder": "stems" }))
            .unwrap()
            .into_request()
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));
    }

    #[test]
    fn test_export_group_params() {
        let request = parse::<ExportGroupParams>(&json!({ "group_name": "Amin", "output_folder": "" }))
            .unwrap()
            .into_request()
            .unwrap();
        assert_eq!(request.group, "Amin");
        assert_eq!(request.output_folder, None);

        let err = parse::<ExportGroupParams>(&json!({ "group": " " }))
            .unwrap()
            .into_request()
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));
        assert!(parse::<ExportGroupParams>(&json!({})).is_err());
    }

    #[test]
    fn test_schema_lists_required_fields() {
        let schema = serde_json::to_value(schemars::schema_for!(SetExportRangeParams)).unwrap();
        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("start_beats")));
        assert!(required.contains(&json!("length_beats")));
        assert_eq!(schema["properties"]["start_beats"]["description"], "Loop start in beats");
    }
}
