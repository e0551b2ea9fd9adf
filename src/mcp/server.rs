use schemars::JsonSchema;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use super::params::{
    parse, ExportGroupParams, ExportParams, FindTrackParams, ListTracksParams, NoParams,
    SetExportRangeParams, TrackIndexParams,
};
use crate::context::BridgeContext;
use crate::error::{BridgeError, BridgeResult};
use crate::session::validate_range;

/// One entry of `tools/list`
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

fn schema_value<T: JsonSchema>() -> Value {
    let root = schemars::schema_for!(T);
    serde_json::to_value(root).unwrap_or_else(|_| json!({ "type": "object", "properties": {} }))
}

fn tool<T: JsonSchema>(name: &'static str, description: &'static str) -> ToolDefinition {
    ToolDefinition {
        name,
        description,
        input_schema: schema_value::<T>(),
    }
}

/// Every tool this server offers
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        tool::<NoParams>(
            "test_connection",
            "Check that Ableton Live is running with AbletonOSC enabled; reports tempo and track count.",
        ),
        tool::<ListTracksParams>(
            "list_tracks",
            "List every track of the Live set in order, with kind (audio/midi/group) and mute state.",
        ),
        tool::<NoParams>("list_groups", "List the group tracks of the Live set."),
        tool::<TrackIndexParams>(
            "get_track_info",
            "Details for one track: arrangement clips, parent group and the beat range its audio covers.",
        ),
        tool::<FindTrackParams>(
            "find_track",
            "Find tracks whose name contains the given text, in track order.",
        ),
        tool::<TrackIndexParams>(
            "select_track_by_index",
            "Select a track in Live's window.",
        ),
        tool::<SetExportRangeParams>(
            "set_export_range",
            "Set Live's loop region (start and length in beats); exports render this region.",
        ),
        tool::<TrackIndexParams>(
            "prepare_track_for_export",
            "Select a track and set the loop region to cover all of its arrangement clips.",
        ),
        tool::<ExportParams>(
            "export_selected_track",
            "Export the prepared track through Live's Export Audio/Video dialog (macOS only, needs Accessibility permission).",
        ),
        tool::<ExportGroupParams>(
            "export_group",
            "Export every unmuted track with arrangement clips inside a group, one file per track, over the group's full clip range (macOS only).",
        ),
        tool::<TrackIndexParams>(
            "get_track_export_info",
            "Suggested stem file name for a track, with key and BPM parsed from its group or track name.",
        ),
        tool::<NoParams>(
            "export_status",
            "State of the current export job and whether this platform can export.",
        ),
        tool::<NoParams>(
            "cancel_export",
            "Cancel the running export. Live's selection and loop region are not restored.",
        ),
    ]
}

/// MCP tool handler for the Ableton bridge
pub struct AbletonMcp {
    ctx: Arc<BridgeContext>,
}

impl AbletonMcp {
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self { ctx }
    }

    pub fn list_tools() -> Value {
        json!({ "tools": tool_definitions() })
    }

    pub fn has_tool(name: &str) -> bool {
        tool_definitions().iter().any(|t| t.name == name)
    }

    /// Validate arguments and run one tool
    pub async fn call_tool(&self, name: &str, args: &Value) -> BridgeResult<Value> {
        let session = self.ctx.session();
        let sequencer = self.ctx.sequencer();

        match name {
            "test_connection" => {
                parse::<NoParams>(args)?;
                to_json(session.test_connection().await?)
            },
            "list_tracks" => {
                let params: ListTracksParams = parse(args)?;
                let tracks = session.list_tracks(params.include_clips).await?;
                Ok(json!({ "count": tracks.len(), "tracks": tracks }))
            },
            "list_groups" => {
                parse::<NoParams>(args)?;
                let groups = session.list_groups().await?;
                Ok(json!({ "count": groups.len(), "groups": groups }))
            },
            "get_track_info" => {
                let index = parse::<TrackIndexParams>(args)?.index()?;
                to_json(session.get_track_info(index).await?)
            },
            "find_track" => {
                let params: FindTrackParams = parse(args)?;
                params.validate()?;
                let matches = session.find_track(&params.text, params.case_insensitive).await?;
                Ok(json!({ "query": params.text, "count": matches.len(), "matches": matches }))
            },
            "select_track_by_index" => {
                let index = parse::<TrackIndexParams>(args)?.index()?;
                let track = sequencer.select_track(index).await?;
                Ok(json!({ "selected": track }))
            },
            "set_export_range" => {
                let params: SetExportRangeParams = parse(args)?;
                validate_range(params.start_beats, params.length_beats)?;
                to_json(sequencer.set_export_range(params.start_beats, params.length_beats).await?)
            },
            "prepare_track_for_export" => {
                let index = parse::<TrackIndexParams>(args)?.index()?;
                to_json(sequencer.prepare_track_for_export(index).await?)
            },
            "export_selected_track" => {
                let request = parse::<ExportParams>(args)?.into_request()?;
                to_json(sequencer.export_selected_track(request).await?)
            },
            "export_group" => {
                let request = parse::<ExportGroupParams>(args)?.into_request()?;
                to_json(sequencer.export_group(request).await?)
            },
            "get_track_export_info" => {
                let index = parse::<TrackIndexParams>(args)?.index()?;
                to_json(session.track_export_info(index).await?)
            },
            "export_status" => {
                parse::<NoParams>(args)?;
                to_json(sequencer.export_status())
            },
            "cancel_export" => {
                parse::<NoParams>(args)?;
                to_json(sequencer.cancel_export()?)
            },
            _ => Err(BridgeError::InvalidArgument(format!("unknown tool '{}'", name))),
        }
    }

    /// Run a tool and wrap the outcome as an MCP tool result. Failures are
    /// reported in-band with `isError` so the assistant can read them.
    pub async fn handle_tool_call(&self, name: &str, args: &Value) -> Value {
        debug!("🔧 tools/call {} {}", name, args);
        let (payload, is_error) = match self.call_tool(name, args).await {
            Ok(value) => (value, false),
            Err(e) => {
                warn!("Tool {} failed: {}", name, e);
                (json!({ "error": e.report() }), true)
            },
        };
        json!({
            "content": [{
                "type": "text",
                "text": serde_json::to_string_pretty(&payload).unwrap_or_default()
            }],
            "isError": is_error
        })
    }
}

fn to_json<T: Serialize>(value: T) -> BridgeResult<Value> {
    serde_json::to_value(value).map_err(|e| BridgeError::Protocol(format!("cannot encode result: {}", e)))
}
