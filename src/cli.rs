//! One-shot command-line access to the same operations the MCP tools expose
//!
//! Handy for checking a Live set before wiring up an assistant. Output is
//! for humans (colored); the process exit code tells scripts what happened.

use clap::Subcommand;
use colored::*;
use std::path::PathBuf;

use crate::context::BridgeContext;
use crate::error::{BridgeError, BridgeResult};
use crate::export::{ExportJob, ExportOutcome, ExportRequest, GroupExportOutcome, GroupExportRequest};
use crate::mcp::params::track_index;
use crate::session::{validate_range, ConnectionStatus, ExportInfo, RangeReport, Track, TrackInfo};

pub const EXIT_OK: u8 = 0;
pub const EXIT_ERROR: u8 = 1;
pub const EXIT_UNREACHABLE: u8 = 2;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum ToolCommand {
    /// Check the connection to AbletonOSC
    Status,
    /// List all tracks
    Tracks {
        /// Also count arrangement clips per track
        #[arg(long)]
        clips: bool,
    },
    /// List group tracks
    Groups,
    /// Show clips, group and audio range of one track
    Info { index: i64 },
    /// Find tracks by name
    Find {
        text: String,
        #[arg(long)]
        case_sensitive: bool,
    },
    /// Select a track in Live
    Select { index: i64 },
    /// Show or set the loop region used for export (beats)
    Range {
        #[arg(requires = "length")]
        start: Option<f64>,
        #[arg(allow_negative_numbers = true)]
        length: Option<f64>,
    },
    /// Select a track and fit the loop region to its clips
    Prepare { index: i64 },
    /// Show the suggested stem file name for a track
    ExportInfo { index: i64 },
    /// Prepare a track and export it through Live's export dialog (macOS)
    Export {
        /// Track to export; each run starts from a fresh session, so there is
        /// no prepared job to fall back on
        #[arg(long)]
        track: i64,
        /// File name without extension
        #[arg(long)]
        filename: Option<String>,
        /// Absolute folder to save into
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Export every unmuted track with clips inside a group (macOS)
    ExportGroup {
        /// Part of the group's name, case-insensitive
        group: String,
        /// Absolute folder to save into
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

/// Run one command and return the process exit code
pub async fn run(ctx: &BridgeContext, command: ToolCommand) -> u8 {
    match execute(ctx, command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), format_error(&e));
            exit_code_for(&e)
        },
    }
}

pub fn exit_code_for(err: &BridgeError) -> u8 {
    if err.is_unreachable() {
        EXIT_UNREACHABLE
    } else {
        EXIT_ERROR
    }
}

async fn execute(ctx: &BridgeContext, command: ToolCommand) -> BridgeResult<u8> {
    let session = ctx.session();
    match command {
        ToolCommand::Status => {
            let status = session.test_connection().await?;
            println!("{}", format_status(&status));
            return Ok(if status.connected { EXIT_OK } else { EXIT_UNREACHABLE });
        },
        ToolCommand::Tracks { clips } => {
            let tracks = session.list_tracks(clips).await?;
            println!("{}", format!("{} track(s)", tracks.len()).bold());
            for track in &tracks {
                println!("  {}", format_track(track));
            }
        },
        ToolCommand::Groups => {
            let groups = session.list_groups().await?;
            println!("{}", format!("{} group(s)", groups.len()).bold());
            for group in &groups {
                println!("  {}", format_track(group));
            }
        },
        ToolCommand::Info { index } => {
            let info = session.get_track_info(track_index(index)?).await?;
            println!("{}", format_track_info(&info));
        },
        ToolCommand::Find { text, case_sensitive } => {
            if text.trim().is_empty() {
                return Err(BridgeError::InvalidArgument("search text must not be empty".into()));
            }
            let matches = session.find_track(&text, !case_sensitive).await?;
            if matches.is_empty() {
                println!("No track matches '{}'", text.yellow());
            }
            for track in &matches {
                println!("  {}", format_track(track));
            }
        },
        ToolCommand::Select { index } => {
            let track = ctx.sequencer().select_track(track_index(index)?).await?;
            println!("{} Selected {}", "✓".green(), format_track(&track));
        },
        ToolCommand::Range { start: Some(start), length: Some(length) } => {
            validate_range(start, length)?;
            let report = ctx.sequencer().set_export_range(start, length).await?;
            println!("{} Loop set to {}", "✓".green(), format_range(&report));
        },
        ToolCommand::Range { .. } => {
            let report = session.get_export_range().await?;
            println!("Loop is {}", format_range(&report));
        },
        ToolCommand::Prepare { index } => {
            let job = ctx.sequencer().prepare_track_for_export(track_index(index)?).await?;
            println!("{}", format_job(&job));
        },
        ToolCommand::ExportInfo { index } => {
            let info = session.track_export_info(track_index(index)?).await?;
            println!("{}", format_export_info(&info));
        },
        ToolCommand::Export { track, filename, output } => {
            let request = ExportRequest {
                track_index: Some(track_index(track)?),
                filename,
                output_folder: absolute_folder(output)?,
            };
            let outcome = ctx.sequencer().export_selected_track(request).await?;
            println!("{}", format_outcome(&outcome));
        },
        ToolCommand::ExportGroup { group, output } => {
            let request = GroupExportRequest {
                group,
                output_folder: absolute_folder(output)?,
            };
            let outcome = ctx.sequencer().export_group(request).await?;
            println!("{}", format_group_outcome(&outcome));
            if outcome.failed > 0 {
                return Ok(EXIT_ERROR);
            }
        },
    }
    Ok(EXIT_OK)
}

fn absolute_folder(output: Option<PathBuf>) -> BridgeResult<Option<PathBuf>> {
    match output {
        Some(folder) if !folder.is_absolute() => Err(BridgeError::InvalidArgument(format!(
            "output folder must be an absolute path, got {}",
            folder.display()
        ))),
        other => Ok(other),
    }
}

pub fn format_error(err: &BridgeError) -> String {
    format!("{}: {}", err.kind().as_str().red(), err)
}

pub fn format_status(status: &ConnectionStatus) -> String {
    if status.connected {
        format!("{} {}", "●".green(), status.message)
    } else {
        format!("{} {}", "●".red(), status.message)
    }
}

pub fn format_track(track: &Track) -> String {
    let kind = match track.kind.as_str() {
        "group" => "group".magenta(),
        "midi" => "midi ".blue(),
        other => other.normal(),
    };
    let mut line = format!("{:>3}  {}  {}", track.index, kind, track.name.bold());
    if track.muted {
        line.push_str(&format!("  {}", "(muted)".dimmed()));
    }
    if let Some(count) = track.clip_count {
        line.push_str(&format!("  {} clip(s)", count));
    }
    line
}

pub fn format_track_info(info: &TrackInfo) -> String {
    let mut out = format_track(&info.track);
    match info.group_index {
        Some(group) => out.push_str(&format!("\n  in group #{}", group)),
        None if info.is_grouped => out.push_str("\n  in a group"),
        None => {},
    }
    if info.clips.is_empty() {
        out.push_str(&format!("\n  {}", "no arrangement clips".yellow()));
        return out;
    }
    for clip in &info.clips {
        out.push_str(&format!(
            "\n  - {} [{} → {}]",
            clip.name,
            clip.start_time,
            clip.end_time()
        ));
    }
    if let (Some(start), Some(end)) = (info.audio_start, info.audio_end) {
        out.push_str(&format!("\n  audio covers beats {} to {}", start, end));
    }
    out
}

pub fn format_range(report: &RangeReport) -> String {
    format!(
        "beats {} to {} ({} beats, {:.2} s at {} BPM)",
        report.range.start_beats,
        report.range.end_beats,
        report.length_beats,
        report.duration_seconds,
        report.tempo
    )
}

pub fn format_export_info(info: &ExportInfo) -> String {
    let key = info.key.as_deref().unwrap_or("-");
    let bpm = info.bpm.map(|b| b.to_string()).unwrap_or_else(|| "-".to_string());
    let mut out = format!(
        "{}\n  key: {}  bpm: {}",
        info.suggested_filename.green().bold(),
        key,
        bpm
    );
    if let Some(group) = &info.group_name {
        out.push_str(&format!("\n  group: {}", group));
    }
    out
}

pub fn format_job(job: &ExportJob) -> String {
    let mut out = format!(
        "Job {} [{}] track {} '{}'",
        job.id,
        job.state.as_str().cyan(),
        job.track_index,
        job.track_name
    );
    if let Some(range) = &job.range {
        out.push_str(&format!(
            "\n  range: beats {} to {}",
            range.start_beats, range.end_beats
        ));
    }
    out.push_str(&format!("\n  file:  {}", job.suggested_filename));
    out
}

pub fn format_outcome(outcome: &ExportOutcome) -> String {
    let mut out = format!("{} {}", "✓".green(), outcome.message);
    out.push_str(&format!("\n  file: {}", outcome.file_name.bold()));
    if let Some(folder) = &outcome.output_folder {
        out.push_str(&format!("\n  folder: {}", folder.display()));
    }
    out
}

pub fn format_group_outcome(outcome: &GroupExportOutcome) -> String {
    let mark = if outcome.failed == 0 { "✓".green() } else { "!".yellow() };
    let mut out = format!("{} {}", mark, outcome.message);
    out.push_str(&format!("\n  range: {}", format_range(&outcome.range)));
    for result in &outcome.results {
        match (&result.file_name, &result.error) {
            (Some(file), _) => out.push_str(&format!("\n  {} {}", "✓".green(), file)),
            (None, Some(err)) => out.push_str(&format!(
                "\n  {} {}: {}",
                "✗".red(),
                result.track_name,
                err.message
            )),
            (None, None) => out.push_str(&format!("\n  {} {}", "✗".red(), result.track_name)),
        }
    }
    for skipped in &outcome.skipped {
        out.push_str(&format!(
            "\n  {} {} ({})",
            "-".dimmed(),
            skipped.track_name,
            skipped.reason
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::session::{Clip, ExportRange, TrackKind};
    use crate::testing::{demo_set, FakeAutomation, FakeLive};
    use clap::Parser;
    use std::sync::Arc;

    #[derive(Parser, Debug)]
    struct Cli {
        #[command(subcommand)]
        command: ToolCommand,
    }

    fn plain() {
        colored::control::set_override(false);
    }

    fn track(index: u32, name: &str, kind: TrackKind) -> Track {
        Track {
            index,
            name: name.to_string(),
            kind,
            muted: false,
            clip_count: None,
        }
    }

    #[test]
    fn test_track_line() {
        plain();
        let mut t = track(3, "Bass 1", TrackKind::Audio);
        assert_eq!(format_track(&t), "  3  audio  Bass 1");

        t.muted = true;
        t.clip_count = Some(2);
        assert_eq!(format_track(&t), "  3  audio  Bass 1  (muted)  2 clip(s)");
    }

    #[test]
    fn test_track_info_lists_clips_and_range() {
        plain();
        let clips = vec![
            Clip { name: "A".into(), start_time: 0.0, length: 16.0 },
            Clip { name: "B".into(), start_time: 32.0, length: 32.0 },
        ];
        let info = TrackInfo {
            track: track(1, "Bass 1", TrackKind::Audio),
            is_grouped: true,
            group_index: Some(0),
            clips,
            audio_start: Some(0.0),
            audio_end: Some(64.0),
        };
        let text = format_track_info(&info);
        assert!(text.contains("in group #0"));
        assert!(text.contains("- B [32 → 64]"));
        assert!(text.contains("audio covers beats 0 to 64"));
    }

    #[test]
    fn test_range_line() {
        plain();
        let report = RangeReport::new(ExportRange::new(8.0, 16.0), 120.0);
        assert_eq!(
            format_range(&report),
            "beats 8 to 24 (16 beats, 8.00 s at 120 BPM)"
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for(&BridgeError::Connection("refused".into())), EXIT_UNREACHABLE);
        assert_eq!(
            exit_code_for(&BridgeError::Timeout { address: "/live/test".into(), timeout_ms: 10 }),
            EXIT_UNREACHABLE
        );
        assert_eq!(exit_code_for(&BridgeError::NotFound("track 9".into())), EXIT_ERROR);
    }

    fn context(live: FakeLive) -> BridgeContext {
        let mut config = AppConfig::default();
        config.export.poll_interval_ms = 1;
        config.export.settle_delay_ms = 0;
        config.export.group_export_delay_ms = 0;
        BridgeContext::with_parts(
            config,
            Arc::new(live),
            Arc::new(FakeAutomation::new()),
        )
    }

    #[tokio::test]
    async fn test_commands_map_to_exit_codes() {
        let ctx = context(FakeLive::new(demo_set()));
        assert_eq!(run(&ctx, ToolCommand::Status).await, EXIT_OK);
        assert_eq!(run(&ctx, ToolCommand::Info { index: 1 }).await, EXIT_OK);
        assert_eq!(run(&ctx, ToolCommand::Info { index: 42 }).await, EXIT_ERROR);
        assert_eq!(run(&ctx, ToolCommand::Select { index: -1 }).await, EXIT_ERROR);
        assert_eq!(
            run(&ctx, ToolCommand::Range { start: Some(0.0), length: Some(0.0) }).await,
            EXIT_ERROR
        );
        assert_eq!(run(&ctx, ToolCommand::Range { start: None, length: None }).await, EXIT_OK);

        let offline = context(FakeLive::new(demo_set()).unreachable());
        assert_eq!(run(&offline, ToolCommand::Status).await, EXIT_UNREACHABLE);
        assert_eq!(run(&offline, ToolCommand::Groups).await, EXIT_UNREACHABLE);
    }

    #[tokio::test]
    async fn test_relative_output_folder_is_rejected() {
        let ctx = context(FakeLive::new(demo_set()));
        let code = run(
            &ctx,
            ToolCommand::Export {
                track: 1,
                filename: None,
                output: Some(PathBuf::from("stems")),
            },
        )
        .await;
        assert_eq!(code, EXIT_ERROR);
        assert!(ctx.sequencer().export_status().job.is_none());
    }

    #[test]
    fn test_export_requires_a_track() {
        let err = Cli::try_parse_from(["ableton-mcp", "export"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        let cli = Cli::try_parse_from(["ableton-mcp", "export", "--track", "2"]).unwrap();
        assert_eq!(
            cli.command,
            ToolCommand::Export { track: 2, filename: None, output: None }
        );

        let cli = Cli::try_parse_from(["ableton-mcp", "export-group", "Amin", "--output", "/tmp/stems"])
            .unwrap();
        assert_eq!(
            cli.command,
            ToolCommand::ExportGroup {
                group: "Amin".into(),
                output: Some(PathBuf::from("/tmp/stems")),
            }
        );
    }

    #[tokio::test]
    async fn test_export_commands_run_end_to_end() {
        let ctx = context(FakeLive::new(demo_set()));
        let export = ToolCommand::Export { track: 2, filename: None, output: None };
        assert_eq!(run(&ctx, export).await, EXIT_OK);

        let group = |name: &str| ToolCommand::ExportGroup { group: name.into(), output: None };
        assert_eq!(run(&ctx, group("amin")).await, EXIT_OK);
        assert_eq!(run(&ctx, group("drums")).await, EXIT_ERROR);
        assert!(!ctx.sequencer().export_status().busy);
    }

    #[test]
    fn test_group_outcome_lists_failures_and_skips() {
        plain();
        let outcome = GroupExportOutcome {
            group_index: 0,
            group_name: "Amin".into(),
            range: RangeReport::new(ExportRange::new(0.0, 16.0), 120.0),
            output_folder: None,
            results: vec![
                crate::export::TrackExportResult {
                    track_index: 1,
                    track_name: "Bass".into(),
                    success: true,
                    file_name: Some("Bass_Amin_120bpm.wav".into()),
                    error: None,
                },
                crate::export::TrackExportResult {
                    track_index: 2,
                    track_name: "Lead".into(),
                    success: false,
                    file_name: None,
                    error: Some(BridgeError::Automation("Save dialog did not appear".into()).report()),
                },
            ],
            skipped: vec![crate::export::SkippedTrack {
                track_index: 3,
                track_name: "Pad".into(),
                reason: "muted".into(),
            }],
            exported: 1,
            failed: 1,
            message: "Exported 1 of 2 track(s) from 'Amin'".into(),
        };

        let text = format_group_outcome(&outcome);
        assert!(text.starts_with("! Exported 1 of 2"));
        assert!(text.contains("✓ Bass_Amin_120bpm.wav"));
        assert!(text.contains("✗ Lead: GUI automation failed: Save dialog did not appear"));
        assert!(text.contains("- Pad (muted)"));
    }
}
