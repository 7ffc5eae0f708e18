//! CLI output formatting.
//!
//! # Information-First Display
//!
//! Output is **job-centric, not file-centric**. The header line for a job is
//! its identifier and name; paths, dimensions and per-level grids are shown
//! as indented context lines underneath.
//!
//! # Output Format
//!
//! ## Tile
//!
//! ```text
//! Job 007 Andromeda
//!     Source: images/m31.tif
//!     Validated: tiff 10000x8000 (L16)
//!     Thumbnail: thumbnails/job_7_thumb.jpg (512x512)
//!     Pyramid: 7 levels, 1389 tiles (tile 256px)
//!     Level 6/6: 10000x8000, 40x32 tiles
//!     ...
//!     Level 0/6: 157x125, 1x1 tiles
//! COMPLETED job 7: max zoom level 6, 1389 tiles
//! ```
//!
//! ## Status
//!
//! ```text
//! Job 007 Andromeda
//!     Status: COMPLETED
//!     Source: images/m31.tif
//!     Size: 10000x8000
//!     Max zoom level: 6
//!     Thumbnail: thumbnails/job_7_thumb.jpg
//! ```
//!
//! # Architecture
//!
//! Each view has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes to stdout. Format functions are pure:
//! no I/O, no side effects.

use crate::imaging::SourceInfo;
use crate::job::{JobId, JobRecord};
use crate::process::ProcessEvent;

/// Format a job identifier as 3-digit zero-padded.
fn format_index(id: JobId) -> String {
    format!("{:0>3}", id.0)
}

/// Job header: padded id + name, or just the id when unnamed.
///
/// ```text
/// Job 007 Andromeda
/// Job 012
/// ```
fn job_header(id: JobId, name: &str) -> String {
    if name.is_empty() {
        format!("Job {}", format_index(id))
    } else {
        format!("Job {} {}", format_index(id), name)
    }
}

fn context(line: String) -> String {
    format!("    {}", line)
}

fn format_source_info(info: &SourceInfo) -> String {
    format!(
        "{} {}x{} ({})",
        info.format, info.dimensions.width, info.dimensions.height, info.color
    )
}

/// Format a single tiling progress event as display lines.
pub fn format_process_event(event: &ProcessEvent) -> Vec<String> {
    match event {
        ProcessEvent::Started {
            job_id,
            name,
            source_path,
        } => vec![
            job_header(*job_id, name),
            context(format!("Source: {}", source_path)),
        ],
        ProcessEvent::Validated { info } => {
            vec![context(format!("Validated: {}", format_source_info(info)))]
        }
        ProcessEvent::ThumbnailWritten {
            path,
            width,
            height,
        } => vec![context(format!("Thumbnail: {} ({}x{})", path, width, height))],
        ProcessEvent::Planned { plan, total_tiles } => vec![context(format!(
            "Pyramid: {} levels, {} tiles (tile {}px)",
            plan.level_count(),
            total_tiles,
            plan.tile_size
        ))],
        ProcessEvent::LevelRendered {
            summary,
            max_zoom_level,
        } => vec![context(format!(
            "Level {}/{}: {}x{}, {}x{} tiles",
            summary.level,
            max_zoom_level,
            summary.width,
            summary.height,
            summary.columns,
            summary.rows
        ))],
        ProcessEvent::Completed {
            job_id,
            max_zoom_level,
            total_tiles,
        } => vec![format!(
            "COMPLETED job {}: max zoom level {}, {} tiles",
            job_id, max_zoom_level, total_tiles
        )],
        ProcessEvent::Failed { job_id, failure } => {
            vec![format!("FAILED job {}: {}", job_id, failure)]
        }
    }
}

/// Format a persisted job record.
///
/// Completion fields are only shown once they are set.
pub fn format_record(record: &JobRecord) -> Vec<String> {
    let mut lines = vec![
        job_header(record.id, &record.name),
        context(format!("Status: {}", record.status())),
        context(format!("Source: {}", record.source_path)),
    ];
    if let (Some(w), Some(h)) = (record.width, record.height) {
        lines.push(context(format!("Size: {}x{}", w, h)));
    }
    if let Some(level) = record.max_zoom_level {
        lines.push(context(format!("Max zoom level: {}", level)));
    }
    if let Some(thumb) = &record.thumbnail_path {
        lines.push(context(format!("Thumbnail: {}", thumb)));
    }
    lines
}

/// Format the result of validating a source without tiling it.
pub fn format_check(source: &str, info: &SourceInfo, max_zoom_level: u32) -> Vec<String> {
    vec![
        source.to_string(),
        context(format!("Format: {}", format_source_info(info))),
        context(format!("Max zoom level: {}", max_zoom_level)),
    ]
}

/// Print a job record to stdout.
pub fn print_record(record: &JobRecord) {
    for line in format_record(record) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::{Dimensions, LevelSummary, plan_pyramid};
    use crate::job::{Completion, JobStatus};
    use crate::process::{FailureKind, JobFailure};

    fn m31_info() -> SourceInfo {
        SourceInfo {
            format: "tiff",
            dimensions: Dimensions {
                width: 10000,
                height: 8000,
            },
            color: "L16".to_string(),
        }
    }

    #[test]
    fn header_pads_id_and_omits_empty_name() {
        assert_eq!(job_header(JobId(7), "Andromeda"), "Job 007 Andromeda");
        assert_eq!(job_header(JobId(1234), ""), "Job 1234");
    }

    #[test]
    fn started_event_shows_header_and_source() {
        let lines = format_process_event(&ProcessEvent::Started {
            job_id: JobId(7),
            name: "Andromeda".to_string(),
            source_path: "images/m31.tif".to_string(),
        });
        assert_eq!(lines, vec!["Job 007 Andromeda", "    Source: images/m31.tif"]);
    }

    #[test]
    fn validated_event() {
        let lines = format_process_event(&ProcessEvent::Validated { info: m31_info() });
        assert_eq!(lines, vec!["    Validated: tiff 10000x8000 (L16)"]);
    }

    #[test]
    fn planned_and_level_events() {
        let plan = plan_pyramid(10000, 8000, 256);
        let planned = format_process_event(&ProcessEvent::Planned {
            plan,
            total_tiles: plan.total_tiles(),
        });
        assert_eq!(
            planned,
            vec![format!(
                "    Pyramid: 7 levels, {} tiles (tile 256px)",
                plan.total_tiles()
            )]
        );

        let level = format_process_event(&ProcessEvent::LevelRendered {
            summary: LevelSummary {
                level: 0,
                deep_zoom_level: 8,
                width: 157,
                height: 125,
                columns: 1,
                rows: 1,
            },
            max_zoom_level: 6,
        });
        assert_eq!(level, vec!["    Level 0/6: 157x125, 1x1 tiles"]);
    }

    #[test]
    fn terminal_events() {
        let done = format_process_event(&ProcessEvent::Completed {
            job_id: JobId(7),
            max_zoom_level: 6,
            total_tiles: 1389,
        });
        assert_eq!(done, vec!["COMPLETED job 7: max zoom level 6, 1389 tiles"]);

        let failed = format_process_event(&ProcessEvent::Failed {
            job_id: JobId(8),
            failure: JobFailure {
                kind: FailureKind::InvalidFormat,
                message: "not a TIFF container".to_string(),
            },
        });
        assert_eq!(
            failed,
            vec!["FAILED job 8: invalid format: not a TIFF container"]
        );
    }

    #[test]
    fn pending_record_shows_no_results() {
        let record = JobRecord::new(JobId(3), "Orion", "images/orion.tif");
        assert_eq!(
            format_record(&record),
            vec![
                "Job 003 Orion",
                "    Status: PENDING",
                "    Source: images/orion.tif",
            ]
        );
    }

    #[test]
    fn completed_record_shows_results() {
        let mut record = JobRecord::new(JobId(7), "Andromeda", "images/m31.tif");
        record.set_status(JobStatus::Processing).unwrap();
        record
            .complete(Completion {
                max_zoom_level: 6,
                width: 10000,
                height: 8000,
                thumbnail_path: "thumbnails/job_7_thumb.jpg".to_string(),
            })
            .unwrap();

        let lines = format_record(&record);
        assert_eq!(lines[1], "    Status: COMPLETED");
        assert_eq!(&lines[3..], &[
            "    Size: 10000x8000".to_string(),
            "    Max zoom level: 6".to_string(),
            "    Thumbnail: thumbnails/job_7_thumb.jpg".to_string(),
        ]);
    }

    #[test]
    fn check_output() {
        let lines = format_check("m31.tif", &m31_info(), 6);
        assert_eq!(
            lines,
            vec![
                "m31.tif",
                "    Format: tiff 10000x8000 (L16)",
                "    Max zoom level: 6",
            ]
        );
    }
}
