use std::fmt::Write;

use super::models::{RunReport, RunState};

/// Plain-text rendering of a finished run, in the layout of the desktop view:
/// the most suitable CV first, then everyone else, then failures.
pub fn render_text(report: &RunReport) -> String {
    let mut out = String::new();

    if report.status == RunState::Failed {
        let _ = writeln!(out, "Matching failed; see the failures below.");
    } else if let Some(best) = report.ranked.most_suitable() {
        let _ = writeln!(out, "Most Suitable CV:");
        let _ = writeln!(out, "  File: {}", best.candidate.file_name);
        let _ = writeln!(out, "  Suitability: {}%", best.score);
        let _ = writeln!(out, "  Justification: {}", best.justification);

        if !report.ranked.others().is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Other CVs with Suitability Ratings:");
            for entry in report.ranked.others() {
                let _ = writeln!(
                    out,
                    "  {} - {}%: {}",
                    entry.candidate.file_name, entry.score, entry.justification
                );
            }
        }
    } else {
        let _ = writeln!(out, "No CV could be rated.");
    }

    if !report.failures.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Files that could not be processed:");
        for failure in &report.failures {
            let _ = writeln!(out, "  {} ({:?}): {}", failure.file_name, failure.kind, failure.message);
        }
    }

    let _ = writeln!(out);
    let _ = write!(
        out,
        "Rated {} of {} CVs in {:.1}s",
        report.ranked.len(),
        report.total_files.saturating_sub(1),
        report.duration_seconds
    );
    out
}

pub fn render_json(report: &RunReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}
