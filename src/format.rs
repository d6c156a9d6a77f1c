//! Result formatting for terminal display or JSON output

use crate::error::Result;
use crate::index::SearchResult;
use colored::*;

/// Lines of chunk text shown per result
const MAX_PREVIEW_LINES: usize = 8;

/// Format search results for terminal display
pub fn format_results(results: &[SearchResult], show_content: bool) -> String {
    let mut output = String::new();

    for (i, result) in results.iter().enumerate() {
        let location = match result.page {
            Some(page) => format!("{} (page {})", result.source, page),
            None => result.source.clone(),
        };

        // Score indicator with color
        let score_pct = (result.score.max(0.0) * 100.0) as u32;
        let score_color = if score_pct >= 80 {
            "green"
        } else if score_pct >= 60 {
            "yellow"
        } else {
            "red"
        };

        output.push_str(&format!(
            "\n{} {} ({}%)\n",
            format!("[{}]", i + 1).dimmed(),
            location.cyan().bold(),
            format!("{}", score_pct).color(score_color)
        ));

        if show_content {
            output.push_str(&format!("{}\n", "─".repeat(60).dimmed()));

            let lines: Vec<&str> = result.text.trim().lines().collect();
            for line in lines.iter().take(MAX_PREVIEW_LINES) {
                output.push_str(&format!("  {}\n", line));
            }

            if lines.len() > MAX_PREVIEW_LINES {
                output.push_str(&format!(
                    "{}\n",
                    format!("  ... ({} more lines)", lines.len() - MAX_PREVIEW_LINES).dimmed()
                ));
            }
        }
    }

    output
}

/// Format results as JSON
pub fn format_results_json(results: &[SearchResult]) -> Result<String> {
    Ok(serde_json::to_string_pretty(results)?)
}
