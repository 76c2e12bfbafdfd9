use colored::*;
use comfy_table::{presets::*, Attribute, Cell, CellAlignment, ContentArrangement, Table, TableComponent};

use crate::stats::RunStatistics;

const TABLE_WIDTH: u16 = 72;

fn format_value_or_na(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) if !v.is_nan() => format!("{:.2} {}", v, unit),
        _ => format!("N/A {}", unit),
    }
}

fn base_table(header: [&str; 2]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_style(TableComponent::MiddleHeaderIntersections, '┴')
        .set_style(TableComponent::BottomBorder, '─')
        .set_style(TableComponent::BottomBorderIntersections, '─')
        .set_style(TableComponent::HeaderLines, '─')
        .set_content_arrangement(ContentArrangement::DynamicFullWidth)
        .set_width(TABLE_WIDTH)
        .set_header(header.map(|h| Cell::new(h).add_attribute(Attribute::Bold)));
    table
}

fn value_row(label: &str, value: String) -> Vec<Cell> {
    vec![
        Cell::new(label),
        Cell::new(value).set_alignment(CellAlignment::Right),
    ]
}

/// Renders the breakdown shown with `--details`.
pub fn render_details(stats: &RunStatistics) -> String {
    let result = stats.result();
    let spread = stats.spread();

    let mut latency = base_table(["Start-up Duration", "Value"]);
    latency.add_row(value_row("Samples", stats.count().to_string()));
    latency.add_row(value_row("Min", format_value_or_na(result.min, "ms")));
    latency.add_row(value_row("Median", format_value_or_na(result.median, "ms")));
    latency.add_row(value_row("Average", format_value_or_na(result.average, "ms")));
    latency.add_row(value_row("P95", format_value_or_na(spread.map(|s| s.p95), "ms")));
    latency.add_row(value_row("P99", format_value_or_na(spread.map(|s| s.p99), "ms")));
    latency.add_row(value_row("Max", format_value_or_na(result.max, "ms")));
    latency.add_row(value_row("Std Dev", format_value_or_na(spread.map(|s| s.std_dev), "ms")));

    let tally = stats.tally();
    let mut outcomes = base_table(["Outcome", "Count"]);
    for (label, count) in [
        ("Cold start", tally.cold),
        ("Snapshot restore", tally.restore),
        ("Warm (no marker)", tally.no_sample),
        ("Throttled", tally.throttled),
        ("Timed out", tally.timed_out),
        ("Failed", tally.failed),
    ] {
        outcomes.add_row(value_row(label, count.to_string()));
    }
    outcomes.add_row(value_row("Total", tally.total().to_string()));

    let rule = "─".repeat(TABLE_WIDTH as usize).bright_black();
    format!(
        "{}\n{}\n{}\n\n{}\n",
        "Cold-start Benchmark".bright_blue().bold(),
        rule,
        latency,
        outcomes
    )
}

/// Prints the breakdown to stderr, keeping stdout for the summary line.
pub fn print_details(stats: &RunStatistics) {
    eprintln!("\n{}", render_details(stats));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatisticsAggregator;
    use crate::types::{InvocationOutcome, StartKind};

    #[test]
    fn test_format_value_or_na() {
        assert_eq!(format_value_or_na(Some(12.345), "ms"), "12.35 ms");
        assert_eq!(format_value_or_na(None, "ms"), "N/A ms");
        assert_eq!(format_value_or_na(Some(f64::NAN), "ms"), "N/A ms");
    }

    #[tokio::test]
    async fn test_render_details_lists_outcomes() {
        colored::control::set_override(false);
        let aggregator = StatisticsAggregator::new();
        aggregator
            .record(&InvocationOutcome::Sample {
                latency_ms: 120.0,
                kind: StartKind::Cold,
            })
            .await;
        aggregator.record(&InvocationOutcome::Throttled).await;
        let stats = aggregator.finalize();

        let rendered = render_details(&stats);

        assert!(rendered.contains("Cold-start Benchmark"));
        assert!(rendered.contains("120.00 ms"));
        assert!(rendered.contains("Throttled"));
        assert!(rendered.contains("Total"));
    }

    #[tokio::test]
    async fn test_render_details_empty_run() {
        let stats = StatisticsAggregator::new().finalize();
        let rendered = render_details(&stats);
        assert!(rendered.contains("N/A ms"));
    }
}
