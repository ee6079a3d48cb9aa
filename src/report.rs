//! Terminal table of ranked results.
//!
//! Metric cells are coloured by their [`Grade`]: green for good, yellow for
//! fair and red for poor.

use colored::{Color, Colorize};

use crate::results::ProxyResult;
use crate::scoring::{Grade, Thresholds};

const FULL_HEADERS: [&str; 11] = [
    "#",
    "Name",
    "Type",
    "Latency",
    "Jitter",
    "Loss",
    "Download",
    "Upload",
    "Extra URLs",
    "Open Speed",
    "Extra Download",
];

/// Columns printed in fast mode.
const FAST_COLUMNS: usize = 4;

pub fn grade_color(grade: Grade) -> Color {
    match grade {
        Grade::Good => Color::Green,
        Grade::Fair => Color::Yellow,
        Grade::Poor => Color::Red,
    }
}

struct Cell {
    text: String,
    grade: Option<Grade>,
}

impl Cell {
    fn plain(text: impl Into<String>) -> Self {
        Self { text: text.into(), grade: None }
    }

    fn graded(text: String, grade: Grade) -> Self {
        Self { text, grade: Some(grade) }
    }
}

fn row(index: usize, result: &ProxyResult, thresholds: &Thresholds) -> Vec<Cell> {
    let connectivity = if result.extra_url_connectivity {
        Grade::Good
    } else {
        Grade::Poor
    };

    vec![
        Cell::plain((index + 1).to_string()),
        Cell::plain(result.proxy_name.as_str()),
        Cell::plain(result.proxy_type.to_string()),
        Cell::graded(result.format_latency(), Grade::latency(result.latency)),
        Cell::plain(result.format_jitter()),
        Cell::graded(
            result.format_packet_loss(),
            Grade::packet_loss(result.packet_loss),
        ),
        Cell::graded(
            result.format_download_speed(),
            Grade::download(result.download_speed, thresholds),
        ),
        Cell::graded(
            result.format_upload_speed(),
            Grade::upload(result.upload_speed),
        ),
        Cell::graded(result.format_extra_url_connectivity(), connectivity),
        Cell::graded(
            result.format_extra_url_open_speed(),
            Grade::open_speed(result.extra_url_open_speed, thresholds),
        ),
        Cell::graded(
            result.format_extra_download_speed(),
            Grade::download(result.extra_download_speed, thresholds),
        ),
    ]
}

/// Render `results` in the given order, one line per proxy.
pub fn render_table(
    results: &[ProxyResult],
    thresholds: &Thresholds,
    fast_mode: bool,
) -> String {
    let columns = if fast_mode { FAST_COLUMNS } else { FULL_HEADERS.len() };

    let rows: Vec<Vec<Cell>> = results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            let mut cells = row(i, result, thresholds);
            cells.truncate(columns);
            cells
        })
        .collect();

    let mut widths: Vec<usize> =
        FULL_HEADERS[..columns].iter().map(|h| h.chars().count()).collect();
    for cells in &rows {
        for (width, cell) in widths.iter_mut().zip(cells) {
            *width = (*width).max(cell.text.chars().count());
        }
    }

    let header: Vec<String> = FULL_HEADERS[..columns]
        .iter()
        .zip(&widths)
        .map(|(title, width)| pad(title, *width).as_str().bold().to_string())
        .collect();

    let mut lines = vec![header.join("  ").trim_end().to_string()];
    for cells in rows {
        let line: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| {
                let text = pad(&cell.text, *width);
                match cell.grade {
                    Some(grade) => {
                        text.as_str().color(grade_color(grade)).to_string()
                    }
                    None => text,
                }
            })
            .collect();
        lines.push(line.join("  ").trim_end().to_string());
    }

    lines.join("\n")
}

fn pad(text: &str, width: usize) -> String {
    let fill = width.saturating_sub(text.chars().count());
    format!("{}{}", text, " ".repeat(fill))
}

/// One-line totals printed after the table.
pub fn summary(tested: usize, usable: usize, good: usize) -> String {
    format!(
        "{} {} tested, {} usable, {} good",
        "Summary:".bold().white(),
        tested,
        usable.to_string().as_str().bright_cyan(),
        good.to_string().as_str().green()
    )
}
