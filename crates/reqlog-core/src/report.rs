//! Plain-text report rendering shared by the trackers and the summarizer.

use std::fmt::{self, Write};

use owo_colors::OwoColorize;

/// Default report width in columns.
pub const DEFAULT_WIDTH: usize = 80;

/// Rendering settings passed to every tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportOptions {
    pub width: usize,
    pub color: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            color: false,
        }
    }
}

/// Writes an upper-cased section title with a rule underneath.
pub fn section(out: &mut dyn Write, title: &str, options: &ReportOptions) -> fmt::Result {
    let title = title.to_uppercase();
    let rule = "─".repeat(title.chars().count());
    if options.color {
        writeln!(out, "{}", title.bold())?;
    } else {
        writeln!(out, "{title}")?;
    }
    writeln!(out, "{rule}")
}

/// Column alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

/// A simple text table. The first column absorbs any width shortfall.
#[derive(Debug, Clone)]
pub struct Table {
    headers: Vec<(String, Align)>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = (S, Align)>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(|(h, a)| (h.into(), a)).collect(),
            rows: Vec::new(),
        }
    }

    pub fn row(&mut self, cells: Vec<String>) {
        self.rows.push(cells);
    }

    pub const fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_widths(&self, total: usize) -> Vec<usize> {
        let mut widths: Vec<usize> = self
            .headers
            .iter()
            .map(|(h, _)| h.chars().count())
            .collect();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }
        // Two spaces between columns.
        let used: usize = widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1);
        if used > total {
            if let Some(first) = widths.first_mut() {
                *first = first.saturating_sub(used - total).max(8);
            }
        }
        widths
    }

    pub fn render(&self, out: &mut dyn Write, options: &ReportOptions) -> fmt::Result {
        let widths = self.column_widths(options.width);
        let header: Vec<String> = self.headers.iter().map(|(h, _)| h.clone()).collect();
        let header_line = self.format_row(&header, &widths);
        if options.color {
            writeln!(out, "{}", header_line.dimmed())?;
        } else {
            writeln!(out, "{header_line}")?;
        }
        for row in &self.rows {
            writeln!(out, "{}", self.format_row(row, &widths))?;
        }
        Ok(())
    }

    fn format_row(&self, cells: &[String], widths: &[usize]) -> String {
        let mut line = String::new();
        for (i, ((cell, width), (_, align))) in
            cells.iter().zip(widths).zip(&self.headers).enumerate()
        {
            if i > 0 {
                line.push_str("  ");
            }
            let cell = truncate(cell, *width);
            match align {
                Align::Left => {
                    let _ = write!(line, "{cell:<width$}");
                }
                Align::Right => {
                    let _ = write!(line, "{cell:>width$}");
                }
            }
        }
        line.trim_end().to_string()
    }
}

/// Shortens `text` to `width` characters, marking the cut with `…`.
pub fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }
    let mut cut: String = text.chars().take(width - 1).collect();
    cut.push('…');
    cut
}

/// A bar of `width` cells filled in proportion to `value / max`.
/// Non-zero values always get at least one block.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn bar(value: u64, max: u64, width: usize) -> String {
    if max == 0 || width == 0 {
        return "░".repeat(width);
    }
    let ratio = value as f64 / max as f64;
    let filled = ((ratio * width as f64).round() as usize).min(width);
    let filled = if value > 0 { filled.max(1) } else { filled };
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

/// Seconds rendered at a readable scale: `850ms`, `2.31s`, `4m 05s`, `2h 10m`.
#[allow(clippy::cast_possible_truncation)]
pub fn format_duration(seconds: f64) -> String {
    if !seconds.is_finite() {
        return "-".to_string();
    }
    if seconds.abs() < 1.0 {
        format!("{:.0}ms", seconds * 1000.0)
    } else if seconds.abs() < 60.0 {
        format!("{seconds:.2}s")
    } else if seconds.abs() < 3600.0 {
        let whole = seconds.round() as i64;
        format!("{}m {:02}s", whole / 60, whole % 60)
    } else {
        let minutes = (seconds / 60.0).round() as i64;
        format!("{}h {:02}m", minutes / 60, minutes % 60)
    }
}

/// Bytes rendered with decimal prefixes: `512 B`, `1.5 kB`, `3.2 MB`.
pub fn format_traffic(bytes: f64) -> String {
    const UNITS: [&str; 4] = ["kB", "MB", "GB", "TB"];
    if !bytes.is_finite() {
        return "-".to_string();
    }
    if bytes.abs() < 1000.0 {
        return format!("{bytes:.0} B");
    }
    let mut scaled = bytes / 1000.0;
    let mut unit = UNITS[0];
    for next in &UNITS[1..] {
        if scaled.abs() < 1000.0 {
            break;
        }
        scaled /= 1000.0;
        unit = next;
    }
    format!("{scaled:.1} {unit}")
}

/// Plain numbers: integers without decimals, everything else with two.
#[allow(clippy::float_cmp)]
pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return "-".to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}
