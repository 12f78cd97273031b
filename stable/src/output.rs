use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};

use console::{measure_text_width, pad_str, style, Alignment};

static VERBOSE: AtomicBool = AtomicBool::new(false);

pub fn brand_accent<D: Display>(value: D) -> console::StyledObject<D> {
    style(value).cyan()
}

pub fn brand_muted<D: Display>(value: D) -> console::StyledObject<D> {
    style(value).dim()
}

pub fn brand_success<D: Display>(value: D) -> console::StyledObject<D> {
    style(value).green()
}

pub fn brand_warning<D: Display>(value: D) -> console::StyledObject<D> {
    style(value).yellow()
}

pub fn brand_error<D: Display>(value: D) -> console::StyledObject<D> {
    style(value).red()
}

pub fn set_verbose(verbose: bool) {
    VERBOSE.store(verbose, Ordering::Relaxed);
}

pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

pub fn section(title: &str) {
    println!();
    println!("{}", brand_accent(title).bold());
}

pub fn step(message: &str) {
    println!("{} {}", brand_accent("•").bold(), message);
}

pub fn success(message: &str) {
    println!("{} {}", brand_success("✓").bold(), message);
}

pub fn warning(message: &str) {
    println!("{} {}", brand_warning("!").bold(), message);
}

pub fn error_stderr(message: &str) {
    eprintln!("{} {}", brand_error("✗").bold(), message);
}

pub fn muted(message: &str) {
    println!("{}", brand_muted(message));
}

/// Left-aligned columns sized to their widest cell. Cells may carry styling.
pub fn table(header: &[&str], rows: &[Vec<String>]) {
    for line in format_table(header, rows) {
        println!("{line}");
    }
}

fn format_table(header: &[&str], rows: &[Vec<String>]) -> Vec<String> {
    let mut widths: Vec<usize> = header.iter().map(|h| measure_text_width(h)).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(measure_text_width(cell));
            }
        }
    }

    let render = |cells: Vec<String>| {
        let last = cells.len().saturating_sub(1);
        cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                if i == last {
                    cell.clone()
                } else {
                    pad_str(cell, widths[i], Alignment::Left, None).into_owned()
                }
            })
            .collect::<Vec<_>>()
            .join("  ")
    };

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(brand_muted(render(header.iter().map(|h| h.to_string()).collect())).to_string());
    lines.extend(rows.iter().map(|row| render(row.clone())));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_pads_columns_to_widest_cell() {
        console::set_colors_enabled(false);
        let lines = format_table(
            &["APP", "PORT", "STATUS"],
            &[
                vec!["blog".into(), "3000".into(), "running".into()],
                vec!["storefront".into(), "3001".into(), "stopped".into()],
            ],
        );
        assert_eq!(
            lines,
            vec![
                "APP         PORT  STATUS",
                "blog        3000  running",
                "storefront  3001  stopped",
            ]
        );
    }

    #[test]
    fn verbose_flag_round_trips() {
        set_verbose(true);
        assert!(is_verbose());
        set_verbose(false);
        assert!(!is_verbose());
    }
}
