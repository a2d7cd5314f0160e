//! CLI output formatting.
//!
//! Thumbnail JSON goes to stdout; everything here is the human-readable side.
//!
//! # Output Format
//!
//! ## Thumbnail
//!
//! ```text
//! photo.jpg (4032x3024 image/jpeg)
//!     Thumbnail: 240x180
//!     Quality: 0.70 after 4 passes
//!     Payload: 38.2 KB of 118.0 KB budget
//! ```
//!
//! ## Batch
//!
//! ```text
//! 001 a.jpg → 120x240 at 0.80 (3 passes)
//! 002 anim.gif → 300x200 passed through
//! 003 huge.jpg ✗ compression_budget_exceeded
//!     Too large to thumbnail: estimated 240311 bytes at quality 0.20, budget is 120832 bytes
//!
//! Thumbnailed 2 of 3 files (1 passed through, 1 too large)
//! ```
//!
//! ## Geometry
//!
//! ```text
//! Source 1000x500 within 240x240
//!     Proportional: 240x120
//!     Canvas: 240x160 (draw 320x160 at -40,0)
//!     Display: 240x120
//! ```
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout or stderr.
//! Format functions are pure: no I/O, no side effects.

use crate::batch::BatchReport;
use crate::imaging::{
    Dimensions, FitMode, ResolvedImage, SizeBudget, ThumbnailConfig, calculate_display_size,
    plan_geometry,
};
use std::path::Path;

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based position as a zero-padded 3-digit index.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Indentation for a given depth level (4 spaces per level).
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn kilobytes(bytes: f64) -> String {
    format!("{:.1} KB", bytes / 1024.0)
}

fn display_name(path: &Path, root: Option<&Path>) -> String {
    root.and_then(|r| path.strip_prefix(r).ok())
        .unwrap_or(path)
        .display()
        .to_string()
}

fn passes(n: u32) -> String {
    if n == 1 {
        "1 pass".to_string()
    } else {
        format!("{n} passes")
    }
}

// ============================================================================
// Thumbnail
// ============================================================================

/// Summary of one resolution.
///
/// The payload line shows the raw base64 length, which is what travels in the
/// message.
pub fn format_thumbnail(path: &Path, resolved: &ResolvedImage, budget: SizeBudget) -> Vec<String> {
    let info = &resolved.info;
    let thumb = &resolved.thumbnail;
    let mut lines = vec![format!(
        "{} ({}x{} {})",
        display_name(path, None),
        info.width,
        info.height,
        info.mime
    )];
    lines.push(format!("{}Thumbnail: {}x{}", indent(1), thumb.width, thumb.height));
    match resolved.quality {
        Some(q) if !resolved.passthrough => lines.push(format!(
            "{}Quality: {:.2} after {}",
            indent(1),
            q,
            passes(resolved.iterations)
        )),
        _ => lines.push(format!("{}Passed through unchanged", indent(1))),
    }
    lines.push(format!(
        "{}Payload: {} of {} budget",
        indent(1),
        kilobytes(thumb.thumbnail_base64.len() as f64),
        kilobytes(budget.bytes() as f64)
    ));
    lines
}

pub fn print_thumbnail(path: &Path, resolved: &ResolvedImage, budget: SizeBudget) {
    for line in format_thumbnail(path, resolved, budget) {
        eprintln!("{}", line);
    }
}

// ============================================================================
// Batch
// ============================================================================

/// One line per file, error detail indented beneath failures, then a summary.
pub fn format_batch_report(report: &BatchReport, root: &Path) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, item) in report.items.iter().enumerate() {
        let name = display_name(&item.path, Some(root));
        match &item.outcome {
            Ok(r) if r.passthrough => lines.push(format!(
                "{} {} → {}x{} passed through",
                format_index(i + 1),
                name,
                r.thumbnail.width,
                r.thumbnail.height
            )),
            Ok(r) => lines.push(format!(
                "{} {} → {}x{} at {:.2} ({})",
                format_index(i + 1),
                name,
                r.thumbnail.width,
                r.thumbnail.height,
                r.quality.unwrap_or_default(),
                passes(r.iterations)
            )),
            Err(e) => {
                lines.push(format!(
                    "{} {} ✗ {}",
                    format_index(i + 1),
                    name,
                    e.kind().as_str()
                ));
                lines.push(format!("{}{}", indent(1), e));
            }
        }
    }

    if !lines.is_empty() {
        lines.push(String::new());
    }
    let mut extras = Vec::new();
    if report.passed_through() > 0 {
        extras.push(format!("{} passed through", report.passed_through()));
    }
    if report.too_large() > 0 {
        extras.push(format!("{} too large", report.too_large()));
    }
    let other = report.failed() - report.too_large();
    if other > 0 {
        extras.push(format!("{} failed", other));
    }
    let mut summary = format!(
        "Thumbnailed {} of {} files",
        report.succeeded(),
        report.items.len()
    );
    if !extras.is_empty() {
        summary.push_str(&format!(" ({})", extras.join(", ")));
    }
    lines.push(summary);
    lines
}

pub fn print_batch_report(report: &BatchReport, root: &Path) {
    for line in format_batch_report(report, root) {
        println!("{}", line);
    }
}

// ============================================================================
// Geometry
// ============================================================================

/// Both fit modes and the display size for a `width × height` source.
pub fn format_geometry(width: u32, height: u32, config: &ThumbnailConfig) -> Vec<String> {
    let original = Dimensions::new(width, height);
    let proportional = plan_geometry(
        original,
        &ThumbnailConfig {
            fit: FitMode::Proportional,
            ..*config
        },
    );
    let canvas = plan_geometry(
        original,
        &ThumbnailConfig {
            fit: FitMode::Canvas,
            ..*config
        },
    );
    let (display_w, display_h) =
        calculate_display_size(width, height, config.max_width.max(config.max_height));
    let p = canvas.placement;

    vec![
        format!(
            "Source {}x{} within {}x{}",
            width, height, config.max_width, config.max_height
        ),
        format!(
            "{}Proportional: {}x{}",
            indent(1),
            proportional.canvas.width,
            proportional.canvas.height
        ),
        format!(
            "{}Canvas: {}x{} (draw {}x{} at {},{})",
            indent(1),
            canvas.canvas.width,
            canvas.canvas.height,
            p.width,
            p.height,
            p.x_offset,
            p.y_offset
        ),
        format!("{}Display: {}x{}", indent(1), display_w.round(), display_h.round()),
    ]
}

pub fn print_geometry(width: u32, height: u32, config: &ThumbnailConfig) {
    for line in format_geometry(width, height, config) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================
