//! Pure calculation functions for thumbnail geometry.
//!
//! All functions here are pure and testable without any I/O or images.

use super::params::{Dimensions, FitMode, Placement, TargetGeometry, ThumbnailConfig};

/// Edge length (in destination units) the canvas fill mode zooms toward.
pub const PLACEMENT_BASELINE: f64 = 160.0;

/// Fit `original` inside `max_width × max_height`, preserving aspect ratio.
///
/// Width is clamped first; if the proportionally derived height still
/// exceeds `max_height` it is clamped in a second pass. Each pass only ever
/// shrinks, so two passes always suffice. Results are floored.
///
/// Either side being zero collapses to `0×0`, which callers treat as
/// "no image".
///
/// # Examples
/// ```
/// # use thumbfit::imaging::calculate_size;
/// let fitted = calculate_size(1000, 2000, 240, 240);
/// assert_eq!((fitted.width, fitted.height), (120, 240));
/// ```
pub fn calculate_size(
    original_width: i64,
    original_height: i64,
    max_width: u32,
    max_height: u32,
) -> Dimensions {
    let width = original_width.max(0) as f64;
    let height = original_height.max(0) as f64;

    if width == 0.0 || height == 0.0 {
        return Dimensions::ZERO;
    }

    let aspect = width / height;
    let (max_w, max_h) = (max_width as f64, max_height as f64);

    let (mut target_w, mut target_h) = (width, height);

    if target_w > max_w {
        target_w = max_w;
        target_h = target_w / aspect;
    }

    if target_h > max_h {
        target_h = max_h;
        target_w = target_h * aspect;
    }

    Dimensions {
        width: target_w.floor() as u32,
        height: target_h.floor() as u32,
    }
}

/// Compute where to draw the source on a fixed-size destination buffer.
///
/// The image is "tall" when `width < height`. Its elongation (long side over
/// short side) is compared with `scale`:
///
/// - **Above `scale`**: the short side is zoomed to [`PLACEMENT_BASELINE`]
///   and the long side overflows; overflow beyond the max bound is split
///   evenly so the crop is centered.
/// - **At or below `scale`**: the long side is fitted to its max bound and
///   nothing is cropped.
///
/// Offsets are zero or negative: a negative offset shifts the drawn image so
/// that the overflow is cut off on both ends.
pub fn calc_position(
    width: u32,
    height: u32,
    max_width: u32,
    max_height: u32,
    scale: f32,
) -> Placement {
    if width == 0 || height == 0 {
        return Placement::default();
    }

    let (w, h) = (width as f64, height as f64);
    let (max_w, max_h) = (max_width as f64, max_height as f64);
    let is_tall = width < height;
    let elongation = if is_tall { h / w } else { w / h };

    let (draw_w, draw_h, x, y) = if elongation > scale as f64 {
        if is_tall {
            let zoom = w / PLACEMENT_BASELINE;
            let draw_h = h / zoom;
            let y = if draw_h > max_h { (draw_h - max_h) / 2.0 } else { 0.0 };
            (PLACEMENT_BASELINE, draw_h, 0.0, y)
        } else {
            let zoom = h / PLACEMENT_BASELINE;
            let draw_w = w / zoom;
            let x = if draw_w > max_w { (draw_w - max_w) / 2.0 } else { 0.0 };
            (draw_w, PLACEMENT_BASELINE, x, 0.0)
        }
    } else if is_tall {
        let zoom = h / max_h;
        (w / zoom, max_h, 0.0, 0.0)
    } else {
        let zoom = w / max_w;
        (max_w, h / zoom, 0.0, 0.0)
    };

    Placement {
        width: draw_w.floor() as u32,
        height: draw_h.floor() as u32,
        x_offset: -(x.floor() as i64),
        y_offset: -(y.floor() as i64),
    }
}

/// Resolve the full target geometry for a thumbnail of `original`.
///
/// In proportional mode the canvas is exactly [`calculate_size`] and the
/// source covers it. In canvas mode the placement comes from
/// [`calc_position`] and the canvas is the drawn area clamped to the bounds.
///
/// A source with pixels always gets at least a 1×1 canvas: flooring an
/// extreme aspect ratio never collapses an axis to zero. Only a degenerate
/// source yields a degenerate geometry.
pub fn plan_geometry(original: Dimensions, config: &ThumbnailConfig) -> TargetGeometry {
    if original.is_degenerate() {
        return TargetGeometry::identity(Dimensions::ZERO);
    }
    match config.fit {
        FitMode::Proportional => {
            let canvas = at_least_one_pixel(calculate_size(
                original.width as i64,
                original.height as i64,
                config.max_width,
                config.max_height,
            ));
            TargetGeometry::identity(canvas)
        }
        FitMode::Canvas => {
            let mut placement = calc_position(
                original.width,
                original.height,
                config.max_width,
                config.max_height,
                config.scale,
            );
            placement.width = placement.width.max(1);
            placement.height = placement.height.max(1);
            TargetGeometry {
                canvas: at_least_one_pixel(Dimensions {
                    width: placement.width.min(config.max_width),
                    height: placement.height.min(config.max_height),
                }),
                placement,
            }
        }
    }
}

fn at_least_one_pixel(dimensions: Dimensions) -> Dimensions {
    Dimensions::new(dimensions.width.max(1), dimensions.height.max(1))
}

/// On-screen display size for a message bubble.
///
/// If either side exceeds `max_show`, the larger side becomes `max_show` and
/// the other follows the aspect ratio; otherwise the original size is kept.
pub fn calculate_display_size(width: u32, height: u32, max_show: u32) -> (f64, f64) {
    if width == 0 || height == 0 {
        return (0.0, 0.0);
    }
    if width <= max_show && height <= max_show {
        return (width as f64, height as f64);
    }

    let ratio = height as f64 / width as f64;
    let max_show = max_show as f64;
    if width > height {
        (max_show, max_show * ratio)
    } else {
        (max_show / ratio, max_show)
    }
}
