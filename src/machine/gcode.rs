//! G-code builders and reply parsers for RepRapFirmware style controllers.

use once_cell::sync::Lazy;
use regex::Regex;

use super::Position;

static AXIS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([XYZ]):\s*(-?\d+(?:\.\d+)?)").expect("valid axis regex"));

fn axes(x: Option<f64>, y: Option<f64>) -> String {
    let mut words = Vec::new();
    if let Some(x) = x {
        words.push(format!("X{:.3}", x));
    }
    if let Some(y) = y {
        words.push(format!("Y{:.3}", y));
    }
    words.join(" ")
}

/// Block the input channel until queued moves have finished.
pub fn wait_for_moves() -> String {
    "M400".to_string()
}

/// Relative move, restoring absolute mode afterwards.
///
/// Ends with `M400` so the controller stays busy until the carriage stops
/// and a status poll right after sending cannot report a stale idle.
pub fn relative_move(x: Option<f64>, y: Option<f64>, speed: f64) -> String {
    format!("G91\nG1 {} F{:.0}\nG90\n{}", axes(x, y), speed, wait_for_moves())
}

/// Absolute move, followed by `M400`.
pub fn absolute_move(x: Option<f64>, y: Option<f64>, speed: f64) -> String {
    format!("G90\nG1 {} F{:.0}\n{}", axes(x, y), speed, wait_for_moves())
}

pub fn select_tool(tool: usize) -> String {
    format!("T{}", tool)
}

pub fn deselect_tools() -> String {
    "T-1".to_string()
}

/// Program a tool offset.
pub fn set_tool_offset(tool: usize, x: f64, y: f64, z: f64) -> String {
    format!("G10 P{} X{:.3} Y{:.3} Z{:.3}", tool, x, y, z)
}

/// Maximum instantaneous speed change (jerk) for X and Y.
pub fn max_jerk(mm_per_min: f64) -> String {
    format!("M566 X{:.0} Y{:.0}", mm_per_min, mm_per_min)
}

pub fn report_position() -> String {
    "M114".to_string()
}

/// Save tool offsets to non-volatile storage.
pub fn save_offsets() -> String {
    "M500 P10".to_string()
}

/// Parse an `M114` reply such as `X:10.000 Y:20.000 Z:5.000 E:0.000 ...`.
///
/// Only the first occurrence of each axis is used, which is the user position.
pub fn parse_position(reply: &str) -> Option<Position> {
    let (mut x, mut y, mut z) = (None, None, None);
    for captures in AXIS_PATTERN.captures_iter(reply) {
        let value: f64 = captures[2].parse().ok()?;
        let slot = match &captures[1] {
            "X" => &mut x,
            "Y" => &mut y,
            _ => &mut z,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }
    Some(Position::new(x?, y?, z.unwrap_or(0.0)))
}
