//! Runtime settings for the tool-aligner CLI, read from the environment.

use std::env;
use std::time::Duration;

use crate::calibration::{AlignConfig, ControlledPoint};
use crate::machine::DuetConfig;
use crate::vision::DEFAULT_GAMMA;

/// Settings gathered from `ALIGNER_*` environment variables.
#[derive(Debug, Clone)]
pub struct AlignSettings {
    /// Controller base URL
    pub machine_url: String,
    /// Controller password
    pub machine_password: String,
    /// Seconds allowed for a tool change
    pub tool_change_timeout_secs: u64,
    /// Command that writes one PNG/JPEG frame to stdout
    pub camera_command: String,
    /// Tools to calibrate, in order
    pub tools: Vec<usize>,
    /// Controlled point X; when unset together with Y the current position is used
    pub cp_x: Option<f64>,
    /// Controlled point Y
    pub cp_y: Option<f64>,
    /// Gamma applied before detection
    pub gamma: f64,
    /// Calibration and centering feed rate (mm/min)
    pub move_speed: f64,
    /// Travel feed rate (mm/min)
    pub travel_speed: f64,
    /// XY jerk limit while centering (mm/min)
    pub max_jerk: f64,
    /// Status poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Corrective moves allowed per tool
    pub max_centering_moves: u32,
    /// Share the first tool's transform with later tools
    pub reuse_transform: bool,
}

impl Default for AlignSettings {
    fn default() -> Self {
        let config = AlignConfig::default();
        Self {
            machine_url: "http://localhost".to_string(),
            machine_password: String::new(),
            tool_change_timeout_secs: 60,
            camera_command: "fswebcam --no-banner --png -1 -".to_string(),
            tools: vec![0],
            cp_x: None,
            cp_y: None,
            gamma: DEFAULT_GAMMA,
            move_speed: config.move_speed,
            travel_speed: config.travel_speed,
            max_jerk: config.max_jerk,
            poll_interval_ms: config.poll_interval.as_millis() as u64,
            max_centering_moves: config.max_centering_moves,
            reuse_transform: config.reuse_transform,
        }
    }
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
}

/// Parse a tool list such as `0,1, 3`; invalid entries are skipped.
pub fn parse_tools(value: &str) -> Vec<usize> {
    value
        .split(',')
        .filter_map(|t| t.trim().parse().ok())
        .collect()
}

impl AlignSettings {
    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read settings through `lookup`. Unset or unparsable values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        let number = |key: &str| lookup(key).and_then(|s| s.trim().parse::<f64>().ok());
        let integer = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());
        let count = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u32>().ok());

        if let Some(url) = lookup("ALIGNER_MACHINE_URL") {
            settings.machine_url = url;
        }
        if let Some(password) = lookup("ALIGNER_MACHINE_PASSWORD") {
            settings.machine_password = password;
        }
        if let Some(secs) = integer("ALIGNER_TOOL_CHANGE_TIMEOUT") {
            settings.tool_change_timeout_secs = secs;
        }
        if let Some(command) = lookup("ALIGNER_CAMERA_COMMAND") {
            settings.camera_command = command;
        }
        if let Some(tools) = lookup("ALIGNER_TOOLS").map(|s| parse_tools(&s)) {
            if !tools.is_empty() {
                settings.tools = tools;
            }
        }
        settings.cp_x = number("ALIGNER_CP_X");
        settings.cp_y = number("ALIGNER_CP_Y");
        if let Some(gamma) = number("ALIGNER_GAMMA") {
            settings.gamma = gamma;
        }
        if let Some(speed) = number("ALIGNER_MOVE_SPEED") {
            settings.move_speed = speed;
        }
        if let Some(speed) = number("ALIGNER_TRAVEL_SPEED") {
            settings.travel_speed = speed;
        }
        if let Some(jerk) = number("ALIGNER_MAX_JERK") {
            settings.max_jerk = jerk;
        }
        if let Some(ms) = integer("ALIGNER_POLL_MS") {
            settings.poll_interval_ms = ms;
        }
        if let Some(moves) = count("ALIGNER_MAX_MOVES") {
            settings.max_centering_moves = moves;
        }
        if let Some(flag) = lookup("ALIGNER_REUSE_TRANSFORM") {
            settings.reuse_transform = parse_flag(&flag);
        }
        settings
    }

    /// Controlled point, when both coordinates are configured.
    pub fn controlled_point(&self) -> Option<ControlledPoint> {
        Some(ControlledPoint::new(self.cp_x?, self.cp_y?))
    }

    pub fn align_config(&self) -> AlignConfig {
        let mut config = AlignConfig::default()
            .with_gamma(self.gamma)
            .with_speeds(self.move_speed, self.travel_speed)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_max_centering_moves(self.max_centering_moves)
            .with_transform_reuse(self.reuse_transform);
        config.max_jerk = self.max_jerk;
        config
    }

    pub fn duet_config(&self) -> DuetConfig {
        DuetConfig::default()
            .with_base_url(&self.machine_url)
            .with_password(&self.machine_password)
            .with_tool_change_timeout(self.tool_change_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> AlignSettings {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AlignSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_without_environment() {
        let settings = settings(&[]);
        assert_eq!(settings.tools, vec![0]);
        assert!(settings.controlled_point().is_none());
        assert_eq!(settings.align_config().max_centering_moves, 50);
    }

    #[test]
    fn test_reads_environment() {
        let settings = settings(&[
            ("ALIGNER_MACHINE_URL", "http://duet.local/"),
            ("ALIGNER_TOOLS", "0, 1,x,3"),
            ("ALIGNER_CP_X", "150.5"),
            ("ALIGNER_CP_Y", "98"),
            ("ALIGNER_GAMMA", "1.4"),
            ("ALIGNER_POLL_MS", "100"),
            ("ALIGNER_REUSE_TRANSFORM", "true"),
        ]);
        assert_eq!(settings.tools, vec![0, 1, 3]);
        assert_eq!(settings.controlled_point(), Some(ControlledPoint::new(150.5, 98.0)));

        let config = settings.align_config();
        assert_eq!(config.gamma, 1.4);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert!(config.reuse_transform);
        assert_eq!(settings.duet_config().base_url, "http://duet.local");
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let settings = settings(&[("ALIGNER_GAMMA", "bright"), ("ALIGNER_TOOLS", ""), ("ALIGNER_CP_X", "1.0")]);
        assert_eq!(settings.gamma, DEFAULT_GAMMA);
        assert_eq!(settings.tools, vec![0]);
        assert!(settings.controlled_point().is_none());
    }

    #[test]
    fn test_max_moves_out_of_range_keeps_default() {
        assert_eq!(settings(&[("ALIGNER_MAX_MOVES", "12")]).max_centering_moves, 12);
        // 2^32 + 5 would wrap to 5 if truncated
        let settings = settings(&[("ALIGNER_MAX_MOVES", "4294967301")]);
        assert_eq!(settings.max_centering_moves, AlignConfig::default().max_centering_moves);
    }
}
