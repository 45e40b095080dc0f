//! RepRapFirmware (Duet) HTTP driver.

use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};

use super::gcode;
use super::{DeclaredOffset, MachineError, MachineMotion, MachineStatus, Position};

/// Default time allowed for a tool change to complete.
pub const DEFAULT_TOOL_CHANGE_TIMEOUT_SECS: u64 = 60;

/// Connection settings for a Duet controller.
#[derive(Debug, Clone)]
pub struct DuetConfig {
    pub base_url: String,
    pub password: String,
    pub request_timeout_secs: u64,
    pub tool_change_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for DuetConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost".to_string(),
            password: String::new(),
            request_timeout_secs: 10,
            tool_change_timeout_secs: DEFAULT_TOOL_CHANGE_TIMEOUT_SECS,
            poll_interval_ms: 250,
        }
    }
}

impl DuetConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_tool_change_timeout(mut self, secs: u64) -> Self {
        self.tool_change_timeout_secs = secs;
        self
    }
}

#[derive(Debug, Deserialize)]
struct ConnectResponse {
    err: i32,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    tools: Vec<ToolStatus>,
}

#[derive(Debug, Deserialize)]
struct ToolStatus {
    number: usize,
    #[serde(default)]
    offsets: Vec<f64>,
}

/// Client for the RepRapFirmware `rr_*` HTTP API.
pub struct DuetClient {
    config: DuetConfig,
    client: Client,
}

impl DuetClient {
    pub fn new(config: DuetConfig) -> Result<Self, MachineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    /// Open a session with the controller.
    pub async fn connect(&self) -> Result<(), MachineError> {
        let url = format!("{}/rr_connect", self.config.base_url);
        let response: ConnectResponse = self
            .client
            .get(&url)
            .query(&[("password", self.config.password.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match response.err {
            0 => {
                tracing::info!("Connected to {}", self.config.base_url);
                Ok(())
            }
            1 => Err(MachineError::Connection("invalid password".to_string())),
            2 => Err(MachineError::Connection("no free session".to_string())),
            code => Err(MachineError::Connection(format!("rr_connect error {}", code))),
        }
    }

    /// Close the session.
    pub async fn disconnect(&self) -> Result<(), MachineError> {
        let url = format!("{}/rr_disconnect", self.config.base_url);
        self.client.get(&url).send().await?.error_for_status()?;
        Ok(())
    }

    /// Queue G-code for execution.
    pub async fn send_gcode(&self, code: &str) -> Result<(), MachineError> {
        tracing::debug!("G-code: {}", code.replace('\n', " | "));
        let url = format!("{}/rr_gcode", self.config.base_url);
        self.client
            .get(&url)
            .query(&[("gcode", code)])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Fetch the buffered G-code replies.
    pub async fn reply(&self) -> Result<String, MachineError> {
        let url = format!("{}/rr_reply", self.config.base_url);
        let text = self.client.get(&url).send().await?.error_for_status()?.text().await?;
        Ok(text)
    }

    async fn extended_status(&self) -> Result<StatusResponse, MachineError> {
        let url = format!("{}/rr_status", self.config.base_url);
        self.client
            .get(&url)
            .query(&[("type", "2")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| MachineError::ParseError(e.to_string()))
    }

    /// Give the firmware a moment to pick up queued G-code and leave the idle state.
    async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
    }

    async fn wait_for_tool_change(&self, what: &str) -> Result<(), MachineError> {
        let started = Instant::now();
        let limit = Duration::from_secs(self.config.tool_change_timeout_secs);
        self.settle().await;
        loop {
            if self.status().await? == MachineStatus::Idle {
                return Ok(());
            }
            if started.elapsed() > limit {
                return Err(MachineError::Timeout(self.config.tool_change_timeout_secs, what.to_string()));
            }
            tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
        }
    }
}

/// Map the single-letter `rr_status` code.
fn parse_status(code: &str) -> Result<MachineStatus, MachineError> {
    match code {
        "I" | "O" => Ok(MachineStatus::Idle),
        "S" | "A" | "D" => Ok(MachineStatus::Paused),
        "H" => Err(MachineError::Halted),
        "" => Err(MachineError::ParseError("empty status".to_string())),
        _ => Ok(MachineStatus::Processing),
    }
}

impl MachineMotion for DuetClient {
    async fn move_relative(&self, x: Option<f64>, y: Option<f64>, speed: f64) -> Result<(), MachineError> {
        if x.is_none() && y.is_none() {
            return Ok(());
        }
        self.send_gcode(&gcode::relative_move(x, y, speed)).await?;
        self.settle().await;
        Ok(())
    }

    async fn move_absolute(&self, x: Option<f64>, y: Option<f64>, speed: f64) -> Result<(), MachineError> {
        if x.is_none() && y.is_none() {
            return Ok(());
        }
        self.send_gcode(&gcode::absolute_move(x, y, speed)).await?;
        self.settle().await;
        Ok(())
    }

    async fn status(&self) -> Result<MachineStatus, MachineError> {
        let status = self.extended_status().await?;
        parse_status(&status.status)
    }

    async fn coordinates(&self) -> Result<Position, MachineError> {
        // Drain stale replies so the next one belongs to our M114.
        self.reply().await?;
        self.send_gcode(&gcode::report_position()).await?;
        tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
        let reply = self.reply().await?;
        gcode::parse_position(&reply)
            .ok_or_else(|| MachineError::ParseError(format!("unexpected M114 reply: {}", reply.trim())))
    }

    async fn load_tool(&self, tool: usize) -> Result<(), MachineError> {
        self.send_gcode(&gcode::select_tool(tool)).await?;
        self.wait_for_tool_change(&format!("tool {} to load", tool)).await
    }

    async fn unload_tools(&self) -> Result<(), MachineError> {
        self.send_gcode(&gcode::deselect_tools()).await?;
        self.wait_for_tool_change("tools to unload").await
    }

    async fn tool_offset(&self, tool: usize) -> Result<DeclaredOffset, MachineError> {
        let status = self.extended_status().await?;
        let entry = status
            .tools
            .iter()
            .find(|t| t.number == tool)
            .ok_or_else(|| MachineError::ParseError(format!("tool {} not defined", tool)))?;
        let axis = |i: usize| entry.offsets.get(i).copied().unwrap_or(0.0);
        Ok(DeclaredOffset {
            x: axis(0),
            y: axis(1),
            z: axis(2),
        })
    }

    async fn set_tool_offset(&self, tool: usize, x: f64, y: f64, z: f64) -> Result<(), MachineError> {
        self.send_gcode(&gcode::set_tool_offset(tool, x, y, z)).await
    }

    async fn set_max_jerk(&self, mm_per_min: f64) -> Result<(), MachineError> {
        self.send_gcode(&gcode::max_jerk(mm_per_min)).await
    }

    async fn save_tool_offsets(&self) -> Result<(), MachineError> {
        self.send_gcode(&gcode::save_offsets()).await
    }
}
