use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::session::{ControlledPoint, ToolOffset};

/// Results of one calibration session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub controlled_point: ControlledPoint,
    pub offsets: Vec<ToolOffset>,
}

impl SessionReport {
    pub fn new(started_at: DateTime<Utc>, controlled_point: ControlledPoint, offsets: Vec<ToolOffset>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            controlled_point,
            offsets,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
