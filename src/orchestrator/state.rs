//! Agent lifecycle state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How much autonomy the loop is granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// Analyze and trade without operator involvement.
    Autonomous,
    /// Analyze and record intents; trades wait for operator approval.
    SemiAuto,
    /// Cycles idle; only operator-initiated actions run.
    Manual,
}

impl OperatingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::Autonomous => "autonomous",
            OperatingMode::SemiAuto => "semi_auto",
            OperatingMode::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "autonomous" => Some(OperatingMode::Autonomous),
            "semi_auto" => Some(OperatingMode::SemiAuto),
            "manual" => Some(OperatingMode::Manual),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Stopped,
    Running,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Stopped => "stopped",
            RunState::Running => "running",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stopped" => Some(RunState::Stopped),
            "running" => Some(RunState::Running),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the agent's observable state, persisted as a single row
/// and served from the admin API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub state: RunState,
    pub mode: OperatingMode,
    pub kill_switch_active: bool,
    pub consecutive_errors: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_analysis_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
