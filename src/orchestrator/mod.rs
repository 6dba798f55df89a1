//! Orchestration: lifecycle state machine, periodic cycles, queue
//! worker, heartbeat, and self-heal

pub mod orchestrator;
pub mod state;

pub use orchestrator::{
    CancelOrderPayload, ClosePositionPayload, HeartbeatReport, Orchestrator,
    OrchestratorSettings, SubmitOrderPayload,
};
pub use state::{AgentStatus, OperatingMode, RunState};
