//! 核心层：错误类型、轮次状态、会话监管

pub mod error;
pub mod session_supervisor;
pub mod state;

pub use error::{HistoryError, OrchestrationError, ToolError};
pub use session_supervisor::SessionSupervisor;
pub use state::{SessionEndReason, SessionSummary, TurnPhase};
