//! 编排错误类型
//!
//! OrchestrationError：轮次控制与委派失败；ToolError：工具执行失败（含控制工具的类型化错误）；
//! HistoryError：历史存储读写失败。

use thiserror::Error;

/// 轮次编排过程中的错误（委派目标不存在、无可用 Agent、Runner 失败等）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestrationError {
    /// delegate_to_agent 的目标 ID 不在当前可用 Agent 中
    #[error("Agent with ID {0} not found or not available.")]
    AgentNotFound(String),

    /// 可用 Agent 少于两个时调用 delegate_to_agent
    #[error("{0}")]
    Unsupported(String),

    #[error("No available agents")]
    NoAgents,

    /// 会话已结束后仍尝试开启新轮次
    #[error("Session already ended")]
    SessionEnded,

    #[error("Runner failed: {0}")]
    RunnerFailed(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl OrchestrationError {
    /// 「软」错误：对 Agent 而言只是说明性结果，不标记为工具失败
    pub fn is_soft(&self) -> bool {
        matches!(self, OrchestrationError::Unsupported(_))
    }
}

/// 工具执行错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error(transparent)]
    Control(#[from] OrchestrationError),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    Timeout(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

/// 历史存储错误
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("History I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("History JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
