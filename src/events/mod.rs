//! 事件层：事件模型、流式快照折叠、只追加日志、转录编译

pub mod body;
pub mod compiler;
pub mod event;
pub mod log;
pub mod resolve;

pub use body::{
    AgentMessageBody, InvalidToolCall, MessageChunk, MessageSnapshot, PartialToolCall, ToolCallChunk,
    ToolCallRecord, ToolOutput,
};
pub use compiler::{compile_transcript, CompileContext, ToMessages, TranscriptCompiler};
pub use event::{
    AgentContent, AgentContentDelta, AgentMessage, AgentMessageDelta, AgentToolCall, AgentToolCallDelta,
    EndTurn, Event, EventKind, OrchestratorMessage, ResolvedTool, ToolResult, UserMessage,
    ORCHESTRATOR_PREFIX,
};
pub use log::EventLog;
pub use resolve::{resolve_tool, DiscardReason, Resolution};
