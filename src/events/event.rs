//! 对话事件
//!
//! 每个动作（消息、增量、工具调用、工具结果、结束轮次）都是一条不可变事件；
//! 持久化与否由事件种类决定：*Delta 与 AgentContent 只在实时通道中出现。

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::agent::Agent;
use crate::events::body::{
    AgentMessageBody, MessageChunk, MessageSnapshot, PartialToolCall, ToolCallChunk, ToolCallRecord,
    ToolOutput,
};
use crate::events::resolve::{resolve_tool, DiscardReason, Resolution};
use crate::tools::Tool;

/// 编排器消息的默认前缀
pub const ORCHESTRATOR_PREFIX: &str = "The following message is from the orchestrator.";

/// 已解析的工具（Debug 只打印名称）
#[derive(Clone)]
pub struct ResolvedTool(pub Arc<dyn Tool>);

impl ResolvedTool {
    pub fn name(&self) -> &str {
        self.0.name()
    }
}

impl fmt::Debug for ResolvedTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResolvedTool").field(&self.name()).finish()
    }
}

/// 用户消息
#[derive(Clone, Debug)]
pub struct UserMessage {
    pub content: String,
}

impl UserMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// 编排器发给 Agent 的消息；prefix 为注释性前缀，name 为展示名
#[derive(Clone, Debug)]
pub struct OrchestratorMessage {
    pub content: String,
    pub prefix: Option<String>,
    pub name: Option<String>,
}

impl OrchestratorMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            prefix: Some(ORCHESTRATOR_PREFIX.to_string()),
            name: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 实际使用的前缀：未设置时回落到默认横幅
    pub fn effective_prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or(ORCHESTRATOR_PREFIX)
    }
}

/// 定稿的 Agent 消息；构造时把作者名写入消息体
#[derive(Clone, Debug)]
pub struct AgentMessage {
    agent: Agent,
    body: AgentMessageBody,
}

impl AgentMessage {
    pub fn new(agent: Agent, mut body: AgentMessageBody) -> Self {
        body.name = Some(agent.name().to_string());
        Self { agent, body }
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn body(&self) -> &AgentMessageBody {
        &self.body
    }

    /// 按名称在 tools 中解析每个调用（有效与无效调用都参与），解析不到的丢弃
    pub fn to_tool_calls(&self, tools: &[Arc<dyn Tool>]) -> Vec<AgentToolCall> {
        self.body
            .all_calls()
            .filter_map(|call| {
                resolve_tool(tools, call.name())
                    .keep()
                    .map(|tool| AgentToolCall {
                        agent: self.agent.clone(),
                        args: call.args(),
                        tool: ResolvedTool(tool),
                        tool_call: call,
                    })
            })
            .collect()
    }

    pub fn to_content(&self) -> AgentContent {
        AgentContent {
            agent: self.agent.clone(),
            content: self.body.content.clone(),
        }
    }

    /// [消息本身, AgentContent, 已解析的 ToolCall...]
    pub fn all_related_events(&self, tools: &[Arc<dyn Tool>]) -> Vec<EventKind> {
        let mut events = vec![
            EventKind::AgentMessage(self.clone()),
            EventKind::AgentContent(self.to_content()),
        ];
        events.extend(self.to_tool_calls(tools).into_iter().map(EventKind::ToolCall));
        events
    }
}

/// 流式增量：片段 + 截至此刻的累计快照
#[derive(Clone, Debug)]
pub struct AgentMessageDelta {
    agent: Agent,
    delta: MessageChunk,
    snapshot: MessageSnapshot,
}

impl AgentMessageDelta {
    pub fn new(agent: Agent, delta: MessageChunk, snapshot: MessageSnapshot) -> Self {
        Self {
            agent,
            delta,
            snapshot,
        }
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn delta(&self) -> &MessageChunk {
        &self.delta
    }

    pub fn snapshot(&self) -> &MessageSnapshot {
        &self.snapshot
    }

    /// 单个工具片段：按 index 匹配快照中的调用，再按名称解析工具
    pub fn resolve_tool_call_delta(
        &self,
        piece: &ToolCallChunk,
        tools: &[Arc<dyn Tool>],
    ) -> Resolution<AgentToolCallDelta> {
        let Some(call_snapshot) = self.snapshot.tool_calls.get(piece.index) else {
            return Resolution::Discarded(DiscardReason::MalformedDelta { index: piece.index });
        };
        match resolve_tool(tools, Some(call_snapshot.name.as_str())) {
            Resolution::Resolved(tool) => Resolution::Resolved(AgentToolCallDelta {
                agent: self.agent.clone(),
                delta: piece.clone(),
                snapshot: call_snapshot.clone(),
                tool: ResolvedTool(tool),
                args: call_snapshot.args(),
            }),
            Resolution::Discarded(reason) => Resolution::Discarded(reason),
        }
    }

    pub fn to_tool_call_deltas(&self, tools: &[Arc<dyn Tool>]) -> Vec<AgentToolCallDelta> {
        self.delta
            .tool_call_chunks
            .iter()
            .filter_map(|piece| self.resolve_tool_call_delta(piece, tools).keep())
            .collect()
    }

    pub fn to_content_delta(&self) -> AgentContentDelta {
        AgentContentDelta {
            agent: self.agent.clone(),
            delta: self.delta.content.clone(),
            snapshot: self.snapshot.content.clone(),
        }
    }

    /// [增量本身, AgentContentDelta, 已解析的 ToolCallDelta...]
    pub fn all_related_events(&self, tools: &[Arc<dyn Tool>]) -> Vec<EventKind> {
        let mut events = vec![
            EventKind::AgentMessageDelta(self.clone()),
            EventKind::AgentContentDelta(self.to_content_delta()),
        ];
        events.extend(
            self.to_tool_call_deltas(tools)
                .into_iter()
                .map(EventKind::ToolCallDelta),
        );
        events
    }
}

/// 定稿消息的文本部分
#[derive(Clone, Debug)]
pub struct AgentContent {
    pub agent: Agent,
    pub content: String,
}

/// 文本增量：片段 + 累计文本
#[derive(Clone, Debug)]
pub struct AgentContentDelta {
    pub agent: Agent,
    pub delta: String,
    pub snapshot: String,
}

/// 工具调用增量：片段 + 快照中匹配到的调用 + 解析到的工具 + 当前参数
#[derive(Clone, Debug)]
pub struct AgentToolCallDelta {
    pub agent: Agent,
    pub delta: ToolCallChunk,
    pub snapshot: PartialToolCall,
    pub tool: ResolvedTool,
    pub args: serde_json::Value,
}

/// 已解析的工具调用
#[derive(Clone, Debug)]
pub struct AgentToolCall {
    pub agent: Agent,
    pub tool_call: ToolCallRecord,
    pub tool: ResolvedTool,
    pub args: serde_json::Value,
}

/// 工具结果：发起调用的 Agent、原始调用记录与结果载荷
#[derive(Clone, Debug)]
pub struct ToolResult {
    pub agent: Agent,
    pub tool_call: ToolCallRecord,
    pub result: ToolOutput,
}

/// 轮次结束；next_agent_name 为下一位行动者
#[derive(Clone, Debug)]
pub struct EndTurn {
    pub agent: Agent,
    pub next_agent_name: Option<String>,
}

/// 事件种类
#[derive(Clone, Debug)]
pub enum EventKind {
    UserMessage(UserMessage),
    OrchestratorMessage(OrchestratorMessage),
    AgentMessage(AgentMessage),
    AgentMessageDelta(AgentMessageDelta),
    AgentContent(AgentContent),
    AgentContentDelta(AgentContentDelta),
    ToolCallDelta(AgentToolCallDelta),
    ToolCall(AgentToolCall),
    ToolResult(ToolResult),
    EndTurn(EndTurn),
}

impl EventKind {
    /// 是否写入持久事件序列
    pub fn persisted(&self) -> bool {
        !matches!(
            self,
            EventKind::AgentMessageDelta(_)
                | EventKind::AgentContent(_)
                | EventKind::AgentContentDelta(_)
                | EventKind::ToolCallDelta(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::UserMessage(_) => "user-message",
            EventKind::OrchestratorMessage(_) => "orchestrator-message",
            EventKind::AgentMessage(_) => "agent-message",
            EventKind::AgentMessageDelta(_) => "agent-message-delta",
            EventKind::AgentContent(_) => "agent-content",
            EventKind::AgentContentDelta(_) => "agent-content-delta",
            EventKind::ToolCallDelta(_) => "agent-tool-call-delta",
            EventKind::ToolCall(_) => "tool-call",
            EventKind::ToolResult(_) => "tool-result",
            EventKind::EndTurn(_) => "end-turn",
        }
    }
}

macro_rules! impl_from_event {
    ($($ty:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for EventKind {
                fn from(value: $ty) -> Self {
                    EventKind::$variant(value)
                }
            }
        )*
    };
}

impl_from_event!(
    UserMessage => UserMessage,
    OrchestratorMessage => OrchestratorMessage,
    AgentMessage => AgentMessage,
    AgentMessageDelta => AgentMessageDelta,
    AgentContent => AgentContent,
    AgentContentDelta => AgentContentDelta,
    AgentToolCallDelta => ToolCallDelta,
    AgentToolCall => ToolCall,
    ToolResult => ToolResult,
    EndTurn => EndTurn,
);

/// 带时间戳的事件
#[derive(Clone, Debug)]
pub struct Event {
    kind: EventKind,
    timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: impl Into<EventKind>) -> Self {
        Self {
            kind: kind.into(),
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn persisted(&self) -> bool {
        self.kind.persisted()
    }
}
