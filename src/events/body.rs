//! 消息体与流式片段
//!
//! AgentMessageBody 是定稿的 Agent 消息（文本 + 工具调用 + 无效工具调用）；
//! MessageChunk 是一次流式增量；MessageSnapshot 是截至某一增量的累计状态，
//! 通过 `apply` 纯函数折叠得到，从不原地修改。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::ToolCall;

/// 参数无法解析为 JSON 的工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvalidToolCall {
    pub id: String,
    pub name: Option<String>,
    /// 原始参数文本
    pub args: Option<String>,
    pub error: Option<String>,
}

/// 工具调用记录：有效或无效调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolCallRecord {
    Valid(ToolCall),
    Invalid(InvalidToolCall),
}

impl ToolCallRecord {
    pub fn id(&self) -> &str {
        match self {
            ToolCallRecord::Valid(c) => &c.id,
            ToolCallRecord::Invalid(c) => &c.id,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            ToolCallRecord::Valid(c) => Some(&c.name),
            ToolCallRecord::Invalid(c) => c.name.as_deref(),
        }
    }

    /// 调用参数；无效调用返回原始文本（无文本时为 Null）
    pub fn args(&self) -> Value {
        match self {
            ToolCallRecord::Valid(c) => c.args.clone(),
            ToolCallRecord::Invalid(c) => c.args.clone().map(Value::String).unwrap_or(Value::Null),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ToolCallRecord::Valid(_))
    }
}

impl From<ToolCall> for ToolCallRecord {
    fn from(call: ToolCall) -> Self {
        ToolCallRecord::Valid(call)
    }
}

/// 定稿的 Agent 消息体
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMessageBody {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub invalid_tool_calls: Vec<InvalidToolCall>,
    /// 作者名，由 AgentMessage 构造时写入
    #[serde(default)]
    pub name: Option<String>,
}

impl AgentMessageBody {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_tool_call(mut self, call: ToolCall) -> Self {
        self.tool_calls.push(call);
        self
    }

    /// 有效调用在前、无效调用在后
    pub fn all_calls(&self) -> impl Iterator<Item = ToolCallRecord> + '_ {
        self.tool_calls
            .iter()
            .cloned()
            .map(ToolCallRecord::Valid)
            .chain(self.invalid_tool_calls.iter().cloned().map(ToolCallRecord::Invalid))
    }
}

/// 一个工具调用的流式片段；index 指向快照工具调用列表中的位置
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallChunk {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    /// 参数 JSON 文本片段
    pub args: Option<String>,
}

/// 一次流式增量
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageChunk {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_call_chunks: Vec<ToolCallChunk>,
}

impl MessageChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_call_chunks: Vec::new(),
        }
    }

    pub fn tool_call(chunk: ToolCallChunk) -> Self {
        Self {
            content: String::new(),
            tool_call_chunks: vec![chunk],
        }
    }
}

/// 快照中正在构建的工具调用
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialToolCall {
    pub id: String,
    pub name: String,
    pub args_json: String,
}

impl PartialToolCall {
    /// 当前参数：可解析则为 JSON，尚不完整时为空对象
    pub fn args(&self) -> Value {
        if self.args_json.trim().is_empty() {
            return Value::Object(Default::default());
        }
        serde_json::from_str(&self.args_json).unwrap_or_else(|_| Value::Object(Default::default()))
    }

    pub fn to_tool_call(&self) -> ToolCall {
        ToolCall::new(self.id.clone(), self.name.clone(), self.args())
    }
}

/// 流式消息的累计快照
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageSnapshot {
    pub content: String,
    pub tool_calls: Vec<PartialToolCall>,
}

impl MessageSnapshot {
    /// 折叠一个增量，返回新快照：正文追加；工具片段按 index 落位，id/name 首次出现时写入，参数追加
    pub fn apply(&self, chunk: &MessageChunk) -> MessageSnapshot {
        let mut next = self.clone();
        next.content.push_str(&chunk.content);
        for piece in &chunk.tool_call_chunks {
            if next.tool_calls.len() <= piece.index {
                next.tool_calls.resize_with(piece.index + 1, PartialToolCall::default);
            }
            let call = &mut next.tool_calls[piece.index];
            if let Some(id) = piece.id.as_ref().filter(|id| !id.is_empty()) {
                if call.id.is_empty() {
                    call.id = id.clone();
                }
            }
            if let Some(name) = piece.name.as_ref().filter(|n| !n.is_empty()) {
                if call.name.is_empty() {
                    call.name = name.clone();
                }
            }
            if let Some(args) = &piece.args {
                call.args_json.push_str(args);
            }
        }
        next
    }

    /// 定稿：参数可解析的调用成为 ToolCall，否则成为 InvalidToolCall
    pub fn to_body(&self) -> AgentMessageBody {
        let mut body = AgentMessageBody::text(self.content.clone());
        for call in &self.tool_calls {
            let parsed = if call.args_json.trim().is_empty() {
                Ok(Value::Object(Default::default()))
            } else {
                serde_json::from_str::<Value>(&call.args_json)
            };
            match parsed {
                Ok(args) => body.tool_calls.push(ToolCall::new(call.id.clone(), call.name.clone(), args)),
                Err(e) => body.invalid_tool_calls.push(InvalidToolCall {
                    id: call.id.clone(),
                    name: Some(call.name.clone()).filter(|n| !n.is_empty()),
                    args: Some(call.args_json.clone()),
                    error: Some(e.to_string()),
                }),
            }
        }
        body
    }
}

/// 工具执行结果载荷
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}
