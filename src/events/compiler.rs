//! 转录编译：把持久事件序列投影为某个 Agent 看到的消息上下文
//!
//! 自己写的消息保持 assistant 身份；别人的消息与工具结果改写为编排器旁白（第三人称），
//! 再按 OrchestratorMessage 规则编译。增量事件从不直接编译。

use crate::agent::Agent;
use crate::events::event::{
    AgentMessage, Event, EventKind, OrchestratorMessage, ToolResult, UserMessage,
};
use crate::memory::{Message, ToolCall};

/// 编译上下文：观看者
#[derive(Clone, Copy, Debug)]
pub struct CompileContext<'a> {
    pub agent: &'a Agent,
}

/// 单个事件的编译规则
pub trait ToMessages {
    fn to_messages(&self, ctx: &CompileContext<'_>) -> Vec<Message>;
}

impl ToMessages for UserMessage {
    fn to_messages(&self, _ctx: &CompileContext<'_>) -> Vec<Message> {
        vec![Message::user(self.content.clone())]
    }
}

impl ToMessages for OrchestratorMessage {
    fn to_messages(&self, _ctx: &CompileContext<'_>) -> Vec<Message> {
        let content = format!("({})\n\n{}", self.effective_prefix(), self.content);
        vec![Message::user(content).with_name(self.name.clone())]
    }
}

impl ToMessages for AgentMessage {
    fn to_messages(&self, ctx: &CompileContext<'_>) -> Vec<Message> {
        let body = self.body();
        if self.agent() == ctx.agent {
            // 无效调用也会得到一条工具结果，必须同样出现在 assistant 消息里
            let calls = body
                .all_calls()
                .map(|c| ToolCall::new(c.id(), c.name().unwrap_or_default(), c.args()))
                .collect();
            vec![Message::assistant(body.content.clone())
                .with_name(body.name.clone())
                .with_tool_calls(calls)]
        } else if !body.content.is_empty() {
            OrchestratorMessage::new(body.content.clone())
                .with_prefix(format!(
                    "The following message was posted by Agent \"{}\" with ID {}",
                    self.agent().name(),
                    self.agent().id()
                ))
                .with_name(self.agent().name())
                .to_messages(ctx)
        } else {
            Vec::new()
        }
    }
}

impl ToMessages for ToolResult {
    fn to_messages(&self, ctx: &CompileContext<'_>) -> Vec<Message> {
        if &self.agent == ctx.agent {
            vec![Message::tool(self.result.text.clone(), self.tool_call.id())
                .with_name(Some(self.agent.name().to_string()))]
        } else {
            let call = serde_json::to_string(&self.tool_call).unwrap_or_else(|_| self.tool_call.id().to_string());
            let outcome = if self.result.is_error { " failed and" } else { "" };
            OrchestratorMessage::new(self.result.text.clone())
                .with_prefix(format!(
                    "Agent \"{}\" with ID {} made a tool call: {}. The tool{} produced this result:",
                    self.agent.name(),
                    self.agent.id(),
                    call,
                    outcome
                ))
                .with_name(self.agent.name())
                .to_messages(ctx)
        }
    }
}

impl ToMessages for Event {
    fn to_messages(&self, ctx: &CompileContext<'_>) -> Vec<Message> {
        let messages = match self.kind() {
            EventKind::UserMessage(e) => e.to_messages(ctx),
            EventKind::OrchestratorMessage(e) => e.to_messages(ctx),
            EventKind::AgentMessage(e) => e.to_messages(ctx),
            EventKind::ToolResult(e) => e.to_messages(ctx),
            EventKind::AgentMessageDelta(_)
            | EventKind::AgentContent(_)
            | EventKind::AgentContentDelta(_)
            | EventKind::ToolCallDelta(_)
            | EventKind::ToolCall(_)
            | EventKind::EndTurn(_) => Vec::new(),
        };
        messages
            .into_iter()
            .map(|m| m.with_timestamp(self.timestamp()))
            .collect()
    }
}

/// 为观看者编译整个事件序列；非持久事件被跳过
#[derive(Clone, Copy, Debug)]
pub struct TranscriptCompiler<'a> {
    ctx: CompileContext<'a>,
}

impl<'a> TranscriptCompiler<'a> {
    pub fn new(viewer: &'a Agent) -> Self {
        Self {
            ctx: CompileContext { agent: viewer },
        }
    }

    pub fn compile(&self, events: &[Event]) -> Vec<Message> {
        events
            .iter()
            .filter(|e| e.persisted())
            .flat_map(|e| e.to_messages(&self.ctx))
            .collect()
    }
}

/// 便捷函数：compile(events, viewer)
pub fn compile_transcript(events: &[Event], viewer: &Agent) -> Vec<Message> {
    TranscriptCompiler::new(viewer).compile(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::body::{
        AgentMessageBody, InvalidToolCall, MessageChunk, MessageSnapshot, ToolCallRecord, ToolOutput,
    };
    use crate::events::event::{AgentMessageDelta, EndTurn};
    use crate::memory::Role;
    use serde_json::json;

    fn agents() -> (Agent, Agent) {
        (Agent::new("Alice"), Agent::new("Bob"))
    }

    #[test]
    fn test_user_message_passes_through() {
        let (alice, _) = agents();
        let out = compile_transcript(&[Event::new(UserMessage::new("hello"))], &alice);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].role, Role::User);
        assert_eq!(out[0].content, "hello");
    }

    #[test]
    fn test_orchestrator_message_uses_default_banner() {
        let (alice, _) = agents();
        let mut msg = OrchestratorMessage::new("status?");
        msg.prefix = None;
        let out = compile_transcript(&[Event::new(msg)], &alice);
        assert_eq!(
            out[0].content,
            "(The following message is from the orchestrator.)\n\nstatus?"
        );
    }

    #[test]
    fn test_own_agent_message_is_assistant_verbatim() {
        let (alice, _) = agents();
        let body = AgentMessageBody::text("my words")
            .with_tool_call(ToolCall::new("c1", "echo", json!({"text": "x"})));
        let out = compile_transcript(&[Event::new(AgentMessage::new(alice.clone(), body))], &alice);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].role, Role::Assistant);
        assert_eq!(out[0].content, "my words");
        assert_eq!(out[0].name.as_deref(), Some("Alice"));
        assert_eq!(out[0].tool_calls[0].id, "c1");
    }

    #[test]
    fn test_own_invalid_call_keeps_result_correlated() {
        let (alice, _) = agents();
        let mut body = AgentMessageBody::text("trying");
        body.invalid_tool_calls.push(InvalidToolCall {
            id: "c1".into(),
            name: Some("echo".into()),
            args: Some("{broken".into()),
            error: Some("expected value".into()),
        });
        let call = ToolCallRecord::Invalid(body.invalid_tool_calls[0].clone());
        let events = vec![
            Event::new(AgentMessage::new(alice.clone(), body)),
            Event::new(ToolResult {
                agent: alice.clone(),
                tool_call: call,
                result: ToolOutput::error("invalid arguments"),
            }),
        ];
        let out = compile_transcript(&events, &alice);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].tool_calls.len(), 1);
        assert_eq!(out[0].tool_calls[0].id, "c1");
        assert_eq!(out[0].tool_calls[0].name, "echo");
        assert_eq!(out[0].tool_calls[0].args, json!("{broken"));
        assert_eq!(out[1].role, Role::Tool);
        assert_eq!(out[1].tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_other_agent_empty_text_compiles_to_nothing() {
        let (alice, bob) = agents();
        let body = AgentMessageBody::text("")
            .with_tool_call(ToolCall::new("c1", "echo", json!({"text": "x"})));
        let out = compile_transcript(&[Event::new(AgentMessage::new(bob, body))], &alice);
        assert!(out.is_empty());
    }

    #[test]
    fn test_other_agent_text_becomes_narration() {
        let (alice, bob) = agents();
        let event = Event::new(AgentMessage::new(bob.clone(), AgentMessageBody::text("their words")));
        let out = compile_transcript(&[event], &alice);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].role, Role::User);
        assert!(out[0].content.contains("Bob"));
        assert!(out[0].content.contains(bob.id()));
        assert!(out[0].content.ends_with("their words"));
        assert_eq!(out[0].name.as_deref(), Some("Bob"));
    }

    #[test]
    fn test_own_tool_result_correlates_call_id() {
        let (alice, _) = agents();
        let result = ToolResult {
            agent: alice.clone(),
            tool_call: ToolCall::new("call_9", "echo", json!({"text": "x"})).into(),
            result: ToolOutput::ok("x"),
        };
        let out = compile_transcript(&[Event::new(result)], &alice);
        assert_eq!(out[0].role, Role::Tool);
        assert_eq!(out[0].tool_call_id.as_deref(), Some("call_9"));
        assert_eq!(out[0].content, "x");
    }

    #[test]
    fn test_other_tool_result_is_narrated_with_failure() {
        let (alice, bob) = agents();
        let result = ToolResult {
            agent: bob,
            tool_call: ToolCall::new("call_9", "echo", json!({})).into(),
            result: ToolOutput::error("boom"),
        };
        let out = compile_transcript(&[Event::new(result)], &alice);
        assert_eq!(out[0].role, Role::User);
        assert!(out[0].content.contains("made a tool call"));
        assert!(out[0].content.contains("The tool failed and produced this result:"));
        assert!(out[0].content.ends_with("boom"));
    }

    #[test]
    fn test_deltas_and_control_events_are_not_compiled() {
        let (alice, _) = agents();
        let chunk = MessageChunk::text("par");
        let events = vec![
            Event::new(AgentMessageDelta::new(
                alice.clone(),
                chunk.clone(),
                MessageSnapshot::default().apply(&chunk),
            )),
            Event::new(EndTurn {
                agent: alice.clone(),
                next_agent_name: None,
            }),
        ];
        assert!(compile_transcript(&events, &alice).is_empty());
    }

    #[test]
    fn test_order_is_preserved() {
        let (alice, bob) = agents();
        let events = vec![
            Event::new(UserMessage::new("1")),
            Event::new(AgentMessage::new(bob, AgentMessageBody::text("2"))),
            Event::new(AgentMessage::new(alice.clone(), AgentMessageBody::text("3"))),
        ];
        let out = compile_transcript(&events, &alice);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].content, "1");
        assert!(out[1].content.ends_with("2"));
        assert_eq!(out[2].content, "3");
    }
}
