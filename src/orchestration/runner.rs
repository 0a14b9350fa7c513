//! Agent 执行端
//!
//! 行动者实现 AgentRunner；TurnController 每一步调用 run_step，并传入本轮的 TurnContext。
//! TurnContext 是行动者写事件的唯一入口：发消息、推流式增量、调用工具，
//! 全部落到共享 EventLog 上，派生事件（AgentContent、ToolCall 等）一并广播。

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};

use crate::agent::Agent;
use crate::core::{OrchestrationError, ToolError};
use crate::events::{
    resolve_tool, AgentMessage, AgentMessageBody, AgentMessageDelta, AgentToolCall, EventKind, EventLog,
    MessageChunk, MessageSnapshot, Resolution, ResolvedTool, ToolCallRecord, ToolOutput, ToolResult,
};
use crate::memory::Message;
use crate::tools::{Tool, ToolExecutor};

/// 单步结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// 还有后续步骤（例如刚执行完工具，需要再次调用模型）
    Continue,
    /// 行动者给出了最终回复，本轮没有更多动作
    Yield,
}

/// 行动者：每次调用执行一步（一次模型调用及其工具调用）
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run_step(&self, turn: &mut TurnContext) -> Result<StepOutcome, OrchestrationError>;
}

/// 单轮上下文：行动者、共享日志、本轮可见工具与正在进行的流式快照
pub struct TurnContext {
    agent: Agent,
    log: Arc<EventLog>,
    tools: Vec<Arc<dyn Tool>>,
    executor: ToolExecutor,
    stream: Option<MessageSnapshot>,
    step: usize,
}

impl TurnContext {
    pub fn new(agent: Agent, log: Arc<EventLog>, tools: Vec<Arc<dyn Tool>>, executor: ToolExecutor) -> Self {
        Self {
            agent,
            log,
            tools,
            executor,
            stream: None,
            step: 0,
        }
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// 本轮已执行的步数（从 0 开始）
    pub fn step(&self) -> usize {
        self.step
    }

    pub(crate) fn set_step(&mut self, step: usize) {
        self.step = step;
    }

    /// Agent 自身工具 + 策略提供的控制工具
    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.executor.tool_names()
    }

    /// 行动者视角的转录
    pub fn transcript(&self) -> Vec<Message> {
        self.log.transcript_for(&self.agent)
    }

    /// 发布定稿消息：持久化 AgentMessage，并广播 AgentContent；工具调用在执行时才落日志
    pub fn post_message(&self, body: AgentMessageBody) -> AgentMessage {
        let message = AgentMessage::new(self.agent.clone(), body);
        let related = message
            .all_related_events(&self.tools)
            .into_iter()
            .filter(|e| !matches!(e, EventKind::ToolCall(_)));
        self.log.extend(related);
        message
    }

    pub fn post_text(&self, content: impl Into<String>) -> AgentMessage {
        self.post_message(AgentMessageBody::text(content))
    }

    /// 开始新的流式消息；已有未完成的流会被丢弃
    pub fn begin_stream(&mut self) {
        if self.stream.replace(MessageSnapshot::default()).is_some() {
            tracing::warn!(agent = %self.agent.name(), "unfinished stream replaced");
        }
    }

    /// 折叠一个增量并广播增量及其派生事件；返回新快照
    pub fn push_delta(&mut self, chunk: MessageChunk) -> &MessageSnapshot {
        let snapshot = self.stream.take().unwrap_or_default().apply(&chunk);
        let delta = AgentMessageDelta::new(self.agent.clone(), chunk, snapshot);
        self.log.extend(delta.all_related_events(&self.tools));
        self.stream.insert(delta.snapshot().clone())
    }

    pub fn has_open_stream(&self) -> bool {
        self.stream.is_some()
    }

    /// 定稿当前流：快照转为 AgentMessage 并发布
    pub fn finish_stream(&mut self) -> Option<AgentMessage> {
        let snapshot = self.stream.take()?;
        Some(self.post_message(snapshot.to_body()))
    }

    /// 丢弃未完成的流；快照不会成为持久消息
    pub fn discard_stream(&mut self) {
        if let Some(snapshot) = self.stream.take() {
            tracing::debug!(
                agent = %self.agent.name(),
                chars = snapshot.content.len(),
                "unfinished stream discarded"
            );
        }
    }

    /// 消费整个增量流并定稿
    pub async fn stream_message<S>(&mut self, chunks: S) -> AgentMessage
    where
        S: Stream<Item = MessageChunk> + Send,
    {
        self.begin_stream();
        let mut chunks = std::pin::pin!(chunks);
        while let Some(chunk) = chunks.next().await {
            self.push_delta(chunk);
        }
        match self.finish_stream() {
            Some(message) => message,
            None => self.post_message(AgentMessageBody::default()),
        }
    }

    /// 执行一次工具调用：记录 ToolCall 与 ToolResult
    ///
    /// 解析不到的工具、无效参数与硬错误都以失败结果回给 Agent；Unsupported 作为普通结果说明。
    pub async fn call_tool(&self, call: impl Into<ToolCallRecord>) -> ToolOutput {
        let call = call.into();
        let tool = match resolve_tool(&self.tools, call.name()) {
            Resolution::Resolved(tool) => tool,
            Resolution::Discarded(reason) => {
                tracing::warn!(agent = %self.agent.name(), %reason, "tool call not resolvable");
                let output = ToolOutput::error(format!(
                    "Tool `{}` is not available to agent {}.",
                    call.name().unwrap_or_default(),
                    self.agent.name()
                ));
                return self.record_result(call, output);
            }
        };

        self.log.append(AgentToolCall {
            agent: self.agent.clone(),
            tool_call: call.clone(),
            tool: ResolvedTool(tool.clone()),
            args: call.args(),
        });

        let output = match &call {
            ToolCallRecord::Valid(valid) => to_output(self.executor.execute(&valid.name, valid.args.clone()).await),
            ToolCallRecord::Invalid(invalid) => ToolOutput::error(format!(
                "Invalid arguments for tool `{}`: {}",
                tool.name(),
                invalid.error.as_deref().unwrap_or("unparseable JSON")
            )),
        };
        self.record_result(call, output)
    }

    /// 依次执行消息中的全部调用（有效在前、无效在后）
    pub async fn run_tool_calls(&self, message: &AgentMessage) -> Vec<ToolOutput> {
        let mut outputs = Vec::new();
        for call in message.body().all_calls() {
            outputs.push(self.call_tool(call).await);
        }
        outputs
    }

    fn record_result(&self, call: ToolCallRecord, output: ToolOutput) -> ToolOutput {
        self.log.append(ToolResult {
            agent: self.agent.clone(),
            tool_call: call,
            result: output.clone(),
        });
        output
    }
}

fn to_output(result: Result<String, ToolError>) -> ToolOutput {
    match result {
        Ok(text) => ToolOutput::ok(text),
        Err(ToolError::Control(e)) if e.is_soft() => ToolOutput::ok(e.to_string()),
        Err(e) => ToolOutput::error(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AvailableAgents;
    use crate::events::{ToolCallChunk, ToolCallRecord};
    use crate::memory::{Role, ToolCall};
    use crate::orchestration::control_tools::DelegateTool;
    use crate::orchestration::strategy::TurnStateHandle;
    use crate::tools::{EchoTool, ToolRegistry};
    use serde_json::json;

    fn context(agent: Agent, extra: Vec<Arc<dyn Tool>>) -> (Arc<EventLog>, TurnContext) {
        let log = Arc::new(EventLog::new());
        let mut tools = agent.tools().to_vec();
        tools.extend(extra);
        let executor = ToolExecutor::new(ToolRegistry::from_tools(tools.clone()), 5);
        let ctx = TurnContext::new(agent, log.clone(), tools, executor);
        (log, ctx)
    }

    #[tokio::test]
    async fn test_call_tool_records_call_and_result() {
        let agent = Agent::new("A").with_tool(EchoTool);
        let (log, ctx) = context(agent.clone(), vec![]);

        let out = ctx.call_tool(ToolCall::new("c1", "echo", json!({"text": "hi"}))).await;
        assert_eq!(out, ToolOutput::ok("hi"));

        let names: Vec<_> = log.persisted().iter().map(|e| e.kind().name()).collect();
        assert_eq!(names, vec!["tool-call", "tool-result"]);

        let transcript = log.transcript_for(&agent);
        assert_eq!(transcript[0].role, Role::Tool);
        assert_eq!(transcript[0].tool_call_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_unresolvable_tool_yields_error_result() {
        let (log, ctx) = context(Agent::new("A"), vec![]);
        let out = ctx.call_tool(ToolCall::new("c1", "missing", json!({}))).await;
        assert!(out.is_error);
        let names: Vec<_> = log.persisted().iter().map(|e| e.kind().name()).collect();
        assert_eq!(names, vec!["tool-result"]);
    }

    #[tokio::test]
    async fn test_unsupported_delegate_is_narrated_not_failed() {
        let agent = Agent::new("A");
        let available = AvailableAgents::new().with(agent.clone(), vec![]);
        let delegate: Arc<dyn Tool> = Arc::new(DelegateTool::new(TurnStateHandle::default(), available));
        let (_, ctx) = context(agent.clone(), vec![delegate]);

        let out = ctx
            .call_tool(ToolCall::new("c1", "delegate_to_agent", json!({"agent_id": agent.id()})))
            .await;
        assert!(!out.is_error);
        assert_eq!(out.text, "Cannot delegate as there are no other available agents.");
    }

    #[tokio::test]
    async fn test_unknown_delegate_target_is_error_result() {
        let a = Agent::new("A");
        let available = AvailableAgents::new().with(a.clone(), vec![]).with(Agent::new("B"), vec![]);
        let delegate: Arc<dyn Tool> = Arc::new(DelegateTool::new(TurnStateHandle::default(), available));
        let (_, ctx) = context(a, vec![delegate]);

        let out = ctx
            .call_tool(ToolCall::new("c1", "delegate_to_agent", json!({"agent_id": "nope"})))
            .await;
        assert!(out.is_error);
        assert!(out.text.contains("nope"));
    }

    #[tokio::test]
    async fn test_stream_deltas_are_live_only_until_finished() {
        let agent = Agent::new("A").with_tool(EchoTool);
        let (log, mut ctx) = context(agent, vec![]);
        let mut rx = log.subscribe();

        ctx.begin_stream();
        ctx.push_delta(MessageChunk::text("Hel"));
        let snapshot = ctx.push_delta(MessageChunk::tool_call(ToolCallChunk {
            index: 0,
            id: Some("c1".into()),
            name: Some("echo".into()),
            args: Some(r#"{"text":"x"}"#.into()),
        }));
        assert_eq!(snapshot.content, "Hel");
        assert!(log.is_empty());

        let message = ctx.finish_stream().unwrap();
        assert_eq!(message.body().tool_calls.len(), 1);
        assert_eq!(log.len(), 1);
        assert!(!ctx.has_open_stream());

        let mut live = Vec::new();
        while let Ok(event) = rx.try_recv() {
            live.push(event.kind().name());
        }
        assert_eq!(
            live,
            vec![
                "agent-message-delta",
                "agent-content-delta",
                "agent-message-delta",
                "agent-content-delta",
                "agent-tool-call-delta",
                "agent-message",
                "agent-content",
            ]
        );
    }

    #[tokio::test]
    async fn test_discarded_stream_never_persists() {
        let (log, mut ctx) = context(Agent::new("A"), vec![]);
        ctx.push_delta(MessageChunk::text("partial"));
        ctx.discard_stream();
        assert!(ctx.finish_stream().is_none());
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_stream_message_and_invalid_call() {
        let agent = Agent::new("A").with_tool(EchoTool);
        let (log, mut ctx) = context(agent, vec![]);
        let chunks = futures_util::stream::iter(vec![
            MessageChunk::text("calling"),
            MessageChunk::tool_call(ToolCallChunk {
                index: 0,
                id: Some("c1".into()),
                name: Some("echo".into()),
                args: Some("{broken".into()),
            }),
        ]);

        let message = ctx.stream_message(chunks).await;
        assert_eq!(message.body().invalid_tool_calls.len(), 1);

        let outputs = ctx.run_tool_calls(&message).await;
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].is_error);
        assert!(outputs[0].text.starts_with("Invalid arguments"));

        let last = log.persisted().pop().unwrap();
        match last.kind() {
            EventKind::ToolResult(r) => assert!(matches!(r.tool_call, ToolCallRecord::Invalid(_))),
            other => panic!("unexpected event {}", other.name()),
        }

        // 作者视角：失败结果仍对应 assistant 消息里的调用 id
        let transcript = log.transcript_for(ctx.agent());
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].tool_calls[0].id, "c1");
        assert_eq!(transcript[1].tool_call_id.as_deref(), Some("c1"));
    }
}
