//! Hive - 多智能体对话编排演示
//!
//! 入口：初始化日志与配置，按 [orchestration] 配置运行一个脚本化会话（不调用模型），
//! 然后打印每个 Agent 看到的转录，并把 Planner 的转录写入历史存储。
//! 脚本按本轮可用的控制工具行事，任一策略下都能跑完；默认配置为主持人模式。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use hive::config::load_config;
use hive::core::OrchestrationError;
use hive::events::{AgentMessageBody, MessageChunk, ToolCallChunk, UserMessage};
use hive::memory::{Message, ToolCall};
use hive::orchestration::{StepOutcome, DELEGATE_TOOL, END_TURN_TOOL};
use hive::tools::EchoTool;
use hive::{observability, Agent, AgentRunner, AvailableAgents, EventLog, TurnContext, TurnController};

/// 配置未限制轮数时演示会话的最大轮数
const DEMO_MAX_TURNS: usize = 3;

/// 脚本化行动者：Planner 能委派时先委派给 Researcher，Researcher 查完结束轮次，Planner 总结
struct ScriptedRunner {
    planner: Agent,
    researcher: Agent,
    planner_turns: AtomicUsize,
}

impl ScriptedRunner {
    async fn planner_step(&self, turn: &mut TurnContext) -> StepOutcome {
        let n = if turn.step() == 0 {
            self.planner_turns.fetch_add(1, Ordering::SeqCst)
        } else {
            self.planner_turns.load(Ordering::SeqCst).saturating_sub(1)
        };
        let can_delegate = turn.tool_names().iter().any(|t| t == DELEGATE_TOOL);
        if n == 0 && can_delegate {
            let body = AgentMessageBody::text("Let's split the work. Research first.").with_tool_call(ToolCall::new(
                "call_delegate",
                DELEGATE_TOOL,
                json!({
                    "agent_id": self.researcher.id(),
                    "message": "Find the opening hours of the museum."
                }),
            ));
            let message = turn.post_message(body);
            turn.run_tool_calls(&message).await;
            StepOutcome::Continue
        } else {
            turn.post_text("Thanks. The museum opens at 9am, that settles the plan.");
            StepOutcome::Yield
        }
    }

    async fn researcher_step(&self, turn: &mut TurnContext) -> StepOutcome {
        if turn.step() == 0 {
            let chunks = futures_util::stream::iter(vec![
                MessageChunk::text("Checking "),
                MessageChunk::text("the listing."),
                MessageChunk::tool_call(ToolCallChunk {
                    index: 0,
                    id: Some("call_echo".into()),
                    name: Some("echo".into()),
                    args: Some(r#"{"text":"#.into()),
                }),
                MessageChunk::tool_call(ToolCallChunk {
                    index: 0,
                    args: Some(r#""Open daily 9am-5pm"}"#.into()),
                    ..ToolCallChunk::default()
                }),
            ]);
            let message = turn.stream_message(chunks).await;
            turn.run_tool_calls(&message).await;
            StepOutcome::Continue
        } else if turn.tool_names().iter().any(|t| t == END_TURN_TOOL) {
            let body = AgentMessageBody::text("It opens at 9am.")
                .with_tool_call(ToolCall::new("call_end", END_TURN_TOOL, json!({})));
            let message = turn.post_message(body);
            turn.run_tool_calls(&message).await;
            StepOutcome::Continue
        } else {
            turn.post_text("It opens at 9am.");
            StepOutcome::Yield
        }
    }
}

#[async_trait]
impl AgentRunner for ScriptedRunner {
    async fn run_step(&self, turn: &mut TurnContext) -> Result<StepOutcome, OrchestrationError> {
        if turn.agent() == &self.planner {
            Ok(self.planner_step(turn).await)
        } else if turn.agent() == &self.researcher {
            Ok(self.researcher_step(turn).await)
        } else {
            Err(OrchestrationError::AgentNotFound(turn.agent().id().to_string()))
        }
    }
}

fn print_transcript(agent: &Agent, messages: &[Message]) {
    println!("===== transcript for {} ({}) =====", agent.name(), agent.id());
    for m in messages {
        let role = serde_json::to_string(&m.role).unwrap_or_default();
        println!("[{}] {}", role.trim_matches('"'), m.content);
    }
    println!();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    observability::init();

    let config = load_config(None).context("Failed to load config")?;

    let planner = Agent::new("Planner")
        .with_description("Coordinates the team")
        .with_instructions("Delegate research, then summarise.");
    let researcher = Agent::new("Researcher")
        .with_description("Looks things up")
        .with_tool(EchoTool);
    let available = AvailableAgents::new()
        .with(planner.clone(), vec![])
        .with(researcher.clone(), vec![]);

    let log = Arc::new(EventLog::new());
    log.append(UserMessage::new("Plan a museum visit for tomorrow."));

    let mut controller = TurnController::from_config(&config.orchestration, &config.tools, &available, log.clone())
        .context("Failed to build turn controller")?;
    if config.orchestration.max_turns.is_none() {
        // 主持人模式不会自行结束会话
        controller = controller.with_max_turns(DEMO_MAX_TURNS);
    }
    tracing::info!(strategy = controller.strategy().name(), "turn controller ready");

    let runner = ScriptedRunner {
        planner: planner.clone(),
        researcher: researcher.clone(),
        planner_turns: AtomicUsize::new(0),
    };
    let summary = controller
        .run(planner.clone(), &available, &runner)
        .await
        .context("Session failed")?;
    tracing::info!(turns = summary.turns, last = %summary.last_agent, reason = ?summary.reason, "demo finished");

    for agent in available.agents() {
        print_transcript(agent, &log.transcript_for(agent));
    }

    let store = config.history.build_store().context("Failed to open history store")?;
    let thread_id = format!("demo-{}", planner.id());
    store
        .save_messages(&thread_id, &log.transcript_for(&planner))
        .await
        .context("Failed to save history")?;
    let trimmer = config.models.trimmer();
    let window = store
        .load_messages_to_token_limit_with(&thread_id, "gpt-4o", &trimmer)
        .await
        .context("Failed to load history")?;
    println!("history thread {thread_id}: {} messages fit the model window", window.len());

    Ok(())
}
