//! 轮次控制器
//!
//! Idle -> TurnInProgress -> TurnEnded -> (TurnInProgress | SessionEnded)。
//! 控制器独占策略并顺序驱动行动者，因此同一时刻只有一个行动者。
//! 外部 stop 立即结束会话，未定稿的流式快照被丢弃；Runner 出错同样结束会话并向上返回错误。

use std::sync::Arc;

use crate::agent::{Agent, AvailableAgents};
use crate::config::{OrchestrationSection, ToolsSection};
use crate::core::{OrchestrationError, SessionEndReason, SessionSummary, SessionSupervisor, TurnPhase};
use crate::events::{EndTurn, EventLog, OrchestratorMessage};
use crate::orchestration::runner::{AgentRunner, StepOutcome, TurnContext};
use crate::orchestration::strategy::{build_strategy, TurnStrategy};
use crate::tools::{Tool, ToolExecutor, ToolRegistry};

/// 单轮最大步数默认值
const DEFAULT_MAX_STEPS_PER_TURN: usize = 20;
/// 工具调用超时默认值（秒）
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

/// 一轮结束后的走向
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    Continue { next: Agent },
    SessionEnded(SessionEndReason),
}

pub struct TurnController {
    strategy: Box<dyn TurnStrategy>,
    log: Arc<EventLog>,
    supervisor: SessionSupervisor,
    phase: TurnPhase,
    max_steps_per_turn: usize,
    max_turns: Option<usize>,
    tool_timeout_secs: u64,
    turns: usize,
}

impl TurnController {
    pub fn new(strategy: Box<dyn TurnStrategy>, log: Arc<EventLog>) -> Self {
        Self {
            strategy,
            log,
            supervisor: SessionSupervisor::new(),
            phase: TurnPhase::Idle,
            max_steps_per_turn: DEFAULT_MAX_STEPS_PER_TURN,
            max_turns: None,
            tool_timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
            turns: 0,
        }
    }

    /// 按配置构建：策略名 + 主持人名称（在 agents 中按名称查找）
    pub fn from_config(
        orchestration: &OrchestrationSection,
        tools: &ToolsSection,
        agents: &AvailableAgents,
        log: Arc<EventLog>,
    ) -> Result<Self, OrchestrationError> {
        let moderator = match &orchestration.moderator {
            Some(name) => Some(
                agents
                    .agents()
                    .find(|a| a.name() == name)
                    .cloned()
                    .ok_or_else(|| OrchestrationError::AgentNotFound(name.clone()))?,
            ),
            None => None,
        };
        let strategy = build_strategy(orchestration.strategy, moderator)?;
        let mut controller = Self::new(strategy, log)
            .with_max_steps_per_turn(orchestration.max_steps_per_turn)
            .with_tool_timeout(tools.tool_timeout_secs);
        controller.max_turns = orchestration.max_turns;
        Ok(controller)
    }

    pub fn with_supervisor(mut self, supervisor: SessionSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn with_max_steps_per_turn(mut self, steps: usize) -> Self {
        self.max_steps_per_turn = steps.max(1);
        self
    }

    pub fn with_max_turns(mut self, turns: usize) -> Self {
        self.max_turns = Some(turns);
        self
    }

    pub fn with_tool_timeout(mut self, secs: u64) -> Self {
        self.tool_timeout_secs = secs;
        self
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn turns(&self) -> usize {
        self.turns
    }

    pub fn strategy(&self) -> &dyn TurnStrategy {
        self.strategy.as_ref()
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    /// 执行一轮：actor 反复 run_step，直到策略判定轮次结束或行动者让出
    pub async fn run_turn(
        &mut self,
        actor: &Agent,
        available: &AvailableAgents,
        runner: &dyn AgentRunner,
    ) -> Result<TurnOutcome, OrchestrationError> {
        if !self.phase.can_begin_turn() {
            return Err(OrchestrationError::SessionEnded);
        }
        if self.supervisor.is_stopped() {
            return Ok(self.end_session(SessionEndReason::Cancelled));
        }

        self.strategy.begin_turn();
        self.phase = TurnPhase::TurnInProgress;
        tracing::info!(
            agent = %actor.name(),
            strategy = self.strategy.name(),
            turn = self.turns + 1,
            "turn started"
        );

        let tools = merge_tools(actor, self.strategy.get_tools(actor, available));
        let executor = ToolExecutor::new(ToolRegistry::from_tools(tools.clone()), self.tool_timeout_secs);
        let mut turn = TurnContext::new(actor.clone(), self.log.clone(), tools, executor);
        let token = self.supervisor.child_token();

        let mut ended = false;
        for step in 0..self.max_steps_per_turn {
            turn.set_step(step);
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                res = runner.run_step(&mut turn) => Some(res),
            };
            match result {
                None => {
                    turn.discard_stream();
                    tracing::info!(agent = %actor.name(), "turn cancelled");
                    return Ok(self.end_session(SessionEndReason::Cancelled));
                }
                Some(Err(e)) => {
                    turn.discard_stream();
                    self.phase = TurnPhase::SessionEnded;
                    tracing::warn!(agent = %actor.name(), error = %e, "runner failed, session ended");
                    return Err(e);
                }
                Some(Ok(outcome)) => {
                    if self.strategy.should_end_turn() || outcome == StepOutcome::Yield {
                        ended = true;
                        break;
                    }
                }
            }
        }
        if !ended {
            tracing::warn!(
                agent = %actor.name(),
                max_steps = self.max_steps_per_turn,
                "turn did not end within step limit, ending it"
            );
        }
        // 让出与步数上限同样经由 end_turn 标记结束轮次，策略的会话判定因此一致
        if !self.strategy.should_end_turn() {
            self.strategy.state().mark_end_turn();
        }
        turn.finish_stream();

        self.turns += 1;
        self.phase = TurnPhase::TurnEnded;
        let next = self
            .strategy
            .get_next_agent(actor, available)
            .ok_or(OrchestrationError::NoAgents)?;

        self.log.append(EndTurn {
            agent: actor.clone(),
            next_agent_name: Some(next.name().to_string()),
        });
        self.append_handoff(actor, &next);
        tracing::info!(agent = %actor.name(), next = %next.name(), "turn ended");

        if self.strategy.should_end_session() {
            return Ok(self.end_session(SessionEndReason::StrategyEnded));
        }
        if self.max_turns.is_some_and(|max| self.turns >= max) {
            return Ok(self.end_session(SessionEndReason::TurnLimit));
        }
        Ok(TurnOutcome::Continue { next })
    }

    /// 从 first 开始连续执行，直到策略结束、外部停止或达到轮数上限
    pub async fn run(
        &mut self,
        first: Agent,
        available: &AvailableAgents,
        runner: &dyn AgentRunner,
    ) -> Result<SessionSummary, OrchestrationError> {
        let mut actor = first;
        loop {
            match self.run_turn(&actor, available, runner).await? {
                TurnOutcome::Continue { next } => actor = next,
                TurnOutcome::SessionEnded(reason) => {
                    return Ok(SessionSummary {
                        turns: self.turns,
                        last_agent: actor.name().to_string(),
                        reason,
                    })
                }
            }
        }
    }

    /// 委派附带的留言作为编排器消息交给下一位
    fn append_handoff(&self, actor: &Agent, next: &Agent) {
        let state = self.strategy.state();
        let Some(message) = state.handoff_message() else {
            return;
        };
        if state.next_agent().as_ref() != Some(next) {
            return;
        }
        self.log.append(
            OrchestratorMessage::new(message)
                .with_prefix(format!(
                    "Agent \"{}\" with ID {} delegated to you with this message:",
                    actor.name(),
                    actor.id()
                ))
                .with_name(actor.name()),
        );
    }

    fn end_session(&mut self, reason: SessionEndReason) -> TurnOutcome {
        self.phase = TurnPhase::SessionEnded;
        tracing::info!(turns = self.turns, reason = ?reason, "session ended");
        TurnOutcome::SessionEnded(reason)
    }
}

/// 本轮可见工具：Agent 自身工具在前、控制工具在后；同名时后者替换前者并保留原位置，
/// 使按名解析与执行器注册表指向同一个工具
fn merge_tools(actor: &Agent, control: Vec<Arc<dyn Tool>>) -> Vec<Arc<dyn Tool>> {
    let mut merged: Vec<Arc<dyn Tool>> = Vec::new();
    for tool in actor.tools().iter().cloned().chain(control) {
        match merged.iter().position(|t| t.name() == tool.name()) {
            Some(i) => {
                tracing::warn!(agent = %actor.name(), tool = tool.name(), "duplicate tool name, later one wins");
                merged[i] = tool;
            }
            None => merged.push(tool),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AgentMessageBody, EventKind, MessageChunk};
    use crate::memory::ToolCall;
    use crate::orchestration::control_tools::END_TURN_TOOL;
    use crate::orchestration::strategy::{RoundRobin, Single};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 说一句话后调用 end_turn
    struct Speaker;

    #[async_trait]
    impl AgentRunner for Speaker {
        async fn run_step(&self, turn: &mut TurnContext) -> Result<StepOutcome, OrchestrationError> {
            let body = AgentMessageBody::text(format!("{} speaking", turn.agent().name()))
                .with_tool_call(ToolCall::new(format!("c{}", turn.step()), END_TURN_TOOL, json!({})));
            let message = turn.post_message(body);
            turn.run_tool_calls(&message).await;
            Ok(StepOutcome::Continue)
        }
    }

    /// 从不结束轮次
    struct Chatter {
        steps: AtomicUsize,
    }

    #[async_trait]
    impl AgentRunner for Chatter {
        async fn run_step(&self, turn: &mut TurnContext) -> Result<StepOutcome, OrchestrationError> {
            self.steps.fetch_add(1, Ordering::SeqCst);
            turn.push_delta(MessageChunk::text("still talking"));
            Ok(StepOutcome::Continue)
        }
    }

    struct Failing;

    #[async_trait]
    impl AgentRunner for Failing {
        async fn run_step(&self, turn: &mut TurnContext) -> Result<StepOutcome, OrchestrationError> {
            turn.push_delta(MessageChunk::text("half"));
            Err(OrchestrationError::RunnerFailed("model unavailable".into()))
        }
    }

    /// 只发一句最终回复就让出
    struct Finisher;

    #[async_trait]
    impl AgentRunner for Finisher {
        async fn run_step(&self, turn: &mut TurnContext) -> Result<StepOutcome, OrchestrationError> {
            turn.post_text("done");
            Ok(StepOutcome::Yield)
        }
    }

    /// 自带一个名为 end_turn 的工具，却不会结束轮次
    struct FakeEndTurn;

    #[async_trait]
    impl Tool for FakeEndTurn {
        fn name(&self) -> &str {
            END_TURN_TOOL
        }

        fn description(&self) -> &str {
            "Pretends to end the turn"
        }

        async fn execute(&self, _args: serde_json::Value) -> Result<String, crate::core::ToolError> {
            Ok("fake".into())
        }
    }

    fn pair() -> (Agent, Agent, AvailableAgents) {
        let a = Agent::new("A");
        let b = Agent::new("B");
        let available = AvailableAgents::new().with(a.clone(), vec![]).with(b.clone(), vec![]);
        (a, b, available)
    }

    #[tokio::test]
    async fn test_round_robin_turn_appends_end_turn() {
        let (a, b, available) = pair();
        let log = Arc::new(EventLog::new());
        let mut controller = TurnController::new(Box::new(RoundRobin::default()), log.clone());

        let outcome = controller.run_turn(&a, &available, &Speaker).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Continue { next: b });
        assert_eq!(controller.phase(), TurnPhase::TurnEnded);

        let last = log.persisted().pop().unwrap();
        match last.kind() {
            EventKind::EndTurn(e) => assert_eq!(e.next_agent_name.as_deref(), Some("B")),
            other => panic!("unexpected event {}", other.name()),
        }
    }

    #[tokio::test]
    async fn test_single_strategy_ends_session_with_turn() {
        let a = Agent::new("Solo");
        let available = AvailableAgents::new().with(a.clone(), vec![]);
        let mut controller = TurnController::new(Box::new(Single::default()), Arc::new(EventLog::new()));

        let summary = controller.run(a, &available, &Speaker).await.unwrap();
        assert_eq!(summary.turns, 1);
        assert_eq!(summary.reason, SessionEndReason::StrategyEnded);
        assert_eq!(controller.phase(), TurnPhase::SessionEnded);

        let err = controller
            .run_turn(&Agent::new("Solo"), &available, &Speaker)
            .await
            .unwrap_err();
        assert_eq!(err, OrchestrationError::SessionEnded);
    }

    #[tokio::test]
    async fn test_single_yield_ends_session_after_one_turn() {
        let a = Agent::new("Solo");
        let available = AvailableAgents::new().with(a.clone(), vec![]);
        let mut controller = TurnController::new(Box::new(Single::default()), Arc::new(EventLog::new()));

        let summary = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            controller.run(a, &available, &Finisher),
        )
        .await
        .expect("session should end on its own")
        .unwrap();
        assert_eq!(summary.turns, 1);
        assert_eq!(summary.reason, SessionEndReason::StrategyEnded);
        assert!(controller.strategy().should_end_turn());
    }

    #[tokio::test]
    async fn test_single_step_limit_ends_session() {
        let a = Agent::new("Solo");
        let available = AvailableAgents::new().with(a.clone(), vec![]);
        let mut controller =
            TurnController::new(Box::new(Single::default()), Arc::new(EventLog::new())).with_max_steps_per_turn(2);
        let chatter = Chatter {
            steps: AtomicUsize::new(0),
        };

        let outcome = controller.run_turn(&a, &available, &chatter).await.unwrap();
        assert_eq!(outcome, TurnOutcome::SessionEnded(SessionEndReason::StrategyEnded));
        assert_eq!(chatter.steps.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_control_tool_replaces_same_named_agent_tool() {
        let a = Agent::new("A").with_tool(FakeEndTurn);
        let b = Agent::new("B");
        let available = AvailableAgents::new().with(a.clone(), vec![]).with(b.clone(), vec![]);
        let log = Arc::new(EventLog::new());
        let mut controller =
            TurnController::new(Box::new(RoundRobin::default()), log.clone()).with_max_steps_per_turn(1);

        let tools = merge_tools(&a, controller.strategy().get_tools(&a, &available));
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].description(), "End your turn.");

        // Speaker 调用 end_turn：真正的控制工具被执行
        controller.run_turn(&a, &available, &Speaker).await.unwrap();
        let result = log
            .persisted()
            .into_iter()
            .find_map(|e| match e.kind() {
                EventKind::ToolResult(r) => Some(r.result.text.clone()),
                _ => None,
            })
            .unwrap();
        assert!(result.starts_with("Turn ended"));
    }

    #[tokio::test]
    async fn test_step_limit_forces_turn_end_and_finalizes_stream() {
        let (a, _, available) = pair();
        let log = Arc::new(EventLog::new());
        let mut controller =
            TurnController::new(Box::new(RoundRobin::default()), log.clone()).with_max_steps_per_turn(3);
        let chatter = Chatter {
            steps: AtomicUsize::new(0),
        };

        controller.run_turn(&a, &available, &chatter).await.unwrap();
        assert_eq!(chatter.steps.load(Ordering::SeqCst), 3);

        let names: Vec<_> = log.persisted().iter().map(|e| e.kind().name()).collect();
        assert_eq!(names, vec!["agent-message", "end-turn"]);
    }

    #[tokio::test]
    async fn test_runner_error_ends_session_and_discards_stream() {
        let (a, _, available) = pair();
        let log = Arc::new(EventLog::new());
        let mut controller = TurnController::new(Box::new(RoundRobin::default()), log.clone());

        let err = controller.run_turn(&a, &available, &Failing).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::RunnerFailed(_)));
        assert_eq!(controller.phase(), TurnPhase::SessionEnded);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_stopped_supervisor_ends_before_turn() {
        let (a, _, available) = pair();
        let mut controller = TurnController::new(Box::new(RoundRobin::default()), Arc::new(EventLog::new()));
        controller.supervisor().stop();

        let outcome = controller.run_turn(&a, &available, &Speaker).await.unwrap();
        assert_eq!(outcome, TurnOutcome::SessionEnded(SessionEndReason::Cancelled));
        assert_eq!(controller.turns(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_at_turn_limit() {
        let (a, _, available) = pair();
        let mut controller =
            TurnController::new(Box::new(RoundRobin::default()), Arc::new(EventLog::new())).with_max_turns(3);

        let summary = controller.run(a, &available, &Speaker).await.unwrap();
        assert_eq!(summary.turns, 3);
        assert_eq!(summary.last_agent, "A");
        assert_eq!(summary.reason, SessionEndReason::TurnLimit);
    }

    #[tokio::test]
    async fn test_empty_available_is_no_agents() {
        let a = Agent::new("A");
        let mut controller = TurnController::new(Box::new(RoundRobin::default()), Arc::new(EventLog::new()));
        let err = controller
            .run_turn(&a, &AvailableAgents::new(), &Speaker)
            .await
            .unwrap_err();
        assert_eq!(err, OrchestrationError::NoAgents);
    }

    #[test]
    fn test_from_config_resolves_moderator() {
        let (_, _, available) = pair();
        let section = OrchestrationSection {
            strategy: crate::orchestration::StrategyKind::Moderated,
            moderator: Some("A".into()),
            max_steps_per_turn: 5,
            max_turns: Some(2),
        };
        let controller =
            TurnController::from_config(&section, &ToolsSection::default(), &available, Arc::new(EventLog::new()))
                .unwrap();
        assert_eq!(controller.strategy().name(), "moderated");
        assert_eq!(controller.max_turns, Some(2));

        let missing = OrchestrationSection {
            moderator: Some("Nobody".into()),
            ..section
        };
        let err = TurnController::from_config(&missing, &ToolsSection::default(), &available, Arc::new(EventLog::new()))
            .err()
            .unwrap();
        assert_eq!(err, OrchestrationError::AgentNotFound("Nobody".into()));
    }
}
