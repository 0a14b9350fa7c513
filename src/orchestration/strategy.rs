//! 轮次策略
//!
//! 每个策略持有自己的 TurnState（end_turn / next_agent），每轮开始时清空，只由控制工具修改。
//! 共享的重置与判定逻辑放在 trait 默认方法里；各策略只决定「给哪些控制工具」与「下一位是谁」。
//! 平局一律按 AvailableAgents 的插入顺序决断。

use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::seq::IteratorRandom;
use serde::Deserialize;

use crate::agent::{Agent, AvailableAgents};
use crate::core::OrchestrationError;
use crate::orchestration::control_tools::{DelegateTool, EndTurnTool};
use crate::tools::Tool;

/// 单轮可变状态
#[derive(Clone, Debug, Default)]
pub struct TurnState {
    pub end_turn: bool,
    pub next_agent: Option<Agent>,
    /// delegate_to_agent 附带的留言
    pub handoff_message: Option<String>,
}

/// 策略与控制工具共享的 TurnState 句柄
#[derive(Clone, Debug, Default)]
pub struct TurnStateHandle(Arc<Mutex<TurnState>>);

impl TurnStateHandle {
    fn lock(&self) -> MutexGuard<'_, TurnState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reset(&self) {
        *self.lock() = TurnState::default();
    }

    pub fn end_turn(&self) -> bool {
        self.lock().end_turn
    }

    pub fn next_agent(&self) -> Option<Agent> {
        self.lock().next_agent.clone()
    }

    pub fn handoff_message(&self) -> Option<String> {
        self.lock().handoff_message.clone()
    }

    pub fn mark_end_turn(&self) {
        self.lock().end_turn = true;
    }

    pub fn delegate(&self, agent: Agent, message: Option<String>) {
        let mut state = self.lock();
        state.end_turn = true;
        state.next_agent = Some(agent);
        state.handoff_message = message;
    }

    pub fn snapshot(&self) -> TurnState {
        self.lock().clone()
    }
}

/// 轮次策略 trait
pub trait TurnStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn state(&self) -> &TurnStateHandle;

    /// 当前行动者本轮可见的控制工具
    fn get_tools(&self, current: &Agent, available: &AvailableAgents) -> Vec<Arc<dyn Tool>>;

    /// 下一轮的行动者；available 为空时返回 None
    fn get_next_agent(&self, current: &Agent, available: &AvailableAgents) -> Option<Agent>;

    fn begin_turn(&self) {
        self.state().reset();
    }

    fn should_end_turn(&self) -> bool {
        self.state().end_turn()
    }

    fn should_end_session(&self) -> bool {
        false
    }
}

fn end_turn_tools(state: &TurnStateHandle) -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(EndTurnTool::new(state.clone()))]
}

fn delegate_tools(state: &TurnStateHandle, available: &AvailableAgents) -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(DelegateTool::new(state.clone(), available.clone()))]
}

/// 委派目标仍然可用时返回它
fn available_delegate(state: &TurnStateHandle, available: &AvailableAgents) -> Option<Agent> {
    state.next_agent().filter(|a| available.contains(a))
}

/// 单 Agent：下一位永远是自己，轮次结束即会话结束
#[derive(Debug, Default)]
pub struct Single {
    state: TurnStateHandle,
}

impl TurnStrategy for Single {
    fn name(&self) -> &'static str {
        "single"
    }

    fn state(&self) -> &TurnStateHandle {
        &self.state
    }

    fn get_tools(&self, _current: &Agent, _available: &AvailableAgents) -> Vec<Arc<dyn Tool>> {
        end_turn_tools(&self.state)
    }

    fn get_next_agent(&self, current: &Agent, _available: &AvailableAgents) -> Option<Agent> {
        Some(current.clone())
    }

    fn should_end_session(&self) -> bool {
        self.state.end_turn()
    }
}

/// 「烫手山芋」：当前行动者自己点名下一位
#[derive(Debug, Default)]
pub struct Popcorn {
    state: TurnStateHandle,
}

impl TurnStrategy for Popcorn {
    fn name(&self) -> &'static str {
        "popcorn"
    }

    fn state(&self) -> &TurnStateHandle {
        &self.state
    }

    fn get_tools(&self, _current: &Agent, available: &AvailableAgents) -> Vec<Arc<dyn Tool>> {
        if available.len() > 1 {
            delegate_tools(&self.state, available)
        } else {
            end_turn_tools(&self.state)
        }
    }

    fn get_next_agent(&self, _current: &Agent, available: &AvailableAgents) -> Option<Agent> {
        available_delegate(&self.state, available).or_else(|| available.first().cloned())
    }
}

/// 均匀随机挑选，忽略委派
#[derive(Debug, Default)]
pub struct Random {
    state: TurnStateHandle,
}

impl TurnStrategy for Random {
    fn name(&self) -> &'static str {
        "random"
    }

    fn state(&self) -> &TurnStateHandle {
        &self.state
    }

    fn get_tools(&self, _current: &Agent, _available: &AvailableAgents) -> Vec<Arc<dyn Tool>> {
        end_turn_tools(&self.state)
    }

    fn get_next_agent(&self, _current: &Agent, available: &AvailableAgents) -> Option<Agent> {
        available.agents().choose(&mut rand::thread_rng()).cloned()
    }
}

/// 按插入顺序轮转；当前行动者不在映射中时从第一个开始
#[derive(Debug, Default)]
pub struct RoundRobin {
    state: TurnStateHandle,
}

impl TurnStrategy for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn state(&self) -> &TurnStateHandle {
        &self.state
    }

    fn get_tools(&self, _current: &Agent, _available: &AvailableAgents) -> Vec<Arc<dyn Tool>> {
        end_turn_tools(&self.state)
    }

    fn get_next_agent(&self, current: &Agent, available: &AvailableAgents) -> Option<Agent> {
        match available.position(current) {
            Some(i) => available.get_index((i + 1) % available.len()).cloned(),
            None => available.first().cloned(),
        }
    }
}

/// 待办任务最多者优先；并列取最先出现的
#[derive(Debug, Default)]
pub struct MostBusy {
    state: TurnStateHandle,
}

impl TurnStrategy for MostBusy {
    fn name(&self) -> &'static str {
        "most_busy"
    }

    fn state(&self) -> &TurnStateHandle {
        &self.state
    }

    fn get_tools(&self, _current: &Agent, _available: &AvailableAgents) -> Vec<Arc<dyn Tool>> {
        end_turn_tools(&self.state)
    }

    fn get_next_agent(&self, _current: &Agent, available: &AvailableAgents) -> Option<Agent> {
        let mut best: Option<(&Agent, usize)> = None;
        for agent in available.agents() {
            let pending = available.pending_tasks(agent).len();
            // 严格大于：并列时保留先出现的
            if best.map_or(true, |(_, n)| pending > n) {
                best = Some((agent, pending));
            }
        }
        best.map(|(agent, _)| agent.clone())
    }
}

/// 主持人模式：只有主持人能委派，其他人结束轮次后控制权回到主持人
#[derive(Debug)]
pub struct Moderated {
    state: TurnStateHandle,
    moderator: Agent,
}

impl Moderated {
    pub fn new(moderator: Agent) -> Self {
        Self {
            state: TurnStateHandle::default(),
            moderator,
        }
    }

    pub fn moderator(&self) -> &Agent {
        &self.moderator
    }
}

impl TurnStrategy for Moderated {
    fn name(&self) -> &'static str {
        "moderated"
    }

    fn state(&self) -> &TurnStateHandle {
        &self.state
    }

    fn get_tools(&self, current: &Agent, available: &AvailableAgents) -> Vec<Arc<dyn Tool>> {
        if *current == self.moderator {
            delegate_tools(&self.state, available)
        } else {
            end_turn_tools(&self.state)
        }
    }

    fn get_next_agent(&self, current: &Agent, available: &AvailableAgents) -> Option<Agent> {
        if *current == self.moderator {
            Some(available_delegate(&self.state, available).unwrap_or_else(|| self.moderator.clone()))
        } else {
            Some(self.moderator.clone())
        }
    }
}

/// 策略名称（配置中使用 snake_case）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Single,
    Popcorn,
    Random,
    RoundRobin,
    MostBusy,
    Moderated,
}

impl FromStr for StrategyKind {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "single" => Ok(StrategyKind::Single),
            "popcorn" => Ok(StrategyKind::Popcorn),
            "random" => Ok(StrategyKind::Random),
            "round_robin" | "roundrobin" => Ok(StrategyKind::RoundRobin),
            "most_busy" | "mostbusy" => Ok(StrategyKind::MostBusy),
            "moderated" => Ok(StrategyKind::Moderated),
            other => Err(OrchestrationError::ConfigError(format!("unknown turn strategy `{other}`"))),
        }
    }
}

/// 按名称构建策略；Moderated 需要主持人
pub fn build_strategy(
    kind: StrategyKind,
    moderator: Option<Agent>,
) -> Result<Box<dyn TurnStrategy>, OrchestrationError> {
    Ok(match kind {
        StrategyKind::Single => Box::new(Single::default()),
        StrategyKind::Popcorn => Box::new(Popcorn::default()),
        StrategyKind::Random => Box::new(Random::default()),
        StrategyKind::RoundRobin => Box::new(RoundRobin::default()),
        StrategyKind::MostBusy => Box::new(MostBusy::default()),
        StrategyKind::Moderated => {
            let moderator = moderator.ok_or_else(|| {
                OrchestrationError::ConfigError("moderated strategy requires a moderator".into())
            })?;
            Box::new(Moderated::new(moderator))
        }
    })
}
