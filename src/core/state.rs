//! 状态定义：轮次阶段与会话结束摘要
//!
//! TurnController 的状态机只在 Idle / TurnInProgress / TurnEnded / SessionEnded 之间迁移；
//! 会话结束时返回 SessionSummary 供调用方记录。

use serde::Serialize;

/// 轮次阶段（单会话内同一时刻只有一个行动者）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TurnPhase {
    Idle,
    TurnInProgress,
    TurnEnded,
    SessionEnded,
}

impl TurnPhase {
    /// 是否可以开启新轮次
    pub fn can_begin_turn(&self) -> bool {
        matches!(self, TurnPhase::Idle | TurnPhase::TurnEnded)
    }
}

/// 会话结束原因
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum SessionEndReason {
    /// 策略的 should_end_session() 返回 true
    StrategyEnded,
    /// 外部取消（SessionSupervisor::stop）
    Cancelled,
    /// 达到 max_turns 上限
    TurnLimit,
}

/// 会话结束摘要
#[derive(Clone, Debug, Serialize)]
pub struct SessionSummary {
    pub turns: usize,
    /// 最后一个行动的 Agent 名称
    pub last_agent: String,
    pub reason: SessionEndReason,
}
