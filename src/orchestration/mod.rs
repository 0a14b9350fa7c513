//! 编排层：轮次策略、控制工具、Agent 执行端与轮次控制器

pub mod control_tools;
pub mod controller;
pub mod runner;
pub mod strategy;

pub use control_tools::{DelegateArgs, DelegateTool, EndTurnTool, DELEGATE_TOOL, END_TURN_TOOL};
pub use controller::{TurnController, TurnOutcome};
pub use runner::{AgentRunner, StepOutcome, TurnContext};
pub use strategy::{
    build_strategy, Moderated, MostBusy, Popcorn, Random, RoundRobin, Single, StrategyKind, TurnState,
    TurnStateHandle, TurnStrategy,
};
