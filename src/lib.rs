//! Hive - 多智能体对话编排
//!
//! 模块划分：
//! - **agent**: Agent 身份与能力（工具），可用 Agent 及其待办任务
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、轮次阶段、会话监管
//! - **events**: 事件模型、流式快照、只追加日志、转录编译
//! - **memory**: 消息模型、历史存储、按 token 预算裁剪
//! - **observability**: 日志初始化
//! - **orchestration**: 轮次策略、控制工具、轮次控制器
//! - **tools**: Tool trait、注册表与执行器

pub mod agent;
pub mod config;
pub mod core;
pub mod events;
pub mod memory;
pub mod observability;
pub mod orchestration;
pub mod tools;

pub use agent::{Agent, AvailableAgents, TaskRef};
pub use events::{Event, EventKind, EventLog};
pub use orchestration::{AgentRunner, StepOutcome, TurnContext, TurnController, TurnOutcome, TurnStrategy};
