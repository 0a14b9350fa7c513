//! 控制工具：end_turn 与 delegate_to_agent
//!
//! 两者对行动 Agent 来说都是普通工具；调用的副作用是修改轮次策略共享的 TurnState。
//! delegate_to_agent 在可用 Agent 不足两个时返回 Unsupported（软错误，执行层会把说明文字回给 Agent），
//! 目标 ID 不存在时返回 AgentNotFound（硬错误）。

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;

use crate::agent::AvailableAgents;
use crate::core::{OrchestrationError, ToolError};
use crate::orchestration::strategy::TurnStateHandle;
use crate::tools::Tool;

pub const END_TURN_TOOL: &str = "end_turn";
pub const DELEGATE_TOOL: &str = "delegate_to_agent";

/// end_turn 工具：结束当前轮次
pub struct EndTurnTool {
    state: TurnStateHandle,
}

impl EndTurnTool {
    pub fn new(state: TurnStateHandle) -> Self {
        Self { state }
    }

    pub fn end_turn(&self) -> String {
        self.state.mark_end_turn();
        "Turn ended. Another agent will be selected.".to_string()
    }
}

#[async_trait]
impl Tool for EndTurnTool {
    fn name(&self) -> &str {
        END_TURN_TOOL
    }

    fn description(&self) -> &str {
        "End your turn."
    }

    async fn execute(&self, _args: Value) -> Result<String, ToolError> {
        Ok(self.end_turn())
    }
}

/// delegate_to_agent 参数（字段注释会进入给 LLM 的 schema）
#[derive(Debug, Deserialize, JsonSchema)]
pub struct DelegateArgs {
    /// ID of the agent that should act next
    pub agent_id: String,
    /// Optional message handed to that agent
    #[serde(default)]
    pub message: Option<String>,
}

/// delegate_to_agent 工具：指定下一位行动者并结束轮次
pub struct DelegateTool {
    state: TurnStateHandle,
    available: AvailableAgents,
}

impl DelegateTool {
    pub fn new(state: TurnStateHandle, available: AvailableAgents) -> Self {
        Self { state, available }
    }

    pub fn delegate(&self, agent_id: &str, message: Option<String>) -> Result<String, OrchestrationError> {
        if self.available.len() <= 1 {
            return Err(OrchestrationError::Unsupported(
                "Cannot delegate as there are no other available agents.".to_string(),
            ));
        }
        let next = self
            .available
            .get_by_id(agent_id)
            .ok_or_else(|| OrchestrationError::AgentNotFound(agent_id.to_string()))?;
        let reply = format!("Delegated to agent {} with ID {}", next.name(), agent_id);
        self.state.delegate(next.clone(), message);
        Ok(reply)
    }
}

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        DELEGATE_TOOL
    }

    fn description(&self) -> &str {
        "Delegate to another agent and optionally send a message."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::to_value(schema_for!(DelegateArgs)).unwrap_or_else(|_| {
            serde_json::json!({ "type": "object", "properties": {}, "required": ["agent_id"] })
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: DelegateArgs =
            serde_json::from_value(args).map_err(|e| ToolError::InvalidArgs(e.to_string()))?;
        Ok(self.delegate(&args.agent_id, args.message)?)
    }
}
