//! Agent 身份与可用 Agent 映射
//!
//! Agent 只对编排核心暴露身份（id、name）与能力集合（可调用的工具）；相等性只比较 id。
//! 未显式指定 id 时，id 由 name / instructions / description 派生（UUIDv5 前 8 位十六进制），
//! 同样配置的 Agent 在不同进程中得到同一 id。
//!
//! AvailableAgents 是按插入顺序迭代的 Agent -> 待办任务映射，所有轮次策略的平局都按此顺序决断。

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::tools::{find_tool, Tool};

/// 参与对话的 Agent
#[derive(Clone)]
pub struct Agent {
    id: String,
    name: String,
    description: Option<String>,
    instructions: Option<String>,
    tools: Vec<Arc<dyn Tool>>,
    /// with_id 指定后不再随配置重新派生
    id_pinned: bool,
}

fn stable_id(name: &str, instructions: Option<&str>, description: Option<&str>) -> String {
    let seed = format!(
        "{name}\u{1f}{}\u{1f}{}",
        instructions.unwrap_or_default(),
        description.unwrap_or_default()
    );
    let uuid = Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes());
    uuid.simple().to_string()[..8].to_string()
}

impl Agent {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: stable_id(&name, None, None),
            name,
            description: None,
            instructions: None,
            tools: Vec::new(),
            id_pinned: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self.id_pinned = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self.refresh_id();
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self.refresh_id();
        self
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn with_tool_arc(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    fn refresh_id(&mut self) {
        if !self.id_pinned {
            self.id = stable_id(
                &self.name,
                self.instructions.as_deref(),
                self.description.as_deref(),
            );
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    /// Agent 自身声明的工具（不含控制工具）
    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn find_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        find_tool(&self.tools, name)
    }

    /// 供 prompt 使用的 JSON 描述：id、name、description 与工具清单
    pub fn serialize_for_prompt(&self) -> Value {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|t| json!({ "name": t.name(), "description": t.description() }))
            .collect();
        json!({
            "id": self.id,
            "name": self.name,
            "description": self.description,
            "tools": tools,
        })
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("tools", &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl PartialEq for Agent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Agent {}

impl Hash for Agent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// 分配给 Agent 的待办任务（任务定义本身不在编排核心内）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub id: String,
    pub objective: String,
}

impl TaskRef {
    pub fn new(id: impl Into<String>, objective: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            objective: objective.into(),
        }
    }
}

/// 可用 Agent -> 待办任务，按插入顺序迭代
#[derive(Clone, Debug, Default)]
pub struct AvailableAgents {
    entries: Vec<(Agent, Vec<TaskRef>)>,
}

impl AvailableAgents {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或替换；已存在的 Agent 保持原位置
    pub fn insert(&mut self, agent: Agent, tasks: Vec<TaskRef>) {
        match self.entries.iter_mut().find(|(a, _)| *a == agent) {
            Some(entry) => *entry = (agent, tasks),
            None => self.entries.push((agent, tasks)),
        }
    }

    pub fn with(mut self, agent: Agent, tasks: Vec<TaskRef>) -> Self {
        self.insert(agent, tasks);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, agent: &Agent) -> bool {
        self.position(agent).is_some()
    }

    pub fn position(&self, agent: &Agent) -> Option<usize> {
        self.entries.iter().position(|(a, _)| a == agent)
    }

    pub fn get_by_id(&self, id: &str) -> Option<&Agent> {
        self.agents().find(|a| a.id() == id)
    }

    pub fn first(&self) -> Option<&Agent> {
        self.entries.first().map(|(a, _)| a)
    }

    pub fn get_index(&self, index: usize) -> Option<&Agent> {
        self.entries.get(index).map(|(a, _)| a)
    }

    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.entries.iter().map(|(a, _)| a)
    }

    pub fn pending_tasks(&self, agent: &Agent) -> &[TaskRef] {
        self.entries
            .iter()
            .find(|(a, _)| a == agent)
            .map(|(_, t)| t.as_slice())
            .unwrap_or_default()
    }
}

impl FromIterator<(Agent, Vec<TaskRef>)> for AvailableAgents {
    fn from_iter<I: IntoIterator<Item = (Agent, Vec<TaskRef>)>>(iter: I) -> Self {
        let mut available = Self::new();
        for (agent, tasks) in iter {
            available.insert(agent, tasks);
        }
        available
    }
}
