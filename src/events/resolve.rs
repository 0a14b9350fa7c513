//! 派生事件的解析结果
//!
//! 工具按名称解析、增量片段按 index 匹配快照；解析不到时不是错误，而是显式的 Discarded，
//! 派生视图因此不完整但不会中断。

use std::fmt;
use std::sync::Arc;

use crate::tools::{find_tool, Tool};

/// 被丢弃的原因
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiscardReason {
    /// 作者 Agent 未声明该名称的工具
    UnresolvedTool(String),
    /// 增量片段的 index 在快照中没有对应调用
    MalformedDelta { index: usize },
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardReason::UnresolvedTool(name) => write!(f, "unresolved tool `{name}`"),
            DiscardReason::MalformedDelta { index } => write!(f, "no snapshot call at index {index}"),
        }
    }
}

/// 解析结果：Resolved 或带原因的 Discarded
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution<T> {
    Resolved(T),
    Discarded(DiscardReason),
}

impl<T> Resolution<T> {
    /// 取出已解析值；丢弃时记录 debug 日志
    pub fn keep(self) -> Option<T> {
        match self {
            Resolution::Resolved(v) => Some(v),
            Resolution::Discarded(reason) => {
                tracing::debug!(%reason, "derived event discarded");
                None
            }
        }
    }
}

/// 在作者的工具中按名称解析
pub fn resolve_tool(tools: &[Arc<dyn Tool>], name: Option<&str>) -> Resolution<Arc<dyn Tool>> {
    let name = name.unwrap_or_default();
    match find_tool(tools, name) {
        Some(tool) => Resolution::Resolved(tool),
        None => Resolution::Discarded(DiscardReason::UnresolvedTool(name.to_string())),
    }
}
