//! Token 预算：按模型上下文窗口裁剪消息历史
//!
//! trim_messages 保留「能放进窗口的最长最新后缀」。该裁剪对更早的前缀不敏感：
//! 一旦结果已丢弃消息，再向前追加历史不会改变结果，这是 load_messages_to_token_limit 收敛的前提。

use std::collections::HashMap;

use crate::memory::Message;

/// 未知模型的默认上下文窗口
pub const DEFAULT_CONTEXT_WINDOW: usize = 8000;

/// 每条消息的固定开销（角色、分隔符等）
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// 已知模型前缀 -> 上下文窗口（按最长前缀匹配）
const KNOWN_CONTEXT_WINDOWS: &[(&str, usize)] = &[
    ("gpt-4o", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-4", 8_192),
    ("gpt-3.5-turbo", 16_385),
    ("claude-3", 200_000),
    ("deepseek-chat", 64_000),
    ("deepseek-reasoner", 64_000),
];

/// Token 估算器（简单的字符计数近似）
pub struct TokenEstimator;

impl TokenEstimator {
    /// 估算文本的 token 数量
    /// 使用简单的启发式规则：英文约 4 字符/token，中文约 1.5 字符/token
    pub fn estimate(text: &str) -> usize {
        let mut ascii_chars = 0;
        let mut non_ascii_chars = 0;

        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }

        let tokens = ascii_chars / 4 + (non_ascii_chars as f64 / 1.5).ceil() as usize;
        tokens.max(1)
    }

    /// 单条消息的估算：正文 + 工具调用参数 + 固定开销
    pub fn estimate_message(message: &Message) -> usize {
        let calls: usize = message
            .tool_calls
            .iter()
            .map(|c| Self::estimate(&c.name) + Self::estimate(&c.args.to_string()))
            .sum();
        Self::estimate(&message.content) + calls + MESSAGE_OVERHEAD_TOKENS
    }
}

/// 按模型裁剪消息的工具；overrides 来自配置 [models].context_windows
#[derive(Debug, Clone, Default)]
pub struct TokenTrimmer {
    overrides: HashMap<String, usize>,
}

impl TokenTrimmer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_overrides(overrides: HashMap<String, usize>) -> Self {
        Self { overrides }
    }

    /// 模型的上下文窗口：配置覆盖优先，其次已知前缀，最后默认值
    pub fn context_window(&self, model: &str) -> usize {
        if let Some(limit) = self.overrides.get(model) {
            return *limit;
        }
        KNOWN_CONTEXT_WINDOWS
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, limit)| *limit)
            .unwrap_or(DEFAULT_CONTEXT_WINDOW)
    }

    /// 保留能放进窗口的最长最新后缀（顺序不变）
    pub fn trim(&self, messages: &[Message], model: &str) -> Vec<Message> {
        let budget = self.context_window(model);
        let mut used = 0;
        let mut keep_from = messages.len();
        for (i, message) in messages.iter().enumerate().rev() {
            let cost = TokenEstimator::estimate_message(message);
            if used + cost > budget {
                break;
            }
            used += cost;
            keep_from = i;
        }
        messages[keep_from..].to_vec()
    }
}

/// 使用默认窗口表裁剪
pub fn trim_messages(messages: &[Message], model: &str) -> Vec<Message> {
    TokenTrimmer::default().trim(messages, model)
}
