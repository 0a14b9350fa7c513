//! 历史存储抽象
//!
//! HistoryStore 负责已定稿消息的追加与窗口读取；TranscriptCompiler 的调用方用它装配上下文，
//! 编译器本身不依赖存储。同一线程内消息时间戳严格递增（保存时若不递增则顺延 1 微秒），
//! 因此 before/after 的严格比较不会在批次边界丢消息。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::core::HistoryError;
use crate::memory::{Message, TokenTrimmer};

/// load_messages_to_token_limit 每批向前加载的消息数
pub const DEFAULT_HISTORY_BATCH_SIZE: usize = 50;

/// 历史存储接口
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// 按时间顺序返回消息：timestamp < before、timestamp > after，且只取最新的 limit 条
    async fn load_messages(
        &self,
        thread_id: &str,
        limit: Option<usize>,
        before: Option<DateTime<Utc>>,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, HistoryError>;

    /// 追加已定稿消息
    async fn save_messages(&self, thread_id: &str, messages: &[Message]) -> Result<(), HistoryError>;

    /// 每批加载条数
    fn batch_size(&self) -> usize {
        DEFAULT_HISTORY_BATCH_SIZE
    }

    /// 使用默认窗口表加载到模型 token 上限
    async fn load_messages_to_token_limit(
        &self,
        thread_id: &str,
        model: &str,
    ) -> Result<Vec<Message>, HistoryError> {
        self.load_messages_to_token_limit_with(thread_id, model, &TokenTrimmer::default())
            .await
    }

    /// 向前分批加载，直到裁剪开始丢弃消息或历史耗尽，返回裁剪结果。
    /// 裁剪只保留最新后缀，故返回值在再多加载一批后保持不变。
    async fn load_messages_to_token_limit_with(
        &self,
        thread_id: &str,
        model: &str,
        trimmer: &TokenTrimmer,
    ) -> Result<Vec<Message>, HistoryError> {
        let mut messages: Vec<Message> = Vec::new();
        loop {
            let trimmed = trimmer.trim(&messages, model);
            if trimmed.len() != messages.len() {
                return Ok(trimmed);
            }
            let before = messages.first().map(|m| m.timestamp);
            let mut batch = self
                .load_messages(thread_id, Some(self.batch_size()), before, None)
                .await?;
            if batch.is_empty() {
                return Ok(trimmed);
            }
            tracing::debug!(thread_id, loaded = batch.len(), total = messages.len() + batch.len(), "history window grown");
            batch.append(&mut messages);
            messages = batch;
        }
    }
}

/// 在内存中的消息列表上应用 before / after / limit 窗口
pub(crate) fn window(
    messages: &[Message],
    limit: Option<usize>,
    before: Option<DateTime<Utc>>,
    after: Option<DateTime<Utc>>,
) -> Vec<Message> {
    let mut selected: Vec<Message> = messages
        .iter()
        .rev()
        .filter(|m| before.map_or(true, |b| m.timestamp < b))
        .filter(|m| after.map_or(true, |a| m.timestamp > a))
        .take(limit.unwrap_or(usize::MAX))
        .cloned()
        .collect();
    selected.reverse();
    selected
}

/// 将新消息追加到线程，保证时间戳严格递增
pub(crate) fn append_monotonic(thread: &mut Vec<Message>, messages: &[Message]) {
    for message in messages {
        let mut message = message.clone();
        if let Some(last) = thread.last() {
            if message.timestamp <= last.timestamp {
                message.timestamp = last.timestamp + Duration::microseconds(1);
            }
        }
        thread.push(message);
    }
}

/// 内存历史：每个存储实例独立持有线程 -> 消息列表
#[derive(Debug)]
pub struct InMemoryHistory {
    threads: RwLock<HashMap<String, Vec<Message>>>,
    batch_size: usize,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::with_batch_size(DEFAULT_HISTORY_BATCH_SIZE)
    }

    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
            batch_size: batch_size.max(1),
        }
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn load_messages(
        &self,
        thread_id: &str,
        limit: Option<usize>,
        before: Option<DateTime<Utc>>,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, HistoryError> {
        let threads = self.threads.read().await;
        Ok(threads
            .get(thread_id)
            .map(|thread| window(thread, limit, before, after))
            .unwrap_or_default())
    }

    async fn save_messages(&self, thread_id: &str, messages: &[Message]) -> Result<(), HistoryError> {
        let mut threads = self.threads.write().await;
        append_monotonic(threads.entry(thread_id.to_string()).or_default(), messages);
        Ok(())
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }
}
