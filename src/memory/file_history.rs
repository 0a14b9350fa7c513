//! 文件历史
//!
//! 每个线程一个 JSON 文件（base_path/{thread_id}.json），内容为 Message 数组；
//! 保存时整体读出、追加、写回，写操作由互斥锁串行化。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::core::HistoryError;
use crate::memory::history::{append_monotonic, window, HistoryStore, DEFAULT_HISTORY_BATCH_SIZE};
use crate::memory::Message;

/// 基于 JSON 文件的历史存储
#[derive(Debug)]
pub struct FileHistory {
    base_path: PathBuf,
    batch_size: usize,
    write_lock: Mutex<()>,
}

impl FileHistory {
    /// 创建存储；base_path 不存在时自动创建
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            batch_size: DEFAULT_HISTORY_BATCH_SIZE,
            write_lock: Mutex::new(()),
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn path(&self, thread_id: &str) -> PathBuf {
        self.base_path.join(format!("{thread_id}.json"))
    }

    async fn read_thread(&self, thread_id: &str) -> Result<Vec<Message>, HistoryError> {
        let path = self.path(thread_id);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&data)?)
    }
}

#[async_trait]
impl HistoryStore for FileHistory {
    async fn load_messages(
        &self,
        thread_id: &str,
        limit: Option<usize>,
        before: Option<DateTime<Utc>>,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, HistoryError> {
        let all = self.read_thread(thread_id).await?;
        Ok(window(&all, limit, before, after))
    }

    async fn save_messages(&self, thread_id: &str, messages: &[Message]) -> Result<(), HistoryError> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.read_thread(thread_id).await?;
        append_monotonic(&mut all, messages);
        tokio::fs::write(self.path(thread_id), serde_json::to_string(&all)?).await?;
        tracing::debug!(thread_id, saved = messages.len(), total = all.len(), "history saved");
        Ok(())
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Role, ToolCall};

    #[tokio::test]
    async fn test_round_trip_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let history = FileHistory::new(dir.path().join("history")).unwrap();

        let assistant = Message::assistant("")
            .with_name(Some("Marvin".into()))
            .with_tool_calls(vec![ToolCall::new("call_1", "echo", serde_json::json!({"text": "hi"}))]);
        history
            .save_messages("thread-1", &[Message::user("hello"), assistant])
            .await
            .unwrap();
        history
            .save_messages("thread-1", &[Message::tool("hi", "call_1")])
            .await
            .unwrap();

        let reopened = FileHistory::new(dir.path().join("history")).unwrap();
        let loaded = reopened.load_messages("thread-1", None, None, None).await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[1].tool_calls[0].name, "echo");
        assert_eq!(loaded[2].role, Role::Tool);
    }

    #[tokio::test]
    async fn test_missing_thread_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let history = FileHistory::new(dir.path()).unwrap();
        assert!(history.load_messages("nope", Some(10), None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_limit_applies_to_newest() {
        let dir = tempfile::tempdir().unwrap();
        let history = FileHistory::new(dir.path()).unwrap();
        let messages: Vec<Message> = (0..6).map(|i| Message::user(format!("m{i}"))).collect();
        history.save_messages("t", &messages).await.unwrap();

        let loaded = history.load_messages("t", Some(1), None, None).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content, "m5");
    }
}
