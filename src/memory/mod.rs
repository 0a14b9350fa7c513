//! 记忆层：提供方消息格式、历史存储（内存 / JSON 文件）、按模型 token 上限裁剪

pub mod file_history;
pub mod history;
pub mod message;
pub mod token_budget;

pub use file_history::FileHistory;
pub use history::{HistoryStore, InMemoryHistory, DEFAULT_HISTORY_BATCH_SIZE};
pub use message::{Message, Role, ToolCall};
pub use token_budget::{trim_messages, TokenEstimator, TokenTrimmer};
