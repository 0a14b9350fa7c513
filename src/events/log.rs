//! 事件日志：单线程对话的唯一写入点
//!
//! 持久事件进入只追加的序列（写锁覆盖整个 push，读方看不到半条事件）；
//! 所有事件（含增量）同时广播给实时订阅者（UI、监控），订阅者滞后不影响写入。
//! 持久序列的时间戳单调不减。

use std::sync::{PoisonError, RwLock};

use tokio::sync::broadcast;

use crate::agent::Agent;
use crate::events::compiler::compile_transcript;
use crate::events::event::{Event, EventKind};
use crate::memory::Message;

/// 实时通道默认容量
const LIVE_CHANNEL_CAPACITY: usize = 256;

/// 只追加的事件日志
#[derive(Debug)]
pub struct EventLog {
    persisted: RwLock<Vec<Event>>,
    live: broadcast::Sender<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::with_capacity(LIVE_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(live_capacity: usize) -> Self {
        let (live, _) = broadcast::channel(live_capacity.max(1));
        Self {
            persisted: RwLock::new(Vec::new()),
            live,
        }
    }

    /// 追加一条事件并广播；返回实际记录的事件
    pub fn append(&self, kind: impl Into<EventKind>) -> Event {
        let mut event = Event::new(kind);
        if event.persisted() {
            let mut events = self.persisted.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(last) = events.last() {
                if event.timestamp() < last.timestamp() {
                    event = event.with_timestamp(last.timestamp());
                }
            }
            events.push(event.clone());
            tracing::debug!(kind = event.kind().name(), seq = events.len() - 1, "event appended");
        }
        // 没有订阅者时发送失败，忽略即可
        let _ = self.live.send(event.clone());
        event
    }

    /// 依次追加多条事件
    pub fn extend(&self, kinds: impl IntoIterator<Item = EventKind>) {
        for kind in kinds {
            self.append(kind);
        }
    }

    /// 当前持久事件的稳定副本
    pub fn persisted(&self) -> Vec<Event> {
        self.persisted.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.persisted.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 订阅实时事件流（含增量）
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.live.subscribe()
    }

    /// 为观看者编译当前转录
    pub fn transcript_for(&self, viewer: &Agent) -> Vec<Message> {
        compile_transcript(&self.persisted(), viewer)
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
