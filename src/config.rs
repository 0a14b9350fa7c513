//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__ORCHESTRATION__STRATEGY=round_robin`）。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::core::HistoryError;
use crate::memory::{FileHistory, HistoryStore, InMemoryHistory, TokenTrimmer, DEFAULT_HISTORY_BATCH_SIZE};
use crate::orchestration::StrategyKind;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HiveConfig {
    pub orchestration: OrchestrationSection,
    pub history: HistorySection,
    pub models: ModelsSection,
    pub tools: ToolsSection,
}

/// [orchestration] 段：轮次策略与上限
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestrationSection {
    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,
    /// moderated 策略的主持人名称
    #[serde(default)]
    pub moderator: Option<String>,
    /// 单轮最大步数，防止 Agent 一直不结束轮次
    #[serde(default = "default_max_steps_per_turn")]
    pub max_steps_per_turn: usize,
    /// 会话最大轮数；未设置时只由策略或外部停止结束
    #[serde(default)]
    pub max_turns: Option<usize>,
}

fn default_strategy() -> StrategyKind {
    StrategyKind::RoundRobin
}

fn default_max_steps_per_turn() -> usize {
    20
}

impl Default for OrchestrationSection {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            moderator: None,
            max_steps_per_turn: default_max_steps_per_turn(),
            max_turns: None,
        }
    }
}

/// 历史存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HistoryBackend {
    #[default]
    Memory,
    File,
}

/// [history] 段：存储后端、文件目录、回溯批大小
#[derive(Debug, Clone, Deserialize)]
pub struct HistorySection {
    #[serde(default)]
    pub backend: HistoryBackend,
    /// file 后端的目录，未设置时用 ./history
    #[serde(default)]
    pub base_path: Option<PathBuf>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    DEFAULT_HISTORY_BATCH_SIZE
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            backend: HistoryBackend::default(),
            base_path: None,
            batch_size: default_batch_size(),
        }
    }
}

impl HistorySection {
    /// 按配置构建历史存储
    pub fn build_store(&self) -> Result<Arc<dyn HistoryStore>, HistoryError> {
        Ok(match self.backend {
            HistoryBackend::Memory => Arc::new(InMemoryHistory::with_batch_size(self.batch_size)),
            HistoryBackend::File => {
                let path = self.base_path.clone().unwrap_or_else(|| PathBuf::from("history"));
                Arc::new(FileHistory::new(path)?.with_batch_size(self.batch_size))
            }
        })
    }
}

/// [models] 段：按模型名覆盖上下文窗口
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ModelsSection {
    #[serde(default)]
    pub context_windows: HashMap<String, usize>,
}

impl ModelsSection {
    pub fn trimmer(&self) -> TokenTrimmer {
        TokenTrimmer::with_overrides(self.context_windows.clone())
    }
}

/// [tools] 段：单次工具调用超时
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_tool_timeout_secs() -> u64 {
    30
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<HiveConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
