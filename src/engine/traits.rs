//! 外部设计引擎抽象
//!
//! 所有后端（真实引擎桥接 / Simulated）实现 DesignEngine：按类型打开搜索工具、保存/加载设计、同步评价函数。
//! 搜索工具实现 SearchTool：初始/当前目标值、带超时运行、取消、等待完成、关闭。

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::merit::MeritFunction;
use crate::search::SaveTopN;

/// 三种外部搜索过程
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    /// 局部优化（阻尼最小二乘等确定性细化）
    Local,
    /// 全局多起点搜索，保存前 N 个候选
    Global,
    /// 锤形优化（扰动式细化）
    Hammer,
}

impl SearchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchKind::Local => "local",
            SearchKind::Global => "global",
            SearchKind::Hammer => "hammer",
        }
    }
}

impl fmt::Display for SearchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 局部优化算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    DampedLeastSquares,
    OrthogonalDescent,
}

/// 循环次数策略：自动收敛或固定次数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cycles {
    #[default]
    Automatic,
    Fixed(u32),
}

/// 打开工具后下发的配置
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSettings {
    pub algorithm: Algorithm,
    /// 外部工具内部并行度（本系统只声明，不调度）
    pub cores: u32,
    pub cycles: Cycles,
    /// 仅全局搜索使用
    pub save_top_n: Option<SaveTopN>,
}

impl ToolSettings {
    pub fn new(cores: u32) -> Self {
        Self {
            algorithm: Algorithm::default(),
            cores: cores.max(1),
            cycles: Cycles::Automatic,
            save_top_n: None,
        }
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_cycles(mut self, cycles: Cycles) -> Self {
        self.cycles = cycles;
        self
    }

    pub fn with_save_top_n(mut self, n: SaveTopN) -> Self {
        self.save_top_n = Some(n);
        self
    }
}

/// 引擎报告的系统概况（向导据此布置求积与边界约束）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSummary {
    /// 面数（含物面与像面）
    pub surface_count: u32,
    pub wavelength_count: u32,
    /// 归一化视场点 (Hx, Hy)
    pub fields: Vec<(f64, f64)>,
}

impl SystemSummary {
    /// 光学面区间（去掉物面与像面）
    pub fn optical_surfaces(&self) -> (u32, u32) {
        (1, self.surface_count.saturating_sub(2).max(1))
    }
}

/// 引擎边界错误
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to open {kind} search tool: {reason}")]
    ToolUnavailable { kind: SearchKind, reason: String },

    #[error("Engine call failed: {0}")]
    Call(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Design file error ({path}): {message}")]
    DesignFile { path: PathBuf, message: String },
}

/// 外部搜索工具：每次调用打开、配置、运行、关闭，不跨调用持有
#[async_trait]
pub trait SearchTool: Send + Sync {
    fn kind(&self) -> SearchKind;

    async fn apply_settings(&mut self, settings: &ToolSettings) -> Result<(), EngineError>;

    /// 打开工具时引擎计算的初始目标值
    async fn initial_objective(&self) -> Result<f64, EngineError>;

    /// 当前目标值（局部 / 锤形）
    async fn current_objective(&self) -> Result<f64, EngineError>;

    /// 第 rank 个候选的目标值（仅全局搜索，rank 从 1 开始；取消后仍可读）
    async fn ranked_objective(&self, rank: usize) -> Result<f64, EngineError> {
        let _ = rank;
        Err(EngineError::Unsupported(format!(
            "{} tool has no ranked objectives",
            self.kind()
        )))
    }

    /// 运行并最多阻塞 timeout_secs 秒（协作式超时）
    async fn run_and_wait_with_timeout(&mut self, timeout_secs: u64) -> Result<(), EngineError>;

    async fn cancel(&mut self) -> Result<(), EngineError>;

    async fn wait_for_completion(&mut self) -> Result<(), EngineError>;

    async fn close(&mut self) -> Result<(), EngineError>;

    /// 已完成的循环次数（引擎不提供时为 None）
    fn cycles_run(&self) -> Option<u32> {
        None
    }
}

/// 外部设计引擎：持有唯一的活动设计
#[async_trait]
pub trait DesignEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn open_tool(&self, kind: SearchKind) -> Result<Box<dyn SearchTool>, EngineError>;

    async fn save_design(&self, path: &Path) -> Result<(), EngineError>;

    /// 加载设计文件，替换当前活动设计
    async fn load_design(&self, path: &Path) -> Result<(), EngineError>;

    async fn system_summary(&self) -> Result<SystemSummary, EngineError>;

    /// 将本地评价函数同步到引擎
    async fn apply_merit_function(&self, merit: &MeritFunction) -> Result<(), EngineError>;

    /// 按顺序返回每个操作数的当前计算值
    async fn operand_values(&self, merit: &MeritFunction) -> Result<Vec<f64>, EngineError>;

    /// 只读评估当前目标值
    ///
    /// 默认实现借用局部优化工具：打开、读取初始目标值、立即关闭，不运行任何循环。
    /// 提供独立评估端点的引擎应覆盖此方法。
    async fn evaluate(&self) -> Result<f64, EngineError> {
        let mut tool = self.open_tool(SearchKind::Local).await?;
        let value = tool.initial_objective().await;
        if let Err(e) = tool.close().await {
            tracing::warn!("Closing evaluation tool failed: {}", e);
        }
        value
    }
}
