//! 流水线计划与报告
//!
//! 计划：local → global? → hammer? → local；报告汇总各阶段结果，可导出 JSON。

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::OptError;
use crate::engine::{Algorithm, Cycles};
use crate::search::{OptimizationRunResult, SaveTopN};

/// 全局搜索阶段参数
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalStage {
    pub timeout_secs: u64,
    pub save_top_n: SaveTopN,
    /// 运行目录下的候选输出子目录
    pub output_subdir: String,
}

/// 一次流水线运行的计划
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelinePlan {
    pub cores: u32,
    pub algorithm: Algorithm,
    pub cycles: Cycles,
    /// 首尾两次局部优化共用
    pub local_timeout_secs: u64,
    /// None 表示跳过全局搜索
    pub global: Option<GlobalStage>,
    /// None 表示跳过锤形优化
    pub hammer_timeout_secs: Option<u64>,
    pub stop_on_failure: bool,
    pub save_snapshots: bool,
}

impl Default for PipelinePlan {
    fn default() -> Self {
        Self {
            cores: 8,
            algorithm: Algorithm::default(),
            cycles: Cycles::default(),
            local_timeout_secs: 60,
            global: Some(GlobalStage {
                timeout_secs: 300,
                save_top_n: SaveTopN::default(),
                output_subdir: "global".to_string(),
            }),
            hammer_timeout_secs: Some(120),
            stop_on_failure: true,
            save_snapshots: false,
        }
    }
}

/// 流水线中的一个阶段
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Local,
    Global(GlobalStage),
    /// 锤形优化超时（秒）
    Hammer(u64),
    FinalLocal,
}

impl Stage {
    /// 报告与快照文件名中使用的阶段名
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Local => "local",
            Stage::Global(_) => "global",
            Stage::Hammer(_) => "hammer",
            Stage::FinalLocal => "final_local",
        }
    }
}

impl PipelinePlan {
    /// 计划中的阶段，按执行顺序
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages = vec![Stage::Local];
        if let Some(global) = &self.global {
            stages.push(Stage::Global(global.clone()));
        }
        if let Some(timeout_secs) = self.hammer_timeout_secs {
            stages.push(Stage::Hammer(timeout_secs));
        }
        stages.push(Stage::FinalLocal);
        stages
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages().iter().map(Stage::name).collect()
    }
}

/// 单个阶段的记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    pub stage: String,
    pub result: OptimizationRunResult,
    /// 阶段结束后另存的设计
    pub snapshot: Option<PathBuf>,
}

/// 流水线报告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineReport {
    pub engine: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub run_directory: PathBuf,
    pub initial_objective: f64,
    pub final_objective: Option<f64>,
    pub stages: Vec<StageRecord>,
    /// 所有计划阶段都已执行
    pub completed: bool,
    pub cancelled: bool,
    /// 因 success = false 提前终止时的阶段名
    pub stopped_after: Option<String>,
}

impl PipelineReport {
    pub fn new(engine: &str, run_directory: &Path, initial_objective: f64) -> Self {
        Self {
            engine: engine.to_string(),
            started_at: chrono::Local::now().to_rfc3339(),
            finished_at: None,
            run_directory: run_directory.to_path_buf(),
            initial_objective,
            final_objective: None,
            stages: Vec::new(),
            completed: false,
            cancelled: false,
            stopped_after: None,
        }
    }

    pub fn finish(&mut self, final_objective: Option<f64>) {
        self.final_objective = final_objective;
        self.finished_at = Some(chrono::Local::now().to_rfc3339());
    }

    /// initial - final
    pub fn improvement(&self) -> Option<f64> {
        self.final_objective.map(|f| self.initial_objective - f)
    }

    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.stage == name)
    }

    pub fn write_json(&self, path: &Path) -> Result<(), OptError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::from)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Pipeline report written");
        Ok(())
    }
}
