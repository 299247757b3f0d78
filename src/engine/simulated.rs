//! 模拟设计引擎（用于测试与无真实后端时的本地运行）
//!
//! 完整实现引擎契约：工具生命周期、设计文件读写（JSON）、全局候选写到「已加载文件所在目录」。
//! 每次工具调用都记录到 calls，便于测试断言调用顺序（如锤形优化的 cancel → wait → close）。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::{
    Cycles, DesignEngine, EngineError, SearchKind, SearchTool, SystemSummary, ToolSettings,
};
use crate::merit::MeritFunction;
use crate::search::{is_populated, CandidateNaming, SaveTopN};

/// 局部优化每次运行后目标值的缩放
const LOCAL_GAIN: f64 = 0.8;
/// 锤形优化每次运行后目标值的缩放
const HAMMER_GAIN: f64 = 0.95;
/// 自动循环模式下报告的循环次数
const AUTOMATIC_CYCLES: u32 = 12;

/// 模拟引擎写出的设计文件内容
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DesignFile {
    engine: String,
    objective: f64,
    operand_count: usize,
}

#[derive(Debug)]
struct SimState {
    objective: f64,
    summary: SystemSummary,
    loaded_path: Option<PathBuf>,
    operand_count: usize,
    /// 全局搜索每个排名报告的目标值
    ranked: Vec<f64>,
    /// 实际写到磁盘的排名；None 表示所有有效排名
    written_ranks: Option<Vec<usize>>,
    naming: CandidateNaming,
    unavailable: HashSet<SearchKind>,
    failing: HashSet<SearchKind>,
    stalled: HashSet<SearchKind>,
    improving: bool,
    calls: Vec<String>,
}

/// 模拟引擎：进程内实现 DesignEngine
#[derive(Clone)]
pub struct SimulatedEngine {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedEngine {
    pub fn new(initial_objective: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                objective: initial_objective,
                summary: SystemSummary {
                    surface_count: 8,
                    wavelength_count: 3,
                    fields: vec![(0.0, 0.0), (0.0, 0.7), (0.0, 1.0)],
                },
                loaded_path: None,
                operand_count: 1,
                ranked: Vec::new(),
                written_ranks: None,
                naming: CandidateNaming::default(),
                unavailable: HashSet::new(),
                failing: HashSet::new(),
                stalled: HashSet::new(),
                improving: true,
                calls: Vec::new(),
            })),
        }
    }

    /// 全局搜索各排名报告的目标值（不足 save_top_n 的部分补 0）
    pub fn with_ranked_objectives(self, ranked: Vec<f64>) -> Self {
        self.lock().ranked = ranked;
        self
    }

    /// 只把指定排名的候选写到磁盘（模拟内存排名与磁盘输出不一致）
    pub fn with_written_ranks(self, ranks: Vec<usize>) -> Self {
        self.lock().written_ranks = Some(ranks);
        self
    }

    /// 候选文件命名（须与收割器使用的 run id 一致）
    pub fn with_naming(self, naming: CandidateNaming) -> Self {
        self.lock().naming = naming;
        self
    }

    pub fn with_unavailable(self, kind: SearchKind) -> Self {
        self.lock().unavailable.insert(kind);
        self
    }

    /// 运行阶段返回错误
    pub fn with_failing_run(self, kind: SearchKind) -> Self {
        self.lock().failing.insert(kind);
        self
    }

    /// 运行阶段无限挂起，不响应协作式超时；全局搜索在挂起前已发布候选
    pub fn with_stalled_run(self, kind: SearchKind) -> Self {
        self.lock().stalled.insert(kind);
        self
    }

    /// 关闭改进：运行后目标值不变
    pub fn without_improvement(self) -> Self {
        self.lock().improving = false;
        self
    }

    pub fn with_summary(self, summary: SystemSummary) -> Self {
        self.lock().summary = summary;
        self
    }

    pub fn objective(&self) -> f64 {
        self.lock().objective
    }

    pub fn loaded_path(&self) -> Option<PathBuf> {
        self.lock().loaded_path.clone()
    }

    pub fn operand_count(&self) -> usize {
        self.lock().operand_count
    }

    /// 调用记录，如 `["open:local", "local:settings", ...]`
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl DesignEngine for SimulatedEngine {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn open_tool(&self, kind: SearchKind) -> Result<Box<dyn SearchTool>, EngineError> {
        let mut state = self.lock();
        state.calls.push(format!("open:{kind}"));
        if state.unavailable.contains(&kind) {
            return Err(EngineError::ToolUnavailable {
                kind,
                reason: "simulated tool unavailable".to_string(),
            });
        }
        let initial = state.objective;
        Ok(Box::new(SimulatedTool {
            kind,
            shared: self.state.clone(),
            settings: ToolSettings::new(1),
            initial,
            current: initial,
            ranked: Vec::new(),
            cycles: None,
        }))
    }

    async fn save_design(&self, path: &Path) -> Result<(), EngineError> {
        let file = {
            let mut state = self.lock();
            state.calls.push("save".to_string());
            DesignFile {
                engine: "simulated".to_string(),
                objective: state.objective,
                operand_count: state.operand_count,
            }
        };
        write_design(path, &file)
    }

    async fn load_design(&self, path: &Path) -> Result<(), EngineError> {
        let file = read_design(path)?;
        let mut state = self.lock();
        state.calls.push("load".to_string());
        state.objective = file.objective;
        state.loaded_path = Some(path.to_path_buf());
        Ok(())
    }

    async fn system_summary(&self) -> Result<SystemSummary, EngineError> {
        Ok(self.lock().summary.clone())
    }

    async fn apply_merit_function(&self, merit: &MeritFunction) -> Result<(), EngineError> {
        self.lock().operand_count = merit.len();
        Ok(())
    }

    async fn operand_values(&self, merit: &MeritFunction) -> Result<Vec<f64>, EngineError> {
        let objective = self.lock().objective;
        Ok(merit
            .operands()
            .iter()
            .map(|op| {
                if op.is_control() {
                    0.0
                } else {
                    op.target() + objective * op.weight() * 0.1
                }
            })
            .collect())
    }
}

fn write_design(path: &Path, file: &DesignFile) -> Result<(), EngineError> {
    let json = serde_json::to_string_pretty(file).map_err(|e| EngineError::DesignFile {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    std::fs::write(path, json).map_err(|e| EngineError::DesignFile {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn read_design(path: &Path) -> Result<DesignFile, EngineError> {
    let raw = std::fs::read_to_string(path).map_err(|e| EngineError::DesignFile {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|e| EngineError::DesignFile {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// 模拟搜索工具
struct SimulatedTool {
    kind: SearchKind,
    shared: Arc<Mutex<SimState>>,
    settings: ToolSettings,
    initial: f64,
    current: f64,
    ranked: Vec<f64>,
    cycles: Option<u32>,
}

impl SimulatedTool {
    fn record(&self, op: &str) {
        lock_state(&self.shared)
            .calls
            .push(format!("{}:{}", self.kind, op));
    }

    /// 发布排名并写出候选文件；取消后仍可读取
    fn publish_global(&mut self) -> Result<(), EngineError> {
        let save_top_n = self.settings.save_top_n.unwrap_or_default();
        let (ranked, written, dir, naming) = {
            let state = lock_state(&self.shared);
            let mut ranked = state.ranked.clone();
            ranked.resize(save_top_n.count(), 0.0);
            let dir = state
                .loaded_path
                .as_deref()
                .and_then(Path::parent)
                .map(Path::to_path_buf);
            (ranked, state.written_ranks.clone(), dir, state.naming.clone())
        };

        // 候选写在已加载文件所在目录；未加载过文件时不写任何候选
        if let Some(dir) = dir {
            for (i, &objective) in ranked.iter().enumerate() {
                let rank = i + 1;
                let allowed = written.as_ref().map_or(true, |w| w.contains(&rank));
                if is_populated(objective) && allowed {
                    let file = DesignFile {
                        engine: "simulated".to_string(),
                        objective,
                        operand_count: lock_state(&self.shared).operand_count,
                    };
                    write_design(&naming.path_in(&dir, rank), &file)?;
                }
            }
        }
        self.ranked = ranked;
        Ok(())
    }
}

#[async_trait]
impl SearchTool for SimulatedTool {
    fn kind(&self) -> SearchKind {
        self.kind
    }

    async fn apply_settings(&mut self, settings: &ToolSettings) -> Result<(), EngineError> {
        self.record("settings");
        if self.kind == SearchKind::Global && settings.save_top_n.is_none() {
            return Err(EngineError::Call(
                "global search requires save_top_n".to_string(),
            ));
        }
        self.settings = settings.clone();
        Ok(())
    }

    async fn initial_objective(&self) -> Result<f64, EngineError> {
        Ok(self.initial)
    }

    async fn current_objective(&self) -> Result<f64, EngineError> {
        Ok(self.current)
    }

    async fn ranked_objective(&self, rank: usize) -> Result<f64, EngineError> {
        if self.kind != SearchKind::Global {
            return Err(EngineError::Unsupported(format!(
                "{} tool has no ranked objectives",
                self.kind
            )));
        }
        let n = self.settings.save_top_n.map_or(0, |n: SaveTopN| n.count());
        if rank == 0 || rank > n {
            return Err(EngineError::Call(format!("rank {rank} out of range 1..={n}")));
        }
        Ok(self.ranked.get(rank - 1).copied().unwrap_or(0.0))
    }

    async fn run_and_wait_with_timeout(&mut self, timeout_secs: u64) -> Result<(), EngineError> {
        self.record(&format!("run({timeout_secs})"));
        let (stalled, failing, improving) = {
            let state = lock_state(&self.shared);
            (
                state.stalled.contains(&self.kind),
                state.failing.contains(&self.kind),
                state.improving,
            )
        };
        if self.kind == SearchKind::Global && !failing {
            self.publish_global()?;
        }
        if stalled {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if failing {
            return Err(EngineError::Call("simulated run failure".to_string()));
        }

        match self.kind {
            SearchKind::Global => {}
            SearchKind::Local | SearchKind::Hammer => {
                let gain = match (self.kind, improving) {
                    (_, false) => 1.0,
                    (SearchKind::Local, true) => LOCAL_GAIN,
                    _ => HAMMER_GAIN,
                };
                self.current *= gain;
                lock_state(&self.shared).objective = self.current;
                self.cycles = Some(match self.settings.cycles {
                    Cycles::Automatic => AUTOMATIC_CYCLES,
                    Cycles::Fixed(n) => n,
                });
            }
        }
        Ok(())
    }

    async fn cancel(&mut self) -> Result<(), EngineError> {
        self.record("cancel");
        // 运行尚未开始就被取消时，全局搜索仍报告已有的排名
        let failing = lock_state(&self.shared).failing.contains(&self.kind);
        if self.kind == SearchKind::Global && self.ranked.is_empty() && !failing {
            self.publish_global()?;
        }
        Ok(())
    }

    async fn wait_for_completion(&mut self) -> Result<(), EngineError> {
        self.record("wait");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.record("close");
        Ok(())
    }

    fn cycles_run(&self) -> Option<u32> {
        self.cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_evaluate_opens_and_closes_local_tool() {
        let engine = SimulatedEngine::new(25.0);
        let value = engine.evaluate().await.unwrap();
        assert_eq!(value, 25.0);
        assert_eq!(engine.calls(), vec!["open:local", "local:close"]);
        assert_eq!(engine.objective(), 25.0);
    }

    #[tokio::test]
    async fn test_unavailable_tool() {
        let engine = SimulatedEngine::new(1.0).with_unavailable(SearchKind::Hammer);
        let err = engine.open_tool(SearchKind::Hammer).await.err().unwrap();
        assert!(matches!(err, EngineError::ToolUnavailable { kind: SearchKind::Hammer, .. }));
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip_objective() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("design.zos");
        let engine = SimulatedEngine::new(7.5);
        engine.save_design(&path).await.unwrap();

        let other = SimulatedEngine::new(100.0);
        other.load_design(&path).await.unwrap();
        assert_eq!(other.objective(), 7.5);
        assert_eq!(other.loaded_path().as_deref(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn test_load_missing_file_fails() {
        let engine = SimulatedEngine::new(1.0);
        let err = engine
            .load_design(Path::new("/nonexistent/design.zos"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DesignFile { .. }));
        assert_eq!(engine.objective(), 1.0);
    }

    #[tokio::test]
    async fn test_global_writes_candidates_next_to_loaded_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("start.zos");
        let engine = SimulatedEngine::new(20.0)
            .with_ranked_objectives(vec![12.4, 9.8, 0.0, 15.0])
            .with_written_ranks(vec![1, 4]);
        engine.save_design(&path).await.unwrap();
        engine.load_design(&path).await.unwrap();

        let mut tool = engine.open_tool(SearchKind::Global).await.unwrap();
        tool.apply_settings(&ToolSettings::new(4).with_save_top_n(SaveTopN::Five))
            .await
            .unwrap();
        tool.run_and_wait_with_timeout(1).await.unwrap();

        assert_eq!(tool.ranked_objective(2).await.unwrap(), 9.8);
        assert_eq!(tool.ranked_objective(5).await.unwrap(), 0.0);
        assert!(tool.ranked_objective(6).await.is_err());

        let naming = CandidateNaming::default();
        assert!(naming.path_in(dir.path(), 1).exists());
        assert!(!naming.path_in(dir.path(), 2).exists());
        assert!(!naming.path_in(dir.path(), 3).exists());
        assert!(naming.path_in(dir.path(), 4).exists());
    }

    #[tokio::test]
    async fn test_global_candidates_follow_configured_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("start.zos");
        let engine = SimulatedEngine::new(20.0)
            .with_ranked_objectives(vec![12.4, 9.8])
            .with_naming(CandidateNaming::new(2));
        engine.save_design(&path).await.unwrap();
        engine.load_design(&path).await.unwrap();

        let mut tool = engine.open_tool(SearchKind::Global).await.unwrap();
        tool.apply_settings(&ToolSettings::new(1).with_save_top_n(SaveTopN::One))
            .await
            .unwrap();
        tool.run_and_wait_with_timeout(1).await.unwrap();

        assert!(dir.path().join("GLOBAL_0002_001.zos").exists());
        assert!(!dir.path().join("GLOBAL_0001_001.zos").exists());
    }

    #[tokio::test]
    async fn test_stalled_global_publishes_ranks_before_stall() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("start.zos");
        let engine = SimulatedEngine::new(20.0)
            .with_ranked_objectives(vec![12.4, 9.8])
            .with_stalled_run(SearchKind::Global);
        engine.save_design(&path).await.unwrap();
        engine.load_design(&path).await.unwrap();

        let mut tool = engine.open_tool(SearchKind::Global).await.unwrap();
        tool.apply_settings(&ToolSettings::new(1).with_save_top_n(SaveTopN::Five))
            .await
            .unwrap();
        let run = tokio::time::timeout(
            Duration::from_millis(20),
            tool.run_and_wait_with_timeout(1),
        )
        .await;
        assert!(run.is_err());

        assert_eq!(tool.ranked_objective(2).await.unwrap(), 9.8);
        assert!(CandidateNaming::default().path_in(dir.path(), 2).exists());
    }

    #[tokio::test]
    async fn test_local_run_improves_and_reports_cycles() {
        let engine = SimulatedEngine::new(10.0);
        let mut tool = engine.open_tool(SearchKind::Local).await.unwrap();
        tool.apply_settings(&ToolSettings::new(2).with_cycles(Cycles::Fixed(5)))
            .await
            .unwrap();
        tool.run_and_wait_with_timeout(1).await.unwrap();
        assert!((tool.current_objective().await.unwrap() - 8.0).abs() < 1e-12);
        assert_eq!(tool.cycles_run(), Some(5));
        assert!((engine.objective() - 8.0).abs() < 1e-12);
    }
}
