//! 全局搜索结果收割
//!
//! 状态按顺序推进：Init → PersistWorkingCopy → CleanStaleCandidates → RunSearch
//! → CollectCandidates → SelectBest → LoadBest / LoadOriginal。
//! 引擎只把候选写到磁盘、以「目标值 > 0」暗示槽位有效；内存排名与磁盘不一致时回退到工作副本。

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

use thiserror::Error;

use crate::core::OptError;
use crate::engine::{SearchKind, WorkingState};
use crate::search::{
    is_populated, select_best, verify_integrity, Candidate, CandidateNaming, OptimizationRunResult,
    SaveTopN, SearchToolAdapter, WORKING_COPY_NAME,
};

/// 收割阶段（仅用于日志）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestPhase {
    Init,
    PersistWorkingCopy,
    CleanStaleCandidates,
    RunSearch,
    CollectCandidates,
    SelectBest,
    LoadBest,
    LoadOriginal,
}

impl fmt::Display for HarvestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HarvestPhase::Init => "init",
            HarvestPhase::PersistWorkingCopy => "persist_working_copy",
            HarvestPhase::CleanStaleCandidates => "clean_stale_candidates",
            HarvestPhase::RunSearch => "run_search",
            HarvestPhase::CollectCandidates => "collect_candidates",
            HarvestPhase::SelectBest => "select_best",
            HarvestPhase::LoadBest => "load_best",
            HarvestPhase::LoadOriginal => "load_original",
        };
        f.write_str(s)
    }
}

/// 排名有效但候选文件缺失或不可信；只记录，随后回退到工作副本
#[derive(Error, Debug)]
#[error("Candidate rank {rank} reported objective {objective} but {path} is unusable: {reason}")]
pub struct CandidateConsistencyFault {
    pub rank: usize,
    pub objective: f64,
    pub path: PathBuf,
    pub reason: String,
}

/// 全局搜索参数
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalRunOptions {
    pub output_folder: PathBuf,
    pub timeout_secs: u64,
    pub cores: u32,
    pub save_top_n: SaveTopN,
}

impl GlobalRunOptions {
    pub fn new(output_folder: impl Into<PathBuf>, timeout_secs: u64, cores: u32) -> Self {
        Self {
            output_folder: output_folder.into(),
            timeout_secs,
            cores,
            save_top_n: SaveTopN::default(),
        }
    }

    pub fn with_save_top_n(mut self, save_top_n: SaveTopN) -> Self {
        self.save_top_n = save_top_n;
        self
    }
}

/// 多候选持久化与选优协议
#[derive(Debug, Clone)]
pub struct GlobalResultHarvester {
    adapter: SearchToolAdapter,
    naming: CandidateNaming,
    check_integrity: bool,
}

impl GlobalResultHarvester {
    pub fn new(adapter: SearchToolAdapter) -> Self {
        Self {
            adapter,
            naming: CandidateNaming::default(),
            check_integrity: true,
        }
    }

    pub fn with_naming(mut self, naming: CandidateNaming) -> Self {
        self.naming = naming;
        self
    }

    /// 关闭后只检查文件是否存在
    pub fn with_integrity_check(mut self, enabled: bool) -> Self {
        self.check_integrity = enabled;
        self
    }

    fn enter(&self, phase: HarvestPhase) {
        tracing::debug!(phase = %phase, "harvest");
    }

    /// 执行一次全局搜索并把最佳候选载入工作状态
    ///
    /// 搜索开始前的失败（目录、工作副本、打开工具）通过 Err 返回；
    /// 之后的失败回退到工作副本并以 success = false 报告。
    pub async fn run(
        &self,
        state: &mut WorkingState,
        options: &GlobalRunOptions,
    ) -> Result<OptimizationRunResult, OptError> {
        let start = Instant::now();
        let folder = options.output_folder.as_path();

        self.enter(HarvestPhase::Init);
        std::fs::create_dir_all(folder)?;
        if !folder.is_dir() {
            return Err(OptError::Configuration(format!(
                "output folder {} is not a directory",
                folder.display()
            )));
        }

        self.enter(HarvestPhase::PersistWorkingCopy);
        let working_copy = folder.join(WORKING_COPY_NAME);
        state.save(&working_copy).await?;
        state.load(&working_copy).await?;

        self.enter(HarvestPhase::CleanStaleCandidates);
        let removed = self.clean_stale(folder);
        if removed > 0 {
            tracing::info!(removed, folder = %folder.display(), "Removed stale candidate files");
        }

        self.enter(HarvestPhase::RunSearch);
        let search_started = SystemTime::now();
        let run = self
            .adapter
            .run_global_search(state, options.cores, options.save_top_n, options.timeout_secs)
            .await?;

        let mut result = OptimizationRunResult::succeeded(SearchKind::Global, run.initial_objective);
        result.results_directory = Some(folder.to_path_buf());
        result.stop_reason = run.stop_reason;

        if let Some(error) = run.error {
            self.restore(state, &working_copy).await?;
            result.success = false;
            result.error = Some(error);
            result.duration_ms = start.elapsed().as_millis() as u64;
            return Ok(result);
        }

        self.enter(HarvestPhase::CollectCandidates);
        let candidates: Vec<Candidate> = run
            .ranked_objectives
            .iter()
            .enumerate()
            .filter(|&(_, &objective)| is_populated(objective))
            .map(|(i, &objective)| Candidate {
                rank: i + 1,
                objective,
                file_path: self.naming.path_in(folder, i + 1),
            })
            .collect();
        result.candidate_objectives = Some(candidates.iter().map(|c| c.objective).collect());
        tracing::info!(
            populated = candidates.len(),
            requested = options.save_top_n.count(),
            "Collected global search candidates"
        );

        self.enter(HarvestPhase::SelectBest);
        match select_best(&candidates) {
            Some(best) => match self.load_best(state, best, search_started).await {
                Ok(()) => {
                    tracing::info!(
                        rank = best.rank,
                        objective = best.objective,
                        path = %best.file_path.display(),
                        "Loaded best global candidate"
                    );
                    result.final_objective = Some(best.objective);
                    result.selected_candidate = Some(best.clone());
                }
                Err(fault) => {
                    tracing::error!("{}", fault);
                    self.restore(state, &working_copy).await?;
                }
            },
            None => {
                tracing::info!("Global search produced no candidates, keeping working copy");
                self.restore(state, &working_copy).await?;
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }

    /// 删除输出目录中匹配候选通配符的旧文件，返回删除数量
    fn clean_stale(&self, folder: &Path) -> usize {
        let pattern = format!(
            "{}/{}",
            glob::Pattern::escape(&folder.to_string_lossy()),
            self.naming.stale_pattern()
        );
        let paths = match glob::glob(&pattern) {
            Ok(paths) => paths,
            Err(e) => {
                tracing::warn!("Invalid stale candidate pattern {}: {}", pattern, e);
                return 0;
            }
        };
        let mut removed = 0;
        for entry in paths.flatten() {
            if !entry.is_file() {
                continue;
            }
            match std::fs::remove_file(&entry) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("Failed to remove stale candidate {}: {}", entry.display(), e),
            }
        }
        removed
    }

    async fn load_best(
        &self,
        state: &mut WorkingState,
        best: &Candidate,
        search_started: SystemTime,
    ) -> Result<(), CandidateConsistencyFault> {
        self.enter(HarvestPhase::LoadBest);
        let fault = |reason: String| CandidateConsistencyFault {
            rank: best.rank,
            objective: best.objective,
            path: best.file_path.clone(),
            reason,
        };
        if self.check_integrity {
            verify_integrity(&best.file_path, search_started).map_err(fault)?;
        } else if !best.file_path.exists() {
            return Err(fault("missing".to_string()));
        }
        state
            .load(&best.file_path)
            .await
            .map_err(|e| fault(e.to_string()))
    }

    async fn restore(&self, state: &mut WorkingState, working_copy: &Path) -> Result<(), OptError> {
        self.enter(HarvestPhase::LoadOriginal);
        tracing::warn!(path = %working_copy.display(), "Falling back to the working copy");
        state.load(working_copy).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::engine::SimulatedEngine;
    use crate::search::StopReason;

    fn harvester() -> GlobalResultHarvester {
        GlobalResultHarvester::new(SearchToolAdapter::new(
            Duration::from_millis(50),
            CancellationToken::new(),
        ))
    }

    fn ranks(head: &[f64]) -> Vec<f64> {
        let mut v = head.to_vec();
        v.resize(10, 0.0);
        v
    }

    fn options(dir: &Path) -> GlobalRunOptions {
        GlobalRunOptions::new(dir.join("global"), 30, 8).with_save_top_n(SaveTopN::Ten)
    }

    #[tokio::test]
    async fn test_scenario_best_candidate_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimulatedEngine::new(20.0).with_ranked_objectives(ranks(&[12.4, 9.8, 15.0]));
        let mut state = WorkingState::new(Arc::new(engine.clone()));

        let result = harvester().run(&mut state, &options(dir.path())).await.unwrap();

        assert!(result.success);
        assert_eq!(result.initial_objective, 20.0);
        assert_eq!(result.candidate_objectives, Some(vec![12.4, 9.8, 15.0]));
        assert_eq!(result.final_objective, Some(9.8));
        let expected = dir.path().join("global").join("GLOBAL_0001_002.zos");
        assert_eq!(state.source(), Some(expected.as_path()));
        assert_eq!(engine.loaded_path(), Some(expected));
        assert_eq!(engine.objective(), 9.8);
        assert_eq!(result.selected_candidate.map(|c| c.rank), Some(2));
        assert_eq!(result.results_directory, Some(dir.path().join("global")));
    }

    #[tokio::test]
    async fn test_scenario_missing_best_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimulatedEngine::new(20.0)
            .with_ranked_objectives(ranks(&[12.4, 9.8, 15.0]))
            .with_written_ranks(vec![1, 3]);
        let mut state = WorkingState::new(Arc::new(engine.clone()));

        let result = harvester().run(&mut state, &options(dir.path())).await.unwrap();

        assert!(result.success);
        assert_eq!(result.candidate_objectives, Some(vec![12.4, 9.8, 15.0]));
        assert_eq!(result.final_objective, None);
        assert!(result.selected_candidate.is_none());
        let working_copy = dir.path().join("global").join(WORKING_COPY_NAME);
        assert_eq!(state.source(), Some(working_copy.as_path()));
        assert_eq!(engine.objective(), 20.0);
    }

    #[tokio::test]
    async fn test_scenario_no_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimulatedEngine::new(20.0).with_ranked_objectives(ranks(&[]));
        let mut state = WorkingState::new(Arc::new(engine.clone()));

        let result = harvester().run(&mut state, &options(dir.path())).await.unwrap();

        assert!(result.success);
        assert_eq!(result.candidate_objectives, Some(vec![]));
        assert_eq!(engine.objective(), 20.0);
        assert_eq!(
            engine.loaded_path(),
            Some(dir.path().join("global").join(WORKING_COPY_NAME))
        );
    }

    #[tokio::test]
    async fn test_stale_candidates_are_removed_before_search() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("global");
        std::fs::create_dir_all(&folder).unwrap();
        // 上一次运行留下的 rank 2 文件不能被当作本次结果
        let stale = folder.join("GLOBAL_0001_002.zos");
        std::fs::write(&stale, r#"{"engine":"simulated","objective":1.0,"operand_count":1}"#)
            .unwrap();
        std::fs::write(folder.join("notes.txt"), "keep").unwrap();

        let engine = SimulatedEngine::new(20.0)
            .with_ranked_objectives(ranks(&[12.4, 9.8]))
            .with_written_ranks(vec![1]);
        let mut state = WorkingState::new(Arc::new(engine.clone()));
        let result = harvester().run(&mut state, &options(dir.path())).await.unwrap();

        assert!(!stale.exists());
        assert!(folder.join("notes.txt").exists());
        assert!(result.selected_candidate.is_none());
        assert_eq!(engine.objective(), 20.0);
    }

    #[tokio::test]
    async fn test_global_call_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimulatedEngine::new(20.0).with_ranked_objectives(ranks(&[5.0]));
        let mut state = WorkingState::new(Arc::new(engine.clone()));
        harvester().run(&mut state, &options(dir.path())).await.unwrap();
        assert_eq!(
            engine.calls(),
            vec![
                "save",
                "load",
                "open:global",
                "global:settings",
                "global:run(30)",
                "global:cancel",
                "global:wait",
                "global:close",
                "load"
            ]
        );
    }

    #[tokio::test]
    async fn test_hard_timeout_still_loads_best_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimulatedEngine::new(20.0)
            .with_ranked_objectives(ranks(&[12.4, 9.8, 15.0]))
            .with_stalled_run(SearchKind::Global);
        let mut state = WorkingState::new(Arc::new(engine.clone()));
        let options = GlobalRunOptions::new(dir.path().join("global"), 0, 8)
            .with_save_top_n(SaveTopN::Ten);

        let result = harvester().run(&mut state, &options).await.unwrap();

        assert!(result.success);
        assert_eq!(result.stop_reason, Some(StopReason::HardTimeout));
        assert_eq!(result.candidate_objectives, Some(vec![12.4, 9.8, 15.0]));
        assert_eq!(result.final_objective, Some(9.8));
        assert_eq!(engine.objective(), 9.8);
        assert_eq!(
            state.source(),
            Some(dir.path().join("global").join("GLOBAL_0001_002.zos").as_path())
        );
    }

    #[tokio::test]
    async fn test_cancelled_search_still_loads_best_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimulatedEngine::new(20.0)
            .with_ranked_objectives(ranks(&[12.4, 9.8, 15.0]))
            .with_stalled_run(SearchKind::Global);
        let mut state = WorkingState::new(Arc::new(engine.clone()));
        let token = CancellationToken::new();
        token.cancel();
        let harvester =
            GlobalResultHarvester::new(SearchToolAdapter::new(Duration::from_millis(50), token));

        let result = harvester.run(&mut state, &options(dir.path())).await.unwrap();

        assert!(result.success);
        assert_eq!(result.stop_reason, Some(StopReason::Cancelled));
        assert_eq!(result.selected_candidate.map(|c| c.rank), Some(2));
        assert_eq!(engine.objective(), 9.8);
        assert!(engine
            .calls()
            .windows(2)
            .any(|w| w[0] == "global:cancel" && w[1] == "global:wait"));
    }

    #[tokio::test]
    async fn test_open_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimulatedEngine::new(20.0).with_unavailable(SearchKind::Global);
        let mut state = WorkingState::new(Arc::new(engine));
        let err = harvester().run(&mut state, &options(dir.path())).await.unwrap_err();
        assert!(matches!(err, OptError::ExternalToolUnavailable(_)));
    }

    #[tokio::test]
    async fn test_run_failure_restores_working_copy() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimulatedEngine::new(20.0).with_failing_run(SearchKind::Global);
        let mut state = WorkingState::new(Arc::new(engine.clone()));
        let result = harvester().run(&mut state, &options(dir.path())).await.unwrap();
        assert!(!result.success);
        assert!(result.error.is_some());
        assert_eq!(engine.calls().last().map(String::as_str), Some("load"));
    }
}
