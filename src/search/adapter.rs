//! 搜索工具适配器：三种外部搜索过程的统一调用约定
//!
//! 每次调用自行打开并关闭工具，不跨调用保留句柄。打开失败是致命错误（Err）；
//! 打开之后的失败记录在结果里（success = false），且工具总会被关闭。

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::core::OptError;
use crate::engine::{Algorithm, Cycles, EngineError, SearchKind, ToolSettings, WorkingState};
use crate::search::session::ToolSession;
use crate::search::{OptimizationRunResult, SaveTopN, StopReason};

/// 默认硬超时余量
pub const DEFAULT_GRACE: Duration = Duration::from_secs(10);

/// 局部优化参数
#[derive(Debug, Clone, PartialEq)]
pub struct LocalRunOptions {
    pub algorithm: Algorithm,
    pub cores: u32,
    pub cycles: Cycles,
    pub timeout_secs: u64,
}

impl LocalRunOptions {
    pub fn new(cores: u32, timeout_secs: u64) -> Self {
        Self {
            algorithm: Algorithm::DampedLeastSquares,
            cores,
            cycles: Cycles::Automatic,
            timeout_secs,
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
}

/// 锤形优化参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HammerRunOptions {
    pub cores: u32,
    pub timeout_secs: u64,
}

impl HammerRunOptions {
    pub fn new(cores: u32, timeout_secs: u64) -> Self {
        Self { cores, timeout_secs }
    }
}

/// 全局搜索的原始输出（候选筛选由收割器负责）
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalSearchRun {
    pub initial_objective: f64,
    /// 排名 1..=save_top_n 的目标值，含未使用槽位
    pub ranked_objectives: Vec<f64>,
    pub stop_reason: Option<StopReason>,
    pub error: Option<String>,
    pub duration: Duration,
}

/// 三种搜索的统一入口
#[derive(Debug, Clone)]
pub struct SearchToolAdapter {
    grace: Duration,
    cancel_token: CancellationToken,
}

impl Default for SearchToolAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE, CancellationToken::new())
    }
}

impl SearchToolAdapter {
    pub fn new(grace: Duration, cancel_token: CancellationToken) -> Self {
        Self { grace, cancel_token }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// 局部优化：打开，设置算法/核数/循环策略，运行最多 T 秒，读取目标值，关闭
    pub async fn run_local(
        &self,
        state: &WorkingState,
        options: &LocalRunOptions,
    ) -> Result<OptimizationRunResult, OptError> {
        let settings = ToolSettings::new(options.cores)
            .with_algorithm(options.algorithm)
            .with_cycles(options.cycles);
        self.run_refinement(state, SearchKind::Local, settings, options.timeout_secs)
            .await
    }

    /// 锤形优化：与局部优化相同，但无论如何都以两阶段停止结束
    pub async fn run_hammer(
        &self,
        state: &WorkingState,
        options: &HammerRunOptions,
    ) -> Result<OptimizationRunResult, OptError> {
        let settings = ToolSettings::new(options.cores);
        self.run_refinement(state, SearchKind::Hammer, settings, options.timeout_secs)
            .await
    }

    async fn run_refinement(
        &self,
        state: &WorkingState,
        kind: SearchKind,
        settings: ToolSettings,
        timeout_secs: u64,
    ) -> Result<OptimizationRunResult, OptError> {
        let start = Instant::now();
        let mut session = ToolSession::open(state.engine().as_ref(), kind).await?;
        tracing::info!(kind = %kind, cores = settings.cores, timeout_secs, "Starting search");

        let mut initial = f64::NAN;
        let outcome = self
            .drive_refinement(&mut session, &settings, timeout_secs, &mut initial)
            .await;
        if let Err(e) = session.close().await {
            tracing::warn!(kind = %kind, "Closing search tool failed: {}", e);
        }

        let mut result = match outcome {
            Ok((final_objective, iterations, stop_reason)) => {
                let mut r = OptimizationRunResult::succeeded(kind, initial);
                r.final_objective = Some(final_objective);
                r.iterations = iterations;
                r.stop_reason = Some(stop_reason);
                tracing::info!(
                    kind = %kind,
                    initial,
                    final_objective,
                    stop = ?stop_reason,
                    "Search finished"
                );
                r
            }
            Err(e) => {
                tracing::warn!(kind = %kind, "Search failed: {}", e);
                OptimizationRunResult::failed(kind, initial, e.to_string())
            }
        };
        result.duration_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }

    async fn drive_refinement(
        &self,
        session: &mut ToolSession,
        settings: &ToolSettings,
        timeout_secs: u64,
        initial: &mut f64,
    ) -> Result<(f64, Option<u32>, StopReason), EngineError> {
        session.configure(settings).await?;
        *initial = session.tool().initial_objective().await?;
        let reason = session
            .run(timeout_secs, self.grace, &self.cancel_token)
            .await?;
        if session.kind() == SearchKind::Hammer && reason == StopReason::Completed {
            session.stop(self.grace).await?;
        }
        let final_objective = session.tool().current_objective().await?;
        Ok((final_objective, session.tool().cycles_run(), reason))
    }

    /// 全局搜索：打开，设置核数与 save_top_n，运行，cancel，等待，读取各排名目标值，关闭
    pub async fn run_global_search(
        &self,
        state: &WorkingState,
        cores: u32,
        save_top_n: SaveTopN,
        timeout_secs: u64,
    ) -> Result<GlobalSearchRun, OptError> {
        let start = Instant::now();
        let mut session = ToolSession::open(state.engine().as_ref(), SearchKind::Global).await?;
        tracing::info!(cores, save_top_n = %save_top_n, timeout_secs, "Starting global search");

        let settings = ToolSettings::new(cores).with_save_top_n(save_top_n);
        let mut initial = f64::NAN;
        let outcome = self
            .drive_global(&mut session, &settings, save_top_n, timeout_secs, &mut initial)
            .await;
        if let Err(e) = session.close().await {
            tracing::warn!("Closing global search tool failed: {}", e);
        }

        let duration = start.elapsed();
        Ok(match outcome {
            Ok((ranked_objectives, stop_reason)) => GlobalSearchRun {
                initial_objective: initial,
                ranked_objectives,
                stop_reason: Some(stop_reason),
                error: None,
                duration,
            },
            Err(e) => {
                tracing::warn!("Global search failed: {}", e);
                GlobalSearchRun {
                    initial_objective: initial,
                    ranked_objectives: Vec::new(),
                    stop_reason: None,
                    error: Some(e.to_string()),
                    duration,
                }
            }
        })
    }

    async fn drive_global(
        &self,
        session: &mut ToolSession,
        settings: &ToolSettings,
        save_top_n: SaveTopN,
        timeout_secs: u64,
        initial: &mut f64,
    ) -> Result<(Vec<f64>, StopReason), EngineError> {
        session.configure(settings).await?;
        *initial = session.tool().initial_objective().await?;
        let reason = session
            .run(timeout_secs, self.grace, &self.cancel_token)
            .await?;
        if reason == StopReason::Completed {
            session.stop(self.grace).await?;
        }
        let mut ranked = Vec::with_capacity(save_top_n.count());
        for rank in 1..=save_top_n.count() {
            ranked.push(session.tool().ranked_objective(rank).await?);
        }
        Ok((ranked, reason))
    }

    /// 只读评估当前目标值
    pub async fn evaluate(&self, state: &WorkingState) -> Result<f64, OptError> {
        Ok(state.current_objective().await?)
    }
}
