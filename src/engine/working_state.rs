//! 工作状态：对外部活动设计的句柄
//!
//! 每个编排器只持有一个 WorkingState；全局收割可能用加载的候选文件替换它（generation 递增）。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::engine::{DesignEngine, EngineError};

/// 活动设计句柄：save / load / current_objective
#[derive(Clone)]
pub struct WorkingState {
    engine: Arc<dyn DesignEngine>,
    /// 最近一次加载的设计文件
    source: Option<PathBuf>,
    /// 每次 load 递增，用于判断设计是否被替换
    generation: u64,
}

impl WorkingState {
    pub fn new(engine: Arc<dyn DesignEngine>) -> Self {
        Self {
            engine,
            source: None,
            generation: 0,
        }
    }

    pub fn engine(&self) -> &Arc<dyn DesignEngine> {
        &self.engine
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn save(&self, path: &Path) -> Result<(), EngineError> {
        self.engine.save_design(path).await
    }

    /// 加载设计文件，替换当前活动设计
    pub async fn load(&mut self, path: &Path) -> Result<(), EngineError> {
        self.engine.load_design(path).await?;
        self.source = Some(path.to_path_buf());
        self.generation += 1;
        tracing::debug!(path = %path.display(), generation = self.generation, "working state rebound");
        Ok(())
    }

    pub async fn current_objective(&self) -> Result<f64, EngineError> {
        self.engine.evaluate().await
    }
}

impl std::fmt::Debug for WorkingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkingState")
            .field("engine", &self.engine.name())
            .field("source", &self.source)
            .field("generation", &self.generation)
            .finish()
    }
}
