//! 全局搜索候选：命名约定、save_top_n 枚举、选优与完整性校验
//!
//! 外部引擎把候选写在「当前加载文件所在目录」，文件名为
//! `前缀 + 4 位运行号 + "_" + 3 位排名 + 扩展名`；目标值 <= 0 表示该排名槽位未使用。

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::core::OptError;

/// 候选文件名前缀
pub const CANDIDATE_PREFIX: &str = "GLOBAL_";
/// 候选文件扩展名（不含点）
pub const CANDIDATE_EXTENSION: &str = "zos";
/// 引擎写出的默认运行号
pub const DEFAULT_RUN_ID: u32 = 1;
/// 输出目录中的工作副本文件名（不得匹配候选通配符）
pub const WORKING_COPY_NAME: &str = "working_copy.zos";
/// 目标值不大于此值的排名槽位视为未使用
pub const UNUSED_SLOT_CEILING: f64 = 0.0;
/// 文件修改时间的容差（部分文件系统 mtime 精度为秒级）
const MTIME_SLACK: Duration = Duration::from_secs(2);

/// 排名槽位是否被填充
pub fn is_populated(objective: f64) -> bool {
    objective.is_finite() && objective > UNUSED_SLOT_CEILING
}

/// 全局搜索保存的候选数量，只允许固定几档
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SaveTopN {
    One,
    Five,
    #[default]
    Ten,
    Twenty,
    Fifty,
}

impl SaveTopN {
    pub const ALLOWED: [u32; 5] = [1, 5, 10, 20, 50];

    pub fn count(&self) -> usize {
        u32::from(*self) as usize
    }
}

impl TryFrom<u32> for SaveTopN {
    type Error = OptError;

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        match n {
            1 => Ok(SaveTopN::One),
            5 => Ok(SaveTopN::Five),
            10 => Ok(SaveTopN::Ten),
            20 => Ok(SaveTopN::Twenty),
            50 => Ok(SaveTopN::Fifty),
            other => Err(OptError::InvalidSaveTopN(other)),
        }
    }
}

impl From<SaveTopN> for u32 {
    fn from(n: SaveTopN) -> u32 {
        match n {
            SaveTopN::One => 1,
            SaveTopN::Five => 5,
            SaveTopN::Ten => 10,
            SaveTopN::Twenty => 20,
            SaveTopN::Fifty => 50,
        }
    }
}

impl fmt::Display for SaveTopN {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u32::from(*self))
    }
}

/// 候选文件命名约定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateNaming {
    prefix: String,
    run_id: u32,
    extension: String,
}

impl Default for CandidateNaming {
    fn default() -> Self {
        Self::new(DEFAULT_RUN_ID)
    }
}

impl CandidateNaming {
    pub fn new(run_id: u32) -> Self {
        Self {
            prefix: CANDIDATE_PREFIX.to_string(),
            run_id,
            extension: CANDIDATE_EXTENSION.to_string(),
        }
    }

    pub fn run_id(&self) -> u32 {
        self.run_id
    }

    /// 如 `GLOBAL_0001_002.zos`
    pub fn file_name(&self, rank: usize) -> String {
        format!(
            "{}{:04}_{:03}.{}",
            self.prefix, self.run_id, rank, self.extension
        )
    }

    pub fn path_in(&self, dir: &Path, rank: usize) -> PathBuf {
        dir.join(self.file_name(rank))
    }

    /// 旧候选文件的通配符（与运行号无关）
    pub fn stale_pattern(&self) -> String {
        format!("{}*.{}", self.prefix, self.extension)
    }
}

/// 单个候选（仅在收割过程中短暂存在）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    /// 排名，从 1 开始
    pub rank: usize,
    pub objective: f64,
    pub file_path: PathBuf,
}

/// 目标值最小者胜出；并列时取排名靠前者
pub fn select_best(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates.iter().min_by(|a, b| {
        a.objective
            .total_cmp(&b.objective)
            .then_with(|| a.rank.cmp(&b.rank))
    })
}

/// 信任候选文件前的轻量校验：存在、非空、且在本次搜索开始之后写出
pub fn verify_integrity(path: &Path, not_before: SystemTime) -> Result<(), String> {
    let meta = std::fs::metadata(path).map_err(|e| format!("missing: {e}"))?;
    if !meta.is_file() {
        return Err("not a regular file".to_string());
    }
    if meta.len() == 0 {
        return Err("empty file".to_string());
    }
    if let Ok(modified) = meta.modified() {
        let threshold = not_before.checked_sub(MTIME_SLACK).unwrap_or(not_before);
        if modified < threshold {
            return Err("written before the search started".to_string());
        }
    }
    Ok(())
}
