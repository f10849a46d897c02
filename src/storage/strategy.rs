//! Transfer strategy selection / 传输策略选择
//!
//! Copy when the backend already holds the bytes under the same credentials,
//! otherwise write; go multipart once the known size reaches the threshold.

use super::config::{MultipartThreshold, StorageConfig};
use super::{BackendIdentity, MultipartPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Server-side copy / 服务端复制
    Copy,
    /// Fresh byte write / 上传数据
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    pub mode: TransferMode,
    pub multipart: bool,
}

/// Decide how to move a source into `destination` / 选择传输方式
///
/// `source` is the backend holding the source object (`None` for local
/// bytes). Unknown sizes never go multipart.
pub fn decide(
    source: Option<&BackendIdentity>,
    size: Option<u64>,
    destination: &BackendIdentity,
    threshold: &MultipartThreshold,
) -> TransferPlan {
    let mode = match source {
        Some(source) if source.kind == destination.kind && source.account == destination.account => {
            TransferMode::Copy
        }
        _ => TransferMode::Write,
    };

    let limit = match mode {
        TransferMode::Copy => threshold.copy,
        TransferMode::Write => threshold.upload,
    };

    TransferPlan {
        mode,
        multipart: size.map_or(false, |size| size >= limit),
    }
}

/// Part layout for a multipart transfer of `size` bytes / 计算分片大小
///
/// Grows the part size when the preferred one would exceed the part limit.
pub fn part_plan(size: u64, config: &StorageConfig) -> MultipartPlan {
    let min_for_limit = size.div_ceil(config.max_multipart_parts);
    MultipartPlan {
        part_size: config.multipart_part_size.max(min_for_limit),
        concurrency: config.multipart_concurrency,
    }
}
