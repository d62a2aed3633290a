//! 缓冲池的可恢复错误。
//!
//! 资源耗尽与池关闭属于普通运行时结果，调用方应据此重试、施加背压或让外围任务失败；
//! 控制块的前置条件违例不在此列，它们直接 panic（见 [`crate::control_block`]）。

use rivulet_core::{ErrorCode, codes};
use thiserror::Error;

/// 租借缓冲时可能返回的错误。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// 限时租借在截止时间前没有等到空闲缓冲。
    ///
    /// 非阻塞租借不会返回该错误，而是返回 `Ok(None)`。
    #[error("buffer pool exhausted: no pooled buffer became available in time")]
    Exhausted,

    /// 池已经 `shutdown`，包括在关闭时被唤醒的等待者。
    #[error("buffer pool is closed")]
    Closed,

    /// 非池化分配的尺寸为 0，或底层分配失败。
    #[error("invalid buffer size {requested}: {reason}")]
    InvalidSize {
        requested: usize,
        reason: &'static str,
    },

    /// 构造池时传入了非法配置。
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

impl ErrorCode for PoolError {
    fn code(&self) -> &'static str {
        match self {
            PoolError::Exhausted => codes::BUFFER_POOL_EXHAUSTED,
            PoolError::Closed => codes::BUFFER_POOL_CLOSED,
            PoolError::InvalidSize { .. } => codes::BUFFER_INVALID_SIZE,
            PoolError::InvalidConfig(_) => codes::BUFFER_INVALID_CONFIG,
        }
    }
}

/// [`BufferPoolConfig`](crate::BufferPoolConfig) 解析或校验失败。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to parse buffer pool configuration: {0}")]
    Parse(String),

    #[error("buffer_size must be greater than zero")]
    ZeroBufferSize,

    #[error("number_of_buffers must be greater than zero")]
    ZeroBufferCount,

    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(usize),
}

impl ErrorCode for ConfigError {
    fn code(&self) -> &'static str {
        codes::BUFFER_INVALID_CONFIG
    }
}
