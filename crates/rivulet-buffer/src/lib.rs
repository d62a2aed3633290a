//! `rivulet-buffer` 提供流水线阶段之间零拷贝传递数据所用的缓冲分配器。
//!
//! # 模块定位（Why）
//! - 流水线的每一级都在同一批内存上读写，缓冲在阶段之间以引用计数句柄移交，不复制负载；
//! - 热路径上只在预分配的空闲链表上出入，稳定状态下不向系统分配器申请内存。
//!
//! # 设计概要（How）
//! - `segment`：对齐、清零的原始内存段，只在分配器内部流转；
//! - `control_block`：附着在段上的原子元数据与引用计数，计数归零时把段交给回收目标；
//! - [`Buffer`]：对外唯一的句柄类型，`Clone` 加计数，`Drop` 减计数；
//! - [`BufferPool`]：预分配的定长池，另可分配非池化段；
//! - [`FixedSizeBufferPool`]：从全局池独占划出的定长子池；
//! - `sync`：原子类型与锁的统一入口，`--cfg loom` 下切换为 Loom 实现。
//!
//! # 并发契约（What）
//! - 空闲段不会被两个线程同时取得；归还的段恰好被一个后续等待者取得；
//! - 填充者在释放引用之前的写入，对之后通过 `clone` 拿到引用的读者可见；
//! - `shutdown` 唤醒全部阻塞中的租借，使其返回 [`PoolError::Closed`]。

mod buffer;
mod config;
mod control_block;
mod error;
mod fixed_size_pool;
mod free_list;
mod pool;
mod segment;
mod sync;

pub use buffer::{Buffer, ChildIndex};
pub use config::{BufferPoolConfig, DEFAULT_ALIGNMENT, DEFAULT_BUFFER_SIZE, DEFAULT_NUMBER_OF_BUFFERS};
pub use error::{ConfigError, PoolError};
pub use fixed_size_pool::FixedSizeBufferPool;
pub use pool::{BufferPool, PoolStatistics};
