//! `rivulet-sequencing` 判定乱序到达的分片何时凑齐一个完整序列。
//!
//! # 模块定位（Why）
//! - 传输层把一次逻辑工作拆成多个分片缓冲，由多个工作线程并行交付；
//! - 收集器与缓冲无关，只消费分片戳记（序列号、分片号、终止标记）与水位线，
//!   可在任意线程上直接调用。
//!
//! # 设计概要（How）
//! - [`ChunkCollector`] 以 `DashMap` 按序列号分片加锁，插入、完成判定与移除在同一条目锁下完成；
//! - 协议违例由 [`SequenceViolation`] 描述，`collect` 按 [`ViolationPolicy`] 处置，
//!   `try_collect` 直接返回给调用方。

mod collector;
mod error;

pub use collector::{ChunkCollector, CompletedSequence, ViolationPolicy};
pub use error::SequenceViolation;
