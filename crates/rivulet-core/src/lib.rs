//! `rivulet-core` 汇集数据搬运核心各 crate 共享的词汇类型。
//!
//! # 模块定位（Why）
//! - `rivulet-buffer` 在缓冲控制块上记录序列号、分片号、水位线与来源标识，
//!   `rivulet-sequencing` 以同一组类型判定序列是否收敛；两者必须对这些值的含义保持一致。
//! - 错误码以 `<领域>.<语义>` 命名集中定义，供日志检索与告警聚合使用。
//!
//! # 结构（How）
//! - [`ids`]：`SequenceNumber`、`ChunkNumber`、`OriginId`、`Watermark` 等新类型以及 [`SequenceData`] 戳记；
//! - [`error`]：稳定错误码与 [`ErrorCode`] trait。

pub mod error;
pub mod ids;

pub use error::{ErrorCode, codes};
pub use ids::{ChunkNumber, OriginId, SequenceData, SequenceNumber, Watermark};
