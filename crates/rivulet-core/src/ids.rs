//! 数据搬运链路上的标识符契约。
//!
//! # 设计动机（Why）
//! - 序列号、分片号、来源标识底层都是 `u64`，裸整数混用时编译器无法发现实参错位；
//!   以新类型区分后，`collect(seq, chunk)` 这类调用不会再悄悄传反。
//! - 水位线按契约是有符号 64 位时间戳，单独建模以便统一“取最大值”的聚合语义。
//!
//! # 集成方式（How）
//! - 缓冲池在 `prepare` 阶段将字段重置为各类型的默认值；
//! - 网络层为入站缓冲打上 [`SequenceData`] 戳记，再交由分片收集器判定收敛。

use core::fmt;

use serde::{Deserialize, Serialize};

/// 一个逻辑工作单元的序列号；同一序列可以被拆成多个分片。
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// 返回紧随其后的序列号，溢出时饱和在 `u64::MAX`。
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq#{}", self.0)
    }
}

/// 分片在所属序列中的位置。
///
/// # 契约（What）
/// - 每个序列的首个分片编号为 [`ChunkNumber::INITIAL`]；
/// - 分片编号从 `INITIAL` 起连续递增，终止分片由 `last_chunk` 标记给出。
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChunkNumber(u64);

impl ChunkNumber {
    /// 序列中的首个分片编号。
    pub const INITIAL: Self = Self(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// 从 [`ChunkNumber::INITIAL`] 到 `self`（含）一共有多少个分片。
    ///
    /// 若 `self` 小于 `INITIAL` 或区间长度超出 `u64` 表示范围，返回 `None`。
    pub const fn span_from_initial(self) -> Option<u64> {
        match self.0.checked_sub(Self::INITIAL.0) {
            Some(distance) => distance.checked_add(1),
            None => None,
        }
    }
}

impl fmt::Display for ChunkNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk#{}", self.0)
    }
}

/// 产出缓冲的数据源标识。
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OriginId(u64);

impl OriginId {
    /// 尚未绑定来源时的占位值。
    pub const UNSET: Self = Self(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "origin#{}", self.0)
    }
}

/// 进度时间戳（有符号 64 位）。
///
/// 序列收敛时，对其所有分片的水位线取最大值后向下游转发；
/// 因此 `Ord` 即聚合语义，调用方直接使用 [`Ord::max`] 即可。
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Watermark(i64);

impl Watermark {
    pub const MIN: Self = Self(i64::MIN);

    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wm@{}", self.0)
    }
}

/// 网络层写入缓冲、并交给分片收集器的序列戳记。
///
/// # 契约（What）
/// - `last_chunk == true` 表示 `chunk_number` 是该序列的终止分片；同一序列至多标记一次；
/// - 单分片序列即 `chunk_number == ChunkNumber::INITIAL && last_chunk`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceData {
    pub sequence_number: SequenceNumber,
    pub chunk_number: ChunkNumber,
    pub last_chunk: bool,
}

impl SequenceData {
    pub const fn new(
        sequence_number: SequenceNumber,
        chunk_number: ChunkNumber,
        last_chunk: bool,
    ) -> Self {
        Self {
            sequence_number,
            chunk_number,
            last_chunk,
        }
    }

    /// 构造只有一个分片的序列戳记。
    pub const fn single(sequence_number: SequenceNumber) -> Self {
        Self::new(sequence_number, ChunkNumber::INITIAL, true)
    }
}

impl fmt::Display for SequenceData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.sequence_number, self.chunk_number)?;
        if self.last_chunk {
            f.write_str(" (last)")?;
        }
        Ok(())
    }
}
