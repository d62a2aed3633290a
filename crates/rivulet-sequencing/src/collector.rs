//! # ChunkCollector：分片收敛判定
//!
//! ## 核心意图（Why）
//! - 网络层把一个逻辑序列拆成若干分片，各分片由不同工作线程、以任意顺序交付；
//! - 下游只关心“某序列的全部分片何时到齐”以及“应当向下游推进的水位线”。
//!
//! ## 行为契约（What）
//! - 序列完整当且仅当终止分片已标记，且从初始分片到终止分片的编号全部收到；
//! - 完整的序列只被报告一次：完成判定与条目移除在同一把分片锁下完成；
//! - 报告的水位线是该序列所有已收分片水位线的最大值，与到达顺序无关；
//! - 不同序列互不影响。
//!
//! ## 风险提示（Trade-offs）
//! - 已报告的序列条目被移除，之后再到达同一序列号的分片会开启一个新条目；
//! - 永远不完整的序列会一直占用条目，需要上层结合 [`ChunkCollector::pending_sequences`] 观察。

use std::{collections::BTreeSet, fmt};

#[cfg(loom)]
use std::{
    collections::{HashMap, hash_map::Entry},
    sync::PoisonError,
};

#[cfg(not(loom))]
use dashmap::{DashMap, mapref::entry::Entry};
use rivulet_core::{ChunkNumber, ErrorCode, SequenceData, SequenceNumber, Watermark};

use crate::error::SequenceViolation;

/// 待完成序列表。常规构建按序列号分片加锁；`--cfg loom` 下换成 Loom 互斥锁保护的 `HashMap`，
/// 条目锁内的判定逻辑（[`PendingSequence::open`]、[`PendingSequence::admit`]）两者共用。
#[cfg(not(loom))]
type SequenceTable = DashMap<SequenceNumber, PendingSequence>;
#[cfg(loom)]
type SequenceTable = loom::sync::Mutex<HashMap<SequenceNumber, PendingSequence>>;

#[cfg(not(loom))]
fn sequence_table() -> SequenceTable {
    DashMap::new()
}

#[cfg(loom)]
fn sequence_table() -> SequenceTable {
    loom::sync::Mutex::new(HashMap::new())
}

/// 一个已到齐的序列，以及它的最大水位线。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompletedSequence {
    pub sequence_number: SequenceNumber,
    pub watermark: Watermark,
}

impl From<CompletedSequence> for (SequenceNumber, Watermark) {
    fn from(completed: CompletedSequence) -> Self {
        (completed.sequence_number, completed.watermark)
    }
}

/// 协议违例的处置方式。
///
/// - `Panic`：立即 panic，与调试构建中的断言行为一致，适合测试与开发环境；
/// - `Report`：记录 `error` 日志并丢弃该分片，序列状态保持不变。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ViolationPolicy {
    #[default]
    Panic,
    Report,
}

/// 序列首个分片的登记结果。
enum Admission {
    /// 单分片序列，直接完成。
    Complete(Watermark),
    Pending(PendingSequence),
}

#[derive(Debug)]
struct PendingSequence {
    received: BTreeSet<ChunkNumber>,
    terminal: Option<ChunkNumber>,
    max_watermark: Watermark,
}

impl PendingSequence {
    /// 以首个到达的分片开启序列。
    fn open(data: SequenceData, watermark: Watermark) -> Admission {
        let mut pending = Self {
            received: BTreeSet::new(),
            terminal: None,
            max_watermark: Watermark::MIN,
        };
        pending.record(data, watermark);
        if pending.is_complete() {
            Admission::Complete(pending.max_watermark)
        } else {
            Admission::Pending(pending)
        }
    }

    /// 登记后续分片，返回序列是否因此到齐；违例时状态不变。
    fn admit(&mut self, data: SequenceData, watermark: Watermark) -> Result<bool, SequenceViolation> {
        self.check(data)?;
        self.record(data, watermark);
        Ok(self.is_complete())
    }

    /// 在修改状态之前检查分片是否与已知的终止分片相容。
    fn check(&self, data: SequenceData) -> Result<(), SequenceViolation> {
        let sequence = data.sequence_number;
        let chunk = data.chunk_number;
        match self.terminal {
            Some(first) if data.last_chunk => Err(SequenceViolation::DuplicateLastChunk {
                sequence,
                first,
                second: chunk,
            }),
            Some(terminal) if chunk > terminal => Err(SequenceViolation::ChunkBeyondTerminal {
                sequence,
                chunk,
                terminal,
            }),
            None if data.last_chunk => match self.received.last() {
                Some(&highest) if highest > chunk => Err(SequenceViolation::ChunkBeyondTerminal {
                    sequence,
                    chunk: highest,
                    terminal: chunk,
                }),
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }

    fn record(&mut self, data: SequenceData, watermark: Watermark) {
        self.received.insert(data.chunk_number);
        self.max_watermark = self.max_watermark.max(watermark);
        if data.last_chunk {
            self.terminal = Some(data.chunk_number);
        }
    }

    /// 所有已收分片都不大于终止分片，因此数量与区间长度相等即说明区间无空洞。
    fn is_complete(&self) -> bool {
        match self.terminal.and_then(ChunkNumber::span_from_initial) {
            Some(span) => self.received.len() as u64 == span,
            None => false,
        }
    }
}

/// 并发安全的分片收集器。
///
/// # 使用方式（How）
/// ```
/// use rivulet_core::{ChunkNumber, SequenceData, SequenceNumber, Watermark};
/// use rivulet_sequencing::ChunkCollector;
///
/// let collector = ChunkCollector::new();
/// let sequence = SequenceNumber::new(0);
/// let tail = SequenceData::new(sequence, ChunkNumber::new(1), true);
/// let head = SequenceData::new(sequence, ChunkNumber::new(0), false);
///
/// assert!(collector.collect(tail, Watermark::new(42)).is_none());
/// let completed = collector.collect(head, Watermark::new(2)).expect("序列到齐");
/// let (completed_sequence, watermark): (SequenceNumber, Watermark) = completed.into();
/// assert_eq!(completed_sequence, sequence);
/// assert_eq!(watermark, Watermark::new(42));
/// assert_eq!(collector.pending_sequences(), 0);
/// ```
pub struct ChunkCollector {
    sequences: SequenceTable,
    policy: ViolationPolicy,
}

impl Default for ChunkCollector {
    fn default() -> Self {
        Self::with_policy(ViolationPolicy::default())
    }
}

impl fmt::Debug for ChunkCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkCollector")
            .field("pending_sequences", &self.pending_sequences())
            .field("policy", &self.policy)
            .finish()
    }
}

impl ChunkCollector {
    /// 违例时 panic 的收集器。
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: ViolationPolicy) -> Self {
        Self {
            sequences: sequence_table(),
            policy,
        }
    }

    pub fn policy(&self) -> ViolationPolicy {
        self.policy
    }

    /// 登记一个分片；若它使所在序列到齐，返回该序列与最大水位线。
    ///
    /// # Panics
    /// 违例且策略为 [`ViolationPolicy::Panic`] 时 panic。
    /// 需要自行处理违例的调用方应使用 [`ChunkCollector::try_collect`]。
    pub fn collect(&self, data: SequenceData, watermark: Watermark) -> Option<CompletedSequence> {
        match self.try_collect(data, watermark) {
            Ok(completed) => completed,
            Err(violation) => match self.policy {
                ViolationPolicy::Panic => panic!("chunk protocol violation: {violation}"),
                ViolationPolicy::Report => {
                    tracing::error!(
                        code = violation.code(),
                        sequence = data.sequence_number.get(),
                        chunk = data.chunk_number.get(),
                        "dropping chunk: {violation}"
                    );
                    None
                }
            },
        }
    }

    /// 与 [`ChunkCollector::collect`] 相同，但把违例作为错误返回，从不 panic。
    ///
    /// 违例时序列状态不变。
    pub fn try_collect(
        &self,
        data: SequenceData,
        watermark: Watermark,
    ) -> Result<Option<CompletedSequence>, SequenceViolation> {
        let sequence_number = data.sequence_number;
        let completed = self.settle(data, watermark)?;

        Ok(completed.map(|watermark| {
            tracing::debug!(
                sequence = sequence_number.get(),
                watermark = watermark.get(),
                "sequence complete"
            );
            CompletedSequence {
                sequence_number,
                watermark,
            }
        }))
    }

    /// 在序列条目锁内登记分片；到齐的序列在同一把锁内移除。
    #[cfg(not(loom))]
    fn settle(
        &self,
        data: SequenceData,
        watermark: Watermark,
    ) -> Result<Option<Watermark>, SequenceViolation> {
        match self.sequences.entry(data.sequence_number) {
            Entry::Vacant(vacant) => match PendingSequence::open(data, watermark) {
                // 单分片序列不进入映射。
                Admission::Complete(max_watermark) => Ok(Some(max_watermark)),
                Admission::Pending(pending) => {
                    vacant.insert(pending);
                    Ok(None)
                }
            },
            Entry::Occupied(mut occupied) => {
                if occupied.get_mut().admit(data, watermark)? {
                    Ok(Some(occupied.remove().max_watermark))
                } else {
                    Ok(None)
                }
            }
        }
    }

    #[cfg(loom)]
    fn settle(
        &self,
        data: SequenceData,
        watermark: Watermark,
    ) -> Result<Option<Watermark>, SequenceViolation> {
        let mut sequences = self.sequences.lock().unwrap_or_else(PoisonError::into_inner);
        match sequences.entry(data.sequence_number) {
            Entry::Vacant(vacant) => match PendingSequence::open(data, watermark) {
                Admission::Complete(max_watermark) => Ok(Some(max_watermark)),
                Admission::Pending(pending) => {
                    vacant.insert(pending);
                    Ok(None)
                }
            },
            Entry::Occupied(mut occupied) => {
                if occupied.get_mut().admit(data, watermark)? {
                    Ok(Some(occupied.remove().max_watermark))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// 尚未到齐的序列数量。
    pub fn pending_sequences(&self) -> usize {
        #[cfg(not(loom))]
        let pending = self.sequences.len();
        #[cfg(loom)]
        let pending = self.sequences.lock().unwrap_or_else(PoisonError::into_inner).len();
        pending
    }

    pub fn is_pending(&self, sequence: SequenceNumber) -> bool {
        #[cfg(not(loom))]
        let pending = self.sequences.contains_key(&sequence);
        #[cfg(loom)]
        let pending = self
            .sequences
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&sequence);
        pending
    }
}
