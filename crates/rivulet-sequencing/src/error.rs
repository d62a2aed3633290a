//! 分片协议违例。

use rivulet_core::{ChunkNumber, ErrorCode, SequenceNumber, codes};
use thiserror::Error;

/// 上游违反“每个序列至多一个终止分片、终止分片之后没有分片”的约定。
///
/// 违例说明调用方存在缺陷，收集器不会据此修改序列状态。
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SequenceViolation {
    #[error("{sequence} marked its last chunk twice ({first} and then {second})")]
    DuplicateLastChunk {
        sequence: SequenceNumber,
        first: ChunkNumber,
        second: ChunkNumber,
    },

    /// 分片编号大于已标记的终止分片，或终止分片小于已收到的分片。
    #[error("{sequence} received {chunk} beyond its terminal {terminal}")]
    ChunkBeyondTerminal {
        sequence: SequenceNumber,
        chunk: ChunkNumber,
        terminal: ChunkNumber,
    },
}

impl SequenceViolation {
    pub fn sequence(&self) -> SequenceNumber {
        match self {
            SequenceViolation::DuplicateLastChunk { sequence, .. }
            | SequenceViolation::ChunkBeyondTerminal { sequence, .. } => *sequence,
        }
    }
}

impl ErrorCode for SequenceViolation {
    fn code(&self) -> &'static str {
        match self {
            SequenceViolation::DuplicateLastChunk { .. } => codes::SEQUENCE_DUPLICATE_LAST_CHUNK,
            SequenceViolation::ChunkBeyondTerminal { .. } => codes::SEQUENCE_CHUNK_BEYOND_TERMINAL,
        }
    }
}
