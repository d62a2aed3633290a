//! 对外唯一暴露的缓冲句柄。
//!
//! # 语义（What）
//! - 每个存活的 [`Buffer`] 恰好持有所指段的一个引用计数；
//! - `clone` 增加计数，`drop` 减少计数；使计数归零的那次 `drop` 在当前线程同步执行回收；
//! - Rust 的移动语义直接对应“移动不触碰计数”，被移走的变量不能再使用；
//! - 两个句柄相等当且仅当它们指向同一个段；
//! - 缓冲可以收养唯一持有的另一个缓冲作为子缓冲，子缓冲随父缓冲的回收一并释放。
//!
//! 元数据存取器只要求 `&self`：计数仲裁的是生命周期，而不是写入互斥，
//! 同一缓冲的元数据应由逻辑上持有它的那一个流水线阶段写入。

use std::{fmt, slice};

use bytes::Bytes;
use rivulet_core::{ChunkNumber, OriginId, SequenceData, SequenceNumber, Watermark};

use crate::{
    control_block::ControlBlock,
    segment::{MemorySegment, SegmentKind, SegmentPtr},
};

/// 子缓冲在父缓冲中的下标，由 [`Buffer::store_child`] 返回。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChildIndex(usize);

impl ChildIndex {
    pub fn get(self) -> usize {
        self.0
    }
}

/// 引用计数的缓冲句柄。
///
/// # 使用方式（How）
/// ```
/// use rivulet_buffer::BufferPool;
/// use rivulet_core::{SequenceData, SequenceNumber, Watermark};
///
/// let pool = BufferPool::new(128, 2).expect("构造池");
/// let mut buffer = pool.acquire_blocking().expect("池未关闭");
/// buffer.data_mut().expect("唯一持有者")[..3].copy_from_slice(b"abc");
/// buffer.set_number_of_entries(1);
/// buffer.set_sequence_data(SequenceData::single(SequenceNumber::new(7)));
/// buffer.set_watermark(Watermark::new(42));
///
/// let shared = buffer.clone();
/// assert_eq!(shared, buffer);
/// assert_eq!(shared.reference_count(), 2);
/// assert!(buffer.data_mut().is_none());
/// assert_eq!(&shared.as_slice()[..3], b"abc");
/// ```
pub struct Buffer {
    segment: SegmentPtr,
}

impl Buffer {
    /// 把刚从空闲链表（或非池化分配）取得的段包装为计数为 1 的句柄。
    ///
    /// 段的计数必须为 0，否则 [`ControlBlock::prepare`] 会 panic。
    pub(crate) fn from_free_segment(segment: SegmentPtr) -> Self {
        // SAFETY: 调用方独占一个存活的空闲段。
        let control = unsafe { segment.as_ref() }.control();
        control.prepare();
        control.retain();
        Self { segment }
    }

    fn segment(&self) -> &MemorySegment {
        // SAFETY: 本句柄持有一个引用计数，段在 `self` 存活期间不会被回收。
        unsafe { self.segment.as_ref() }
    }

    pub(crate) fn control(&self) -> &ControlBlock {
        self.segment().control()
    }

    pub(crate) fn segment_ptr(&self) -> SegmentPtr {
        self.segment
    }

    /// 数据区的只读视图，长度为段的完整尺寸。
    pub fn as_slice(&self) -> &[u8] {
        let segment = self.segment();
        // SAFETY: 数据区已清零初始化，长度为 `size`；可变访问只在唯一持有者手中发生。
        unsafe { slice::from_raw_parts(segment.data().as_ptr(), segment.size()) }
    }

    /// 唯一持有者才能获得的可写视图。
    ///
    /// 存在其它句柄（包括 [`Buffer::freeze`] 产生的 `Bytes`）时返回 `None`。
    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        if self.control().reference_count() != 1 {
            return None;
        }
        // SAFETY: 计数为 1 且持有 `&mut self`，不存在其它能观察数据区的句柄。
        Some(unsafe { self.data_mut_unchecked() })
    }

    /// 不检查引用计数的可写视图。
    ///
    /// # Safety
    /// 调用方保证在返回的切片存活期间，没有其它句柄读取或写入同一数据区。
    /// 流水线中“逻辑所有者”写入、下游在拿到引用后再读取的用法满足该条件。
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn data_mut_unchecked(&self) -> &mut [u8] {
        let segment = self.segment();
        // SAFETY: 别名约束由调用方保证，指针与长度来自同一次分配。
        unsafe { slice::from_raw_parts_mut(segment.data().as_ptr(), segment.size()) }
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.segment().data().as_ptr()
    }

    /// 段的字节长度。
    pub fn len(&self) -> usize {
        self.segment().size()
    }

    /// 段至少一个字节，因此恒为 `false`；保留该方法以配合 `len`。
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 当前指向同一段的句柄数量，仅用于诊断。
    pub fn reference_count(&self) -> usize {
        self.control().reference_count()
    }

    /// 是否来自池的预分配段（`false` 表示非池化分配）。
    pub fn is_pooled(&self) -> bool {
        self.segment().kind() == SegmentKind::Pooled
    }

    pub fn number_of_entries(&self) -> u64 {
        self.control().number_of_entries()
    }

    pub fn set_number_of_entries(&self, entries: u64) {
        self.control().set_number_of_entries(entries);
    }

    pub fn sequence_number(&self) -> SequenceNumber {
        self.control().sequence_number()
    }

    pub fn set_sequence_number(&self, sequence: SequenceNumber) {
        self.control().set_sequence_number(sequence);
    }

    pub fn chunk_number(&self) -> ChunkNumber {
        self.control().chunk_number()
    }

    pub fn set_chunk_number(&self, chunk: ChunkNumber) {
        self.control().set_chunk_number(chunk);
    }

    /// 新租出的缓冲默认为终止分片，即单分片序列。
    pub fn is_last_chunk(&self) -> bool {
        self.control().is_last_chunk()
    }

    pub fn set_last_chunk(&self, last: bool) {
        self.control().set_last_chunk(last);
    }

    pub fn watermark(&self) -> Watermark {
        self.control().watermark()
    }

    pub fn set_watermark(&self, watermark: Watermark) {
        self.control().set_watermark(watermark);
    }

    pub fn origin_id(&self) -> OriginId {
        self.control().origin_id()
    }

    pub fn set_origin_id(&self, origin: OriginId) {
        self.control().set_origin_id(origin);
    }

    /// 读出交给分片收集器的序列戳记。
    pub fn sequence_data(&self) -> SequenceData {
        let control = self.control();
        SequenceData::new(
            control.sequence_number(),
            control.chunk_number(),
            control.is_last_chunk(),
        )
    }

    /// 一次写入序列号、分片号与终止标记。
    pub fn set_sequence_data(&self, data: SequenceData) {
        let control = self.control();
        control.set_sequence_number(data.sequence_number);
        control.set_chunk_number(data.chunk_number);
        control.set_last_chunk(data.last_chunk);
    }

    /// 收养 `child` 作为子缓冲，之后只能经由 [`Buffer::load_child`] 取回它。
    ///
    /// # 契约（What）
    /// - `child` 必须是其段唯一的句柄（计数为 1），否则原样退回 `Err(child)`；
    /// - 收养会成环（本缓冲已是 `child` 的子孙）时同样退回；
    /// - 子缓冲与父缓冲同生共死：父段回收时子缓冲的引用随之释放；
    /// - 池化与非池化缓冲都可以作为子缓冲。
    ///
    /// ```
    /// use rivulet_buffer::BufferPool;
    ///
    /// let pool = BufferPool::new(64, 2).expect("构造池");
    /// let parent = pool.acquire_blocking().expect("池未关闭");
    /// let child = pool.acquire_unpooled(1024).expect("尺寸合法");
    /// let index = parent.store_child(child).expect("唯一持有的缓冲可被收养");
    /// assert_eq!(parent.load_child(index).map(|child| child.len()), Some(1024));
    ///
    /// drop(parent);
    /// assert_eq!(pool.number_of_unpooled_buffers(), 0);
    /// ```
    pub fn store_child(&self, child: Buffer) -> Result<ChildIndex, Buffer> {
        self.control().store_child(child).map(ChildIndex)
    }

    /// 取回一个子缓冲的新句柄；下标不存在时返回 `None`。
    pub fn load_child(&self, index: ChildIndex) -> Option<Buffer> {
        self.control().load_child(index.get())
    }

    pub fn number_of_children(&self) -> usize {
        self.control().number_of_children()
    }

    /// 把前 `len` 字节零拷贝地交给面向 `bytes` 的代码。
    ///
    /// # 契约（What）
    /// - 返回的 `Bytes` 及其所有克隆共同持有本句柄的引用计数，最后一个消失时段才会回收；
    /// - `len` 超过段长度时截断为段长度。
    pub fn freeze(self, len: usize) -> Bytes {
        let len = len.min(self.len());
        Bytes::from_owner(FrozenBuffer { buffer: self, len })
    }
}

impl Clone for Buffer {
    fn clone(&self) -> Self {
        self.control().retain();
        Self {
            segment: self.segment,
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // SAFETY: 本句柄持有一个计数，`drop` 之后不再使用它。
        unsafe { self.segment.release() };
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.segment == other.segment
    }
}

impl Eq for Buffer {}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len())
            .field("pooled", &self.is_pooled())
            .field("reference_count", &self.reference_count())
            .field("children", &self.number_of_children())
            .field("sequence", &self.sequence_data())
            .field("watermark", &self.watermark())
            .finish()
    }
}

/// `Bytes::from_owner` 的所有者：持有句柄并限定可见长度。
struct FrozenBuffer {
    buffer: Buffer,
    len: usize,
}

impl AsRef<[u8]> for FrozenBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.buffer.as_slice()[..self.len]
    }
}
