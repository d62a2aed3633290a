//! 控制块：附着在每个内存段上的原子元数据。
//!
//! # 结构（How）
//! - `reference_count`：存活 [`Buffer`] 句柄的数量；为 0 当且仅当段可被再次租出；
//! - 逐缓冲属性：记录数、水位线、来源、序列号、分片号、终止分片标记；
//! - `children`：被本缓冲收养的子缓冲，与本段同生共死；
//! - `recycler` / `home`：引用计数归零时接管段的对象。定长子池借出的段，`recycler` 指向子池，
//!   `home` 指向全局池；子池先于段消亡时，段回到 `home`。两者都失效时段直接释放。
//!
//! # 契约（What）
//! - 元数据以原子变量保存，只保证可见性，不提供应用层写入的互斥：
//!   同一缓冲的元数据由逻辑上持有它的那一个流水线阶段写入；
//! - 触发回收的那次递减带有 acquire 语义，先前所有持有者的写入对回收方可见；
//! - 归零后的交接（释放子缓冲、选择回收目标、回收）由 [`SegmentPtr::release`] 经裸指针完成，
//!   控制块自身的方法不会在段被释放或改写时仍持有 `&self`。

use std::{
    mem,
    ptr::NonNull,
    sync::{Arc, Weak},
};

use rivulet_core::{ChunkNumber, OriginId, SequenceNumber, Watermark};

use crate::{
    buffer::Buffer,
    segment::{MemorySegment, SegmentPtr},
    sync::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Mutex, Ordering, fence},
};

/// 引用计数上限，超过即视为计数泄漏并中止进程（与 `Arc` 相同的处理）。
const MAX_REFCOUNT: usize = isize::MAX as usize;

/// 接管引用计数归零的段。
///
/// 实现者在 `recycle` 返回后即拥有该段：要么放回空闲链表，要么调用 [`SegmentPtr::free`]。
/// 该方法运行在 `Drop` 路径上，不得 panic。
pub(crate) trait SegmentRecycler: Send + Sync + 'static {
    fn recycle(&self, segment: SegmentPtr);
}

/// 尚未绑定池的段使用的占位回收目标。
struct Detached;

impl SegmentRecycler for Detached {
    fn recycle(&self, segment: SegmentPtr) {
        // SAFETY: 回收方独占该段。
        unsafe { segment.free() };
    }
}

/// 一个永远无法升级的回收目标：强引用在返回前即已释放，
/// 持有它的段在计数归零时直接释放。
pub(crate) fn detached() -> Weak<dyn SegmentRecycler> {
    downgrade_recycler(&Arc::new(Detached))
}

/// 生成段可以持有的回收目标弱引用。
pub(crate) fn downgrade_recycler<R: SegmentRecycler>(recycler: &Arc<R>) -> Weak<dyn SegmentRecycler> {
    let weak: Weak<R> = Arc::downgrade(recycler);
    weak
}

/// [`SegmentPtr::release`] 的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReleaseOutcome {
    /// 仍有其它句柄持有该段。
    StillReferenced,
    /// 本次释放使计数归零，段已交给回收目标。
    Recycled,
}

pub(crate) struct ControlBlock {
    reference_count: AtomicUsize,
    number_of_entries: AtomicU64,
    watermark: AtomicI64,
    origin_id: AtomicU64,
    sequence_number: AtomicU64,
    chunk_number: AtomicU64,
    last_chunk: AtomicBool,
    children: Mutex<Vec<Buffer>>,
    owner: NonNull<MemorySegment>,
    recycler: Weak<dyn SegmentRecycler>,
    home: Weak<dyn SegmentRecycler>,
}

impl ControlBlock {
    pub(crate) fn new(recycler: Weak<dyn SegmentRecycler>) -> Self {
        Self {
            reference_count: AtomicUsize::new(0),
            number_of_entries: AtomicU64::new(0),
            watermark: AtomicI64::new(Watermark::default().get()),
            origin_id: AtomicU64::new(OriginId::UNSET.get()),
            sequence_number: AtomicU64::new(SequenceNumber::default().get()),
            chunk_number: AtomicU64::new(ChunkNumber::INITIAL.get()),
            last_chunk: AtomicBool::new(true),
            children: Mutex::new(Vec::new()),
            owner: NonNull::dangling(),
            home: recycler.clone(),
            recycler,
        }
    }

    /// 记录宿主段的地址，只在 [`MemorySegment::allocate`] 中调用一次。
    pub(crate) fn bind_owner(&mut self, owner: NonNull<MemorySegment>) {
        self.owner = owner;
    }

    pub(crate) fn owner(&self) -> SegmentPtr {
        SegmentPtr::from(self.owner)
    }

    pub(crate) fn bind_recyclers(
        &mut self,
        recycler: Weak<dyn SegmentRecycler>,
        home: Weak<dyn SegmentRecycler>,
    ) {
        self.recycler = recycler;
        self.home = home;
    }

    pub(crate) fn recycler(&self) -> &Weak<dyn SegmentRecycler> {
        &self.recycler
    }

    pub(crate) fn home(&self) -> &Weak<dyn SegmentRecycler> {
        &self.home
    }

    /// 段当前是否借给了某个定长子池（回收目标与归属池不同）。
    pub(crate) fn is_lent(&self) -> bool {
        !Weak::ptr_eq(&self.recycler, &self.home)
    }

    /// 在租出前重置逐缓冲属性并清空子缓冲。
    ///
    /// # Panics
    /// 引用计数不为 0 时 panic：这意味着一个仍被持有的段将被第二次租出，属于分配器缺陷，
    /// 无论构建模式都不会降级为静默处理。
    pub(crate) fn prepare(&self) {
        let count = self.reference_count.load(Ordering::Acquire);
        assert!(
            count == 0,
            "ControlBlock::prepare on a live segment (reference count {count}); the pool would hand out a buffer twice"
        );
        self.number_of_entries.store(0, Ordering::Relaxed);
        self.watermark
            .store(Watermark::default().get(), Ordering::Relaxed);
        self.origin_id.store(OriginId::UNSET.get(), Ordering::Relaxed);
        self.sequence_number
            .store(SequenceNumber::default().get(), Ordering::Relaxed);
        self.chunk_number
            .store(ChunkNumber::INITIAL.get(), Ordering::Relaxed);
        self.last_chunk.store(true, Ordering::Relaxed);
        // 在锁外释放残留的子缓冲。
        drop(self.take_children());
    }

    /// 引用计数加一并返回自身，便于链式调用。
    pub(crate) fn retain(&self) -> &Self {
        let previous = self.reference_count.fetch_add(1, Ordering::Relaxed);
        if previous > MAX_REFCOUNT {
            std::process::abort();
        }
        self
    }

    /// 引用计数减一；返回 `true` 表示本次递减使计数归零，调用方从此独占宿主段。
    ///
    /// 返回 `false` 后调用方不得再访问宿主段：其它持有者可能随即将其回收。
    pub(crate) fn release_reference(&self) -> bool {
        let previous = self.reference_count.fetch_sub(1, Ordering::Release);
        assert!(
            previous != 0,
            "ControlBlock::release on a segment that holds no references"
        );
        if previous != 1 {
            return false;
        }
        fence(Ordering::Acquire);
        true
    }

    pub(crate) fn reference_count(&self) -> usize {
        self.reference_count.load(Ordering::Acquire)
    }

    /// 收养 `child`，返回其下标；`child` 并非唯一持有或收养会成环时原样退回。
    pub(crate) fn store_child(&self, child: Buffer) -> Result<usize, Buffer> {
        if child.reference_count() != 1 || child.control().has_descendant(self.owner()) {
            return Err(child);
        }
        let mut children = self.children.lock();
        children.push(child);
        Ok(children.len() - 1)
    }

    pub(crate) fn load_child(&self, index: usize) -> Option<Buffer> {
        self.children.lock().get(index).cloned()
    }

    pub(crate) fn number_of_children(&self) -> usize {
        self.children.lock().len()
    }

    /// `segment` 是否为本段的某个（直接或间接）子缓冲。
    fn has_descendant(&self, segment: SegmentPtr) -> bool {
        self.children
            .lock()
            .iter()
            .any(|child| child.segment_ptr() == segment || child.control().has_descendant(segment))
    }

    /// 交出全部子缓冲，由调用方在锁外释放。
    pub(crate) fn take_children(&self) -> Vec<Buffer> {
        mem::take(&mut *self.children.lock())
    }

    pub(crate) fn number_of_entries(&self) -> u64 {
        self.number_of_entries.load(Ordering::Acquire)
    }

    pub(crate) fn set_number_of_entries(&self, entries: u64) {
        self.number_of_entries.store(entries, Ordering::Release);
    }

    pub(crate) fn watermark(&self) -> Watermark {
        Watermark::new(self.watermark.load(Ordering::Acquire))
    }

    pub(crate) fn set_watermark(&self, watermark: Watermark) {
        self.watermark.store(watermark.get(), Ordering::Release);
    }

    pub(crate) fn origin_id(&self) -> OriginId {
        OriginId::new(self.origin_id.load(Ordering::Acquire))
    }

    pub(crate) fn set_origin_id(&self, origin: OriginId) {
        self.origin_id.store(origin.get(), Ordering::Release);
    }

    pub(crate) fn sequence_number(&self) -> SequenceNumber {
        SequenceNumber::new(self.sequence_number.load(Ordering::Acquire))
    }

    pub(crate) fn set_sequence_number(&self, sequence: SequenceNumber) {
        self.sequence_number.store(sequence.get(), Ordering::Release);
    }

    pub(crate) fn chunk_number(&self) -> ChunkNumber {
        ChunkNumber::new(self.chunk_number.load(Ordering::Acquire))
    }

    pub(crate) fn set_chunk_number(&self, chunk: ChunkNumber) {
        self.chunk_number.store(chunk.get(), Ordering::Release);
    }

    pub(crate) fn is_last_chunk(&self) -> bool {
        self.last_chunk.load(Ordering::Acquire)
    }

    pub(crate) fn set_last_chunk(&self, last: bool) {
        self.last_chunk.store(last, Ordering::Release);
    }
}
