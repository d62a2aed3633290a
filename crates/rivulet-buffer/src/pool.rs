//! 全局缓冲池。
//!
//! # 模块定位（Why）
//! - 构造时一次性预分配 `number_of_buffers` 个定长段，运行期的租借只在空闲链表上出入，
//!   避免热路径上向系统分配器申请内存；
//! - 对尺寸不固定的需求提供非池化分配，回收即释放；
//! - 池是显式构造、显式传递的值，进程内可以同时存在多个互不相干的池。
//!
//! # 结构（How）
//! - [`BufferPool`] 只是 `Arc<PoolShared>` 的句柄，克隆廉价；
//! - 段通过 `Weak<PoolShared>` 找回所属池，池消亡后归还的段直接释放；
//! - 空闲链表见 [`crate::free_list`]，保证不重复租出、不丢失唤醒。

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use serde::Serialize;

use crate::{
    buffer::Buffer,
    config::BufferPoolConfig,
    control_block::{SegmentRecycler, detached, downgrade_recycler},
    error::{ConfigError, PoolError},
    fixed_size_pool::{FixedPoolShared, FixedSizeBufferPool},
    free_list::FreeList,
    segment::{MemorySegment, SegmentKind, SegmentPtr},
    sync::{AtomicBool, AtomicUsize, Mutex, Ordering},
};

/// 池的计数快照，各字段分别读取，并发修改下彼此之间不保证一致。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatistics {
    pub buffer_size: usize,
    pub number_of_pooled_buffers: usize,
    /// 全局空闲链表中的段数。
    pub available_buffers: usize,
    /// 借给定长子池的段数（含子池中空闲的与经子池租出的）。
    pub reserved_by_fixed_pools: usize,
    /// 正被 [`Buffer`] 持有的池化段数。
    pub outstanding_pooled: usize,
    pub outstanding_unpooled: usize,
    pub unpooled_bytes: usize,
    pub closed: bool,
}

pub(crate) struct PoolShared {
    buffer_size: usize,
    alignment: usize,
    number_of_buffers: usize,
    free_list: FreeList,
    closed: AtomicBool,
    /// 已经释放回系统的池化段（关闭时清空链表，或关闭后才归还）。
    freed_pooled: AtomicUsize,
    reserved_by_fixed_pools: AtomicUsize,
    unpooled_outstanding: AtomicUsize,
    unpooled_bytes: AtomicUsize,
    fixed_pools: Mutex<Vec<Weak<FixedPoolShared>>>,
}

impl PoolShared {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn free_pooled(&self, segment: SegmentPtr) {
        self.freed_pooled.fetch_add(1, Ordering::AcqRel);
        // SAFETY: 调用方独占该段，且已将其移出所有链表。
        unsafe { segment.free() };
    }

    fn release_unpooled(&self, segment: SegmentPtr) {
        // SAFETY: 计数已归零，回收方独占该段。
        let size = unsafe { segment.as_ref() }.size();
        self.unpooled_outstanding.fetch_sub(1, Ordering::AcqRel);
        self.unpooled_bytes.fetch_sub(size, Ordering::AcqRel);
        tracing::debug!(size, "released unpooled buffer");
        // SAFETY: 同上。
        unsafe { segment.free() };
    }

    /// 定长子池中仍空闲的段数之和。
    fn parked_in_fixed_pools(&self) -> usize {
        self.fixed_pools
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|pool| pool.available_buffers())
            .sum()
    }

    /// 一个借出的段回到全局池：计数归还，回收目标改回本池。
    pub(crate) fn take_back_lent(&self, segment: SegmentPtr) {
        // SAFETY: 回收方独占该段。
        let home = unsafe { segment.as_ref() }.control().home().clone();
        self.reserved_by_fixed_pools.fetch_sub(1, Ordering::AcqRel);
        // SAFETY: 段的计数为 0 且不在任何链表中。
        unsafe { segment.bind_pool(home) };
        self.park(segment);
    }

    fn park(&self, segment: SegmentPtr) {
        if let Err(segment) = self.free_list.push(segment) {
            tracing::error!("pooled buffer recycled into a closed pool; freeing the segment");
            self.free_pooled(segment);
        }
    }
}

impl SegmentRecycler for PoolShared {
    fn recycle(&self, segment: SegmentPtr) {
        let (kind, lent) = {
            // SAFETY: 计数已归零，回收方独占该段。
            let view = unsafe { segment.as_ref() };
            (view.kind(), view.control().is_lent())
        };
        match kind {
            SegmentKind::Unpooled => self.release_unpooled(segment),
            SegmentKind::Pooled if lent => self.take_back_lent(segment),
            SegmentKind::Pooled => self.park(segment),
        }
    }
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        let drained = self.free_list.close();
        let outstanding = self
            .number_of_buffers
            .saturating_sub(self.freed_pooled.load(Ordering::Acquire) + drained.len());
        for segment in drained {
            // SAFETY: 池已无其它引用，链表中的段由本池独占。
            unsafe { segment.free() };
        }
        tracing::debug!(outstanding, "buffer pool dropped");
    }
}

/// 引用计数、池化的缓冲分配器。
///
/// # 使用方式（How）
/// ```
/// use std::time::Duration;
///
/// use rivulet_buffer::{BufferPool, PoolError};
///
/// let pool = BufferPool::new(256, 1).expect("构造池");
/// let held = pool.acquire_blocking().expect("池未关闭");
/// assert!(pool.acquire_non_blocking().expect("池未关闭").is_none());
/// assert_eq!(
///     pool.acquire_with_timeout(Duration::from_millis(5)),
///     Err(PoolError::Exhausted)
/// );
/// drop(held);
/// assert!(pool.acquire_non_blocking().expect("池未关闭").is_some());
/// ```
///
/// # 契约（What）
/// - 返回的缓冲计数恰为 1，且其段此前的计数为 0；
/// - 关闭后任何租借都返回 [`PoolError::Closed`]，阻塞中的租借被唤醒并返回同一错误；
/// - 关闭时仍有缓冲在外属于使用错误：记录 `error` 日志，这些段在最终归还时被释放。
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// 以默认对齐构造 `number_of_buffers` 个、每个 `buffer_size` 字节的池。
    pub fn new(buffer_size: usize, number_of_buffers: usize) -> Result<Self, PoolError> {
        Self::with_config(&BufferPoolConfig::new(buffer_size, number_of_buffers))
    }

    /// 校验配置并预分配全部池化段；任意一段分配失败则已分配的段全部释放。
    pub fn with_config(config: &BufferPoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let placeholder = detached();
        let mut segments = Vec::with_capacity(config.number_of_buffers);
        for _ in 0..config.number_of_buffers {
            match MemorySegment::allocate(
                config.buffer_size,
                config.alignment,
                SegmentKind::Pooled,
                placeholder.clone(),
            ) {
                Ok(segment) => segments.push(segment),
                Err(err) => {
                    for segment in segments {
                        // SAFETY: 段尚未交出，由本函数独占。
                        unsafe { segment.free() };
                    }
                    return Err(err);
                }
            }
        }

        let shared = Arc::new_cyclic(|weak: &Weak<PoolShared>| {
            let recycler: Weak<dyn SegmentRecycler> = weak.clone();
            for segment in &segments {
                // SAFETY: 段尚未交出，由本函数独占。
                unsafe { segment.bind_pool(recycler.clone()) };
            }
            PoolShared {
                buffer_size: config.buffer_size,
                alignment: config.alignment,
                number_of_buffers: config.number_of_buffers,
                free_list: FreeList::from_segments(segments),
                closed: AtomicBool::new(false),
                freed_pooled: AtomicUsize::new(0),
                reserved_by_fixed_pools: AtomicUsize::new(0),
                unpooled_outstanding: AtomicUsize::new(0),
                unpooled_bytes: AtomicUsize::new(0),
                fixed_pools: Mutex::new(Vec::new()),
            }
        });
        tracing::debug!(
            buffer_size = config.buffer_size,
            number_of_buffers = config.number_of_buffers,
            alignment = config.alignment,
            "buffer pool created"
        );
        Ok(Self { shared })
    }

    /// 阻塞直到有空闲段或池被关闭。
    pub fn acquire_blocking(&self) -> Result<Buffer, PoolError> {
        let segment = self.shared.free_list.pop_blocking()?;
        Ok(Buffer::from_free_segment(segment))
    }

    /// 不阻塞；池暂时耗尽时返回 `Ok(None)`。
    pub fn acquire_non_blocking(&self) -> Result<Option<Buffer>, PoolError> {
        Ok(self
            .shared
            .free_list
            .try_pop()?
            .map(Buffer::from_free_segment))
    }

    /// 最多等待 `timeout`，超时返回 [`PoolError::Exhausted`]。
    pub fn acquire_with_timeout(&self, timeout: Duration) -> Result<Buffer, PoolError> {
        match self.shared.free_list.pop_timeout(timeout) {
            Ok(segment) => Ok(Buffer::from_free_segment(segment)),
            Err(PoolError::Exhausted) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    buffer_size = self.shared.buffer_size,
                    "timed out waiting for a pooled buffer"
                );
                Err(PoolError::Exhausted)
            }
            Err(err) => Err(err),
        }
    }

    /// 在池外分配 `size` 字节的段，回收时直接释放。
    ///
    /// `size == 0` 或分配失败时返回 [`PoolError::InvalidSize`]。
    pub fn acquire_unpooled(&self, size: usize) -> Result<Buffer, PoolError> {
        if self.shared.is_closed() {
            return Err(PoolError::Closed);
        }
        let segment = MemorySegment::allocate(
            size,
            self.shared.alignment,
            SegmentKind::Unpooled,
            downgrade_recycler(&self.shared),
        )?;
        self.shared
            .unpooled_outstanding
            .fetch_add(1, Ordering::AcqRel);
        self.shared.unpooled_bytes.fetch_add(size, Ordering::AcqRel);
        tracing::debug!(size, "allocated unpooled buffer");
        Ok(Buffer::from_free_segment(segment))
    }

    /// 从当前空闲段中独占划出 `number_of_buffers` 个，构成一个定长子池。
    ///
    /// # 契约（What）
    /// - 不阻塞：空闲段不足时返回 [`PoolError::Exhausted`]，且不划走任何段；
    /// - `number_of_buffers == 0` 返回 [`PoolError::InvalidConfig`]；
    /// - 子池的缓冲归还到子池；子池消亡后，其空闲段与之后归还的段回到本池。
    pub fn create_fixed_size_pool(
        &self,
        number_of_buffers: usize,
    ) -> Result<FixedSizeBufferPool, PoolError> {
        if number_of_buffers == 0 {
            return Err(ConfigError::ZeroBufferCount.into());
        }
        // 持锁划段与登记，使并发的 shutdown 一定能看到新子池。
        let mut pools = self.shared.fixed_pools.lock();
        let segments = self.shared.free_list.try_pop_many(number_of_buffers)?;
        self.shared
            .reserved_by_fixed_pools
            .fetch_add(number_of_buffers, Ordering::AcqRel);
        let fixed = FixedSizeBufferPool::new(Arc::clone(&self.shared), segments);
        pools.retain(|pool| pool.strong_count() > 0);
        pools.push(fixed.downgrade());
        tracing::debug!(number_of_buffers, "fixed-size buffer pool created");
        Ok(fixed)
    }

    /// 关闭池：唤醒所有等待者，释放所有空闲段（包括定长子池中的）。
    ///
    /// 重复调用无副作用。
    pub fn shutdown(&self) {
        let shared = &self.shared;
        if shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for segment in shared.free_list.close() {
            shared.free_pooled(segment);
        }
        let fixed: Vec<_> = shared
            .fixed_pools
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for pool in fixed {
            for segment in pool.close() {
                shared.reserved_by_fixed_pools.fetch_sub(1, Ordering::AcqRel);
                shared.free_pooled(segment);
            }
        }

        let outstanding_pooled = shared
            .number_of_buffers
            .saturating_sub(shared.freed_pooled.load(Ordering::Acquire));
        let outstanding_unpooled = shared.unpooled_outstanding.load(Ordering::Acquire);
        if outstanding_pooled > 0 || outstanding_unpooled > 0 {
            tracing::error!(
                outstanding_pooled,
                outstanding_unpooled,
                "buffer pool shut down while buffers are still in use"
            );
        } else {
            tracing::debug!("buffer pool shut down");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// 全局空闲链表中可立即租出的段数。
    pub fn available_buffers(&self) -> usize {
        self.shared.free_list.len()
    }

    pub fn number_of_pooled_buffers(&self) -> usize {
        self.shared.number_of_buffers
    }

    /// 尚未归还的非池化缓冲数量。
    pub fn number_of_unpooled_buffers(&self) -> usize {
        self.shared.unpooled_outstanding.load(Ordering::Acquire)
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.buffer_size
    }

    pub fn statistics(&self) -> PoolStatistics {
        let shared = &self.shared;
        let available_buffers = shared.free_list.len();
        let parked = shared.parked_in_fixed_pools();
        let freed = shared.freed_pooled.load(Ordering::Acquire);
        PoolStatistics {
            buffer_size: shared.buffer_size,
            number_of_pooled_buffers: shared.number_of_buffers,
            available_buffers,
            reserved_by_fixed_pools: shared.reserved_by_fixed_pools.load(Ordering::Acquire),
            outstanding_pooled: shared
                .number_of_buffers
                .saturating_sub(freed + available_buffers + parked),
            outstanding_unpooled: shared.unpooled_outstanding.load(Ordering::Acquire),
            unpooled_bytes: shared.unpooled_bytes.load(Ordering::Acquire),
            closed: shared.is_closed(),
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.shared.buffer_size)
            .field("number_of_buffers", &self.shared.number_of_buffers)
            .field("available", &self.available_buffers())
            .field("closed", &self.is_closed())
            .finish()
    }
}
