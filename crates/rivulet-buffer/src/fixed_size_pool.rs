//! 定长子池：从全局池独占划出固定数量的段，专供单个消费者（例如一个数据源）使用。
//!
//! # 契约（What）
//! - 子池的缓冲归还到子池自己的空闲链表，其它消费者无法抢占；
//! - 子池消亡时空闲段回到全局池；仍在外的缓冲在最后一个引用消失时回到全局池；
//! - 全局池关闭时子池一并关闭，租借返回 [`PoolError::Closed`]。

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use crate::{
    buffer::Buffer,
    control_block::SegmentRecycler,
    error::PoolError,
    free_list::FreeList,
    pool::PoolShared,
    segment::SegmentPtr,
};

pub(crate) struct FixedPoolShared {
    parent: Arc<PoolShared>,
    capacity: usize,
    free_list: FreeList,
}

impl FixedPoolShared {
    pub(crate) fn available_buffers(&self) -> usize {
        self.free_list.len()
    }

    /// 关闭子池并交出空闲段，由全局池的 shutdown 释放。
    pub(crate) fn close(&self) -> Vec<SegmentPtr> {
        self.free_list.close()
    }
}

impl SegmentRecycler for FixedPoolShared {
    fn recycle(&self, segment: SegmentPtr) {
        if let Err(segment) = self.free_list.push(segment) {
            self.parent.take_back_lent(segment);
        }
    }
}

impl Drop for FixedPoolShared {
    fn drop(&mut self) {
        let returned = self.free_list.close();
        let count = returned.len();
        for segment in returned {
            self.parent.take_back_lent(segment);
        }
        if !self.parent.is_closed() {
            tracing::debug!(
                returned = count,
                capacity = self.capacity,
                "fixed-size buffer pool returned its buffers"
            );
        }
    }
}

/// 由 [`BufferPool::create_fixed_size_pool`](crate::BufferPool::create_fixed_size_pool) 创建的子池句柄。
///
/// ```
/// use rivulet_buffer::BufferPool;
///
/// let pool = BufferPool::new(64, 4).expect("构造池");
/// let source = pool.create_fixed_size_pool(3).expect("空闲段足够");
/// assert_eq!(pool.available_buffers(), 1);
///
/// let buffer = source.acquire_blocking().expect("池未关闭");
/// drop(buffer);
/// assert_eq!(source.available_buffers(), 3);
///
/// drop(source);
/// assert_eq!(pool.available_buffers(), 4);
/// ```
#[derive(Clone)]
pub struct FixedSizeBufferPool {
    shared: Arc<FixedPoolShared>,
}

impl FixedSizeBufferPool {
    pub(crate) fn new(parent: Arc<PoolShared>, segments: Vec<SegmentPtr>) -> Self {
        let capacity = segments.len();
        let shared = Arc::new_cyclic(|weak: &Weak<FixedPoolShared>| {
            let recycler: Weak<dyn SegmentRecycler> = weak.clone();
            for segment in &segments {
                // SAFETY: 段刚从全局空闲链表取出，计数为 0，由本函数独占。
                unsafe { segment.rebind_recycler(recycler.clone()) };
            }
            FixedPoolShared {
                parent,
                capacity,
                free_list: FreeList::from_segments(segments),
            }
        });
        Self { shared }
    }

    pub(crate) fn downgrade(&self) -> Weak<FixedPoolShared> {
        Arc::downgrade(&self.shared)
    }

    pub fn acquire_blocking(&self) -> Result<Buffer, PoolError> {
        let segment = self.shared.free_list.pop_blocking()?;
        Ok(Buffer::from_free_segment(segment))
    }

    pub fn acquire_non_blocking(&self) -> Result<Option<Buffer>, PoolError> {
        Ok(self
            .shared
            .free_list
            .try_pop()?
            .map(Buffer::from_free_segment))
    }

    pub fn acquire_with_timeout(&self, timeout: Duration) -> Result<Buffer, PoolError> {
        let segment = self.shared.free_list.pop_timeout(timeout)?;
        Ok(Buffer::from_free_segment(segment))
    }

    pub fn available_buffers(&self) -> usize {
        self.shared.available_buffers()
    }

    /// 划给子池的段数。
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

impl std::fmt::Debug for FixedSizeBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedSizeBufferPool")
            .field("capacity", &self.shared.capacity)
            .field("available", &self.available_buffers())
            .finish()
    }
}
