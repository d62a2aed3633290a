//! 内存段：一块按需对齐、清零的原始内存加上附着的控制块。
//!
//! 段只在分配器内部流转，对外暴露的唯一类型是 [`Buffer`](crate::Buffer)。
//! 段的所有权在“池的空闲链表”“持有它的 Buffer 集合”之间转移，
//! 因此这里以裸指针 [`SegmentPtr`] 表达，而不是 `Box`/`Arc`。

use std::{
    alloc::{self, Layout},
    ptr::NonNull,
    sync::Weak,
};

use crate::{
    control_block::{ControlBlock, ReleaseOutcome, SegmentRecycler},
    error::PoolError,
};

/// 段的来源。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SegmentKind {
    /// 池构造时预分配，回收后回到空闲链表。
    Pooled,
    /// 按需分配，回收即释放。
    Unpooled,
}

pub(crate) struct MemorySegment {
    data: NonNull<u8>,
    layout: Layout,
    kind: SegmentKind,
    control: ControlBlock,
}

// SAFETY: `data` 指向段独占的堆内存；谁可以读写由控制块的引用计数协议约束，
// 段本身不含线程亲和状态。
unsafe impl Send for MemorySegment {}
unsafe impl Sync for MemorySegment {}

impl MemorySegment {
    /// 分配 `size` 字节、按 `alignment` 对齐并清零的段。
    ///
    /// # 契约（What）
    /// - `size == 0`、布局非法或分配器返回空指针时，返回 [`PoolError::InvalidSize`]；
    /// - 成功时引用计数为 0，回收目标为 `recycler`，归属池（home）同为 `recycler`；
    /// - 返回的指针由调用方独占，最终必须交给池或 [`SegmentPtr::free`]。
    pub(crate) fn allocate(
        size: usize,
        alignment: usize,
        kind: SegmentKind,
        recycler: Weak<dyn SegmentRecycler>,
    ) -> Result<SegmentPtr, PoolError> {
        if size == 0 {
            return Err(PoolError::InvalidSize {
                requested: size,
                reason: "zero-sized buffers are not allowed",
            });
        }
        let layout = Layout::from_size_align(size, alignment).map_err(|_| PoolError::InvalidSize {
            requested: size,
            reason: "size overflows the address space at this alignment",
        })?;
        // SAFETY: 上面已排除零尺寸布局。
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let data = NonNull::new(raw).ok_or(PoolError::InvalidSize {
            requested: size,
            reason: "memory allocation failed",
        })?;

        let segment = Box::new(MemorySegment {
            data,
            layout,
            kind,
            control: ControlBlock::new(recycler),
        });
        let ptr = SegmentPtr(NonNull::from(Box::leak(segment)));
        // SAFETY: 段刚刚分配，尚未被任何其它位置引用。
        unsafe { (*ptr.0.as_ptr()).control.bind_owner(ptr.0) };
        Ok(ptr)
    }

    pub(crate) fn data(&self) -> NonNull<u8> {
        self.data
    }

    pub(crate) fn size(&self) -> usize {
        self.layout.size()
    }

    pub(crate) fn kind(&self) -> SegmentKind {
        self.kind
    }

    pub(crate) fn control(&self) -> &ControlBlock {
        &self.control
    }
}

impl Drop for MemorySegment {
    fn drop(&mut self) {
        // SAFETY: `data` 由 `allocate` 以同一 `layout` 分配，且只在这里释放一次。
        unsafe { alloc::dealloc(self.data.as_ptr(), self.layout) };
    }
}

/// 指向堆上 [`MemorySegment`] 的裸句柄。
///
/// `Copy` 只复制地址，不代表所有权；所有权由调用上下文（空闲链表、Buffer 引用计数）决定。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SegmentPtr(NonNull<MemorySegment>);

// SAFETY: 段可以在线程间转移（见 `MemorySegment` 的说明），句柄只是它的地址。
unsafe impl Send for SegmentPtr {}
unsafe impl Sync for SegmentPtr {}

impl From<NonNull<MemorySegment>> for SegmentPtr {
    fn from(ptr: NonNull<MemorySegment>) -> Self {
        Self(ptr)
    }
}

impl SegmentPtr {
    /// # Safety
    /// 段尚未被 [`SegmentPtr::free`] 释放，且返回引用的存活期不超过段的存活期。
    pub(crate) unsafe fn as_ref<'a>(self) -> &'a MemorySegment {
        // SAFETY: 由调用方保证段仍存活。
        unsafe { self.0.as_ref() }
    }

    /// 释放调用方持有的一个引用计数；归零时释放子缓冲并把段交给回收目标，且恰好一次。
    ///
    /// 归零后的所有步骤都经由裸指针进行，交给回收目标或释放之前，
    /// 指向段内部的引用都已结束。
    ///
    /// # Safety
    /// 调用方持有该段的一个引用计数，且调用之后不再经由这个计数访问段。
    pub(crate) unsafe fn release(self) -> ReleaseOutcome {
        // SAFETY: 调用方持有的计数使段在递减完成之前一直存活。
        if !unsafe { self.as_ref() }.control().release_reference() {
            return ReleaseOutcome::StillReferenced;
        }

        let (children, target, kind) = {
            // SAFETY: 计数已归零，本线程独占该段；引用在本块结束时失效。
            let segment = unsafe { self.as_ref() };
            let control = segment.control();
            let target = control
                .recycler()
                .upgrade()
                .or_else(|| control.home().upgrade());
            (control.take_children(), target, segment.kind())
        };
        drop(children);

        match target {
            Some(target) => target.recycle(self),
            None => {
                if kind == SegmentKind::Pooled {
                    tracing::error!(
                        "pooled buffer released after its pool was dropped; freeing the segment"
                    );
                }
                // SAFETY: 同上，此处不再存在指向段的引用。
                unsafe { self.free() };
            }
        }
        ReleaseOutcome::Recycled
    }

    /// 将段绑定到所属池：回收目标与归属池同时指向 `pool`。
    ///
    /// # Safety
    /// 调用方独占该段：引用计数为 0，且段不在任何空闲链表中。
    pub(crate) unsafe fn bind_pool(self, pool: Weak<dyn SegmentRecycler>) {
        // SAFETY: 独占访问由调用方保证。
        let control = unsafe { &mut (*self.0.as_ptr()).control };
        control.bind_recyclers(pool.clone(), pool);
    }

    /// 只改写回收目标（借给定长子池时使用），归属池保持不变。
    ///
    /// # Safety
    /// 同 [`SegmentPtr::bind_pool`]。
    pub(crate) unsafe fn rebind_recycler(self, recycler: Weak<dyn SegmentRecycler>) {
        // SAFETY: 独占访问由调用方保证。
        let control = unsafe { &mut (*self.0.as_ptr()).control };
        let home = control.home().clone();
        control.bind_recyclers(recycler, home);
    }

    /// 释放段及其数据区。
    ///
    /// # Safety
    /// 调用方独占该段，且之后不再使用任何指向它的 `SegmentPtr`。
    pub(crate) unsafe fn free(self) {
        // SAFETY: 指针来自 `Box::leak`，且由调用方保证只释放一次。
        drop(unsafe { Box::from_raw(self.0.as_ptr()) });
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::control_block::detached;

    #[test]
    fn allocation_is_zeroed_and_aligned() {
        let segment = MemorySegment::allocate(256, 128, SegmentKind::Unpooled, detached())
            .expect("分配应成功");
        // SAFETY: 段由本测试独占。
        let view = unsafe { segment.as_ref() };
        assert_eq!(view.size(), 256);
        assert_eq!(view.data().as_ptr() as usize % 128, 0);
        // SAFETY: 数据区长度为 256 且已清零初始化。
        let bytes = unsafe { std::slice::from_raw_parts(view.data().as_ptr(), view.size()) };
        assert!(bytes.iter().all(|b| *b == 0));
        assert_eq!(view.control().reference_count(), 0);
        unsafe { segment.free() };
    }

    #[test]
    fn zero_size_is_rejected() {
        let err = MemorySegment::allocate(0, 64, SegmentKind::Unpooled, detached())
            .expect_err("零尺寸不应分配");
        assert!(matches!(err, PoolError::InvalidSize { requested: 0, .. }));
    }

    #[test]
    fn oversized_layout_is_rejected() {
        let err = MemorySegment::allocate(usize::MAX - 8, 64, SegmentKind::Unpooled, detached())
            .expect_err("超出地址空间的布局不应分配");
        assert!(matches!(err, PoolError::InvalidSize { .. }));
    }

    #[test]
    fn release_without_live_target_frees_the_segment() {
        let segment = MemorySegment::allocate(32, 64, SegmentKind::Unpooled, detached())
            .expect("分配应成功");
        {
            let control = unsafe { segment.as_ref() }.control();
            control.retain().retain();
        }
        assert_eq!(unsafe { segment.release() }, ReleaseOutcome::StillReferenced);
        assert_eq!(unsafe { segment.release() }, ReleaseOutcome::Recycled);
    }
}
