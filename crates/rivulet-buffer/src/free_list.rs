//! 空闲段链表：互斥锁保护的队列加条件变量。
//!
//! # 契约（What）
//! - 同一个段至多被一个线程弹出（不会重复租出）；
//! - `push` 唤醒一个等待者，被唤醒者若未抢到段会继续等待，不会丢失唤醒；
//! - `close` 之后所有弹出操作返回 [`PoolError::Closed`]，并唤醒全部等待者。

use std::{collections::VecDeque, time::Duration, time::Instant};

use crate::{
    error::PoolError,
    segment::SegmentPtr,
    sync::{Condvar, Mutex},
};

struct FreeListState {
    segments: VecDeque<SegmentPtr>,
    closed: bool,
}

pub(crate) struct FreeList {
    state: Mutex<FreeListState>,
    available: Condvar,
}

impl FreeList {
    pub(crate) fn from_segments(segments: Vec<SegmentPtr>) -> Self {
        Self {
            state: Mutex::new(FreeListState {
                segments: VecDeque::from(segments),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// 归还一个段并唤醒一个等待者。
    ///
    /// 链表已关闭时原样退回该段，由调用方决定如何处置。
    pub(crate) fn push(&self, segment: SegmentPtr) -> Result<(), SegmentPtr> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(segment);
        }
        state.segments.push_back(segment);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    pub(crate) fn try_pop(&self) -> Result<Option<SegmentPtr>, PoolError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }
        Ok(state.segments.pop_front())
    }

    pub(crate) fn pop_blocking(&self) -> Result<SegmentPtr, PoolError> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(PoolError::Closed);
            }
            if let Some(segment) = state.segments.pop_front() {
                return Ok(segment);
            }
            state = self.available.wait(state);
        }
    }

    /// 最多等待 `timeout`；截止时仍无空闲段则返回 [`PoolError::Exhausted`]。
    pub(crate) fn pop_timeout(&self, timeout: Duration) -> Result<SegmentPtr, PoolError> {
        // 超出 Instant 表示范围的超时等价于无限等待。
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.pop_blocking();
        };
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(PoolError::Closed);
            }
            if let Some(segment) = state.segments.pop_front() {
                return Ok(segment);
            }
            let (guard, timed_out) = self.available.wait_until(state, deadline);
            state = guard;
            if timed_out {
                // 超时与归还可能同时发生，最后再看一眼。
                if state.closed {
                    return Err(PoolError::Closed);
                }
                return state.segments.pop_front().ok_or(PoolError::Exhausted);
            }
        }
    }

    /// 一次性取走 `count` 个段；不足时不取任何段。
    pub(crate) fn try_pop_many(&self, count: usize) -> Result<Vec<SegmentPtr>, PoolError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }
        if state.segments.len() < count {
            return Err(PoolError::Exhausted);
        }
        Ok(state.segments.drain(..count).collect())
    }

    /// 关闭链表，唤醒所有等待者，并交出仍在链表中的段。
    pub(crate) fn close(&self) -> Vec<SegmentPtr> {
        let mut state = self.state.lock();
        state.closed = true;
        let drained = state.segments.drain(..).collect();
        drop(state);
        self.available.notify_all();
        drained
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().segments.len()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;
    use crate::{
        control_block::detached,
        segment::{MemorySegment, SegmentKind},
    };

    fn segments(count: usize) -> Vec<SegmentPtr> {
        (0..count)
            .map(|_| {
                MemorySegment::allocate(32, 64, SegmentKind::Pooled, detached())
                    .expect("分配应成功")
            })
            .collect()
    }

    fn free_all(list: &FreeList) {
        for segment in list.close() {
            unsafe { segment.free() };
        }
    }

    #[test]
    fn pop_many_is_all_or_nothing() {
        let list = FreeList::from_segments(segments(3));
        assert_eq!(list.try_pop_many(4), Err(PoolError::Exhausted));
        assert_eq!(list.len(), 3);
        let taken = list.try_pop_many(2).expect("数量足够");
        assert_eq!(taken.len(), 2);
        assert_eq!(list.len(), 1);
        for segment in taken {
            unsafe { segment.free() };
        }
        free_all(&list);
    }

    #[test]
    fn timeout_expires_with_exhausted() {
        let list = FreeList::from_segments(Vec::new());
        assert_eq!(
            list.pop_timeout(Duration::from_millis(10)),
            Err(PoolError::Exhausted)
        );
    }

    #[test]
    fn push_after_close_is_refused() {
        let list = FreeList::from_segments(Vec::new());
        let mut batch = segments(1);
        let segment = batch.pop().expect("一个段");
        assert!(list.close().is_empty());
        let refused = list.push(segment).expect_err("已关闭");
        assert_eq!(refused, segment);
        assert_eq!(list.try_pop(), Err(PoolError::Closed));
        unsafe { refused.free() };
    }

    #[test]
    fn close_wakes_blocked_waiter() {
        let list = Arc::new(FreeList::from_segments(Vec::new()));
        let waiter = {
            let list = Arc::clone(&list);
            thread::spawn(move || list.pop_blocking())
        };
        thread::sleep(Duration::from_millis(20));
        list.close();
        assert_eq!(waiter.join().expect("等待线程不应 panic"), Err(PoolError::Closed));
    }

    #[test]
    fn push_hands_segment_to_waiter() {
        let list = Arc::new(FreeList::from_segments(Vec::new()));
        let waiter = {
            let list = Arc::clone(&list);
            thread::spawn(move || list.pop_timeout(Duration::from_secs(5)))
        };
        let mut batch = segments(1);
        let segment = batch.pop().expect("一个段");
        list.push(segment).expect("未关闭");
        let received = waiter.join().expect("等待线程不应 panic").expect("应拿到段");
        assert_eq!(received, segment);
        unsafe { received.free() };
    }
}
