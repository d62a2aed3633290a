#![cfg(not(loom))]

//! `pool_contract` 集成测试：从外部 crate 视角验证 `BufferPool` 的租借、回收与关闭契约。
//!
//! # 结构安排（How）
//! - 耗尽与复用：租满后非阻塞租借返回 `None`，归还一个后恰好一次租借成功且复用同一地址；
//! - 非池化分配：零尺寸失败，合法尺寸成功且归还时不进入空闲链表；
//! - 回收交接：跨线程释放非池化段、子池消亡后借出段改绑回全局池；
//! - 关闭：阻塞中的等待者被唤醒并返回 `Closed`；
//! - 并发：多线程反复租借归还，不会把同一段同时交给两个持有者。

use std::{
    collections::HashSet,
    sync::{Arc, Barrier, Mutex},
    thread,
    time::Duration,
};

use rivulet_buffer::{BufferPool, BufferPoolConfig, PoolError};

/// 租满全部池化缓冲后池即耗尽；归还一个只让一次后续租借成功，并复用同一块内存。
#[test]
fn released_buffer_is_reacquired_exactly_once() {
    let pool = BufferPool::new(512, 4).expect("构造池");
    let mut held: Vec<_> = (0..4)
        .map(|_| pool.acquire_blocking().expect("池未关闭"))
        .collect();
    assert!(pool.acquire_non_blocking().expect("池未关闭").is_none());
    assert_eq!(pool.available_buffers(), 0);

    let released = held.pop().expect("租到了 4 个缓冲");
    let address = released.as_ptr();
    assert_eq!(released.reference_count(), 1);
    drop(released);
    assert_eq!(pool.available_buffers(), 1);

    let reacquired = pool.acquire_non_blocking().expect("池未关闭").expect("有一个空闲段");
    assert_eq!(reacquired.as_ptr(), address);
    assert_eq!(reacquired.reference_count(), 1);
    assert!(pool.acquire_non_blocking().expect("池未关闭").is_none());
}

/// 只有最后一个句柄的释放才让段回到池中。
#[test]
fn segment_returns_only_after_last_clone_drops() {
    let pool = BufferPool::new(64, 1).expect("构造池");
    let first = pool.acquire_blocking().expect("池未关闭");
    let second = first.clone();
    let third = second.clone();
    assert_eq!(first.reference_count(), 3);

    drop(first);
    drop(third);
    assert_eq!(pool.available_buffers(), 0);
    drop(second);
    assert_eq!(pool.available_buffers(), 1);
}

#[test]
fn unpooled_zero_size_is_rejected() {
    let pool = BufferPool::new(64, 1).expect("构造池");
    let err = pool.acquire_unpooled(0).expect_err("零尺寸应失败");
    assert!(matches!(err, PoolError::InvalidSize { requested: 0, .. }));
    assert_eq!(pool.number_of_unpooled_buffers(), 0);
}

/// 非池化缓冲可以大于池化尺寸，归还时直接释放，不会进入空闲链表。
#[test]
fn unpooled_buffer_is_freed_not_pooled() {
    let pool = BufferPool::new(64, 1).expect("构造池");
    let mut large = pool.acquire_unpooled(10_000).expect("尺寸合法");
    assert_eq!(large.len(), 10_000);
    assert!(!large.is_pooled());
    assert!(large.as_slice().iter().all(|b| *b == 0));
    large.data_mut().expect("唯一持有者")[9_999] = 0xAB;
    assert_eq!(pool.number_of_unpooled_buffers(), 1);
    assert_eq!(pool.available_buffers(), 1);

    let copy = large.clone();
    drop(large);
    assert_eq!(copy.as_slice()[9_999], 0xAB);
    assert_eq!(pool.number_of_unpooled_buffers(), 1);
    drop(copy);
    assert_eq!(pool.number_of_unpooled_buffers(), 0);
    assert_eq!(pool.available_buffers(), 1);
}

/// 最后一个句柄在其它线程上消失时，非池化段随之释放，计数与字节数同时归零。
#[test]
fn unpooled_buffer_released_on_another_thread_is_freed() {
    let pool = BufferPool::new(64, 1).expect("构造池");
    let buffer = pool.acquire_unpooled(32).expect("尺寸合法");
    let remote = buffer.clone();
    drop(buffer);

    thread::spawn(move || drop(remote))
        .join()
        .expect("释放线程不应 panic");
    let stats = pool.statistics();
    assert_eq!(stats.outstanding_unpooled, 0);
    assert_eq!(stats.unpooled_bytes, 0);
}

/// 子池消亡后，经它租出的缓冲在释放时改绑回全局池，可以再次从全局池租出。
#[test]
fn lent_buffer_rejoins_global_pool_after_its_fixed_pool_is_gone() {
    let pool = BufferPool::new(64, 1).expect("构造池");
    let source = pool.create_fixed_size_pool(1).expect("空闲段足够");
    let buffer = source.acquire_blocking().expect("池未关闭");
    let address = buffer.as_ptr();
    drop(source);
    assert_eq!(pool.available_buffers(), 0);

    drop(buffer);
    assert_eq!(pool.available_buffers(), 1);
    assert_eq!(pool.statistics().reserved_by_fixed_pools, 0);
    let again = pool.acquire_blocking().expect("池未关闭");
    assert_eq!(again.as_ptr(), address);
}

#[test]
fn timeout_reports_exhaustion() {
    let pool = BufferPool::new(64, 1).expect("构造池");
    let _held = pool.acquire_blocking().expect("池未关闭");
    assert_eq!(
        pool.acquire_with_timeout(Duration::from_millis(20)),
        Err(PoolError::Exhausted)
    );
}

/// 在等待期间归还的缓冲交给限时等待者。
#[test]
fn timed_waiter_receives_released_buffer() {
    let pool = BufferPool::new(64, 1).expect("构造池");
    let held = pool.acquire_blocking().expect("池未关闭");
    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || pool.acquire_with_timeout(Duration::from_secs(10)))
    };
    thread::sleep(Duration::from_millis(20));
    drop(held);
    let buffer = waiter
        .join()
        .expect("等待线程不应 panic")
        .expect("归还后应拿到缓冲");
    assert_eq!(buffer.reference_count(), 1);
}

/// `shutdown` 唤醒所有阻塞中的租借，它们返回 `Closed` 而不是挂起。
#[test]
fn shutdown_wakes_blocked_waiters() {
    let pool = BufferPool::new(64, 1).expect("构造池");
    let held = pool.acquire_blocking().expect("池未关闭");
    let waiters: Vec<_> = (0..3)
        .map(|index| {
            let pool = pool.clone();
            thread::spawn(move || {
                if index == 0 {
                    pool.acquire_with_timeout(Duration::from_secs(30)).map(|_| ())
                } else {
                    pool.acquire_blocking().map(|_| ())
                }
            })
        })
        .collect();
    thread::sleep(Duration::from_millis(50));
    pool.shutdown();
    for waiter in waiters {
        assert_eq!(waiter.join().expect("等待线程不应 panic"), Err(PoolError::Closed));
    }
    drop(held);
}

#[test]
fn every_acquire_fails_after_shutdown() {
    let pool = BufferPool::new(64, 2).expect("构造池");
    pool.shutdown();
    pool.shutdown();
    assert!(pool.is_closed());
    assert_eq!(pool.acquire_blocking(), Err(PoolError::Closed));
    assert_eq!(pool.acquire_non_blocking(), Err(PoolError::Closed));
    assert_eq!(
        pool.acquire_with_timeout(Duration::from_millis(1)),
        Err(PoolError::Closed)
    );
    assert_eq!(pool.acquire_unpooled(16), Err(PoolError::Closed));
    assert!(matches!(
        pool.create_fixed_size_pool(1),
        Err(PoolError::Closed)
    ));
    assert_eq!(pool.available_buffers(), 0);
}

#[test]
fn pool_is_built_from_toml_configuration() {
    let config = BufferPoolConfig::from_toml_str(
        "buffer_size = 2048\nnumber_of_buffers = 3\nalignment = 128",
    )
    .expect("合法配置");
    let pool = BufferPool::with_config(&config).expect("构造池");
    assert_eq!(pool.buffer_size(), 2048);
    assert_eq!(pool.number_of_pooled_buffers(), 3);
    let buffer = pool.acquire_blocking().expect("池未关闭");
    assert_eq!(buffer.as_ptr() as usize % 128, 0);
}

/// 多线程反复租借、写入、核对、归还：同一时刻每个段至多一个租借者。
#[test]
fn concurrent_acquire_never_hands_out_a_segment_twice() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 200;

    let pool = BufferPool::new(64, 3).expect("构造池");
    let live = Arc::new(Mutex::new(HashSet::new()));
    let start = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|worker| {
            let pool = pool.clone();
            let live = Arc::clone(&live);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for round in 0..ROUNDS {
                    let mut buffer = pool.acquire_blocking().expect("池未关闭");
                    let address = buffer.as_ptr() as usize;
                    assert!(
                        live.lock().expect("锁未中毒").insert(address),
                        "段 {address:#x} 被重复租出"
                    );
                    let stamp = (worker * ROUNDS + round) as u64;
                    buffer.data_mut().expect("唯一持有者")[..8]
                        .copy_from_slice(&stamp.to_le_bytes());
                    thread::yield_now();
                    assert_eq!(&buffer.as_slice()[..8], &stamp.to_le_bytes());
                    live.lock().expect("锁未中毒").remove(&address);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("工作线程不应 panic");
    }
    assert_eq!(pool.available_buffers(), 3);
    assert_eq!(pool.statistics().outstanding_pooled, 0);
}
