use criterion::Criterion;
use rivulet_buffer::BufferPool;
use std::{env, hint::black_box, thread, time::Duration};

/// 租借-戳记-归还的单线程往返，以及四线程争用同一个小池时的往返。
///
/// # 逻辑解析（How）
/// - `acquire_release`：热路径只经过空闲链表与控制块，不触碰系统分配器；
/// - `acquire_release_contended`：池容量小于线程数，覆盖条件变量等待与唤醒；
/// - `acquire_unpooled`：对照组，每次都向系统分配器申请并释放。
fn bench_acquire_release(c: &mut Criterion) {
    let pool = BufferPool::new(4096, 64).expect("构造池");
    c.bench_function("acquire_release", |b| {
        b.iter(|| {
            let buffer = pool.acquire_blocking().expect("池未关闭");
            buffer.set_number_of_entries(1);
            black_box(buffer.as_slice()[0])
        });
    });

    c.bench_function("acquire_release_contended", |b| {
        let small = BufferPool::new(4096, 2).expect("构造池");
        b.iter(|| {
            thread::scope(|scope| {
                for _ in 0..4 {
                    let small = &small;
                    scope.spawn(move || {
                        for _ in 0..32 {
                            let buffer = small.acquire_blocking().expect("池未关闭");
                            black_box(buffer.len());
                        }
                    });
                }
            });
        });
    });

    c.bench_function("acquire_unpooled", |b| {
        b.iter(|| {
            let buffer = pool.acquire_unpooled(4096).expect("尺寸合法");
            black_box(buffer.as_slice()[0])
        });
    });
}

fn main() {
    let mut quick_mode = false;
    for arg in env::args().skip(1) {
        if arg == "--quick" {
            quick_mode = true;
        }
    }

    let mut criterion = Criterion::default();
    if quick_mode {
        criterion = criterion
            .sample_size(10)
            .warm_up_time(Duration::from_millis(100))
            .measurement_time(Duration::from_millis(250));
    }

    bench_acquire_release(&mut criterion);
    criterion.final_summary();
}
