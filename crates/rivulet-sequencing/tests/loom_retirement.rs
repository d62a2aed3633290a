#![cfg(loom)]

//! 序列退役“恰好一次”的 Loom 模型检查。
//!
//! `--cfg loom` 下 `ChunkCollector` 的序列表换成 Loom 互斥锁保护的映射，
//! 条目锁内的登记、完成判定与移除仍走真实代码。这里穷举两个线程提交分片的所有交错。
//!
//! 运行方式：`RUSTFLAGS="--cfg loom" cargo test -p rivulet-sequencing --test loom_retirement --release`。

use loom::{model, sync::Arc, thread};
use rivulet_core::{ChunkNumber, SequenceData, SequenceNumber, Watermark};
use rivulet_sequencing::{ChunkCollector, CompletedSequence};

fn chunk(sequence: u64, chunk: u64, last: bool) -> SequenceData {
    SequenceData::new(SequenceNumber::new(sequence), ChunkNumber::new(chunk), last)
}

fn done(sequence: u64, watermark: i64) -> CompletedSequence {
    CompletedSequence {
        sequence_number: SequenceNumber::new(sequence),
        watermark: Watermark::new(watermark),
    }
}

#[test]
fn racing_chunks_retire_sequence_once() {
    model(|| {
        let collector = Arc::new(ChunkCollector::new());

        let tail = {
            let collector = Arc::clone(&collector);
            thread::spawn(move || collector.collect(chunk(0, 1, true), Watermark::new(42)))
        };
        let head = collector.collect(chunk(0, 0, false), Watermark::new(2));
        let tail = tail.join().expect("提交线程不应 panic");

        let winners: Vec<_> = [head, tail].into_iter().flatten().collect();
        assert_eq!(winners, vec![done(0, 42)], "恰好一个线程报告完成，水位线为最大值");
        assert_eq!(collector.pending_sequences(), 0);
    });
}

#[test]
fn independent_sequences_do_not_interfere() {
    model(|| {
        let collector = Arc::new(ChunkCollector::new());

        let other = {
            let collector = Arc::clone(&collector);
            thread::spawn(move || collector.collect(chunk(1, 0, true), Watermark::new(7)))
        };
        assert_eq!(collector.collect(chunk(0, 0, false), Watermark::new(3)), None);
        assert_eq!(other.join().expect("提交线程不应 panic"), Some(done(1, 7)));
        assert_eq!(
            collector.collect(chunk(0, 1, true), Watermark::new(1)),
            Some(done(0, 3))
        );
    });
}
