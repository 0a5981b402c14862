//! Benchmarks for message routing
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use datapipe_rs::adaptor::{Evaluator, Verdict};
use datapipe_rs::message::{Document, Message, OpType};
use datapipe_rs::pipeline::Pipe;
use datapipe_rs::scripting::{builtins, RhaiEvaluator};
use serde_json::json;
use std::thread;
use std::time::Duration;

const BATCH: u64 = 1_000;

fn sample(n: u64) -> Message {
    let mut doc = Document::new();
    doc.insert("_id".into(), json!(format!("id-{}", n)));
    doc.insert("a".into(), json!(n));
    doc.insert("tags".into(), json!(["x", "y"]));
    Message::new(OpType::Insert, "bench.coll", doc)
}

fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");
    group.throughput(Throughput::Elements(BATCH));

    for children in [1usize, 4, 16].iter() {
        group.bench_with_input(BenchmarkId::new("send", children), children, |b, &children| {
            b.iter(|| {
                let mut root = Pipe::new_root("source", Duration::ZERO, 64);
                let sinks: Vec<Pipe> = (0..children)
                    .map(|i| Pipe::join(&mut root, format!("sink{}", i)))
                    .collect();

                thread::scope(|s| {
                    for mut sink in sinks {
                        s.spawn(move || {
                            let mut seen = 0u64;
                            let _ = sink.listen(|msg| {
                                black_box(&msg);
                                seen += 1;
                                Ok(None)
                            });
                            seen
                        });
                    }
                    for n in 0..BATCH {
                        let _ = root.send(sample(n));
                    }
                    root.close_outbound();
                });
            });
        });
    }

    group.finish();
}

fn bench_script_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("script_evaluation");
    group.throughput(Throughput::Elements(1));

    let scripts = [
        ("passthrough", builtins::PASSTHROUGH),
        ("filter", "if msg.data.a % 2 == 0 { msg } else { () }"),
        ("rewrite", "msg.data.b = msg.data.a * 2; #{ data: msg.data }"),
    ];
    for (name, source) in scripts {
        let mut evaluator = match RhaiEvaluator::new(name, source, Default::default()) {
            Ok(evaluator) => evaluator,
            Err(e) => panic!("bench script {} does not compile: {}", name, e),
        };
        let msg = sample(42);
        group.bench_function(name, |b| {
            b.iter(|| match evaluator.evaluate(black_box(&msg)) {
                Verdict::Fail(e) => panic!("{}", e),
                verdict => black_box(verdict),
            });
        });
    }

    group.finish();
}

fn bench_message_encoding(c: &mut Criterion) {
    let msg = sample(7);
    c.bench_function("document_to_json", |b| {
        b.iter(|| serde_json::to_vec(black_box(msg.document())))
    });
}

criterion_group!(
    benches,
    bench_broadcast,
    bench_script_evaluation,
    bench_message_encoding,
);

criterion_main!(benches);
