//! Benchmarks for block rendering.
//!
//! Run with: cargo bench
//!
//! Reference timing at 48kHz sample rate:
//!   - 64 samples  = 1.33ms deadline
//!   - 128 samples = 2.67ms deadline
//!   - 256 samples = 5.33ms deadline
//!   - 512 samples = 10.67ms deadline
//!
//! Benchmark groups:
//!   - graph/*    Host-side units, measuring graph evaluation overhead
//!   - sandbox/*  WebAssembly units, measuring the cost of crossing into them

use std::{hint::black_box, sync::Arc};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use nullunit::{
    io::{SampleStore, UnitRegistry},
    unit::{ParamType, ParamValue, RenderCtx, UnitInfo, UnitProcessor},
    AudioEngine, EngineConfig, Manager, SandboxError, SINK_ID,
};

/// Common buffer sizes used in audio applications.
pub const BLOCK_SIZES: &[usize] = &[64, 128, 256, 512];

/// One-pole smoother, enough work to not be optimized away.
struct Smooth {
    state: f32,
}

impl UnitProcessor for Smooth {
    fn process(&mut self, _: &RenderCtx, input: f32, _: u8) -> Result<f32, SandboxError> {
        self.state += 0.1 * (input + 0.01 - self.state);
        Ok(self.state)
    }

    fn param_set(&mut self, _: u8, _: ParamValue) -> Result<(), SandboxError> {
        Ok(())
    }

    fn param_get(&mut self, _: u8, ty: ParamType) -> Result<ParamValue, SandboxError> {
        Ok(ParamValue::from_bits(ty, 0))
    }
}

const DC: &str = r#"
(module
  (memory (export "memory") 1)
  (data (i32.const 64) "\00\00\00\00\00\01\00\00\00\00\00\00")
  (func (export "get_info") (result i32) (i32.const 64))
  (func (export "process") (param i32 f32 i32 f32 f64) (result f32)
    (f32.const 0.125)))
"#;

fn host() -> (Manager, AudioEngine) {
    Manager::new(
        EngineConfig::default(),
        UnitRegistry::new(),
        Arc::new(SampleStore::new()),
    )
    .expect("engine")
}

fn smooth_info() -> UnitInfo {
    UnitInfo {
        name: "smooth".into(),
        channels_in: 1,
        channels_out: 1,
        params: Vec::new(),
    }
}

pub fn bench_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph");

    for &size in BLOCK_SIZES {
        // === 16 units in series ===
        let (mut manager, mut engine) = host();
        let mut prev = None;
        for _ in 0..16 {
            let id = manager
                .load_processor(smooth_info(), Box::new(Smooth { state: 0.0 }))
                .unwrap();
            if let Some(prev) = prev {
                manager.connect(prev, 0, id, 0).unwrap();
            }
            prev = Some(id);
        }
        manager.connect(prev.unwrap(), 0, SINK_ID, 0).unwrap();

        let mut buffer = vec![0.0f32; size * 2];
        engine.process(&mut buffer, 2);

        group.bench_with_input(BenchmarkId::new("chain_16", size), &size, |b, _| {
            b.iter(|| {
                engine.process(black_box(&mut buffer), 2);
            });
        });

        // === 16 units summed into the sink, with a feedback edge ===
        let (mut manager, mut engine) = host();
        let ids: Vec<_> = (0..16)
            .map(|_| {
                manager
                    .load_processor(smooth_info(), Box::new(Smooth { state: 0.0 }))
                    .unwrap()
            })
            .collect();
        for &id in &ids {
            manager.connect(id, 0, SINK_ID, 0).unwrap();
        }
        manager.connect(ids[15], 0, ids[0], 0).unwrap();
        engine.process(&mut buffer, 2);

        group.bench_with_input(BenchmarkId::new("mix_16_feedback", size), &size, |b, _| {
            b.iter(|| {
                engine.process(black_box(&mut buffer), 2);
            });
        });
    }

    group.finish();
}

pub fn bench_sandbox(c: &mut Criterion) {
    let mut group = c.benchmark_group("sandbox");

    for &size in BLOCK_SIZES {
        for units in [1, 8] {
            let (mut manager, mut engine) = host();
            for _ in 0..units {
                let id = manager.load_unit_bytes("dc", DC.as_bytes()).unwrap();
                manager.connect(id, 0, SINK_ID, 0).unwrap();
            }

            let mut buffer = vec![0.0f32; size * 2];
            engine.process(&mut buffer, 2);

            group.bench_with_input(
                BenchmarkId::new(format!("dc_{units}"), size),
                &size,
                |b, _| {
                    b.iter(|| {
                        engine.process(black_box(&mut buffer), 2);
                    });
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_graph, bench_sandbox);
criterion_main!(benches);
