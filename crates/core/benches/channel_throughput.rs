// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use criterion::{criterion_group, criterion_main, Criterion};
use mwmr_config::PlatformManifest;
use mwmr_core::platform::Platform;
use std::hint::black_box;

const LOOPBACK: &str = r#"
name: "bench-loopback"
memory:
  - name: ram
    base: 0x20000000
    size: "64KB"
controller:
  plaps: 1
coprocessor:
  type: loopback
  increment: 1
channels:
  - name: input
    direction: to_coprocessor
    index: 0
    width: 4
    depth: 8
    buffer: 0x20000000
    status: 0x20001000
  - name: output
    direction: from_coprocessor
    index: 0
    width: 4
    depth: 8
    buffer: 0x20000100
    status: 0x20001010
workload:
  - name: producer
    role: writer
    channel: input
    words: 4096
  - name: consumer
    role: reader
    channel: output
    words: 4096
"#;

fn loopback_bench(c: &mut Criterion) {
    let manifest = match PlatformManifest::from_yaml(LOOPBACK) {
        Ok(m) => m,
        Err(e) => panic!("bench manifest: {:#}", e),
    };

    c.bench_function("loopback-4096-words", |b| {
        b.iter(|| {
            let mut platform = match Platform::from_manifest(&manifest) {
                Ok(p) => p,
                Err(e) => panic!("platform: {:#}", e),
            };
            black_box(platform.run(1_000_000, Some(10_000)).map(|r| r.ticks))
        })
    });

    c.bench_function("controller-1000-ticks", |b| {
        b.iter(|| {
            let mut platform = match Platform::from_manifest(&manifest) {
                Ok(p) => p,
                Err(e) => panic!("platform: {:#}", e),
            };
            for _ in 0..1000 {
                black_box(platform.step().is_ok());
            }
        })
    });
}

criterion_group!(benches, loopback_bench);
criterion_main!(benches);
