// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use mwmr_config::{
    ChannelDirection, CoprocessorSection, DescriptorKind, PlatformManifest, TaskModeKind,
    TaskRoleKind,
};

const FULL: &str = r#"
schema_version: "1.0"
name: "two-way"
memory:
  - name: ram
    base: 0x20000000
    size: "64KB"
controller:
  plaps: 3
  backoff: 20
  n_config: 2
coprocessor:
  type: loopback
  increment: 1
  depth: 2
channels:
  - name: input
    direction: to_coprocessor
    index: 0
    width: 4
    depth: 4
    buffer: 0x20000000
    status: 0x20000400
  - name: output
    direction: from_coproc
    index: 0
    width: 2
    depth: 8
    buffer: 0x20000100
    status: 0x20000410
    layout: embedded
    lock_address: 0x20000500
workload:
  - name: producer
    role: writer
    channel: input
    words: 64
    chunk: 8
  - name: consumer
    role: reader
    channel: output
    words: 64
    mode: polling
    backoff_ticks: 2
limits:
  max_ticks: 5000
  no_progress_ticks: 500
"#;

#[test]
fn test_full_manifest_parses() {
    let m = PlatformManifest::from_yaml(FULL).unwrap();
    assert_eq!(m.name, "two-way");
    assert_eq!(m.controller.plaps, 3);
    assert_eq!(m.controller.backoff, Some(20));
    assert_eq!(
        m.coprocessor,
        CoprocessorSection::Loopback {
            increment: 1,
            depth: 2
        }
    );

    let output = m.channel("output").unwrap();
    assert_eq!(output.direction, ChannelDirection::FromCoprocessor);
    assert_eq!(output.layout, DescriptorKind::Embedded);
    assert_eq!(output.lock_address, Some(0x2000_0500));

    assert_eq!(m.workload[0].role, TaskRoleKind::Writer);
    assert_eq!(m.workload[0].chunk, Some(8));
    assert_eq!(m.workload[1].mode, TaskModeKind::Polling);
    assert_eq!(m.workload[1].backoff_ticks, 2);
    assert_eq!(m.limits.no_progress_ticks, Some(500));
}

#[test]
fn test_stream_coprocessor() {
    let yaml = FULL.replace(
        "  type: loopback\n  increment: 1\n  depth: 2\n",
        "  type: stream\n  interval: 3\n  words: 16\n",
    );
    let m = PlatformManifest::from_yaml(&yaml).unwrap();
    assert_eq!(
        m.coprocessor,
        CoprocessorSection::Stream {
            interval: 3,
            words: 16,
            start: 0
        }
    );
}

#[test]
fn test_duplicate_channel_name_rejected() {
    let yaml = FULL.replace("name: output", "name: input");
    let err = PlatformManifest::from_yaml(&yaml).unwrap_err();
    assert!(err.to_string().contains("Duplicate channel name"));
}

#[test]
fn test_writer_on_from_channel_rejected() {
    let yaml = FULL.replace("    channel: input\n", "    channel: output\n");
    let err = PlatformManifest::from_yaml(&yaml).unwrap_err();
    assert!(err.to_string().contains("producer"));
}

#[test]
fn test_unknown_task_channel_rejected() {
    let yaml = FULL.replace("    channel: input\n", "    channel: missing\n");
    assert!(PlatformManifest::from_yaml(&yaml).is_err());
}

#[test]
fn test_zero_width_rejected() {
    let yaml = FULL.replace("    width: 4\n", "    width: 0\n");
    assert!(PlatformManifest::from_yaml(&yaml).is_err());
}

#[test]
fn test_unsupported_schema_version() {
    let yaml = FULL.replace("schema_version: \"1.0\"", "schema_version: \"2.0\"");
    let err = PlatformManifest::from_yaml(&yaml).unwrap_err();
    assert!(err.to_string().contains("Unsupported schema_version"));
}

#[test]
fn test_unknown_field_rejected() {
    let yaml = FULL.replace("  plaps: 3\n", "  plaps: 3\n  turbo: true\n");
    assert!(PlatformManifest::from_yaml(&yaml).is_err());
}

#[test]
fn test_from_file_reports_missing_path() {
    let err = PlatformManifest::from_file("/nonexistent/platform.yaml").unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to open platform manifest"));
}

#[test]
fn test_burst_must_fit_staging_fifo() {
    // Default staging depth is 8: a to-coprocessor burst needs a spare slot.
    let yaml = FULL.replace("    width: 4\n", "    width: 8\n");
    let err = PlatformManifest::from_yaml(&yaml).unwrap_err();
    assert!(format!("{:#}", err).contains("does not fit the controller staging FIFO"));

    let yaml = FULL.replace("    width: 2\n", "    width: 8\n");
    assert!(PlatformManifest::from_yaml(&yaml).is_ok());
}

#[test]
fn test_oversized_ring_rejected() {
    let yaml = FULL.replace("    depth: 4\n", "    depth: 1073741824\n");
    let err = PlatformManifest::from_yaml(&yaml).unwrap_err();
    assert!(format!("{:#}", err).contains("is too large"));
}

#[test]
fn test_channel_memory_must_be_mapped() {
    for (from, to) in [
        ("buffer: 0x20000000", "buffer: 0x40000000"),
        ("status: 0x20000410", "status: 0x40000410"),
        ("lock_address: 0x20000500", "lock_address: 0x1ffffffc"),
    ] {
        let yaml = FULL.replace(from, to);
        let err = PlatformManifest::from_yaml(&yaml).unwrap_err();
        assert!(
            format!("{:#}", err).contains("outside mapped memory"),
            "{} accepted",
            to
        );
    }
}
