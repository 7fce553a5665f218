// These tests check the command line surface of dred-dump against a synthetic
// minidump holding a small DRED payload.
//
// `cargo test` for an application adds our binary to the env as
// `CARGO_BIN_EXE_<name>`.

use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

use dred_synth::{
    BreadcrumbContexts, BreadcrumbNode, MemoryItem, NarrowString, PageFaultOutput, SynthImage,
    SynthLayout, Uints, VersionedPayload, WideString,
};
use minidump_synth::{DumpString, Memory, Module, SynthMinidump, SystemInfo, STOCK_VERSION_INFO};
use test_assembler::*;

// Some tests need to write files (and read them back).
// To keep this tidy and hidden, we make a new directory
// in `target`.
const TEST_TMP: &str = "../target/testdata/";

const D3D12CORE_BASE: u64 = 0x7ffb_4a20_0000;
const DRED_RVA: u64 = 0x1d_2f40;
const PROCESSOR_ARCHITECTURE_AMD64: u16 = 9;

fn test_output(file_name: &str) -> PathBuf {
    let mut res = PathBuf::from(TEST_TMP);
    // Ensure the directory exists.
    // Ignore failures because we don't care if the dir already exists.
    let _ = std::fs::create_dir_all(&res);
    res.push(file_name);
    res
}

/// Write a minidump of a process whose d3d12core.dll has a DRED 1.3 payload at `DRED_RVA`.
fn write_minidump(file_name: &str) -> PathBuf {
    let layout = SynthLayout::default();

    let list_name = NarrowString::new(&layout, "Frame 42");
    let context = WideString::new(&layout, "GBuffer");
    let history = Uints::new(&layout, &[1, 3, 2, 6]);
    let completed = Uints::value(&layout, 2);
    let contexts = BreadcrumbContexts::new(&layout).add(3, &context.address());
    let node = BreadcrumbNode::new(&layout)
        .command_list_name_a(&list_name.address())
        .breadcrumb_count(4)
        .last_breadcrumb_value(&completed.address())
        .command_history(&history.address())
        .contexts(contexts.count(), &contexts.address());
    let payload = VersionedPayload::dred1_3(
        &layout,
        0x887a0006,
        &node.address(),
        &PageFaultOutput::new(0),
        3,
    );
    let dred = SynthImage::new(layout, D3D12CORE_BASE + DRED_RVA)
        .add(payload)
        .add(node)
        .add(list_name)
        .add(context)
        .add(history)
        .add(completed)
        .add(contexts)
        .finish()
        .unwrap();

    let memory = Memory::with_section(
        Section::with_endian(Endian::Little).append_bytes(&dred),
        D3D12CORE_BASE + DRED_RVA,
    );
    let app_name = DumpString::new(r"C:\Games\game.exe", Endian::Little);
    let app = Module::new(
        Endian::Little,
        0x7ff6_0000_0000,
        0x10_0000,
        &app_name,
        0,
        0,
        Some(&STOCK_VERSION_INFO),
    );
    let d3d12core_name = DumpString::new(r"C:\Windows\System32\D3D12Core.dll", Endian::Little);
    let d3d12core = Module::new(
        Endian::Little,
        D3D12CORE_BASE,
        0x40_0000,
        &d3d12core_name,
        0,
        0,
        Some(&STOCK_VERSION_INFO),
    );
    let dump = SynthMinidump::with_endian(Endian::Little)
        .add_system_info(
            SystemInfo::new(Endian::Little).set_processor_architecture(PROCESSOR_ARCHITECTURE_AMD64),
        )
        .add_module(app)
        .add_module(d3d12core)
        .add(app_name)
        .add(d3d12core_name)
        .add_memory(memory)
        .finish()
        .unwrap();

    let path = test_output(file_name);
    std::fs::write(&path, dump).unwrap();
    path
}

fn run(args: &[&str]) -> Output {
    let bin = env!("CARGO_BIN_EXE_dred-dump");
    Command::new(bin)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .unwrap()
}

#[test]
fn test_json() {
    let dump = write_minidump("dred-json.dmp");
    let output = run(&[
        "--json",
        "--symbol",
        "d3d12core.dll=0x1d2f40",
        dump.to_str().unwrap(),
    ]);

    let stdout = String::from_utf8(output.stdout).unwrap();
    let stderr = String::from_utf8(output.stderr).unwrap();

    assert!(output.status.success(), "{stderr}");
    assert_eq!(stderr, "");

    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["version"], 4);
    assert_eq!(json["device_removed_reason_name"], "DXGI_ERROR_DEVICE_HUNG");
    assert_eq!(json["device_state_name"], "D3D12_DRED_DEVICE_STATE_HUNG");
    let node = &json["breadcrumb_nodes"][0];
    assert_eq!(node["command_list_debug_name"], "Frame 42");
    assert_eq!(
        node["completed_ops"][0]["op_name"],
        "D3D12_AUTO_BREADCRUMB_OP_DRAWINSTANCED"
    );
    assert_eq!(
        node["outstanding_ops"][1]["op_name"],
        "D3D12_AUTO_BREADCRUMB_OP_DISPATCH"
    );
    assert_eq!(node["outstanding_ops"][1]["context"], "GBuffer");
    assert_eq!(json["warnings"].as_array().map(Vec::len), Some(0));
}

#[test]
fn test_human_to_file() {
    let dump = write_minidump("dred-human.dmp");
    let report = test_output("dred-human.txt");
    let address = format!("{:#x}", D3D12CORE_BASE + DRED_RVA);
    let output = run(&[
        "--address",
        &address,
        "--types-in",
        "d3d12core",
        "--output-file",
        report.to_str().unwrap(),
        dump.to_str().unwrap(),
    ]);

    assert!(output.status.success());
    assert!(output.stdout.is_empty());

    let report = std::fs::read_to_string(report).unwrap();
    assert!(report.starts_with("D3D12_VERSIONED_DEVICE_REMOVED_EXTENDED_DATA\n"));
    assert!(report.contains("D3D12_AUTO_BREADCRUMB_NODE[0]"));
    assert!(report.contains("\"Frame 42\""));
    assert!(report.contains("\"GBuffer\""));
    assert!(!report.contains("Warnings"));
}

#[test]
fn test_payload_not_found() {
    let dump = write_minidump("dred-missing.dmp");
    let output = run(&[dump.to_str().unwrap()]);

    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(!output.status.success());
    assert!(stderr.contains("D3D12DeviceRemovedExtendedData not found"));
}

#[test]
fn test_module_not_loaded() {
    let dump = write_minidump("dred-no-module.dmp");
    let output = run(&["--symbol", "d3d12.dll=0x1000", dump.to_str().unwrap()]);

    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(!output.status.success());
    assert!(stderr.contains("module d3d12.dll is not loaded"));
}

#[test]
fn test_bad_symbol_argument() {
    let output = run(&["--symbol", "d3d12core", "whatever.dmp"]);

    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(!output.status.success());
    assert!(stderr.contains("expected MODULE=RVA"));
}
