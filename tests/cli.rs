// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Keylime Authors

//! Integration tests for the elcheckctl command line.
//!
//! The passing scenarios build a small but complete binary event log:
//! Secure Boot enabled under an approved platform key, shim approved by
//! digest, and one allowed kernel, command line, and initrd.

#![allow(deprecated)] // cargo_bin deprecation — replacement API not yet stable

use assert_cmd::Command;
use elcheckctl::eventlog::EventLog;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

const ALG_SHA256: u16 = 0x000B;
const EV_POST_CODE: u32 = 0x0000_0001;
const EV_SEPARATOR: u32 = 0x0000_0004;
const EV_S_CRTM_VERSION: u32 = 0x0000_0008;
const EV_IPL: u32 = 0x0000_000D;
const EV_EFI_VARIABLE_DRIVER_CONFIG: u32 = 0x8000_0001;
const EV_EFI_BOOT_SERVICES_APPLICATION: u32 = 0x8000_0003;

// EFI_GLOBAL_VARIABLE and EFI_CERT_X509_GUID in on-disk byte order.
const GLOBAL_GUID_LE: [u8; 16] = [
    0x61, 0xdf, 0xe4, 0x8b, 0xca, 0x93, 0xd2, 0x11, 0xaa, 0x0d, 0x00,
    0xe0, 0x98, 0x03, 0x2b, 0x8c,
];
const X509_GUID_LE: [u8; 16] = [
    0xa1, 0x59, 0xc0, 0xa5, 0xe4, 0x94, 0xa7, 0x4a, 0x87, 0xb5, 0xab,
    0x15, 0x5c, 0x2b, 0xf0, 0x72,
];

fn spec_id_event() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(b"Spec ID Event03\0");
    body.extend_from_slice(&0u32.to_le_bytes()); // platform class
    body.push(0); // minor
    body.push(2); // major
    body.push(0); // errata
    body.push(2); // uintn size
    body.extend_from_slice(&1u32.to_le_bytes()); // one algorithm
    body.extend_from_slice(&ALG_SHA256.to_le_bytes());
    body.extend_from_slice(&32u16.to_le_bytes());
    body.push(0); // vendor info size

    let mut out = Vec::new();
    out.extend_from_slice(&0u32.to_le_bytes()); // PCR 0
    out.extend_from_slice(&3u32.to_le_bytes()); // EV_NO_ACTION
    out.extend_from_slice(&[0u8; 20]); // legacy sha1 digest
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

fn event(pcr: u32, event_type: u32, digest: &[u8; 32], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&pcr.to_le_bytes());
    out.extend_from_slice(&event_type.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&ALG_SHA256.to_le_bytes());
    out.extend_from_slice(digest);
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    out
}

fn variable_event(guid_le: &[u8; 16], name: &str, data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(guid_le);
    buf.extend_from_slice(&(name.len() as u64).to_le_bytes());
    buf.extend_from_slice(&(data.len() as u64).to_le_bytes());
    for c in name.encode_utf16() {
        buf.extend_from_slice(&c.to_le_bytes());
    }
    buf.extend_from_slice(data);
    buf
}

fn signature_list(owner_le: &[u8; 16], key: &[u8]) -> Vec<u8> {
    let signature_size = 16 + key.len() as u32;
    let mut buf = Vec::new();
    buf.extend_from_slice(&X509_GUID_LE);
    buf.extend_from_slice(&(28 + signature_size).to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&signature_size.to_le_bytes());
    buf.extend_from_slice(owner_le);
    buf.extend_from_slice(key);
    buf
}

fn good_log() -> Vec<u8> {
    let mut log = spec_id_event();
    log.extend(event(0, EV_S_CRTM_VERSION, &[0x01; 32], b"1.0"));
    log.extend(event(0, EV_POST_CODE, &[0x02; 32], b"POST CODE"));
    log.extend(event(7, EV_SEPARATOR, &[0x03; 32], &[0, 0, 0, 0]));
    log.extend(event(
        7,
        EV_EFI_VARIABLE_DRIVER_CONFIG,
        &[0x04; 32],
        &variable_event(&GLOBAL_GUID_LE, "SecureBoot", &[1]),
    ));
    log.extend(event(
        7,
        EV_EFI_VARIABLE_DRIVER_CONFIG,
        &[0x05; 32],
        &variable_event(
            &GLOBAL_GUID_LE,
            "PK",
            &signature_list(&GLOBAL_GUID_LE, &[0xAA, 0xBB, 0xCC]),
        ),
    ));
    log.extend(event(
        4,
        EV_EFI_BOOT_SERVICES_APPLICATION,
        &[0x07; 32],
        b"shim",
    ));
    log.extend(event(
        4,
        EV_EFI_BOOT_SERVICES_APPLICATION,
        &[0x08; 32],
        b"kernel",
    ));
    log.extend(event(
        8,
        EV_IPL,
        &[0x09; 32],
        b"kernel_cmdline: root=/dev/vda1 ro quiet",
    ));
    log.extend(event(9, EV_IPL, &[0x0A; 32], b"/vmlinuz-6.1.0"));
    log.extend(event(9, EV_IPL, &[0x0B; 32], b"/initrd.img-6.1.0"));
    log.extend(event(14, EV_IPL, &[0x0C; 32], b"MokList"));
    log
}

fn good_params() -> Value {
    json!({
        "s_crtm": [{"sha256": hex::encode([0x01; 32])}],
        "post_code": [{"sha256": hex::encode([0x02; 32])}],
        "pk": [{
            "owner": "8be4df61-93ca-11d2-aa0d-00e098032b8c",
            "data": "aabbcc",
        }],
        "kek": [],
        "db": [],
        "device_drivers": [],
        "shim": [{"sha256": hex::encode([0x07; 32])}],
        "grub": [],
        "moklist": [{"sha256": hex::encode([0x0C; 32])}],
        "runs": [{
            "kernel": {
                "name": "/vmlinuz-6.1.0",
                "digest": {"sha256": hex::encode([0x08; 32])},
            },
            "kernel_cmdline": "root=/dev/vda1 ro quiet",
            "initrd": "/initrd.img-6.1.0",
        }],
    })
}

/// Quoted PCR contents matching what replaying the log yields.
fn matching_quote(log_bytes: &[u8]) -> Value {
    let log = EventLog::from_bytes(log_bytes).unwrap(); //#[allow_ci]
    let mut banks = serde_json::Map::new();
    for (algorithm, bank) in log.replay_pcrs().unwrap() {
        //#[allow_ci]
        let mut by_index = serde_json::Map::new();
        for (index, value) in bank {
            by_index.insert(index.to_string(), Value::String(value));
        }
        banks.insert(algorithm, Value::Object(by_index));
    }
    Value::Object(banks)
}

fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap(); //#[allow_ci]
    path
}

fn elcheckctl() -> Command {
    Command::cargo_bin("elcheckctl").unwrap() //#[allow_ci]
}

#[test]
fn accept_all_accepts_bogus_everything() {
    let tmpdir = tempfile::tempdir().unwrap(); //#[allow_ci]
    let params = write_file(tmpdir.path(), "params.json", b"not json");
    let pcrs = write_file(tmpdir.path(), "pcrs.json", b"also not json");
    let log = write_file(tmpdir.path(), "log.bin", b"garbage");
    elcheckctl()
        .arg("accept-all")
        .args([&params, &pcrs, &log])
        .assert()
        .success()
        .stdout(predicate::str::contains("AOK"));
}

#[test]
fn nextgen2_accepts_a_good_boot() {
    let tmpdir = tempfile::tempdir().unwrap(); //#[allow_ci]
    let log_bytes = good_log();
    let quote = matching_quote(&log_bytes);
    let params = write_file(
        tmpdir.path(),
        "params.json",
        good_params().to_string().as_bytes(),
    );
    let pcrs = write_file(
        tmpdir.path(),
        "pcrs.json",
        quote.to_string().as_bytes(),
    );
    let log = write_file(tmpdir.path(), "log.bin", &log_bytes);
    elcheckctl()
        .arg("nextgen2")
        .args([&params, &pcrs, &log])
        .assert()
        .success()
        .stdout(predicate::str::contains("AOK"));
}

#[test]
fn nextgen2_rejects_mismatched_pcrs() {
    let tmpdir = tempfile::tempdir().unwrap(); //#[allow_ci]
    let log_bytes = good_log();
    let mut quote = matching_quote(&log_bytes);
    quote["sha256"]["7"] = json!(hex::encode([0xFF; 32]));
    let params = write_file(
        tmpdir.path(),
        "params.json",
        good_params().to_string().as_bytes(),
    );
    let pcrs = write_file(
        tmpdir.path(),
        "pcrs.json",
        quote.to_string().as_bytes(),
    );
    let log = write_file(tmpdir.path(), "log.bin", &log_bytes);
    elcheckctl()
        .arg("nextgen2")
        .args([&params, &pcrs, &log])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("pcrs sha256 7 is not"));
}

#[test]
fn ignore_pcrs_never_reads_the_quote() {
    let tmpdir = tempfile::tempdir().unwrap(); //#[allow_ci]
    let params = write_file(
        tmpdir.path(),
        "params.json",
        good_params().to_string().as_bytes(),
    );
    let pcrs =
        write_file(tmpdir.path(), "pcrs.json", b"bogus pcr content");
    let log = write_file(tmpdir.path(), "log.bin", &good_log());
    elcheckctl()
        .arg("nextgen2-ignore-pcrs")
        .args([&params, &pcrs, &log])
        .assert()
        .success()
        .stdout(predicate::str::contains("AOK"));
}

#[test]
fn ignore_pcrs_works_without_a_quote_file() {
    let tmpdir = tempfile::tempdir().unwrap(); //#[allow_ci]
    let params = write_file(
        tmpdir.path(),
        "params.json",
        good_params().to_string().as_bytes(),
    );
    let log = write_file(tmpdir.path(), "log.bin", &good_log());
    elcheckctl()
        .arg("nextgen2-ignore-pcrs")
        .args([&params, &log])
        .assert()
        .success()
        .stdout(predicate::str::contains("AOK"));
}

#[test]
fn rejection_explains_the_event() {
    let tmpdir = tempfile::tempdir().unwrap(); //#[allow_ci]
    let mut log_bytes = good_log();
    // POST code in PCR 3 is not a combination the policy knows.
    log_bytes.extend(event(3, EV_POST_CODE, &[0x0D; 32], b"stray"));
    let params = write_file(
        tmpdir.path(),
        "params.json",
        good_params().to_string().as_bytes(),
    );
    let log = write_file(tmpdir.path(), "log.bin", &log_bytes);
    elcheckctl()
        .arg("nextgen2-ignore-pcrs")
        .args([&params, &log])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("has unexpected"));
}

#[test]
fn garbage_eventlog_is_a_parse_error() {
    let tmpdir = tempfile::tempdir().unwrap(); //#[allow_ci]
    let params = write_file(
        tmpdir.path(),
        "params.json",
        good_params().to_string().as_bytes(),
    );
    let log = write_file(tmpdir.path(), "log.bin", b"garbage");
    elcheckctl()
        .arg("nextgen2-ignore-pcrs")
        .args([&params, &log])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Event log parser error"));
}

#[test]
fn unknown_policy_is_rejected() {
    let tmpdir = tempfile::tempdir().unwrap(); //#[allow_ci]
    let params = write_file(tmpdir.path(), "params.json", b"{}");
    let log = write_file(tmpdir.path(), "log.bin", b"");
    elcheckctl()
        .arg("no-such-policy")
        .args([&params, &log])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("there is no policy named"));
}

#[test]
fn too_few_arguments_is_a_usage_error() {
    let tmpdir = tempfile::tempdir().unwrap(); //#[allow_ci]
    let params = write_file(tmpdir.path(), "params.json", b"{}");
    elcheckctl()
        .arg("accept-all")
        .arg(&params)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_names_the_policies() {
    elcheckctl()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("accept-all"))
        .stdout(predicate::str::contains("nextgen2"));
}
