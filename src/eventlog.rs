// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Keylime Authors

//! Parser for the crypto-agile TCG PC Client event log format.
//!
//! The log opens with a legacy-header `TCG_EfiSpecIdEvent` that names the
//! digest algorithms in use; every following event uses the
//! `TCG_PCR_EVENT2` layout. Besides the raw events, the parser replays the
//! digest extensions to obtain the PCR contents the log implies.

use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use openssl::hash::{hash, MessageDigest};
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};

const EV_NO_ACTION: u32 = 0x0000_0003;

// TPM_ALG_ID values for the digest algorithms a log can carry.
const TPM_ALG_SHA1: u16 = 0x0004;
const TPM_ALG_SHA256: u16 = 0x000B;
const TPM_ALG_SHA384: u16 = 0x000C;
const TPM_ALG_SHA512: u16 = 0x000D;

/// Number of PCRs in a bank.
pub const PCR_COUNT: u32 = 24;

/// One digest carried by an event.
#[derive(Debug, Clone)]
pub struct EventDigest {
    /// Algorithm name, e.g. "sha256".
    pub algorithm: String,
    /// Raw digest bytes.
    pub value: Vec<u8>,
}

/// A single measurement event parsed from the log.
#[derive(Debug, Clone)]
pub struct LogEvent {
    /// PCR index the event extends.
    pub pcr_index: u32,
    /// TCG event type name, e.g. "EV_IPL".
    pub event_type: String,
    /// Digests in log order.
    pub digests: Vec<EventDigest>,
    /// Raw event data describing what was measured.
    pub event_data: Vec<u8>,
}

/// A parsed binary event log.
#[derive(Debug)]
pub struct EventLog {
    /// Measurement events, excluding the spec-id header event.
    pub events: Vec<LogEvent>,
    /// Digest algorithms active in this log.
    pub active_algorithms: Vec<String>,
}

impl EventLog {
    pub fn from_bytes(log_bytes: &[u8]) -> Result<Self> {
        Self::parse(log_bytes).map_err(|e| match e {
            Error::Io(io)
                if io.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                Error::EventLog("truncated event log".to_string())
            }
            other => other,
        })
    }

    fn parse(log_bytes: &[u8]) -> Result<Self> {
        if log_bytes.is_empty() {
            return Err(Error::EventLog("empty event log".to_string()));
        }

        let mut cursor = Cursor::new(log_bytes);

        // The first event is the TCG_EfiSpecIdEvent in the legacy
        // TCG_PCR_EVENT format: it must extend PCR 0 with EV_NO_ACTION.
        let pcr_index_0 = cursor.read_u32::<LittleEndian>()?;
        let event_type_0 = cursor.read_u32::<LittleEndian>()?;
        if pcr_index_0 != 0 || event_type_0 != EV_NO_ACTION {
            return Err(Error::EventLog(
                "first event is not a valid TCG_EfiSpecIdEvent".to_string(),
            ));
        }

        // Legacy header carries a fixed 20-byte SHA-1 digest field.
        let mut legacy_digest = [0u8; 20];
        cursor.read_exact(&mut legacy_digest)?;

        let spec_id_size = cursor.read_u32::<LittleEndian>()?;
        let mut spec_id_data = vec![0u8; spec_id_size as usize];
        cursor.read_exact(&mut spec_id_data)?;

        let (alg_sizes, active_algorithms) =
            parse_spec_id_event(&spec_id_data)?;

        let mut events = Vec::new();
        while cursor.position() < log_bytes.len() as u64 {
            let pcr_index = cursor.read_u32::<LittleEndian>()?;
            let event_type_val = cursor.read_u32::<LittleEndian>()?;

            let digest_count = cursor.read_u32::<LittleEndian>()?;
            let mut digests = Vec::new();
            for _ in 0..digest_count {
                let alg_id = cursor.read_u16::<LittleEndian>()?;
                let size = match alg_sizes.get(&alg_id) {
                    Some(size) => *size,
                    None => known_digest_size(alg_id),
                };
                if size == 0 {
                    return Err(Error::EventLog(format!(
                        "digest with unknown algorithm id {alg_id:#06x}"
                    )));
                }
                let mut value = vec![0u8; size];
                cursor.read_exact(&mut value)?;
                if alg_sizes.contains_key(&alg_id) {
                    digests.push(EventDigest {
                        algorithm: algorithm_name(alg_id).to_string(),
                        value,
                    });
                }
            }

            let event_data_size = cursor.read_u32::<LittleEndian>()?;
            let mut event_data = vec![0u8; event_data_size as usize];
            cursor.read_exact(&mut event_data)?;

            events.push(LogEvent {
                pcr_index,
                event_type: event_type_name(event_type_val).to_string(),
                digests,
                event_data,
            });
        }

        Ok(EventLog {
            events,
            active_algorithms,
        })
    }

    /// Replays the digest extensions and returns the implied PCR
    /// contents: algorithm name to PCR index to hex value.
    ///
    /// Every PCR starts at all zeroes; each event except `EV_NO_ACTION`
    /// extends its PCR with `pcr = H(pcr || digest)`.
    pub fn replay_pcrs(
        &self,
    ) -> Result<BTreeMap<String, BTreeMap<u32, String>>> {
        let mut banks: HashMap<String, Vec<Vec<u8>>> = HashMap::new();
        for algorithm in &self.active_algorithms {
            let size = digest_size_by_name(algorithm).ok_or_else(|| {
                Error::EventLog(format!(
                    "cannot replay unknown algorithm {algorithm}"
                ))
            })?;
            banks.insert(
                algorithm.clone(),
                vec![vec![0u8; size]; PCR_COUNT as usize],
            );
        }

        for event in &self.events {
            if event.event_type == "EV_NO_ACTION" {
                continue;
            }
            if event.pcr_index >= PCR_COUNT {
                return Err(Error::EventLog(format!(
                    "event extends out-of-range PCR {}",
                    event.pcr_index
                )));
            }
            for digest in &event.digests {
                let Some(bank) = banks.get_mut(&digest.algorithm) else {
                    continue;
                };
                let md = message_digest(&digest.algorithm).ok_or_else(
                    || {
                        Error::EventLog(format!(
                            "cannot replay unknown algorithm {}",
                            digest.algorithm
                        ))
                    },
                )?;
                let pcr = &mut bank[event.pcr_index as usize];
                let mut buf =
                    Vec::with_capacity(pcr.len() + digest.value.len());
                buf.extend_from_slice(pcr);
                buf.extend_from_slice(&digest.value);
                *pcr = hash(md, &buf)?.to_vec();
            }
        }

        let mut out = BTreeMap::new();
        for (algorithm, bank) in banks {
            let mut pcrs = BTreeMap::new();
            for (index, value) in bank.iter().enumerate() {
                let _ = pcrs.insert(index as u32, hex::encode(value));
            }
            let _ = out.insert(algorithm, pcrs);
        }
        Ok(out)
    }
}

/// Extracts (algorithm id -> digest size) and the ordered algorithm names
/// from a TCG_EfiSpecIdEventStruct body.
fn parse_spec_id_event(
    data: &[u8],
) -> Result<(HashMap<u16, usize>, Vec<String>)> {
    let mut cursor = Cursor::new(data);

    let mut signature = [0u8; 16];
    cursor.read_exact(&mut signature)?;
    let _platform_class = cursor.read_u32::<LittleEndian>()?;
    let _spec_version_minor = cursor.read_u8()?;
    let _spec_version_major = cursor.read_u8()?;
    let _spec_errata = cursor.read_u8()?;
    let _uintn_size = cursor.read_u8()?;

    let number_of_algs = cursor.read_u32::<LittleEndian>()?;
    let mut sizes = HashMap::new();
    let mut names = Vec::new();
    for _ in 0..number_of_algs {
        let alg_id = cursor.read_u16::<LittleEndian>()?;
        let digest_size = cursor.read_u16::<LittleEndian>()?;
        let name = algorithm_name(alg_id);
        if name != "unknown" {
            let _ = sizes.insert(alg_id, digest_size as usize);
            names.push(name.to_string());
        }
    }
    if names.is_empty() {
        return Err(Error::EventLog(
            "spec-id event names no usable digest algorithm".to_string(),
        ));
    }
    Ok((sizes, names))
}

fn known_digest_size(alg_id: u16) -> usize {
    match alg_id {
        TPM_ALG_SHA1 => 20,
        TPM_ALG_SHA256 => 32,
        TPM_ALG_SHA384 => 48,
        TPM_ALG_SHA512 => 64,
        _ => 0,
    }
}

fn digest_size_by_name(algorithm: &str) -> Option<usize> {
    match algorithm {
        "sha1" => Some(20),
        "sha256" => Some(32),
        "sha384" => Some(48),
        "sha512" => Some(64),
        _ => None,
    }
}

fn message_digest(algorithm: &str) -> Option<MessageDigest> {
    match algorithm {
        "sha1" => Some(MessageDigest::sha1()),
        "sha256" => Some(MessageDigest::sha256()),
        "sha384" => Some(MessageDigest::sha384()),
        "sha512" => Some(MessageDigest::sha512()),
        _ => None,
    }
}

fn algorithm_name(alg_id: u16) -> &'static str {
    match alg_id {
        TPM_ALG_SHA1 => "sha1",
        TPM_ALG_SHA256 => "sha256",
        TPM_ALG_SHA384 => "sha384",
        TPM_ALG_SHA512 => "sha512",
        _ => "unknown",
    }
}

fn event_type_name(event_type: u32) -> &'static str {
    match event_type {
        0x0000_0000 => "EV_PREBOOT_CERT",
        0x0000_0001 => "EV_POST_CODE",
        0x0000_0002 => "EV_UNUSED",
        0x0000_0003 => "EV_NO_ACTION",
        0x0000_0004 => "EV_SEPARATOR",
        0x0000_0005 => "EV_ACTION",
        0x0000_0006 => "EV_EVENT_TAG",
        0x0000_0007 => "EV_S_CRTM_CONTENTS",
        0x0000_0008 => "EV_S_CRTM_VERSION",
        0x0000_0009 => "EV_CPU_MICROCODE",
        0x0000_000A => "EV_PLATFORM_CONFIG_FLAGS",
        0x0000_000B => "EV_TABLE_OF_DEVICES",
        0x0000_000C => "EV_COMPACT_HASH",
        0x0000_000D => "EV_IPL",
        0x0000_000E => "EV_IPL_PARTITION_DATA",
        0x0000_000F => "EV_NONHOST_CODE",
        0x0000_0010 => "EV_NONHOST_CONFIG",
        0x0000_0011 => "EV_NONHOST_INFO",
        0x0000_0012 => "EV_OMIT_BOOT_DEVICE_EVENTS",
        0x8000_0001 => "EV_EFI_VARIABLE_DRIVER_CONFIG",
        0x8000_0002 => "EV_EFI_VARIABLE_BOOT",
        0x8000_0003 => "EV_EFI_BOOT_SERVICES_APPLICATION",
        0x8000_0004 => "EV_EFI_BOOT_SERVICES_DRIVER",
        0x8000_0005 => "EV_EFI_RUNTIME_SERVICES_DRIVER",
        0x8000_0006 => "EV_EFI_GPT_EVENT",
        0x8000_0007 => "EV_EFI_ACTION",
        0x8000_0008 => "EV_EFI_PLATFORM_FIRMWARE_BLOB",
        0x8000_0009 => "EV_EFI_HANDOFF_TABLES",
        0x8000_000A => "EV_EFI_HCRTM_EVENT",
        _ => "EV_UNKNOWN_TYPE",
    }
}
