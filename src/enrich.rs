// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Keylime Authors

//! Decodes raw event payloads into the JSON form the checks examine.
//!
//! Layouts follow the UEFI specification 2.8: UEFI_VARIABLE_DATA for the
//! EFI variable events, EFI_SIGNATURE_LIST chains for the Secure Boot key
//! databases, EFI_LOAD_OPTION for `Boot####`, and UEFI_GPT_DATA for GPT
//! events. Device paths are kept as hex rather than pretty-printed.

use crate::error::{Error, Result};
use crate::eventlog::{EventLog, LogEvent};
use byteorder::{LittleEndian, ReadBytesExt};
use serde_json::{json, Map, Value};
use std::io::{Cursor, Read};
use uuid::Uuid;

/// Produce the enriched JSON view of a parsed log:
/// `{"pcrs": {alg: {index: hex}}, "events": [...]}`.
pub fn enrich_log(log: &EventLog) -> Result<Value> {
    let mut pcrs = Map::new();
    for (algorithm, bank) in log.replay_pcrs()? {
        let mut by_index = Map::new();
        for (index, value) in bank {
            let _ = by_index.insert(index.to_string(), Value::String(value));
        }
        let _ = pcrs.insert(algorithm, Value::Object(by_index));
    }

    let mut events = Vec::with_capacity(log.events.len());
    for event in &log.events {
        events.push(enrich_event(event)?);
    }

    Ok(json!({ "pcrs": pcrs, "events": events }))
}

fn enrich_event(event: &LogEvent) -> Result<Value> {
    let digests: Vec<Value> = event
        .digests
        .iter()
        .map(|d| {
            json!({
                "AlgorithmId": &d.algorithm,
                "Digest": hex::encode(&d.value),
            })
        })
        .collect();

    Ok(json!({
        "PCRIndex": event.pcr_index,
        "EventType": &event.event_type,
        "Digests": digests,
        "Event": decode_event_data(event)?,
    }))
}

fn decode_event_data(event: &LogEvent) -> Result<Value> {
    match event.event_type.as_str() {
        "EV_EFI_VARIABLE_DRIVER_CONFIG" => {
            let var = EfiVariable::parse(&event.event_data)?;
            let data = match var.unicode_name.as_str() {
                "PK" | "KEK" | "db" | "dbx" => {
                    signature_lists(&var.variable_data)?
                }
                "SecureBoot" => secure_boot_state(&var.variable_data)?,
                _ => Value::String(hex::encode(&var.variable_data)),
            };
            Ok(var.into_value(data))
        }
        "EV_EFI_VARIABLE_BOOT" => {
            let var = EfiVariable::parse(&event.event_data)?;
            let data = if var.unicode_name == "BootOrder" {
                boot_order(&var.variable_data)?
            } else if is_boot_entry_name(&var.unicode_name) {
                load_option(&var.variable_data)?
            } else {
                Value::String(hex::encode(&var.variable_data))
            };
            Ok(var.into_value(data))
        }
        "EV_EFI_VARIABLE_AUTHORITY" => {
            let var = EfiVariable::parse(&event.event_data)?;
            let data = signature_data(&var.variable_data)?;
            Ok(var.into_value(data))
        }
        "EV_IPL" => {
            let text = match ipl_string(&event.event_data) {
                Some(text) => text,
                None => hex::encode(&event.event_data),
            };
            Ok(json!({ "String": text }))
        }
        "EV_EFI_GPT_EVENT" => partition_table(&event.event_data),
        _ => Ok(Value::String(hex::encode(&event.event_data))),
    }
}

/// UEFI_VARIABLE_DATA: namespace GUID, UTF-16LE name, raw data.
struct EfiVariable {
    variable_name: String,
    unicode_name: String,
    variable_data: Vec<u8>,
}

impl EfiVariable {
    fn parse(event_data: &[u8]) -> Result<Self> {
        // GUID(16) + UnicodeNameLength(8) + VariableDataLength(8)
        if event_data.len() < 32 {
            return Err(Error::EventData(
                "variable event shorter than its fixed header".to_string(),
            ));
        }
        let variable_name = guid_string(&event_data[..16])?;

        let mut cursor = Cursor::new(&event_data[16..32]);
        let name_len = cursor.read_u64::<LittleEndian>()? as usize;
        let data_len = cursor.read_u64::<LittleEndian>()? as usize;

        let name_end = 32 + name_len * 2;
        let data_end = name_end + data_len;
        if event_data.len() < data_end {
            return Err(Error::EventData(format!(
                "variable event claims {data_len} data bytes but only {} remain",
                event_data.len().saturating_sub(name_end)
            )));
        }

        let unicode_name = utf16le_string(&event_data[32..name_end])
            .ok_or_else(|| {
                Error::EventData(
                    "variable name is not valid UTF-16".to_string(),
                )
            })?;

        Ok(EfiVariable {
            variable_name,
            unicode_name,
            variable_data: event_data[name_end..data_end].to_vec(),
        })
    }

    fn into_value(self, variable_data: Value) -> Value {
        json!({
            "VariableName": self.variable_name,
            "UnicodeName": self.unicode_name,
            "VariableData": variable_data,
        })
    }
}

/// Chain of EFI_SIGNATURE_LIST structures (PK, KEK, db, dbx contents).
fn signature_lists(data: &[u8]) -> Result<Value> {
    let mut lists = Vec::new();
    let mut start = 0usize;

    while start < data.len() {
        if data.len() - start < 28 {
            return Err(Error::EventData(
                "truncated EFI_SIGNATURE_LIST header".to_string(),
            ));
        }
        let signature_type = guid_string(&data[start..start + 16])?;
        let mut cursor = Cursor::new(&data[start + 16..start + 28]);
        let list_size = cursor.read_u32::<LittleEndian>()? as usize;
        let header_size = cursor.read_u32::<LittleEndian>()? as usize;
        let signature_size = cursor.read_u32::<LittleEndian>()? as usize;

        if list_size < 28 + header_size || start + list_size > data.len() {
            return Err(Error::EventData(format!(
                "EFI_SIGNATURE_LIST size {list_size} does not fit its data"
            )));
        }
        let sigs_len = list_size - 28 - header_size;
        if signature_size < 16 || sigs_len % signature_size != 0 {
            return Err(Error::EventData(format!(
                "signature area of {sigs_len} bytes is not a multiple of \
                 signature size {signature_size}"
            )));
        }

        let mut keys = Vec::new();
        let mut offset = start + 28 + header_size;
        for _ in 0..sigs_len / signature_size {
            keys.push(signature_data(
                &data[offset..offset + signature_size],
            )?);
            offset += signature_size;
        }

        lists.push(json!({
            "SignatureType": signature_type,
            "SignatureListSize": list_size,
            "SignatureHeaderSize": header_size,
            "SignatureSize": signature_size,
            "Keys": keys,
        }));
        start += list_size;
    }

    Ok(Value::Array(lists))
}

/// One EFI_SIGNATURE_DATA entry: owner GUID plus opaque key material.
fn signature_data(data: &[u8]) -> Result<Value> {
    if data.len() < 16 {
        return Err(Error::EventData(
            "signature entry shorter than its owner GUID".to_string(),
        ));
    }
    Ok(json!({
        "SignatureOwner": guid_string(&data[..16])?,
        "SignatureData": hex::encode(&data[16..]),
    }))
}

fn secure_boot_state(data: &[u8]) -> Result<Value> {
    match data {
        [] | [0] => Ok(json!({ "Enabled": "No" })),
        [_] => Ok(json!({ "Enabled": "Yes" })),
        _ => Err(Error::EventData(format!(
            "SecureBoot variable has {} bytes instead of one",
            data.len()
        ))),
    }
}

fn boot_order(data: &[u8]) -> Result<Value> {
    if data.len() % 2 != 0 {
        return Err(Error::EventData(format!(
            "BootOrder length {} is odd",
            data.len()
        )));
    }
    let entries: Vec<Value> = data
        .chunks_exact(2)
        .map(|chunk| {
            let id = u16::from_le_bytes([chunk[0], chunk[1]]);
            Value::String(format!("Boot{id:04x}"))
        })
        .collect();
    Ok(Value::Array(entries))
}

fn is_boot_entry_name(name: &str) -> bool {
    name.len() == 8
        && name.starts_with("Boot")
        && name[4..].chars().all(|c| c.is_ascii_hexdigit())
}

/// EFI_LOAD_OPTION for a `Boot####` variable.
fn load_option(data: &[u8]) -> Result<Value> {
    let mut cursor = Cursor::new(data);
    let attributes = cursor.read_u32::<LittleEndian>()?;
    let file_path_list_length = cursor.read_u16::<LittleEndian>()?;

    // Description is a null-terminated UTF-16LE string.
    let mut units = Vec::new();
    loop {
        let unit = cursor.read_u16::<LittleEndian>()?;
        if unit == 0 {
            break;
        }
        units.push(unit);
    }
    let description = String::from_utf16(&units).map_err(|_| {
        Error::EventData(
            "load option description is not valid UTF-16".to_string(),
        )
    })?;

    let device_path = &data[cursor.position() as usize..];
    Ok(json!({
        "Enabled": if attributes & 1 == 1 { "Yes" } else { "No" },
        "FilePathListLength": file_path_list_length,
        "Description": description,
        "DevicePath": hex::encode(device_path),
    }))
}

/// UEFI_GPT_DATA: partition table header plus the measured entries.
fn partition_table(data: &[u8]) -> Result<Value> {
    let mut cursor = Cursor::new(data);

    let mut signature = [0u8; 8];
    cursor.read_exact(&mut signature)?;
    let revision = cursor.read_u32::<LittleEndian>()?;
    let header_size = cursor.read_u32::<LittleEndian>()?;
    let header_crc = cursor.read_u32::<LittleEndian>()?;
    let _reserved = cursor.read_u32::<LittleEndian>()?;
    let my_lba = cursor.read_u64::<LittleEndian>()?;
    let alternate_lba = cursor.read_u64::<LittleEndian>()?;
    let first_usable_lba = cursor.read_u64::<LittleEndian>()?;
    let last_usable_lba = cursor.read_u64::<LittleEndian>()?;
    let mut disk_guid = [0u8; 16];
    cursor.read_exact(&mut disk_guid)?;
    let partition_entry_lba = cursor.read_u64::<LittleEndian>()?;
    let number_of_partition_entries = cursor.read_u32::<LittleEndian>()?;
    let size_of_partition_entry = cursor.read_u32::<LittleEndian>()?;
    let partition_entry_array_crc = cursor.read_u32::<LittleEndian>()?;

    let header = json!({
        "Signature": String::from_utf8_lossy(&signature).into_owned(),
        "Revision": revision,
        "HeaderSize": header_size,
        "HeaderCRC32": header_crc,
        "MyLBA": my_lba,
        "AlternateLBA": alternate_lba,
        "FirstUsableLBA": first_usable_lba,
        "LastUsableLBA": last_usable_lba,
        "DiskGuid": guid_string(&disk_guid)?,
        "PartitionEntryLBA": partition_entry_lba,
        "NumberOfPartitionEntries": number_of_partition_entries,
        "SizeOfPartitionEntry": size_of_partition_entry,
        "PartitionEntryArrayCRC": partition_entry_array_crc,
    });

    let number_of_partitions = cursor.read_u64::<LittleEndian>()?;
    let mut partitions = Vec::new();
    for _ in 0..number_of_partitions {
        let mut type_guid = [0u8; 16];
        cursor.read_exact(&mut type_guid)?;
        let mut unique_guid = [0u8; 16];
        cursor.read_exact(&mut unique_guid)?;
        let starting_lba = cursor.read_u64::<LittleEndian>()?;
        let ending_lba = cursor.read_u64::<LittleEndian>()?;
        let attributes = cursor.read_u64::<LittleEndian>()?;
        let mut name_buf = [0u8; 72];
        cursor.read_exact(&mut name_buf)?;
        let name = utf16le_string(&name_buf).unwrap_or_default();

        partitions.push(json!({
            "PartitionTypeGUID": guid_string(&type_guid)?,
            "UniquePartitionGUID": guid_string(&unique_guid)?,
            "StartingLBA": starting_lba,
            "EndingLBA": ending_lba,
            "Attributes": attributes,
            "PartitionName": name,
        }));
    }

    Ok(json!({
        "Header": header,
        "NumberOfPartitions": number_of_partitions,
        "Partitions": partitions,
    }))
}

/// Decode EV_IPL event data: UTF-8 first, then UTF-16LE.
fn ipl_string(event_data: &[u8]) -> Option<String> {
    if event_data.is_empty() {
        return None;
    }
    if let Ok(s) = std::str::from_utf8(event_data) {
        let trimmed = s.trim_end_matches('\0');
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }
    if event_data.len() % 2 == 0 {
        if let Some(s) = utf16le_string(event_data) {
            if !s.is_empty() {
                return Some(s);
            }
        }
    }
    None
}

/// Decode UTF-16LE bytes, dropping any trailing null padding.
fn utf16le_string(bytes: &[u8]) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();
    String::from_utf16(&units)
        .ok()
        .map(|s| s.trim_end_matches('\0').to_string())
}

/// Canonical text for an EFI GUID stored in mixed-endian byte order.
fn guid_string(bytes: &[u8]) -> Result<String> {
    let arr: [u8; 16] = bytes.try_into().map_err(|_| {
        Error::EventData(format!("GUID needs 16 bytes, got {}", bytes.len()))
    })?;
    Ok(Uuid::from_bytes_le(arr).to_string())
}
