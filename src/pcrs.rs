// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Keylime Authors

//! Quoted PCR contents supplied next to the event log.
//!
//! The JSON shape maps digest name to a map from PCR index (a decimal
//! string) to the PCR value in hex, e.g.
//! `{"sha256": {"0": "6ea4...", "7": "65ca..."}}`.

use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct PcrContents {
    banks: BTreeMap<String, BTreeMap<String, String>>,
}

impl PcrContents {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let contents: PcrContents = serde_json::from_str(&text)?;
        contents.normalized()
    }

    /// Validates indices and hex values, lowercasing the latter so the
    /// comparison with replayed contents is case-insensitive.
    fn normalized(self) -> Result<Self> {
        let mut banks = BTreeMap::new();
        for (algorithm, bank) in self.banks {
            let mut normalized = BTreeMap::new();
            for (index, value) in bank {
                if index.parse::<u32>().is_err() {
                    return Err(Error::Pcr(format!(
                        "PCR index {index:?} in {algorithm} is not a \
                         decimal number"
                    )));
                }
                let value = value.to_lowercase();
                if hex::decode(&value).is_err() {
                    return Err(Error::Pcr(format!(
                        "PCR {index} value in {algorithm} is not hex"
                    )));
                }
                let _ = normalized.insert(index, value);
            }
            let _ = banks.insert(algorithm, normalized);
        }
        Ok(PcrContents { banks })
    }

    /// Digest algorithm names with quoted banks, in sorted order.
    pub fn algorithms(&self) -> Vec<String> {
        self.banks.keys().cloned().collect()
    }

    /// The JSON view the checks compare against.
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        for (algorithm, bank) in &self.banks {
            let mut by_index = Map::new();
            for (index, value) in bank {
                let _ = by_index
                    .insert(index.clone(), Value::String(value.clone()));
            }
            let _ = out.insert(algorithm.clone(), Value::Object(by_index));
        }
        Value::Object(out)
    }
}
