// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Keylime Authors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Event log parser error: {0}")]
    EventLog(String),
    #[error("Event data error: {0}")]
    EventData(String),
    #[error("Policy error: {0}")]
    Policy(String),
    #[error("Quoted PCR contents error: {0}")]
    Pcr(String),
    #[error("the event log {0}")]
    Rejected(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization/deserialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
    #[error("Crypto error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),
}

pub type Result<T> = std::result::Result<T, Error>;
