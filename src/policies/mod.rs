// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Keylime Authors

//! Named policies and the verification driver.
//!
//! A [`Policy`] compiles its parameters into a [`Check`] to apply to the
//! enriched event log. The driver reads only the input files a policy
//! declares it needs, so a policy that ignores quoted PCR contents never
//! parses (or even opens) the PCR file it was given.

mod accept_all;
mod nextgen2;

use crate::checks::{BoxedCheck, Globals};
use crate::enrich;
use crate::error::{Error, Result};
use crate::eventlog::EventLog;
use crate::pcrs::PcrContents;
use log::{debug, info};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// The policy names `get` understands.
pub const POLICY_NAMES: &[&str] =
    &["accept-all", "nextgen2", "nextgen2-ignore-pcrs"];

pub trait Policy {
    /// Whether the parameter file is read and parsed.
    fn requires_params(&self) -> bool {
        true
    }

    /// Whether quoted PCR contents are read and parsed.
    fn requires_pcrs(&self) -> bool {
        false
    }

    /// Whether the binary event log is read and parsed.
    fn requires_eventlog(&self) -> bool {
        true
    }

    /// Compile the parameters into the check to apply to the enriched
    /// log. `pcrs` is present exactly when `requires_pcrs` says so.
    fn compile(
        &self,
        params: &Value,
        pcrs: Option<&PcrContents>,
    ) -> Result<BoxedCheck>;
}

/// Look up a policy by name.
pub fn get(name: &str) -> Result<Box<dyn Policy>> {
    match name {
        "accept-all" => Ok(Box::new(accept_all::AcceptAllPolicy)),
        "nextgen2" => Ok(Box::new(nextgen2::NextGen2::new(false))),
        "nextgen2-ignore-pcrs" => {
            Ok(Box::new(nextgen2::NextGen2::new(true)))
        }
        _ => Err(Error::Policy(format!(
            "there is no policy named {name:?}"
        ))),
    }
}

/// One verification: a policy name plus the input file paths.
#[derive(Debug)]
pub struct VerifyRequest<'a> {
    pub policy_name: &'a str,
    pub params: &'a Path,
    pub pcrs: Option<&'a Path>,
    pub eventlog: &'a Path,
}

/// Apply the named policy to the given inputs.
///
/// Returns `Ok(())` when the policy approves; a rejection surfaces as
/// [`Error::Rejected`] carrying the reason.
pub fn verify(request: &VerifyRequest) -> Result<()> {
    let policy = get(request.policy_name)?;

    let params = if policy.requires_params() {
        let text = fs::read_to_string(request.params)?;
        serde_json::from_str(&text)?
    } else {
        debug!("policy {} takes no parameters", request.policy_name);
        Value::Null
    };

    let pcrs = if policy.requires_pcrs() {
        let path = request.pcrs.ok_or_else(|| {
            Error::Pcr(format!(
                "policy {} needs quoted PCR contents",
                request.policy_name
            ))
        })?;
        Some(PcrContents::from_file(path)?)
    } else {
        None
    };

    let check = policy.compile(&params, pcrs.as_ref())?;
    debug!("compiled policy {}", request.policy_name);

    if !policy.requires_eventlog() {
        debug!(
            "policy {} ignores the event log",
            request.policy_name
        );
        return Ok(());
    }

    let log_bytes = fs::read(request.eventlog)?;
    let log = EventLog::from_bytes(&log_bytes)?;
    info!(
        "parsed {} events with algorithms {:?}",
        log.events.len(),
        log.active_algorithms
    );
    let enriched = enrich::enrich_log(&log)?;

    let mut globals = Globals::new();
    let reason = check.why_not(&mut globals, &enriched);
    if reason.is_empty() {
        Ok(())
    } else {
        Err(Error::Rejected(reason))
    }
}
