// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Keylime Authors

//! The policy that approves unconditionally.

use super::Policy;
use crate::checks::{AcceptAll, BoxedCheck};
use crate::error::Result;
use crate::pcrs::PcrContents;
use serde_json::Value;

/// Approves any inputs without reading them.
pub struct AcceptAllPolicy;

impl Policy for AcceptAllPolicy {
    fn requires_params(&self) -> bool {
        false
    }

    fn requires_eventlog(&self) -> bool {
        false
    }

    fn compile(
        &self,
        _params: &Value,
        _pcrs: Option<&PcrContents>,
    ) -> Result<BoxedCheck> {
        Ok(Box::new(AcceptAll))
    }
}
