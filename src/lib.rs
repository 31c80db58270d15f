// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Keylime Authors

//! Boot event-log checking for Keylime intended state.
//!
//! Parses binary TCG 2.0 event logs ([`eventlog`]), decodes the per-event
//! payloads into a JSON form ([`enrich`]), and evaluates that form against
//! a named policy ([`policies`]) built from a small combinator library of
//! checks ([`checks`]).

pub mod checks;
pub mod enrich;
pub mod error;
pub mod eventlog;
pub mod pcrs;
pub mod policies;
