// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Keylime Authors

//! Combinator library for examining JSON values.
//!
//! A [`Check`] either approves a value or explains the reason why not:
//! `why_not` returns the empty string for a pass and, for a failure, an
//! English phrase that forms a sentence when placed after a noun phrase.
//! Checks communicate through a shared [`Globals`] map, which lets one
//! event stash values that a later check examines.

use crate::error::{Error, Result};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;

/// Variables shared among the checks of one evaluation pass.
pub type Globals = HashMap<String, Value>;

pub trait Check {
    /// Examine the value; empty string means pass, anything else is the
    /// reason for rejection.
    fn why_not(&self, globals: &mut Globals, subject: &Value) -> String;
}

pub type BoxedCheck = Box<dyn Check>;

/// Every value passes.
pub struct AcceptAll;

impl Check for AcceptAll {
    fn why_not(&self, _globals: &mut Globals, _subject: &Value) -> String {
        String::new()
    }
}

/// No value passes.
pub struct RejectAll {
    why: String,
}

impl RejectAll {
    pub fn new(why: &str) -> Self {
        RejectAll {
            why: why.to_string(),
        }
    }
}

impl Check for RejectAll {
    fn why_not(&self, _globals: &mut Globals, _subject: &Value) -> String {
        self.why.clone()
    }
}

/// Conjunction; runs in series and stops at the first failure.
pub struct AllOf {
    checks: Vec<BoxedCheck>,
}

impl AllOf {
    pub fn new(checks: Vec<BoxedCheck>) -> Self {
        AllOf { checks }
    }
}

impl Check for AllOf {
    fn why_not(&self, globals: &mut Globals, subject: &Value) -> String {
        for check in &self.checks {
            let reason = check.why_not(globals, subject);
            if !reason.is_empty() {
                return reason;
            }
        }
        String::new()
    }
}

/// Disjunction; runs in series and stops at the first pass.
pub struct AnyOf {
    checks: Vec<BoxedCheck>,
}

impl AnyOf {
    pub fn new(checks: Vec<BoxedCheck>) -> Self {
        AnyOf { checks }
    }
}

impl Check for AnyOf {
    fn why_not(&self, globals: &mut Globals, subject: &Value) -> String {
        if self.checks.is_empty() {
            return "does not pass empty disjunction".to_string();
        }
        let mut reasons = Vec::new();
        for check in &self.checks {
            let reason = check.why_not(globals, subject);
            if reason.is_empty() {
                return String::new();
            }
            reasons.push(reason);
        }
        format!("[{}]", reasons.join(", "))
    }
}

/// Applies a specific check for each tuple of key field values.
pub struct Dispatcher {
    key_names: Vec<String>,
    checks: HashMap<Vec<String>, BoxedCheck>,
}

impl Dispatcher {
    pub fn new(key_names: &[&str]) -> Self {
        Dispatcher {
            key_names: key_names.iter().map(|s| s.to_string()).collect(),
            checks: HashMap::new(),
        }
    }

    /// Register the check for a tuple of key values.
    pub fn set(&mut self, key_vals: &[&str], check: BoxedCheck) -> Result<()> {
        if key_vals.len() != self.key_names.len() {
            return Err(Error::Policy(format!(
                "{key_vals:?} does not match length of {:?}",
                self.key_names
            )));
        }
        let key: Vec<String> =
            key_vals.iter().map(|s| s.to_string()).collect();
        if self.checks.contains_key(&key) {
            return Err(Error::Policy(format!(
                "multiple checks for {key:?}"
            )));
        }
        let _ = self.checks.insert(key, check);
        Ok(())
    }
}

/// Renders a JSON value the way dispatch keys are written: strings
/// verbatim, everything else in JSON text form.
fn key_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Check for Dispatcher {
    fn why_not(&self, globals: &mut Globals, subject: &Value) -> String {
        let Value::Object(map) = subject else {
            return "is not a map".to_string();
        };
        let mut key_vals = Vec::with_capacity(self.key_names.len());
        for key_name in &self.key_names {
            match map.get(key_name) {
                Some(value) => key_vals.push(key_of(value)),
                None => return format!("has no {key_name}"),
            }
        }
        match self.checks.get(&key_vals) {
            Some(check) => check.why_not(globals, subject),
            None => format!(
                "has unexpected {:?} combination {key_vals:?}",
                self.key_names
            ),
        }
    }
}

/// Applies a check to one named field.
pub struct FieldCheck {
    field_name: String,
    field_check: BoxedCheck,
    show_name: bool,
}

impl FieldCheck {
    pub fn new(field_name: &str, field_check: BoxedCheck) -> Self {
        FieldCheck {
            field_name: field_name.to_string(),
            field_check,
            show_name: true,
        }
    }

    /// Like [`FieldCheck::new`] but failures do not name the field.
    pub fn unnamed(field_name: &str, field_check: BoxedCheck) -> Self {
        FieldCheck {
            field_name: field_name.to_string(),
            field_check,
            show_name: false,
        }
    }
}

impl Check for FieldCheck {
    fn why_not(&self, globals: &mut Globals, subject: &Value) -> String {
        let Value::Object(map) = subject else {
            return "is not a map".to_string();
        };
        let Some(field) = map.get(&self.field_name) else {
            return format!("has no {} field", self.field_name);
        };
        let reason = self.field_check.why_not(globals, field);
        if !reason.is_empty() && self.show_name {
            return format!("{} {reason}", self.field_name);
        }
        reason
    }
}

/// Conjunction of [`FieldCheck`]s over several fields.
pub struct FieldsCheck {
    inner: AllOf,
}

impl FieldsCheck {
    pub fn new(fields: Vec<(&str, BoxedCheck)>) -> Self {
        let checks = fields
            .into_iter()
            .map(|(name, check)| {
                Box::new(FieldCheck::new(name, check)) as BoxedCheck
            })
            .collect();
        FieldsCheck {
            inner: AllOf::new(checks),
        }
    }
}

impl Check for FieldsCheck {
    fn why_not(&self, globals: &mut Globals, subject: &Value) -> String {
        self.inner.why_not(globals, subject)
    }
}

/// Applies a check to every member of a list.
pub struct Iterate {
    elem_check: BoxedCheck,
    show_elem: bool,
}

impl Iterate {
    pub fn new(elem_check: BoxedCheck) -> Self {
        Iterate {
            elem_check,
            show_elem: false,
        }
    }

    /// Failures quote the offending element instead of its index.
    pub fn showing_elem(elem_check: BoxedCheck) -> Self {
        Iterate {
            elem_check,
            show_elem: true,
        }
    }
}

impl Check for Iterate {
    fn why_not(&self, globals: &mut Globals, subject: &Value) -> String {
        let Value::Array(elems) = subject else {
            return "is not a list".to_string();
        };
        for (idx, elem) in elems.iter().enumerate() {
            let reason = self.elem_check.why_not(globals, elem);
            if reason.is_empty() {
                continue;
            }
            if self.show_elem {
                return format!("{elem} {reason}");
            }
            return format!("[{idx}] {reason}");
        }
        String::new()
    }
}

/// Applies one check per position; the list must have matching length.
pub struct TupleCheck {
    checks: Vec<BoxedCheck>,
}

impl TupleCheck {
    pub fn new(checks: Vec<BoxedCheck>) -> Self {
        TupleCheck { checks }
    }
}

impl Check for TupleCheck {
    fn why_not(&self, globals: &mut Globals, subject: &Value) -> String {
        let Value::Array(elems) = subject else {
            return "is not a list".to_string();
        };
        if elems.len() != self.checks.len() {
            return format!(
                "has length {} instead of {}",
                elems.len(),
                self.checks.len()
            );
        }
        for (idx, (check, elem)) in
            self.checks.iter().zip(elems).enumerate()
        {
            let reason = check.why_not(globals, elem);
            if !reason.is_empty() {
                return format!("[{idx}] {reason}");
            }
        }
        String::new()
    }
}

/// Stashes the subject into a global list for later examination.
pub struct DelayedField {
    field_name: String,
}

impl Check for DelayedField {
    fn why_not(&self, globals: &mut Globals, subject: &Value) -> String {
        match globals.get_mut(&self.field_name) {
            Some(Value::Array(values)) => {
                values.push(subject.clone());
                String::new()
            }
            _ => format!(
                "malformed check: global {} is not a list",
                self.field_name
            ),
        }
    }
}

/// Accepts the subject and resets the globals a [`DelayToFields`] uses.
pub struct DelayInitializer {
    field_names: Vec<String>,
}

impl Check for DelayInitializer {
    fn why_not(&self, globals: &mut Globals, _subject: &Value) -> String {
        for field_name in &self.field_names {
            let _ = globals
                .insert(field_name.clone(), Value::Array(Vec::new()));
        }
        String::new()
    }
}

/// A check to apply after stashing fields with [`DelayedField`].
///
/// For each named field it accumulates a list of values in a
/// correspondingly-named global. As a check it ignores the given subject
/// and instead applies the configured fields check to the record of
/// accumulated lists.
pub struct DelayToFields {
    field_names: Vec<String>,
    fields_check: BoxedCheck,
}

impl DelayToFields {
    pub fn new(fields_check: BoxedCheck, field_names: &[&str]) -> Self {
        DelayToFields {
            field_names: field_names
                .iter()
                .map(|s| s.to_string())
                .collect(),
            fields_check,
        }
    }

    /// A check that accepts anything and initializes the globals for a
    /// new pass over the data.
    pub fn initializer(&self) -> DelayInitializer {
        DelayInitializer {
            field_names: self.field_names.clone(),
        }
    }

    /// A check that appends its subject to the named stash.
    pub fn stash(&self, field_name: &str) -> Result<DelayedField> {
        if !self.field_names.iter().any(|n| n == field_name) {
            return Err(Error::Policy(format!(
                "{field_name} not in {:?}",
                self.field_names
            )));
        }
        Ok(DelayedField {
            field_name: field_name.to_string(),
        })
    }
}

impl Check for DelayToFields {
    fn why_not(&self, globals: &mut Globals, _subject: &Value) -> String {
        let mut delayed = serde_json::Map::new();
        for field_name in &self.field_names {
            let _ = delayed.insert(
                field_name.clone(),
                globals.get(field_name).cloned().unwrap_or(Value::Null),
            );
        }
        self.fields_check
            .why_not(globals, &Value::Object(delayed))
    }
}

/// Compares with a given integer.
pub struct IntEqual {
    expected: i64,
}

impl IntEqual {
    pub fn new(expected: i64) -> Self {
        IntEqual { expected }
    }
}

impl Check for IntEqual {
    fn why_not(&self, _globals: &mut Globals, subject: &Value) -> String {
        match subject.as_i64() {
            None => "is not an int".to_string(),
            Some(value) if value == self.expected => String::new(),
            Some(_) => format!("is not {}", self.expected),
        }
    }
}

/// Compares with a given string.
pub struct StringEqual {
    expected: String,
}

impl StringEqual {
    pub fn new(expected: &str) -> Self {
        StringEqual {
            expected: expected.to_string(),
        }
    }
}

impl Check for StringEqual {
    fn why_not(&self, _globals: &mut Globals, subject: &Value) -> String {
        match subject.as_str() {
            None => "is not a string".to_string(),
            Some(value) if value == self.expected => String::new(),
            Some(_) => format!("is not {:?}", self.expected),
        }
    }
}

/// Full match against a regular expression.
pub struct RegExp {
    pattern: String,
    regexp: Regex,
}

impl RegExp {
    pub fn new(pattern: &str) -> Result<Self> {
        // Anchor so only a full match passes.
        let regexp = Regex::new(&format!("^(?:{pattern})$"))?;
        Ok(RegExp {
            pattern: pattern.to_string(),
            regexp,
        })
    }
}

impl Check for RegExp {
    fn why_not(&self, _globals: &mut Globals, subject: &Value) -> String {
        match subject.as_str() {
            None => "is not a string".to_string(),
            Some(value) if self.regexp.is_match(value) => String::new(),
            Some(_) => format!("does not match {}", self.pattern),
        }
    }
}

/// Approves an event whose digest appears in a list of good ones, or
/// that passes an optional fallback check.
pub struct DigestCheck {
    // algorithm name -> set of approved hex digests
    good_digests: BTreeMap<String, BTreeSet<String>>,
    or_else: Option<BoxedCheck>,
}

impl DigestCheck {
    pub fn new(good_digests_list: &[BTreeMap<String, String>]) -> Self {
        let mut good_digests: BTreeMap<String, BTreeSet<String>> =
            BTreeMap::new();
        for good in good_digests_list {
            for (algorithm, digest) in good {
                let _ = good_digests
                    .entry(algorithm.clone())
                    .or_default()
                    .insert(digest.clone());
            }
        }
        DigestCheck {
            good_digests,
            or_else: None,
        }
    }

    pub fn with_or_else(
        good_digests_list: &[BTreeMap<String, String>],
        or_else: BoxedCheck,
    ) -> Self {
        let mut check = DigestCheck::new(good_digests_list);
        check.or_else = Some(or_else);
        check
    }

    fn approved_digests(&self) -> String {
        let mut out = String::from("{");
        for (idx, (algorithm, digests)) in
            self.good_digests.iter().enumerate()
        {
            if idx > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{algorithm}: {digests:?}");
        }
        out.push('}');
        out
    }
}

impl Check for DigestCheck {
    fn why_not(&self, globals: &mut Globals, subject: &Value) -> String {
        let Value::Object(map) = subject else {
            return "is not a map".to_string();
        };
        let Some(digest_list) = map.get("Digests") else {
            return "has no Digests".to_string();
        };
        let Value::Array(digest_list) = digest_list else {
            return "Digests is not a list".to_string();
        };
        for (idx, subject_digest) in digest_list.iter().enumerate() {
            let Value::Object(subject_digest) = subject_digest else {
                return format!(
                    "Digests[{idx}] is {subject_digest}, not a map"
                );
            };
            let Some(algorithm) = subject_digest.get("AlgorithmId")
            else {
                return format!("digest {idx} has no AlgorithmId");
            };
            let Some(algorithm) = algorithm.as_str() else {
                return format!(
                    "Digests[{idx}].AlgorithmId is {algorithm}, not a string"
                );
            };
            let Some(digest) = subject_digest.get("Digest") else {
                return format!("digest {idx} has no Digest");
            };
            let Some(digest) = digest.as_str() else {
                return format!(
                    "Digests[{idx}].Digest is {digest}, not a string"
                );
            };
            if let Some(good) = self.good_digests.get(algorithm) {
                if good.contains(digest) {
                    return String::new();
                }
            }
        }
        let Some(or_else) = &self.or_else else {
            return format!(
                "has no digest approved by {}",
                self.approved_digests()
            );
        };
        let reason = or_else.why_not(globals, subject);
        if reason.is_empty() {
            return String::new();
        }
        format!(
            "{reason} and has no digest approved by {}",
            self.approved_digests()
        )
    }
}

/// How a [`VariableCheck`] matches the variable's unicode name.
pub enum UnicodeName {
    Literal(String),
    Pattern(RegExp),
}

/// Checks that a given EFI variable event has data passing a check.
pub struct VariableCheck {
    variable_name: String,
    unicode_name: UnicodeName,
    data_check: BoxedCheck,
}

impl VariableCheck {
    pub fn new(
        variable_name: &str,
        unicode_name: UnicodeName,
        data_check: BoxedCheck,
    ) -> Self {
        VariableCheck {
            variable_name: variable_name.to_string(),
            unicode_name,
            data_check,
        }
    }
}

impl Check for VariableCheck {
    fn why_not(&self, globals: &mut Globals, subject: &Value) -> String {
        let Value::Object(map) = subject else {
            return "is not a map".to_string();
        };
        let Some(evt) = map.get("Event") else {
            return "has no Event field".to_string();
        };
        let Value::Object(evt) = evt else {
            return "Event is not a map".to_string();
        };
        let Some(variable_name) = evt.get("VariableName") else {
            return "Event has no VariableName field".to_string();
        };
        if variable_name.as_str() != Some(&self.variable_name) {
            return format!(
                "Event.VariableName is {variable_name} rather than {}",
                self.variable_name
            );
        }
        let Some(unicode_name) = evt.get("UnicodeName") else {
            return "Event has no UnicodeName field".to_string();
        };
        let Some(variable_data) = evt.get("VariableData") else {
            return "Event has no VariableData field".to_string();
        };
        let Some(unicode_name) = unicode_name.as_str() else {
            return "Event.UnicodeName is not a string".to_string();
        };
        match &self.unicode_name {
            UnicodeName::Literal(expected) => {
                if unicode_name != expected {
                    return format!(
                        "Event.UnicodeName is {unicode_name} rather than \
                         {expected}"
                    );
                }
            }
            UnicodeName::Pattern(pattern) => {
                if !pattern.regexp.is_match(unicode_name) {
                    return format!(
                        "Event.UnicodeName, {unicode_name}, does not \
                         match {}",
                        pattern.pattern
                    );
                }
            }
        }
        self.data_check.why_not(globals, variable_data)
    }
}

/// Dispatches on `(VariableName, UnicodeName)` of the decoded event.
pub struct VariableDispatch {
    dispatch: Dispatcher,
}

impl VariableDispatch {
    pub fn new() -> Self {
        VariableDispatch {
            dispatch: Dispatcher::new(&["VariableName", "UnicodeName"]),
        }
    }

    /// Register the check applied to one variable's `VariableData`.
    pub fn set(
        &mut self,
        variable_name: &str,
        unicode_name: &str,
        data_check: BoxedCheck,
    ) -> Result<()> {
        self.dispatch.set(
            &[variable_name, unicode_name],
            Box::new(FieldCheck::new("VariableData", data_check)),
        )
    }
}

impl Default for VariableDispatch {
    fn default() -> Self {
        VariableDispatch::new()
    }
}

impl Check for VariableDispatch {
    fn why_not(&self, globals: &mut Globals, subject: &Value) -> String {
        let Value::Object(map) = subject else {
            return "is not a map".to_string();
        };
        let Some(evt) = map.get("Event") else {
            return "has no Event field".to_string();
        };
        let reason = self.dispatch.why_not(globals, evt);
        if reason.is_empty() {
            return reason;
        }
        format!("Event {reason}")
    }
}

/// Compares to one signature entry by owner GUID and key material.
pub fn signature_check(owner: &str, data: &str) -> AllOf {
    AllOf::new(vec![
        Box::new(FieldCheck::new(
            "SignatureOwner",
            Box::new(StringEqual::new(owner)),
        )),
        Box::new(FieldCheck::new(
            "SignatureData",
            Box::new(StringEqual::new(data)),
        )),
    ])
}

/// Membership in a list of (owner, data) signatures.
pub fn signature_set_member(sigs: &[(String, String)]) -> AnyOf {
    AnyOf::new(
        sigs.iter()
            .map(|(owner, data)| {
                Box::new(signature_check(owner, data)) as BoxedCheck
            })
            .collect(),
    )
}

/// Every signature list carries the given type and only approved keys.
pub fn key_subset(sig_type: &str, keys: &[(String, String)]) -> Iterate {
    Iterate::new(Box::new(AllOf::new(vec![
        Box::new(FieldCheck::new(
            "SignatureType",
            Box::new(StringEqual::new(sig_type)),
        )),
        Box::new(FieldCheck::new(
            "Keys",
            Box::new(Iterate::new(Box::new(signature_set_member(keys)))),
        )),
    ])))
}

/// Checks that the PCR contents the log implies equal the quoted ones.
///
/// `care` maps digest name to the PCR indices that matter; `got_pcrs` is
/// the quoted contents, digest name to index (as decimal string) to hex
/// value. A quote missing a cared-about entry is an error rather than a
/// mere rejection.
pub fn pcr_compare(
    care: &BTreeMap<String, Vec<u32>>,
    got_pcrs: &Value,
) -> Result<FieldCheck> {
    let Value::Object(got_pcrs) = got_pcrs else {
        return Err(Error::Pcr("quoted contents are not a map".to_string()));
    };
    let mut digest_checks: Vec<BoxedCheck> = Vec::new();
    for (hash_name, pcr_indices) in care {
        let Some(Value::Object(got_by_index)) = got_pcrs.get(hash_name)
        else {
            return Err(Error::Pcr(format!("no {hash_name} hashes")));
        };
        let mut index_checks: Vec<BoxedCheck> = Vec::new();
        for index in pcr_indices {
            let index_s = index.to_string();
            let Some(got_val) = got_by_index.get(&index_s) else {
                return Err(Error::Pcr(format!(
                    "PCR {index} got no {hash_name}"
                )));
            };
            let Some(got_val) = got_val.as_str() else {
                return Err(Error::Pcr(format!(
                    "PCR {index} digest {hash_name} is not a string"
                )));
            };
            index_checks.push(Box::new(FieldCheck::new(
                &index_s,
                Box::new(StringEqual::new(&got_val.to_lowercase())),
            )));
        }
        digest_checks.push(Box::new(FieldCheck::new(
            hash_name,
            Box::new(AllOf::new(index_checks)),
        )));
    }
    Ok(FieldCheck::new(
        "pcrs",
        Box::new(AllOf::new(digest_checks)),
    ))
}
