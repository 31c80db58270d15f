// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Keylime Authors

//! The `nextgen2` policy.
//!
//! It aims to establish that an allowed combination of kernel, kernel
//! command line, and initrd was booted, that all the PK, KEK, db, and
//! MoK keys are allowed ones, and that all the code loaded during boot
//! is allowed.
//!
//! The parameters carry these entries:
//! - `s_crtm`: allowed digests for PCR 0 `EV_S_CRTM_VERSION`
//! - `post_code`: allowed digests for PCR 0 `EV_POST_CODE`
//! - `pk`, `kek`, `db`: allowed keys for the Secure Boot databases
//! - `device_drivers`: allowed digests for firmware from devices
//!   (PCR 2 `EV_EFI_BOOT_SERVICES_DRIVER`)
//! - `shim`, `grub`: allowed digests for PCR 4
//!   `EV_EFI_BOOT_SERVICES_APPLICATION`
//! - `moklist`: allowed digests of the MoK list (PCR 14 `EV_IPL`)
//! - `runs`: allowed boots, each
//!   `{kernel: {name, digest}, kernel_cmdline: regex, initrd}`
//!
//! A digest is a map from hash algorithm name to hex value; a key is
//! `{owner: GUID, data: hex}`.

use super::Policy;
use crate::checks::{
    key_subset, pcr_compare, AcceptAll, AllOf, AnyOf, BoxedCheck,
    DelayToFields, DigestCheck, Dispatcher, FieldCheck, FieldsCheck,
    Iterate, RegExp, StringEqual, TupleCheck, UnicodeName, VariableCheck,
    VariableDispatch,
};
use crate::error::{Error, Result};
use crate::pcrs::PcrContents;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

const EFI_GLOBAL_VARIABLE: &str = "8be4df61-93ca-11d2-aa0d-00e098032b8c";
const EFI_IMAGE_SECURITY_DATABASE: &str =
    "d719b2cb-3d3a-4596-a3bc-dad00e67656f";
const EFI_CERT_X509: &str = "a5c059a1-94e4-4aa7-87b5-ab155c2bf072";

/// PCR indices the boot measurements above extend; these are the ones
/// compared against the quoted contents.
const CHECKED_PCRS: &[u32] = &[0, 1, 2, 4, 7, 8, 9, 14];

/// Map from hash algorithm name to hex value.
type Digest = BTreeMap<String, String>;

#[derive(Debug, Deserialize)]
struct Params {
    s_crtm: Vec<Digest>,
    post_code: Vec<Digest>,
    pk: Vec<Key>,
    kek: Vec<Key>,
    db: Vec<Key>,
    device_drivers: Vec<Digest>,
    shim: Vec<Digest>,
    grub: Vec<Digest>,
    #[serde(default)]
    moklist: Vec<Digest>,
    runs: Vec<Run>,
}

#[derive(Debug, Deserialize)]
struct Key {
    owner: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct Run {
    kernel: Kernel,
    kernel_cmdline: String,
    initrd: String,
}

#[derive(Debug, Deserialize)]
struct Kernel {
    name: String,
    digest: Digest,
}

fn lower_digests(list: Vec<Digest>) -> Vec<Digest> {
    list.into_iter()
        .map(|digest| {
            digest
                .into_iter()
                .map(|(algorithm, hash)| (algorithm, hash.to_lowercase()))
                .collect()
        })
        .collect()
}

fn key_pairs(keys: Vec<Key>) -> Vec<(String, String)> {
    keys.into_iter()
        .map(|key| (key.owner.to_lowercase(), key.data.to_lowercase()))
        .collect()
}

pub struct NextGen2 {
    ignore_pcrs: bool,
}

impl NextGen2 {
    pub fn new(ignore_pcrs: bool) -> Self {
        NextGen2 { ignore_pcrs }
    }
}

impl Policy for NextGen2 {
    fn requires_pcrs(&self) -> bool {
        !self.ignore_pcrs
    }

    fn compile(
        &self,
        params: &Value,
        pcrs: Option<&PcrContents>,
    ) -> Result<BoxedCheck> {
        let params: Params = serde_json::from_value(params.clone())
            .map_err(|e| Error::Policy(format!("bad parameters: {e}")))?;

        let s_crtm = lower_digests(params.s_crtm);
        let post_code = lower_digests(params.post_code);
        let pk = key_pairs(params.pk);
        let kek = key_pairs(params.kek);
        let db = key_pairs(params.db);
        let device_drivers = lower_digests(params.device_drivers);
        let mut shim_grub = lower_digests(params.shim);
        shim_grub.extend(lower_digests(params.grub));
        let moklist = lower_digests(params.moklist);

        // Each allowed run constrains the values stashed while walking
        // the events: the kernel command line, the boot services
        // application that was neither shim nor grub, and the PCR 9 IPL
        // strings naming the kernel and initrd.
        let mut run_checks: Vec<BoxedCheck> = Vec::new();
        for run in &params.runs {
            let kernel = lower_digests(vec![run.kernel.digest.clone()]);
            run_checks.push(Box::new(FieldsCheck::new(vec![
                (
                    "kernel_cmdline",
                    Box::new(TupleCheck::new(vec![Box::new(
                        RegExp::new(&format!(
                            "kernel_cmdline: {}",
                            run.kernel_cmdline
                        ))?,
                    )])) as BoxedCheck,
                ),
                (
                    "bsa",
                    Box::new(TupleCheck::new(vec![Box::new(
                        DigestCheck::new(&kernel),
                    )])),
                ),
                (
                    "ipl9",
                    Box::new(TupleCheck::new(vec![
                        Box::new(StringEqual::new(&run.kernel.name)),
                        Box::new(StringEqual::new(&run.initrd)),
                    ])),
                ),
            ])));
        }
        let delayer = DelayToFields::new(
            Box::new(AnyOf::new(run_checks)),
            &["kernel_cmdline", "bsa", "ipl9"],
        );

        let mut dispatch = Dispatcher::new(&["PCRIndex", "EventType"]);
        dispatch.set(&["0", "EV_NO_ACTION"], Box::new(AcceptAll))?;
        dispatch.set(
            &["0", "EV_S_CRTM_VERSION"],
            Box::new(DigestCheck::new(&s_crtm)),
        )?;
        dispatch.set(
            &["0", "EV_POST_CODE"],
            Box::new(DigestCheck::new(&post_code)),
        )?;

        let mut variables = VariableDispatch::new();
        variables.set(
            EFI_GLOBAL_VARIABLE,
            "SecureBoot",
            Box::new(FieldCheck::new(
                "Enabled",
                Box::new(StringEqual::new("Yes")),
            )),
        )?;
        variables.set(
            EFI_GLOBAL_VARIABLE,
            "PK",
            Box::new(key_subset(EFI_CERT_X509, &pk)),
        )?;
        variables.set(
            EFI_GLOBAL_VARIABLE,
            "KEK",
            Box::new(key_subset(EFI_CERT_X509, &kek)),
        )?;
        variables.set(
            EFI_IMAGE_SECURITY_DATABASE,
            "db",
            Box::new(key_subset(EFI_CERT_X509, &db)),
        )?;
        variables.set(
            EFI_IMAGE_SECURITY_DATABASE,
            "dbx",
            Box::new(AcceptAll),
        )?;
        dispatch.set(
            &["7", "EV_EFI_VARIABLE_DRIVER_CONFIG"],
            Box::new(variables),
        )?;

        for pcr in 0..8u32 {
            let pcr = pcr.to_string();
            dispatch
                .set(&[pcr.as_str(), "EV_SEPARATOR"], Box::new(AcceptAll))?;
        }
        dispatch.set(
            &["2", "EV_EFI_BOOT_SERVICES_DRIVER"],
            Box::new(DigestCheck::new(&device_drivers)),
        )?;
        dispatch.set(
            &["1", "EV_EFI_VARIABLE_BOOT"],
            Box::new(VariableCheck::new(
                EFI_GLOBAL_VARIABLE,
                UnicodeName::Pattern(RegExp::new(
                    "BootOrder|Boot[0-9a-fA-F]+",
                )?),
                Box::new(AcceptAll),
            )),
        )?;
        dispatch.set(
            &["7", "EV_EFI_VARIABLE_AUTHORITY"],
            Box::new(AcceptAll),
        )?;

        // Shim and grub pass by digest; anything else loaded in PCR 4
        // is stashed and must be an allowed run's kernel.
        dispatch.set(
            &["4", "EV_EFI_BOOT_SERVICES_APPLICATION"],
            Box::new(DigestCheck::with_or_else(
                &shim_grub,
                Box::new(delayer.stash("bsa")?),
            )),
        )?;
        dispatch.set(
            &["14", "EV_IPL"],
            Box::new(DigestCheck::new(&moklist)),
        )?;
        dispatch.set(
            &["8", "EV_IPL"],
            Box::new(FieldCheck::new(
                "Event",
                Box::new(FieldCheck::new(
                    "String",
                    Box::new(AnyOf::new(vec![
                        Box::new(RegExp::new("(?s)grub_cmd: .*")?),
                        Box::new(AllOf::new(vec![
                            Box::new(RegExp::new("kernel_cmdline: .*")?),
                            Box::new(delayer.stash("kernel_cmdline")?),
                        ])),
                    ])),
                )),
            )),
        )?;
        dispatch.set(
            &["9", "EV_IPL"],
            Box::new(FieldCheck::new(
                "Event",
                Box::new(FieldCheck::new(
                    "String",
                    Box::new(AnyOf::new(vec![
                        Box::new(RegExp::new(r"\(tftp,.*\).*")?),
                        Box::new(RegExp::new("/boot/grub.*")?),
                        Box::new(delayer.stash("ipl9")?),
                    ])),
                )),
            )),
        )?;

        let events_check = AllOf::new(vec![
            Box::new(delayer.initializer()),
            Box::new(Iterate::showing_elem(Box::new(dispatch))),
            Box::new(delayer),
        ]);
        let events_field =
            FieldCheck::unnamed("events", Box::new(events_check));

        if self.ignore_pcrs {
            return Ok(Box::new(events_field));
        }

        let pcrs = pcrs.ok_or_else(|| {
            Error::Pcr("quoted PCR contents are missing".to_string())
        })?;
        let algorithms = pcrs.algorithms();
        if algorithms.is_empty() {
            return Err(Error::Pcr(
                "quoted contents name no digest algorithms".to_string(),
            ));
        }
        let mut care = BTreeMap::new();
        for algorithm in algorithms {
            let _ = care.insert(algorithm, CHECKED_PCRS.to_vec());
        }
        let pcr_check = pcr_compare(&care, &pcrs.to_value())?;

        Ok(Box::new(AllOf::new(vec![
            Box::new(events_field),
            Box::new(pcr_check),
        ])))
    }
}
