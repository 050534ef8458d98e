//! Hot-reload classification.
//!
//! A declarative table maps config-patch paths to `hot` or
//! `restart_required`; the reload routine walks the patch and produces
//! `{applied, rejected}` from the table. Hot sections are merged into
//! the live config; everything else needs a restart.

use serde::Serialize;
use serde_json::Value;

use drost_domain::config::Config;
use drost_domain::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchClass {
    Hot,
    RestartRequired,
}

/// Sections that may be applied without a restart.
const HOT_PATHS: &[&str] = &[
    "health",
    "control_api",
    "observability",
    "providers.startup_probe",
    "restart_policy",
    "tools.shell",
    "providers.routes",
    "orchestration",
];

pub fn classify(path: &str) -> PatchClass {
    if HOT_PATHS.contains(&path) {
        PatchClass::Hot
    } else {
        PatchClass::RestartRequired
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedPatch {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadReport {
    pub ok: bool,
    pub applied: Vec<String>,
    pub rejected: Vec<RejectedPatch>,
    pub restart_required: bool,
}

/// Split a patch object into classification paths. `providers` and
/// `tools` are classified per sub-key since they mix hot and cold
/// sections.
fn split_patch(patch: &Value) -> Result<Vec<(String, String, Value)>> {
    let obj = patch
        .as_object()
        .ok_or_else(|| Error::InvalidRequest("config patch must be an object".into()))?;

    let mut parts = Vec::new();
    for (key, value) in obj {
        match (key.as_str(), value.as_object()) {
            ("providers", Some(sub)) | ("tools", Some(sub)) => {
                for (sub_key, sub_value) in sub {
                    parts.push((
                        format!("{key}.{sub_key}"),
                        key.clone(),
                        Value::Object(
                            std::iter::once((sub_key.clone(), sub_value.clone())).collect(),
                        ),
                    ));
                }
            }
            _ => parts.push((key.clone(), key.clone(), value.clone())),
        }
    }
    Ok(parts)
}

/// Apply a patch to a config copy, returning the updated config and the
/// classification report. The caller swaps the config and rebinds any
/// servers whose sections changed.
pub fn apply_patch(current: &Config, patch: &Value) -> Result<(Config, ReloadReport)> {
    let parts = split_patch(patch)?;

    let mut config_value = serde_json::to_value(current)?;
    let mut applied = Vec::new();
    let mut rejected = Vec::new();

    for (path, top_key, fragment) in parts {
        match classify(&path) {
            PatchClass::RestartRequired => rejected.push(RejectedPatch {
                path,
                reason: "restart_required".into(),
            }),
            PatchClass::Hot => {
                merge_into(&mut config_value, &top_key, &fragment);
                applied.push(path);
            }
        }
    }

    let updated: Config = serde_json::from_value(config_value)
        .map_err(|e| Error::InvalidRequest(format!("patch does not deserialize: {e}")))?;

    let report = ReloadReport {
        ok: rejected.is_empty(),
        restart_required: !rejected.is_empty(),
        applied,
        rejected,
    };
    Ok((updated, report))
}

/// Shallow-merge `fragment` into `target[key]` (one level of nesting is
/// enough for section-shaped patches).
fn merge_into(target: &mut Value, key: &str, fragment: &Value) {
    let Some(root) = target.as_object_mut() else {
        return;
    };
    match (root.get_mut(key), fragment.as_object()) {
        (Some(Value::Object(existing)), Some(patch)) => {
            for (k, v) in patch {
                match (existing.get_mut(k), v.as_object()) {
                    (Some(Value::Object(nested)), Some(nested_patch)) => {
                        for (nk, nv) in nested_patch {
                            nested.insert(nk.clone(), nv.clone());
                        }
                    }
                    _ => {
                        existing.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        _ => {
            root.insert(key.to_owned(), fragment.clone());
        }
    }
}
