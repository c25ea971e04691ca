//! JSON-schema bracketing around codec conversions.
//!
//! Schemas are referenced by path from the profiles document, compiled once
//! at initialize, and applied at three phases: the inbound payload, the
//! canonical request, and the converted client response. Validation of the
//! client response intentionally runs after conversion; the canonical
//! intermediate is allowed to violate the client-facing schema.

use std::path::Path;

use jsonschema::Validator;
use serde_json::Value;

use switchboard_core::error::{Result, SwitchboardError};

use crate::profile::ConversionProfile;

/// Compiled validators for the three enforced phases of one profile.
/// The document format also accepts canonicalResponseSchema and
/// providerResponseSchema references; those are not validated at runtime.
#[derive(Default)]
pub struct ProfileSchemas {
    pub input: Option<Validator>,
    pub canonical_request: Option<Validator>,
    pub client_response: Option<Validator>,
}

impl ProfileSchemas {
    /// Load and compile the schemas the profile references. Relative paths
    /// resolve against the profiles document's directory.
    pub fn load(profile: &ConversionProfile, base_dir: &Path) -> Result<Self> {
        Ok(Self {
            input: compile(profile.input_schema.as_deref(), base_dir, &profile.id)?,
            canonical_request: compile(
                profile.canonical_request_schema.as_deref(),
                base_dir,
                &profile.id,
            )?,
            client_response: compile(
                profile.client_response_schema.as_deref(),
                base_dir,
                &profile.id,
            )?,
        })
    }
}

fn compile(path: Option<&str>, base_dir: &Path, profile_id: &str) -> Result<Option<Validator>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let resolved = resolve_path(path, base_dir);
    let raw = std::fs::read_to_string(&resolved).map_err(|e| {
        SwitchboardError::Config(format!(
            "profile '{profile_id}': cannot read schema {}: {e}",
            resolved.display()
        ))
    })?;
    let schema: Value = serde_json::from_str(&raw).map_err(|e| {
        SwitchboardError::Config(format!(
            "profile '{profile_id}': schema {} is not valid JSON: {e}",
            resolved.display()
        ))
    })?;
    let validator = jsonschema::validator_for(&schema).map_err(|e| {
        SwitchboardError::Config(format!(
            "profile '{profile_id}': schema {} failed to compile: {e}",
            resolved.display()
        ))
    })?;
    Ok(Some(validator))
}

/// Absolute paths are honored as-is; everything else joins the base dir.
pub fn resolve_path(path: &str, base_dir: &Path) -> std::path::PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

/// Validate `payload`, labeling failures with `<profile>:<phase>` so clients
/// can tell which side of the conversion was malformed.
pub fn validate(
    validator: Option<&Validator>,
    payload: &Value,
    profile_id: &str,
    phase: &str,
) -> Result<()> {
    let Some(validator) = validator else {
        return Ok(());
    };
    if let Some(error) = validator.iter_errors(payload).next() {
        return Err(SwitchboardError::SchemaValidation {
            phase: format!("{profile_id}:{phase}"),
            message: error.to_string(),
        });
    }
    Ok(())
}
