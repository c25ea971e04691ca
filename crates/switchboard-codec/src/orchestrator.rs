//! Profile resolution and conversion bracketing.
//!
//! The orchestrator owns the profile table, picks the codec for each
//! request, validates payloads around conversions, and keeps the sticky
//! `request id → profile` binding that routes a response back through the
//! codec that converted its request.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use switchboard_core::context::ConversionContext;
use switchboard_core::error::{Result, SwitchboardError};

use crate::codecs::{instantiate, Codec};
use crate::coerce::ToolSchemaMap;
use crate::profile::{CodecId, ConversionProfile, ProfileTable};
use crate::schema::{self, ProfileSchemas};

/// Output of either pipeline bracket: the resolved profile plus the
/// converted payload.
#[derive(Debug)]
pub struct Prepared {
    pub profile: ConversionProfile,
    pub payload: Value,
    /// Tool schemas declared by the request; carried so transport-side
    /// conversions can normalize too.
    pub tool_schemas: ToolSchemaMap,
}

struct LoadedTable {
    table: ProfileTable,
    /// Parallel to `table.profiles`.
    schemas: Vec<ProfileSchemas>,
}

struct RequestBinding {
    profile_id: String,
    tool_schemas: Value,
}

pub struct Orchestrator {
    profiles_path: PathBuf,
    base_dir: PathBuf,
    /// Write-once: the profile map and endpoint bindings are immutable after
    /// `initialize`; reads are lock-free.
    loaded: OnceLock<LoadedTable>,
    /// Mutated per request; `remove` gives the atomic get+delete that keeps
    /// a response from racing its own cleanup.
    bindings: DashMap<String, RequestBinding>,
    codecs: DashMap<CodecId, Arc<dyn Codec>>,
}

impl Orchestrator {
    /// `profiles_path` may be absolute (honored as-is) or relative to
    /// `base_dir`.
    pub fn new(profiles_path: impl Into<PathBuf>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            profiles_path: profiles_path.into(),
            base_dir: base_dir.into(),
            loaded: OnceLock::new(),
            bindings: DashMap::new(),
            codecs: DashMap::new(),
        }
    }

    /// Load the profile table and compile schemas. Idempotent: repeat calls
    /// after a successful load are no-ops.
    pub fn initialize(&self) -> Result<()> {
        if self.loaded.get().is_some() {
            return Ok(());
        }

        let path = if self.profiles_path.is_absolute() {
            self.profiles_path.clone()
        } else {
            self.base_dir.join(&self.profiles_path)
        };
        let document = std::fs::read_to_string(&path).map_err(|e| {
            SwitchboardError::Config(format!(
                "cannot read profiles file {}: {e}",
                path.display()
            ))
        })?;
        let table = ProfileTable::parse(&document)?;

        let schema_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let schemas = table
            .profiles
            .iter()
            .map(|p| ProfileSchemas::load(p, &schema_dir))
            .collect::<Result<Vec<_>>>()?;

        info!(
            profiles = table.profiles.len(),
            bindings = table.endpoint_bindings.len(),
            path = %path.display(),
            "conversion profiles loaded"
        );

        // a concurrent initialize may have won the race; either result is
        // the same table
        let _ = self.loaded.set(LoadedTable { table, schemas });
        Ok(())
    }

    fn loaded(&self) -> Result<&LoadedTable> {
        self.loaded
            .get()
            .ok_or_else(|| SwitchboardError::Internal("orchestrator not initialized".into()))
    }

    /// Inbound payload → canonical form, bracketed by schema validation,
    /// with the request binding recorded for the response leg.
    pub fn prepare_incoming(&self, payload: Value, ctx: &ConversionContext) -> Result<Prepared> {
        let loaded = self.loaded()?;
        let (idx, profile) = self.resolve_profile(loaded, ctx)?;
        let schemas = &loaded.schemas[idx];

        schema::validate(schemas.input.as_ref(), &payload, &profile.id, "incoming")?;

        let codec = self.codec_for(profile.codec);
        let converted = codec.convert_request(payload, profile, ctx)?;

        schema::validate(
            schemas.canonical_request.as_ref(),
            &converted.payload,
            &profile.id,
            "canonical-request",
        )?;

        self.bindings.insert(
            ctx.request_id.clone(),
            RequestBinding {
                profile_id: profile.id.clone(),
                tool_schemas: converted.tool_schemas.to_value(),
            },
        );
        debug!(request = %ctx.request_id, profile = %profile.id, codec = codec.name(),
            "request prepared");

        Ok(Prepared {
            profile: profile.clone(),
            payload: converted.payload,
            tool_schemas: converted.tool_schemas,
        })
    }

    /// Upstream payload → client form. Prefers the profile bound to the
    /// request id; the binding is consumed here.
    pub fn prepare_outgoing(&self, payload: Value, ctx: &ConversionContext) -> Result<Prepared> {
        let loaded = self.loaded()?;

        let (idx, profile, tools) = match self.bindings.remove(&ctx.request_id) {
            Some((_, binding)) => {
                let (idx, profile) =
                    self.profile_by_id(loaded, &binding.profile_id)
                        .ok_or_else(|| {
                            SwitchboardError::NoProfile(format!(
                                "bound profile '{}' vanished",
                                binding.profile_id
                            ))
                        })?;
                (idx, profile, ToolSchemaMap::from_value(&binding.tool_schemas))
            }
            None => {
                let (idx, profile) = self.resolve_profile(loaded, ctx)?;
                (idx, profile, ToolSchemaMap::default())
            }
        };

        let codec = self.codec_for(profile.codec);
        let converted = codec.convert_response(payload, profile, ctx, &tools)?;

        // validated after conversion: the canonical intermediate is allowed
        // to violate the client-facing schema
        schema::validate(
            loaded.schemas[idx].client_response.as_ref(),
            &converted,
            &profile.id,
            "client-response",
        )?;

        Ok(Prepared {
            profile: profile.clone(),
            payload: converted,
            tool_schemas: tools,
        })
    }

    /// Drop the binding for a request that will never reach
    /// `prepare_outgoing` (timeout, upstream failure).
    pub fn reap_binding(&self, request_id: &str) {
        self.bindings.remove(request_id);
    }

    #[doc(hidden)]
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    fn profile_by_id<'a>(
        &self,
        loaded: &'a LoadedTable,
        id: &str,
    ) -> Option<(usize, &'a ConversionProfile)> {
        loaded
            .table
            .profiles
            .iter()
            .enumerate()
            .find(|(_, p)| p.id == id)
    }

    /// Resolution precedence: explicit metadata id, endpoint binding,
    /// default profile, then first profile in document order.
    fn resolve_profile<'a>(
        &self,
        loaded: &'a LoadedTable,
        ctx: &ConversionContext,
    ) -> Result<(usize, &'a ConversionProfile)> {
        if let Some(id) = ctx.profile_id() {
            return self.profile_by_id(loaded, id).ok_or_else(|| {
                SwitchboardError::NoProfile(format!("requested profile '{id}' is not defined"))
            });
        }
        if let Some(id) = loaded.table.endpoint_bindings.get(&ctx.entry_endpoint) {
            if let Some(found) = self.profile_by_id(loaded, id) {
                return Ok(found);
            }
        }
        if let Some(id) = &loaded.table.default_profile {
            if let Some(found) = self.profile_by_id(loaded, id) {
                return Ok(found);
            }
        }
        let first = loaded
            .table
            .profiles
            .first()
            .ok_or_else(|| SwitchboardError::NoProfile("no profiles defined".into()))?;
        warn!(request = %ctx.request_id, endpoint = %ctx.entry_endpoint, profile = %first.id,
            "no profile matched; falling back to first profile in document order");
        Ok((0, first))
    }

    fn codec_for(&self, id: CodecId) -> Arc<dyn Codec> {
        self.codecs
            .entry(id)
            .or_insert_with(|| Arc::from(instantiate(id)))
            .clone()
    }
}
