//! Model preset store.
//!
//! One JSON document for user providers, the overlay-merged built-in view
//! for the rest. All mutations serialize through a single writer lock;
//! atomicity is at the whole-file replace of the user document.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};

use curio_domain::error::{Error, Result};
use curio_domain::options::PresetStoreOptions;
use curio_domain::trace::TraceEvent;
use curio_domain::presets::{
    ModelPreset, OutputParam, PresetsSchema, ProviderPreset, ReasoningParams,
};
use curio_domain::tag::is_valid_tag;
use curio_domain::validate::{
    validate_model_preset, validate_presets_schema, validate_provider_preset,
};
use curio_domain::SCHEMA_VERSION;
use curio_store::overlay::OverlayStore;
use curio_store::MapFileStore;

use crate::builtin::BuiltinPresets;
use crate::{OVERLAY_FILE, USER_FILE};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request bodies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutProviderPreset {
    pub display_name: String,
    pub sdk_type: String,
    #[serde(default)]
    pub is_enabled: bool,
    pub origin: String,
    pub chat_completion_path_prefix: String,
    #[serde(default)]
    pub api_key_header_key: String,
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,
}

/// Both fields are validated against the target snapshot before either is
/// persisted. An all-`None` patch is a no-op.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchProviderPreset {
    #[serde(default)]
    pub is_enabled: Option<bool>,
    /// Empty string clears the default (user providers only).
    #[serde(
        rename = "defaultModelPresetID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub default_model_preset_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutModelPreset {
    pub name: String,
    pub slug: String,
    pub display_name: String,
    #[serde(default)]
    pub is_enabled: bool,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<ReasoningParams>,
    #[serde(default)]
    pub max_prompt_length: Option<u64>,
    #[serde(default)]
    pub max_output_length: Option<u64>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    #[serde(default)]
    pub output_param: Option<OutputParam>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchModelPreset {
    pub is_enabled: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PresetStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PresetStore {
    pub(crate) user: MapFileStore<PresetsSchema>,
    pub(crate) builtin: BuiltinPresets,
    pub(crate) opts: PresetStoreOptions,
    write_mu: Mutex<()>,
}

impl PresetStore {
    /// Open the catalog under `base_dir`, creating `model_presets.json` and
    /// the overlay DB when missing. `E` supplies the embedded built-in
    /// manifest.
    pub fn open<E: RustEmbed>(base_dir: &Path, opts: PresetStoreOptions) -> Result<Self> {
        let user = MapFileStore::open(base_dir.join(USER_FILE), true)?;
        let sc = user.get_all(false)?;
        validate_presets_schema(&sc)?;

        let overlay = OverlayStore::open(
            base_dir.join(OVERLAY_FILE),
            BuiltinPresets::overlay_groups(),
        )?;
        let builtin =
            BuiltinPresets::open::<E>(overlay, Duration::from_secs(opts.max_snapshot_age_secs))?;

        tracing::info!(
            user_providers = sc.provider_presets.len(),
            path = %base_dir.display(),
            "preset store opened"
        );
        Ok(Self {
            user,
            builtin,
            opts,
            write_mu: Mutex::new(()),
        })
    }

    /// Stop background work (the built-in view rebuilder).
    pub async fn close(&self) {
        self.builtin.close().await;
    }

    pub fn builtin(&self) -> &BuiltinPresets {
        &self.builtin
    }

    // ── Default provider ────────────────────────────────────────────

    /// The persisted default, or the first enabled built-in provider when
    /// none is persisted. Values loaded from disk are returned as-is even
    /// when they no longer resolve; only patches are checked.
    pub fn get_default_provider(&self) -> Result<String> {
        let sc = self.user.get_all(false)?;
        if !sc.default_provider.is_empty() {
            return Ok(sc.default_provider.clone());
        }
        self.builtin
            .view()
            .values()
            .find(|p| p.is_enabled)
            .map(|p| p.name.clone())
            .ok_or_else(|| Error::ProviderNotFound("no enabled built-in provider".into()))
    }

    pub fn patch_default_provider(&self, name: &str) -> Result<()> {
        if !is_valid_tag(name) {
            return Err(Error::invalid(format!("defaultProvider: invalid tag {name:?}")));
        }
        let _w = self.write_mu.lock();
        let sc = self.user.get_all(false)?;
        if !sc.provider_presets.contains_key(name) && !self.builtin.contains(name) {
            return Err(Error::ProviderNotFound(name.to_string()));
        }
        if sc.default_provider == name {
            return Ok(());
        }
        let mut next = (*sc).clone();
        next.default_provider = name.to_string();
        self.user.set_all(next)?;
        TraceEvent::DefaultProviderChanged {
            provider: name.to_string(),
        }
        .emit();
        Ok(())
    }

    // ── Provider presets ────────────────────────────────────────────

    pub fn get_provider_preset(&self, name: &str) -> Result<ProviderPreset> {
        let sc = self.user.get_all(false)?;
        if let Some(p) = sc.provider_presets.get(name) {
            return Ok(p.clone());
        }
        self.builtin
            .get(name)
            .ok_or_else(|| Error::ProviderNotFound(name.to_string()))
    }

    /// Create or replace a user provider. Replacing keeps `createdAt`, the
    /// owned model presets, and the default-model pointer.
    pub fn put_provider_preset(
        &self,
        name: &str,
        body: PutProviderPreset,
    ) -> Result<ProviderPreset> {
        if !is_valid_tag(name) {
            return Err(Error::invalid(format!("providerName: invalid tag {name:?}")));
        }
        if self.builtin.contains(name) {
            return Err(Error::BuiltInReadOnly(name.to_string()));
        }

        let _w = self.write_mu.lock();
        let sc = self.user.get_all(false)?;
        let now = Utc::now();

        let preset = match sc.provider_presets.get(name) {
            Some(prev) => ProviderPreset {
                schema_version: SCHEMA_VERSION.to_string(),
                name: name.to_string(),
                display_name: body.display_name,
                sdk_type: body.sdk_type,
                is_enabled: body.is_enabled,
                is_built_in: false,
                origin: body.origin,
                chat_completion_path_prefix: body.chat_completion_path_prefix,
                api_key_header_key: body.api_key_header_key,
                default_headers: body.default_headers,
                default_model_preset_id: prev.default_model_preset_id.clone(),
                model_presets: prev.model_presets.clone(),
                created_at: prev.created_at,
                modified_at: now,
            },
            None => ProviderPreset {
                schema_version: SCHEMA_VERSION.to_string(),
                name: name.to_string(),
                display_name: body.display_name,
                sdk_type: body.sdk_type,
                is_enabled: body.is_enabled,
                is_built_in: false,
                origin: body.origin,
                chat_completion_path_prefix: body.chat_completion_path_prefix,
                api_key_header_key: body.api_key_header_key,
                default_headers: body.default_headers,
                default_model_preset_id: None,
                model_presets: BTreeMap::new(),
                created_at: now,
                modified_at: now,
            },
        };
        validate_provider_preset(&preset)?;

        let replaced = sc.provider_presets.contains_key(name);
        let mut next = (*sc).clone();
        next.provider_presets.insert(name.to_string(), preset.clone());
        self.user.set_all(next)?;
        TraceEvent::ProviderPresetWritten {
            provider: name.to_string(),
            replaced,
        }
        .emit();
        Ok(preset)
    }

    /// Atomic two-field patch. Built-in providers are served through the
    /// overlay; a no-op (same enabled state, same default id) does not bump
    /// `modifiedAt`.
    pub fn patch_provider_preset(
        &self,
        name: &str,
        patch: PatchProviderPreset,
    ) -> Result<ProviderPreset> {
        let _w = self.write_mu.lock();

        if let Some(bp) = self.builtin.get(name) {
            if let Some(id) = patch.default_model_preset_id.as_deref() {
                if id.is_empty() {
                    return Err(Error::invalid(
                        "defaultModelPresetID: built-in defaults cannot be cleared",
                    ));
                }
                if !bp.model_presets.contains_key(id) {
                    return Err(Error::ModelPresetNotFound(id.to_string()));
                }
            }
            let enable_change = patch.is_enabled.is_some_and(|e| e != bp.is_enabled);
            let default_change = patch
                .default_model_preset_id
                .as_deref()
                .is_some_and(|id| bp.default_model_preset_id.as_deref() != Some(id));
            if !enable_change && !default_change {
                return Ok(bp);
            }

            let mut out = bp;
            if let (true, Some(enabled)) = (enable_change, patch.is_enabled) {
                out = self.builtin.set_provider_enabled(name, enabled)?;
            }
            if let (true, Some(id)) = (default_change, patch.default_model_preset_id.as_deref()) {
                out = self.builtin.set_default_model(name, id)?;
            }
            return Ok(out);
        }

        let sc = self.user.get_all(false)?;
        let prev = sc
            .provider_presets
            .get(name)
            .ok_or_else(|| Error::ProviderNotFound(name.to_string()))?;

        if let Some(id) = patch.default_model_preset_id.as_deref() {
            if !id.is_empty() && !prev.model_presets.contains_key(id) {
                return Err(Error::ModelPresetNotFound(id.to_string()));
            }
        }

        let next_default = match patch.default_model_preset_id.as_deref() {
            None => prev.default_model_preset_id.clone(),
            Some("") => None,
            Some(id) => Some(id.to_string()),
        };
        let next_enabled = patch.is_enabled.unwrap_or(prev.is_enabled);
        if next_enabled == prev.is_enabled && next_default == prev.default_model_preset_id {
            return Ok(prev.clone());
        }

        let mut next = (*sc).clone();
        let p = next
            .provider_presets
            .get_mut(name)
            .ok_or_else(|| Error::ProviderNotFound(name.to_string()))?;
        p.is_enabled = next_enabled;
        p.default_model_preset_id = next_default;
        p.modified_at = Utc::now();
        validate_provider_preset(p)?;
        let updated = p.clone();
        self.user.set_all(next)?;
        Ok(updated)
    }

    /// Delete a user provider. Providers still owning model presets are
    /// refused; the persisted default-provider pointer is cleared when it
    /// referenced the deleted name.
    pub fn delete_provider_preset(&self, name: &str) -> Result<()> {
        if self.builtin.contains(name) {
            return Err(Error::BuiltInReadOnly(name.to_string()));
        }
        let _w = self.write_mu.lock();
        let sc = self.user.get_all(false)?;
        let p = sc
            .provider_presets
            .get(name)
            .ok_or_else(|| Error::ProviderNotFound(name.to_string()))?;
        if !p.model_presets.is_empty() {
            return Err(Error::ProviderHasModels(name.to_string()));
        }

        let mut next = (*sc).clone();
        next.provider_presets.remove(name);
        if next.default_provider == name {
            next.default_provider.clear();
        }
        self.user.set_all(next)?;
        TraceEvent::ProviderPresetDeleted {
            provider: name.to_string(),
        }
        .emit();
        Ok(())
    }

    // ── Model presets ───────────────────────────────────────────────

    pub fn get_model_preset(&self, provider: &str, id: &str) -> Result<ModelPreset> {
        let p = self.get_provider_preset(provider)?;
        p.model_presets
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ModelPresetNotFound(id.to_string()))
    }

    pub fn put_model_preset(
        &self,
        provider: &str,
        id: &str,
        body: PutModelPreset,
    ) -> Result<ModelPreset> {
        if !is_valid_tag(id) {
            return Err(Error::invalid(format!("modelPresetID: invalid tag {id:?}")));
        }
        if self.builtin.contains(provider) {
            return Err(Error::BuiltInReadOnly(provider.to_string()));
        }

        let _w = self.write_mu.lock();
        let sc = self.user.get_all(false)?;
        let prev_provider = sc
            .provider_presets
            .get(provider)
            .ok_or_else(|| Error::ProviderNotFound(provider.to_string()))?;
        let now = Utc::now();

        let preset = ModelPreset {
            schema_version: SCHEMA_VERSION.to_string(),
            id: id.to_string(),
            name: body.name,
            slug: body.slug,
            display_name: body.display_name,
            is_enabled: body.is_enabled,
            is_built_in: false,
            temperature: body.temperature,
            reasoning: body.reasoning,
            max_prompt_length: body.max_prompt_length,
            max_output_length: body.max_output_length,
            timeout: body.timeout,
            stop_sequences: body.stop_sequences,
            output_param: body.output_param,
            created_at: prev_provider
                .model_presets
                .get(id)
                .map(|m| m.created_at)
                .unwrap_or(now),
            modified_at: now,
        };
        validate_model_preset(&preset)?;

        let replaced = prev_provider.model_presets.contains_key(id);
        let mut next = (*sc).clone();
        let p = next
            .provider_presets
            .get_mut(provider)
            .ok_or_else(|| Error::ProviderNotFound(provider.to_string()))?;
        p.model_presets.insert(id.to_string(), preset.clone());
        p.modified_at = now;
        self.user.set_all(next)?;
        TraceEvent::ModelPresetWritten {
            provider: provider.to_string(),
            model_preset_id: id.to_string(),
            replaced,
        }
        .emit();
        Ok(preset)
    }

    pub fn patch_model_preset(
        &self,
        provider: &str,
        id: &str,
        patch: PatchModelPreset,
    ) -> Result<ModelPreset> {
        let _w = self.write_mu.lock();

        if self.builtin.contains(provider) {
            let current = self
                .builtin
                .get(provider)
                .and_then(|p| p.model_presets.get(id).cloned())
                .ok_or_else(|| Error::ModelPresetNotFound(id.to_string()))?;
            if current.is_enabled == patch.is_enabled {
                return Ok(current);
            }
            return self.builtin.set_model_enabled(provider, id, patch.is_enabled);
        }

        let sc = self.user.get_all(false)?;
        let prev = sc
            .provider_presets
            .get(provider)
            .ok_or_else(|| Error::ProviderNotFound(provider.to_string()))?
            .model_presets
            .get(id)
            .ok_or_else(|| Error::ModelPresetNotFound(id.to_string()))?;
        if prev.is_enabled == patch.is_enabled {
            return Ok(prev.clone());
        }

        let mut next = (*sc).clone();
        let m = next
            .provider_presets
            .get_mut(provider)
            .and_then(|p| p.model_presets.get_mut(id))
            .ok_or_else(|| Error::ModelPresetNotFound(id.to_string()))?;
        m.is_enabled = patch.is_enabled;
        m.modified_at = Utc::now();
        let updated = m.clone();
        self.user.set_all(next)?;
        Ok(updated)
    }

    /// Delete a user model preset. When the deleted ID was the provider's
    /// default, the default resets to empty.
    pub fn delete_model_preset(&self, provider: &str, id: &str) -> Result<()> {
        if self.builtin.contains(provider) {
            return Err(Error::BuiltInReadOnly(provider.to_string()));
        }
        let _w = self.write_mu.lock();
        let sc = self.user.get_all(false)?;
        let p = sc
            .provider_presets
            .get(provider)
            .ok_or_else(|| Error::ProviderNotFound(provider.to_string()))?;
        if !p.model_presets.contains_key(id) {
            return Err(Error::ModelPresetNotFound(id.to_string()));
        }

        let mut next = (*sc).clone();
        let p = next
            .provider_presets
            .get_mut(provider)
            .ok_or_else(|| Error::ProviderNotFound(provider.to_string()))?;
        p.model_presets.remove(id);
        let default_reset = p.default_model_preset_id.as_deref() == Some(id);
        if default_reset {
            p.default_model_preset_id = None;
        }
        p.modified_at = Utc::now();
        self.user.set_all(next)?;
        TraceEvent::ModelPresetDeleted {
            provider: provider.to_string(),
            model_preset_id: id.to_string(),
            default_reset,
        }
        .emit();
        Ok(())
    }
}
