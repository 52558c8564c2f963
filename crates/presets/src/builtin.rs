//! Built-in provider presets.
//!
//! The base set is loaded once from the embedded manifest and never changes
//! for the process lifetime. User actions reach it only through the overlay:
//! enable flags per provider and per model, plus the default-model choice
//! for providers that offer more than one preset. The merged "view" is the
//! snapshot every read path consumes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rust_embed::RustEmbed;

use curio_domain::error::{Error, Result};
use curio_domain::presets::{ModelPreset, ProviderPreset, PresetsSchema};
use curio_domain::trace::TraceEvent;
use curio_domain::validate::validate_provider_preset;
use curio_domain::SCHEMA_VERSION;
use curio_store::overlay::OverlayStore;
use curio_store::{Rebuilder, TypedGroup};

const MANIFEST_PATH: &str = "model_presets.json";

const GROUP_PROVIDERS: &str = "providers";
const GROUP_MODELS: &str = "models";
const GROUP_PROVIDER_DEFAULTS: &str = "provider_defaults";

pub(crate) fn model_flag_key(provider: &str, model_id: &str) -> String {
    format!("{provider}::{model_id}")
}

struct Inner {
    base: BTreeMap<String, ProviderPreset>,
    provider_flags: TypedGroup<bool>,
    model_flags: TypedGroup<bool>,
    default_flags: TypedGroup<String>,
    overlay: Arc<OverlayStore>,
    view: RwLock<Arc<BTreeMap<String, ProviderPreset>>>,
}

impl Inner {
    /// Rematerialize the full view from (base, overlay). Runs on the
    /// rebuilder task and once at open.
    fn rematerialize(&self) {
        let providers = match self.overlay.group_snapshot(GROUP_PROVIDERS) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(error = %e, "built-in presets: overlay read failed");
                return;
            }
        };
        let models = self.overlay.group_snapshot(GROUP_MODELS).unwrap_or_default();
        let defaults = self
            .overlay
            .group_snapshot(GROUP_PROVIDER_DEFAULTS)
            .unwrap_or_default();

        let mut view = self.base.clone();
        for (name, p) in view.iter_mut() {
            if let Some(rec) = providers.get(name) {
                if let Some(enabled) = rec.value.as_bool() {
                    p.is_enabled = enabled;
                    p.modified_at = rec.modified_at;
                }
            }
            if let Some(rec) = defaults.get(name) {
                if let Some(id) = rec.value.as_str() {
                    if p.model_presets.contains_key(id) {
                        p.default_model_preset_id = Some(id.to_string());
                        if rec.modified_at > p.modified_at {
                            p.modified_at = rec.modified_at;
                        }
                    }
                }
            }
            for (id, m) in p.model_presets.iter_mut() {
                if let Some(rec) = models.get(&model_flag_key(name, id)) {
                    if let Some(enabled) = rec.value.as_bool() {
                        m.is_enabled = enabled;
                        m.modified_at = rec.modified_at;
                    }
                }
            }
        }
        *self.view.write() = Arc::new(view);
    }
}

/// Live, overlay-merged view over the embedded provider presets.
pub struct BuiltinPresets {
    inner: Arc<Inner>,
    rebuilder: Rebuilder,
}

impl BuiltinPresets {
    /// Load the embedded manifest and open the overlay-backed view.
    /// Invalid manifest entries are skipped with a log line rather than
    /// failing the whole catalog.
    pub fn open<E: RustEmbed>(overlay: Arc<OverlayStore>, max_snapshot_age: Duration) -> Result<Self> {
        let base = load_base::<E>()?;

        let inner = Arc::new(Inner {
            provider_flags: overlay.typed(GROUP_PROVIDERS)?,
            model_flags: overlay.typed(GROUP_MODELS)?,
            default_flags: overlay.typed(GROUP_PROVIDER_DEFAULTS)?,
            overlay,
            view: RwLock::new(Arc::new(BTreeMap::new())),
            base,
        });
        inner.rematerialize();

        let worker = inner.clone();
        let rebuilder = Rebuilder::spawn("builtin-presets", max_snapshot_age, move || {
            worker.rematerialize();
        });

        Ok(Self { inner, rebuilder })
    }

    /// Overlay groups this provider persists through.
    pub fn overlay_groups() -> &'static [&'static str] {
        &[GROUP_PROVIDERS, GROUP_MODELS, GROUP_PROVIDER_DEFAULTS]
    }

    /// Current merged snapshot.
    pub fn view(&self) -> Arc<BTreeMap<String, ProviderPreset>> {
        self.inner.view.read().clone()
    }

    pub fn list_builtins(&self) -> Vec<ProviderPreset> {
        self.view().values().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<ProviderPreset> {
        self.view().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.view().contains_key(name)
    }

    /// Persist a provider enable flag, patch the affected view slot, and
    /// queue a full rematerialization.
    pub fn set_provider_enabled(&self, name: &str, enabled: bool) -> Result<ProviderPreset> {
        if !self.contains(name) {
            return Err(Error::ProviderNotFound(name.to_string()));
        }
        let flag = self.inner.provider_flags.set(name, enabled)?;

        let updated = {
            let mut guard = self.inner.view.write();
            let mut view = (**guard).clone();
            let p = view
                .get_mut(name)
                .ok_or_else(|| Error::ProviderNotFound(name.to_string()))?;
            p.is_enabled = enabled;
            p.modified_at = flag.modified_at;
            let updated = p.clone();
            *guard = Arc::new(view);
            updated
        };

        TraceEvent::BuiltinFlagFlipped {
            catalog: "model_presets".to_string(),
            key: name.to_string(),
            enabled,
        }
        .emit();
        self.rebuilder.trigger();
        Ok(updated)
    }

    pub fn set_model_enabled(
        &self,
        provider: &str,
        model_id: &str,
        enabled: bool,
    ) -> Result<ModelPreset> {
        let snapshot = self.view();
        let p = snapshot
            .get(provider)
            .ok_or_else(|| Error::ProviderNotFound(provider.to_string()))?;
        if !p.model_presets.contains_key(model_id) {
            return Err(Error::ModelPresetNotFound(model_id.to_string()));
        }
        let flag = self
            .inner
            .model_flags
            .set(&model_flag_key(provider, model_id), enabled)?;

        let updated = {
            let mut guard = self.inner.view.write();
            let mut view = (**guard).clone();
            let m = view
                .get_mut(provider)
                .and_then(|p| p.model_presets.get_mut(model_id))
                .ok_or_else(|| Error::ModelPresetNotFound(model_id.to_string()))?;
            m.is_enabled = enabled;
            m.modified_at = flag.modified_at;
            let updated = m.clone();
            *guard = Arc::new(view);
            updated
        };

        TraceEvent::BuiltinFlagFlipped {
            catalog: "model_presets".to_string(),
            key: model_flag_key(provider, model_id),
            enabled,
        }
        .emit();
        self.rebuilder.trigger();
        Ok(updated)
    }

    /// Record the default-model choice for a built-in provider. The id must
    /// resolve among the provider's own presets.
    pub fn set_default_model(&self, provider: &str, model_id: &str) -> Result<ProviderPreset> {
        let snapshot = self.view();
        let p = snapshot
            .get(provider)
            .ok_or_else(|| Error::ProviderNotFound(provider.to_string()))?;
        if !p.model_presets.contains_key(model_id) {
            return Err(Error::ModelPresetNotFound(model_id.to_string()));
        }
        let flag = self.inner.default_flags.set(provider, model_id.to_string())?;

        let updated = {
            let mut guard = self.inner.view.write();
            let mut view = (**guard).clone();
            let p = view
                .get_mut(provider)
                .ok_or_else(|| Error::ProviderNotFound(provider.to_string()))?;
            p.default_model_preset_id = Some(model_id.to_string());
            p.modified_at = flag.modified_at;
            let updated = p.clone();
            *guard = Arc::new(view);
            updated
        };

        self.rebuilder.trigger();
        Ok(updated)
    }

    /// Stop the background rebuilder.
    pub async fn close(&self) {
        self.rebuilder.close().await;
    }
}

fn load_base<E: RustEmbed>() -> Result<BTreeMap<String, ProviderPreset>> {
    let file = match E::get(MANIFEST_PATH) {
        Some(f) => f,
        None => {
            tracing::error!(path = MANIFEST_PATH, "embedded preset manifest missing");
            return Ok(BTreeMap::new());
        }
    };
    let manifest: PresetsSchema = serde_json::from_slice(&file.data)?;

    let mut base = BTreeMap::new();
    for (name, mut p) in manifest.provider_presets {
        // Normalize what the manifest must not be trusted to state.
        p.schema_version = SCHEMA_VERSION.to_string();
        p.is_built_in = true;
        for m in p.model_presets.values_mut() {
            m.schema_version = SCHEMA_VERSION.to_string();
            m.is_built_in = true;
        }
        if name != p.name {
            tracing::warn!(key = %name, name = %p.name, "built-in provider key mismatch, skipping");
            continue;
        }
        if let Err(e) = validate_provider_preset(&p) {
            tracing::warn!(provider = %name, error = %e, "invalid built-in provider, skipping");
            continue;
        }
        base.insert(name, p);
    }
    tracing::info!(providers = base.len(), "built-in presets loaded");
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BuiltinPresetAssets;

    fn overlay(dir: &std::path::Path) -> Arc<OverlayStore> {
        OverlayStore::open(dir.join("overlay.db"), BuiltinPresets::overlay_groups()).unwrap()
    }

    #[tokio::test]
    async fn loads_embedded_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let b = BuiltinPresets::open::<BuiltinPresetAssets>(
            overlay(dir.path()),
            Duration::from_secs(300),
        )
        .unwrap();
        let names: Vec<_> = b.list_builtins().iter().map(|p| p.name.clone()).collect();
        assert!(names.contains(&"anthropic".to_string()));
        assert!(b.get("anthropic").unwrap().is_built_in);
        assert!(b
            .get("anthropic")
            .unwrap()
            .model_presets
            .values()
            .all(|m| m.is_built_in));
        b.close().await;
    }

    #[tokio::test]
    async fn enable_flag_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let b = BuiltinPresets::open::<BuiltinPresetAssets>(
                overlay(dir.path()),
                Duration::from_secs(300),
            )
            .unwrap();
            let p = b.set_provider_enabled("anthropic", false).unwrap();
            assert!(!p.is_enabled);
            b.close().await;
        }
        let b = BuiltinPresets::open::<BuiltinPresetAssets>(
            overlay(dir.path()),
            Duration::from_secs(300),
        )
        .unwrap();
        assert!(!b.get("anthropic").unwrap().is_enabled, "flag persisted");
        b.close().await;
    }

    #[tokio::test]
    async fn default_model_choice_must_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let b = BuiltinPresets::open::<BuiltinPresetAssets>(
            overlay(dir.path()),
            Duration::from_secs(300),
        )
        .unwrap();
        assert!(matches!(
            b.set_default_model("anthropic", "nope"),
            Err(Error::ModelPresetNotFound(_))
        ));
        let p = b.set_default_model("anthropic", "claude-fast").unwrap();
        assert_eq!(p.default_model_preset_id.as_deref(), Some("claude-fast"));
        b.close().await;
    }

    #[tokio::test]
    async fn model_flag_updates_only_that_slot() {
        let dir = tempfile::tempdir().unwrap();
        let b = BuiltinPresets::open::<BuiltinPresetAssets>(
            overlay(dir.path()),
            Duration::from_secs(300),
        )
        .unwrap();
        let before = b.get("anthropic").unwrap();
        let m = b.set_model_enabled("anthropic", "claude-fast", false).unwrap();
        assert!(!m.is_enabled);
        let after = b.get("anthropic").unwrap();
        assert_eq!(
            before.modified_at, after.modified_at,
            "provider slot untouched by a model flag"
        );
        assert!(after.model_presets["claude-balanced"].is_enabled);
        b.close().await;
    }
}
