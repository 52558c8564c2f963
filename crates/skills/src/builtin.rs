//! Built-in skill bundles.
//!
//! Loaded once from the embedded manifest; immutable for the process
//! lifetime except for overlay-backed enable flags. The merged view is
//! rematerialized by the coalescing rebuilder after every flag write.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rust_embed::RustEmbed;

use curio_domain::error::{Error, Result};
use curio_domain::skills::{Skill, SkillBundle, SkillStoreSchema, SkillType};
use curio_domain::trace::TraceEvent;
use curio_domain::validate::{validate_skill, validate_skill_bundle};
use curio_domain::SCHEMA_VERSION;
use curio_store::overlay::OverlayStore;
use curio_store::{Rebuilder, TypedGroup};

use crate::manifest;

const MANIFEST_PATH: &str = "skill_bundles.json";

const GROUP_BUNDLES: &str = "bundles";
const GROUP_SKILLS: &str = "skills";

pub(crate) fn skill_flag_key(bundle_id: &str, slug: &str) -> String {
    format!("{bundle_id}::{slug}")
}

/// Overlay-merged snapshot of the built-in catalog.
#[derive(Debug, Clone, Default)]
pub struct BuiltinView {
    pub bundles: BTreeMap<String, SkillBundle>,
    pub skills: BTreeMap<String, BTreeMap<String, Skill>>,
}

struct Inner {
    base: BuiltinView,
    bundle_flags: TypedGroup<bool>,
    skill_flags: TypedGroup<bool>,
    overlay: Arc<OverlayStore>,
    view: RwLock<Arc<BuiltinView>>,
}

impl Inner {
    fn rematerialize(&self) {
        let bundle_recs = match self.overlay.group_snapshot(GROUP_BUNDLES) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(error = %e, "built-in skills: overlay read failed");
                return;
            }
        };
        let skill_recs = self.overlay.group_snapshot(GROUP_SKILLS).unwrap_or_default();

        let mut view = self.base.clone();
        for (id, b) in view.bundles.iter_mut() {
            if let Some(rec) = bundle_recs.get(id) {
                if let Some(enabled) = rec.value.as_bool() {
                    b.is_enabled = enabled;
                    b.modified_at = rec.modified_at;
                }
            }
        }
        for (bundle_id, by_slug) in view.skills.iter_mut() {
            for (slug, sk) in by_slug.iter_mut() {
                if let Some(rec) = skill_recs.get(&skill_flag_key(bundle_id, slug)) {
                    if let Some(enabled) = rec.value.as_bool() {
                        sk.is_enabled = enabled;
                        sk.modified_at = rec.modified_at;
                    }
                }
            }
        }
        *self.view.write() = Arc::new(view);
    }
}

pub struct BuiltinSkills {
    inner: Arc<Inner>,
    rebuilder: Rebuilder,
}

impl BuiltinSkills {
    pub fn open<E: RustEmbed>(overlay: Arc<OverlayStore>, max_snapshot_age: Duration) -> Result<Self> {
        let base = load_base::<E>()?;

        let inner = Arc::new(Inner {
            bundle_flags: overlay.typed(GROUP_BUNDLES)?,
            skill_flags: overlay.typed(GROUP_SKILLS)?,
            overlay,
            view: RwLock::new(Arc::new(BuiltinView::default())),
            base,
        });
        inner.rematerialize();

        let worker = inner.clone();
        let rebuilder = Rebuilder::spawn("builtin-skills", max_snapshot_age, move || {
            worker.rematerialize();
        });

        Ok(Self { inner, rebuilder })
    }

    pub fn overlay_groups() -> &'static [&'static str] {
        &[GROUP_BUNDLES, GROUP_SKILLS]
    }

    pub fn view(&self) -> Arc<BuiltinView> {
        self.inner.view.read().clone()
    }

    pub fn contains_bundle(&self, bundle_id: &str) -> bool {
        self.view().bundles.contains_key(bundle_id)
    }

    pub fn get_bundle(&self, bundle_id: &str) -> Option<SkillBundle> {
        self.view().bundles.get(bundle_id).cloned()
    }

    pub fn get_skill(&self, bundle_id: &str, slug: &str) -> Option<Skill> {
        self.view().skills.get(bundle_id)?.get(slug).cloned()
    }

    pub fn set_bundle_enabled(&self, bundle_id: &str, enabled: bool) -> Result<SkillBundle> {
        if !self.contains_bundle(bundle_id) {
            return Err(Error::BundleNotFound(bundle_id.to_string()));
        }
        let flag = self.inner.bundle_flags.set(bundle_id, enabled)?;

        let updated = {
            let mut guard = self.inner.view.write();
            let mut view = (**guard).clone();
            let b = view
                .bundles
                .get_mut(bundle_id)
                .ok_or_else(|| Error::BundleNotFound(bundle_id.to_string()))?;
            b.is_enabled = enabled;
            b.modified_at = flag.modified_at;
            let updated = b.clone();
            *guard = Arc::new(view);
            updated
        };

        TraceEvent::BuiltinFlagFlipped {
            catalog: "skill_bundles".to_string(),
            key: bundle_id.to_string(),
            enabled,
        }
        .emit();
        self.rebuilder.trigger();
        Ok(updated)
    }

    pub fn set_skill_enabled(&self, bundle_id: &str, slug: &str, enabled: bool) -> Result<Skill> {
        if self.get_skill(bundle_id, slug).is_none() {
            return Err(Error::SkillNotFound(skill_flag_key(bundle_id, slug)));
        }
        let flag = self
            .inner
            .skill_flags
            .set(&skill_flag_key(bundle_id, slug), enabled)?;

        let updated = {
            let mut guard = self.inner.view.write();
            let mut view = (**guard).clone();
            let sk = view
                .skills
                .get_mut(bundle_id)
                .and_then(|m| m.get_mut(slug))
                .ok_or_else(|| Error::SkillNotFound(skill_flag_key(bundle_id, slug)))?;
            sk.is_enabled = enabled;
            sk.modified_at = flag.modified_at;
            let updated = sk.clone();
            *guard = Arc::new(view);
            updated
        };

        TraceEvent::BuiltinFlagFlipped {
            catalog: "skill_bundles".to_string(),
            key: skill_flag_key(bundle_id, slug),
            enabled,
        }
        .emit();
        self.rebuilder.trigger();
        Ok(updated)
    }

    pub async fn close(&self) {
        self.rebuilder.close().await;
    }
}

fn load_base<E: RustEmbed>() -> Result<BuiltinView> {
    let file = match E::get(MANIFEST_PATH) {
        Some(f) => f,
        None => {
            tracing::error!(path = MANIFEST_PATH, "embedded skill manifest missing");
            return Ok(BuiltinView::default());
        }
    };
    let manifest: SkillStoreSchema = serde_json::from_slice(&file.data)?;

    let mut view = BuiltinView::default();
    for (id, mut b) in manifest.bundles {
        b.schema_version = SCHEMA_VERSION.to_string();
        b.is_built_in = true;
        if id != b.id {
            tracing::warn!(key = %id, "built-in bundle key mismatch, skipping");
            continue;
        }
        if let Err(e) = validate_skill_bundle(&b) {
            tracing::warn!(bundle = %id, error = %e, "invalid built-in bundle, skipping");
            continue;
        }
        view.bundles.insert(id, b);
    }

    for (bundle_id, by_slug) in manifest.skills {
        if !view.bundles.contains_key(&bundle_id) {
            tracing::warn!(bundle = %bundle_id, "built-in skills without a bundle, skipping");
            continue;
        }
        for (slug, mut sk) in by_slug {
            sk.schema_version = SCHEMA_VERSION.to_string();
            sk.is_built_in = true;
            sk.skill_type = SkillType::Embeddedfs;
            if slug != sk.slug {
                tracing::warn!(slug = %slug, "built-in skill key mismatch, skipping");
                continue;
            }
            if let Err(e) = validate_skill(&sk) {
                tracing::warn!(skill = %slug, error = %e, "invalid built-in skill, skipping");
                continue;
            }
            if !embedded_skill_md_ok::<E>(&sk) {
                tracing::warn!(skill = %slug, location = %sk.location, "built-in skill has no valid SKILL.md, skipping");
                continue;
            }
            view.skills
                .entry(bundle_id.clone())
                .or_default()
                .insert(slug, sk);
        }
    }

    tracing::info!(
        bundles = view.bundles.len(),
        skills = view.skills.values().map(|m| m.len()).sum::<usize>(),
        "built-in skills loaded"
    );
    Ok(view)
}

/// A built-in skill must point at an embedded directory whose SKILL.md has
/// frontmatter naming the directory basename.
fn embedded_skill_md_ok<E: RustEmbed>(sk: &Skill) -> bool {
    let md_path = format!("{}/SKILL.md", sk.location.trim_end_matches('/'));
    let Some(file) = E::get(&md_path) else {
        return false;
    };
    let Ok(content) = std::str::from_utf8(&file.data) else {
        return false;
    };
    let (parsed, _body) = manifest::parse_frontmatter(content);
    let Some(m) = parsed else { return false };
    let basename = sk.location.rsplit('/').next().unwrap_or(&sk.location);
    m.validate(basename).is_valid()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BuiltinSkillAssets;

    fn overlay(dir: &std::path::Path) -> Arc<OverlayStore> {
        OverlayStore::open(dir.join("overlay.db"), BuiltinSkills::overlay_groups()).unwrap()
    }

    #[tokio::test]
    async fn loads_embedded_bundle_and_skills() {
        let dir = tempfile::tempdir().unwrap();
        let b = BuiltinSkills::open::<BuiltinSkillAssets>(
            overlay(dir.path()),
            Duration::from_secs(300),
        )
        .unwrap();
        let view = b.view();
        assert!(view.bundles.contains_key("core-tools"));
        let skills = &view.skills["core-tools"];
        assert_eq!(skills.len(), 2);
        assert!(skills.values().all(|s| s.is_built_in));
        assert!(skills
            .values()
            .all(|s| s.skill_type == SkillType::Embeddedfs));
        b.close().await;
    }

    #[tokio::test]
    async fn skill_flag_round_trips_through_overlay() {
        let dir = tempfile::tempdir().unwrap();
        {
            let b = BuiltinSkills::open::<BuiltinSkillAssets>(
                overlay(dir.path()),
                Duration::from_secs(300),
            )
            .unwrap();
            let sk = b.set_skill_enabled("core-tools", "web-search", false).unwrap();
            assert!(!sk.is_enabled);
            b.close().await;
        }
        let b = BuiltinSkills::open::<BuiltinSkillAssets>(
            overlay(dir.path()),
            Duration::from_secs(300),
        )
        .unwrap();
        assert!(!b.get_skill("core-tools", "web-search").unwrap().is_enabled);
        assert!(b.get_skill("core-tools", "code-review").unwrap().is_enabled);
        b.close().await;
    }

    #[tokio::test]
    async fn unknown_targets_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let b = BuiltinSkills::open::<BuiltinSkillAssets>(
            overlay(dir.path()),
            Duration::from_secs(300),
        )
        .unwrap();
        assert!(matches!(
            b.set_bundle_enabled("ghost", true),
            Err(Error::BundleNotFound(_))
        ));
        assert!(matches!(
            b.set_skill_enabled("core-tools", "ghost", true),
            Err(Error::SkillNotFound(_))
        ));
        b.close().await;
    }
}
