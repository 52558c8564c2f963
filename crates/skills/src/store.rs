//! Skill store.
//!
//! Every user mutation runs the three-phase write saga:
//!
//!   1. acquire the writer lock and snapshot the schema,
//!   2. validate against the Runtime (foreground adds/removes, 15 s cap)
//!      and mutate the snapshot in memory — no snapshot lock held,
//!   3. commit the snapshot to the user file; a failed commit triggers a
//!      strict runtime rollback (3 × 150 ms), a successful one schedules a
//!      best-effort resync off the critical path.
//!
//! Runtime accounting is duplicate-safe: a def is removed only when the
//! last enabled referent across both sources goes away, and `AlreadyExists`
//! on add counts as success.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use curio_domain::error::{Error, Result};
use curio_domain::options::SkillStoreOptions;
use curio_domain::runtime::{SkillDef, SkillsRuntime};
use curio_domain::skills::{
    PresenceStatus, Skill, SkillBundle, SkillPresence, SkillStoreSchema, SkillType,
};
use curio_domain::tag::is_valid_tag;
use curio_domain::trace::TraceEvent;
use curio_domain::validate::{validate_skill, validate_skill_bundle, validate_skill_schema};
use curio_domain::SCHEMA_VERSION;
use curio_store::overlay::OverlayStore;
use curio_store::MapFileStore;

use crate::builtin::BuiltinSkills;
use crate::hydrate;
use crate::reconcile::Reconciler;
use crate::sweeper::Sweeper;
use crate::{HYDRATE_DIR, OVERLAY_FILE, USER_FILE};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request bodies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutSkillBundle {
    pub slug: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchSkillBundle {
    pub is_enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutSkill {
    pub location: String,
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_enabled: bool,
}

/// At least one field must be present. Built-in skills accept only
/// `isEnabled`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchSkill {
    #[serde(default)]
    pub is_enabled: Option<bool>,
    #[serde(default)]
    pub location: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store internals (shared with the sweeper)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) struct StoreInner {
    pub(crate) user: MapFileStore<SkillStoreSchema>,
    pub(crate) builtin: BuiltinSkills,
    pub(crate) reconciler: Reconciler,
    pub(crate) hydrate_dir: PathBuf,
    hydrate_fn: Box<dyn Fn(&Path) -> Result<bool> + Send + Sync>,
    pub(crate) opts: SkillStoreOptions,
    pub(crate) write_mu: tokio::sync::Mutex<()>,
}

impl StoreInner {
    /// Where the runtime reads this skill from: user skills as stored,
    /// built-in skills through the hydration directory.
    pub(crate) fn runtime_location(&self, sk: &Skill) -> String {
        match sk.skill_type {
            SkillType::Fs => sk.location.clone(),
            SkillType::Embeddedfs => self
                .hydrate_dir
                .join(&sk.location)
                .to_string_lossy()
                .into_owned(),
        }
    }

    pub(crate) fn def_for(&self, sk: &Skill) -> SkillDef {
        SkillDef {
            skill_type: sk.skill_type,
            name: sk.name.clone(),
            location: self.runtime_location(sk),
        }
    }

    /// Enabled references per def across the built-in view and the given
    /// user snapshot. A def is desired while its count is non-zero.
    pub(crate) fn desired_def_counts(&self, sc: &SkillStoreSchema) -> HashMap<SkillDef, usize> {
        let mut counts: HashMap<SkillDef, usize> = HashMap::new();

        let view = self.builtin.view();
        for (bundle_id, by_slug) in &view.skills {
            let enabled_bundle = view.bundles.get(bundle_id).is_some_and(|b| b.is_enabled);
            if !enabled_bundle {
                continue;
            }
            for sk in by_slug.values().filter(|s| s.is_enabled) {
                *counts.entry(self.def_for(sk)).or_insert(0) += 1;
            }
        }

        for (bundle_id, by_slug) in &sc.skills {
            let bundle_ok = sc
                .bundles
                .get(bundle_id)
                .is_some_and(|b| b.is_enabled && b.soft_deleted_at.is_none());
            if !bundle_ok {
                continue;
            }
            for sk in by_slug.values().filter(|s| s.is_enabled) {
                *counts.entry(self.def_for(sk)).or_insert(0) += 1;
            }
        }
        counts
    }

    pub(crate) fn desired_defs_now(&self) -> Result<HashSet<SkillDef>> {
        let sc = self.user.get_all(false)?;
        Ok(self.desired_def_counts(&sc).into_keys().collect())
    }

    /// Whole-document commit. The referential invariants are re-checked so
    /// a store bug can never persist a torn schema.
    pub(crate) fn commit(&self, next: SkillStoreSchema) -> Result<()> {
        validate_skill_schema(&next)?;
        self.user.set_all(next)
    }

    /// Best-effort resync off the caller's critical path.
    pub(crate) fn schedule_resync(self: &Arc<Self>, reason: &'static str) {
        let inner = self.clone();
        tokio::spawn(async move {
            match inner.desired_defs_now() {
                Ok(desired) => inner.reconciler.resync_best_effort(&desired, reason).await,
                Err(e) => tracing::warn!(reason, error = %e, "resync skipped: snapshot read failed"),
            }
        });
    }

    /// Strict rollback on a detached task so caller cancellation cannot
    /// leave the runtime desynchronized; awaited for completion.
    pub(crate) async fn strict_rollback(self: &Arc<Self>, reason: &'static str) {
        let inner = self.clone();
        let handle = tokio::spawn(async move {
            match inner.desired_defs_now() {
                Ok(desired) => {
                    inner
                        .reconciler
                        .resync_strict_with_retry(&desired, reason)
                        .await;
                }
                Err(e) => tracing::error!(reason, error = %e, "rollback skipped: snapshot read failed"),
            }
        });
        let _ = handle.await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SkillStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SkillStore {
    pub(crate) inner: Arc<StoreInner>,
    sweeper: Sweeper,
}

impl SkillStore {
    /// Open the catalog under `base_dir`: hydrate the embedded tree, load
    /// the user document and the overlay-backed built-in view, start the
    /// sweeper, and schedule an initial runtime resync.
    pub fn open<E: RustEmbed + 'static>(
        base_dir: &Path,
        runtime: Arc<dyn SkillsRuntime>,
        opts: SkillStoreOptions,
    ) -> Result<Self> {
        let hydrate_dir = base_dir.join(HYDRATE_DIR);
        hydrate::hydrate::<E>(&hydrate_dir)?;

        let user = MapFileStore::open(base_dir.join(USER_FILE), true)?;
        let sc = user.get_all(false)?;
        validate_skill_schema(&sc)?;

        let overlay = OverlayStore::open(
            base_dir.join(OVERLAY_FILE),
            BuiltinSkills::overlay_groups(),
        )?;
        let builtin =
            BuiltinSkills::open::<E>(overlay, Duration::from_secs(opts.max_snapshot_age_secs))?;

        let inner = Arc::new(StoreInner {
            user,
            builtin,
            reconciler: Reconciler::new(runtime),
            hydrate_dir,
            hydrate_fn: Box::new(|dir| hydrate::hydrate::<E>(dir)),
            opts,
            write_mu: tokio::sync::Mutex::new(()),
        });

        let sweeper = Sweeper::spawn(inner.clone());
        inner.schedule_resync("open");

        tracing::info!(
            user_bundles = sc.bundles.len(),
            path = %base_dir.display(),
            "skill store opened"
        );
        Ok(Self { inner, sweeper })
    }

    /// Stop background work (sweeper, built-in rebuilder).
    pub async fn close(&self) {
        self.sweeper.close().await;
        self.inner.builtin.close().await;
    }

    pub fn builtin(&self) -> &BuiltinSkills {
        &self.inner.builtin
    }

    /// Run one sweep immediately (also used by hosts for shutdown tidying).
    pub async fn sweep_now(&self) -> Result<usize> {
        crate::sweeper::sweep_once(&self.inner).await
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Soft-deleted bundles are hidden from reads.
    pub fn get_skill_bundle(&self, bundle_id: &str) -> Result<SkillBundle> {
        let sc = self.inner.user.get_all(false)?;
        if let Some(b) = sc.bundles.get(bundle_id) {
            if b.soft_deleted_at.is_some() {
                return Err(Error::BundleNotFound(bundle_id.to_string()));
            }
            return Ok(b.clone());
        }
        self.inner
            .builtin
            .get_bundle(bundle_id)
            .ok_or_else(|| Error::BundleNotFound(bundle_id.to_string()))
    }

    pub fn get_skill(&self, bundle_id: &str, slug: &str) -> Result<Skill> {
        let sc = self.inner.user.get_all(false)?;
        if let Some(b) = sc.bundles.get(bundle_id) {
            if b.soft_deleted_at.is_some() {
                return Err(Error::BundleNotFound(bundle_id.to_string()));
            }
            return sc
                .skills
                .get(bundle_id)
                .and_then(|m| m.get(slug))
                .cloned()
                .ok_or_else(|| Error::SkillNotFound(slug.to_string()));
        }
        if self.inner.builtin.contains_bundle(bundle_id) {
            return self
                .inner
                .builtin
                .get_skill(bundle_id, slug)
                .ok_or_else(|| Error::SkillNotFound(slug.to_string()));
        }
        Err(Error::BundleNotFound(bundle_id.to_string()))
    }

    // ── Bundles ─────────────────────────────────────────────────────

    /// Create or replace a user bundle. An enable-state change applies the
    /// delta to the runtime before the commit.
    pub async fn put_skill_bundle(
        &self,
        bundle_id: &str,
        body: PutSkillBundle,
    ) -> Result<SkillBundle> {
        if !is_valid_tag(bundle_id) {
            return Err(Error::invalid(format!("bundleID: invalid tag {bundle_id:?}")));
        }
        if self.inner.builtin.contains_bundle(bundle_id) {
            return Err(Error::BuiltInReadOnly(bundle_id.to_string()));
        }

        let _w = self.inner.write_mu.lock().await;
        let sc = self.inner.user.get_all(false)?;

        let prev = sc.bundles.get(bundle_id);
        let prev_existed = prev.is_some();
        if prev.is_some_and(|b| b.soft_deleted_at.is_some()) {
            return Err(Error::BundleDeleting(bundle_id.to_string()));
        }

        let now = Utc::now();
        let bundle = SkillBundle {
            schema_version: SCHEMA_VERSION.to_string(),
            id: bundle_id.to_string(),
            slug: body.slug,
            display_name: body.display_name,
            description: body.description,
            is_enabled: body.is_enabled,
            is_built_in: false,
            created_at: prev.map(|b| b.created_at).unwrap_or(now),
            modified_at: now,
            soft_deleted_at: None,
        };
        validate_skill_bundle(&bundle)?;

        let mut next = (*sc).clone();
        next.bundles.insert(bundle_id.to_string(), bundle.clone());

        let prev_enabled = prev.map(|b| b.is_enabled).unwrap_or(false);
        if bundle.is_enabled != prev_enabled {
            self.bundle_enable_delta(&sc, &next, bundle_id, bundle.is_enabled)
                .await?;
        }

        if let Err(e) = self.inner.commit(next) {
            self.inner.strict_rollback("put_skill_bundle commit").await;
            return Err(e);
        }
        TraceEvent::BundleWritten {
            bundle_id: bundle_id.to_string(),
            replaced: prev_existed,
            enabled: bundle.is_enabled,
        }
        .emit();
        self.inner.schedule_resync("put_skill_bundle");
        Ok(bundle)
    }

    /// Enable/disable a bundle. Built-ins flip the overlay and trigger a
    /// resync; user bundles run the saga with the same delta logic as put.
    pub async fn patch_skill_bundle(
        &self,
        bundle_id: &str,
        patch: PatchSkillBundle,
    ) -> Result<SkillBundle> {
        if self.inner.builtin.contains_bundle(bundle_id) {
            let current = self
                .inner
                .builtin
                .get_bundle(bundle_id)
                .ok_or_else(|| Error::BundleNotFound(bundle_id.to_string()))?;
            if current.is_enabled == patch.is_enabled {
                return Ok(current);
            }
            let updated = self
                .inner
                .builtin
                .set_bundle_enabled(bundle_id, patch.is_enabled)?;
            self.inner.schedule_resync("patch_skill_bundle builtin");
            return Ok(updated);
        }

        let _w = self.inner.write_mu.lock().await;
        let sc = self.inner.user.get_all(false)?;
        let prev = sc
            .bundles
            .get(bundle_id)
            .ok_or_else(|| Error::BundleNotFound(bundle_id.to_string()))?;
        if prev.soft_deleted_at.is_some() {
            return Err(Error::BundleDeleting(bundle_id.to_string()));
        }
        if prev.is_enabled == patch.is_enabled {
            return Ok(prev.clone());
        }

        let mut next = (*sc).clone();
        let updated = {
            let b = next
                .bundles
                .get_mut(bundle_id)
                .ok_or_else(|| Error::BundleNotFound(bundle_id.to_string()))?;
            b.is_enabled = patch.is_enabled;
            b.modified_at = Utc::now();
            b.clone()
        };

        self.bundle_enable_delta(&sc, &next, bundle_id, patch.is_enabled)
            .await?;

        if let Err(e) = self.inner.commit(next) {
            self.inner.strict_rollback("patch_skill_bundle commit").await;
            return Err(e);
        }
        self.inner.schedule_resync("patch_skill_bundle");
        Ok(updated)
    }

    /// Soft delete. The bundle must be empty; the sweeper hard-deletes it
    /// after the grace window.
    pub async fn delete_skill_bundle(&self, bundle_id: &str) -> Result<()> {
        if self.inner.builtin.contains_bundle(bundle_id) {
            return Err(Error::BuiltInReadOnly(bundle_id.to_string()));
        }

        let _w = self.inner.write_mu.lock().await;
        let sc = self.inner.user.get_all(false)?;
        let prev = sc
            .bundles
            .get(bundle_id)
            .ok_or_else(|| Error::BundleNotFound(bundle_id.to_string()))?;
        if prev.soft_deleted_at.is_some() {
            return Err(Error::BundleDeleting(bundle_id.to_string()));
        }
        if sc.skills.get(bundle_id).is_some_and(|m| !m.is_empty()) {
            return Err(Error::BundleNotEmpty(bundle_id.to_string()));
        }

        let mut next = (*sc).clone();
        if let Some(b) = next.bundles.get_mut(bundle_id) {
            let now = Utc::now();
            b.soft_deleted_at = Some(now);
            b.is_enabled = false;
            b.modified_at = now;
        }

        if let Err(e) = self.inner.commit(next) {
            self.inner.strict_rollback("delete_skill_bundle commit").await;
            return Err(e);
        }
        drop(_w);
        TraceEvent::BundleSoftDeleted {
            bundle_id: bundle_id.to_string(),
        }
        .emit();
        self.sweeper.kick();
        self.inner.schedule_resync("delete_skill_bundle");
        Ok(())
    }

    // ── Skills ──────────────────────────────────────────────────────

    /// Create a user skill. The runtime is always consulted: an unindexable
    /// location fails the request and nothing is persisted.
    pub async fn put_skill(&self, bundle_id: &str, slug: &str, body: PutSkill) -> Result<Skill> {
        if self.inner.builtin.contains_bundle(bundle_id) {
            return Err(Error::BuiltInReadOnly(bundle_id.to_string()));
        }
        if !is_valid_tag(slug) {
            return Err(Error::invalid(format!("skillSlug: invalid tag {slug:?}")));
        }

        let _w = self.inner.write_mu.lock().await;
        let sc = self.inner.user.get_all(false)?;
        let bundle = sc
            .bundles
            .get(bundle_id)
            .ok_or_else(|| Error::BundleNotFound(bundle_id.to_string()))?;
        if bundle.soft_deleted_at.is_some() {
            return Err(Error::BundleDeleting(bundle_id.to_string()));
        }
        if !bundle.is_enabled {
            return Err(Error::BundleDisabled(bundle_id.to_string()));
        }
        if sc.skills.get(bundle_id).is_some_and(|m| m.contains_key(slug)) {
            return Err(Error::SkillConflict(slug.to_string()));
        }

        let now = Utc::now();
        let skill = Skill {
            schema_version: SCHEMA_VERSION.to_string(),
            id: Uuid::now_v7().to_string(),
            slug: slug.to_string(),
            skill_type: SkillType::Fs,
            location: body.location,
            name: body.name,
            display_name: body.display_name,
            description: body.description,
            tags: body.tags,
            presence: Some(SkillPresence::unknown()),
            is_enabled: body.is_enabled,
            is_built_in: false,
            created_at: now,
            modified_at: now,
        };
        validate_skill(&skill)?;

        let def = self.inner.def_for(&skill);
        if let Err(e) = self.inner.reconciler.try_add_foreground(&def).await {
            return Err(Error::invalid(format!("skill cannot be indexed: {e}")));
        }

        let mut next = (*sc).clone();
        next.skills
            .entry(bundle_id.to_string())
            .or_default()
            .insert(slug.to_string(), skill.clone());

        // The add above was pure validation when the skill lands disabled;
        // drop it again unless another referent wants the def.
        if !skill.is_enabled
            && self
                .inner
                .desired_def_counts(&next)
                .get(&def)
                .copied()
                .unwrap_or(0)
                == 0
        {
            if let Err(e) = self.inner.reconciler.try_remove_foreground(&def).await {
                tracing::warn!(error = %e, "post-validation remove failed");
            }
        }

        if let Err(e) = self.inner.commit(next) {
            self.inner.strict_rollback("put_skill commit").await;
            return Err(e);
        }
        TraceEvent::SkillWritten {
            bundle_id: bundle_id.to_string(),
            skill_slug: slug.to_string(),
            enabled: skill.is_enabled,
        }
        .emit();
        self.inner.schedule_resync("put_skill");
        Ok(skill)
    }

    /// Patch enable state and/or location. Built-in skills accept only
    /// `isEnabled` and hydrate before an enable; user patches follow
    /// add-before-remove with duplicate-safe accounting.
    pub async fn patch_skill(&self, bundle_id: &str, slug: &str, patch: PatchSkill) -> Result<Skill> {
        if patch.is_enabled.is_none() && patch.location.is_none() {
            return Err(Error::invalid("patch requires at least one field"));
        }

        if self.inner.builtin.contains_bundle(bundle_id) {
            return self.patch_builtin_skill(bundle_id, slug, patch).await;
        }

        let _w = self.inner.write_mu.lock().await;
        let sc = self.inner.user.get_all(false)?;
        let bundle = sc
            .bundles
            .get(bundle_id)
            .ok_or_else(|| Error::BundleNotFound(bundle_id.to_string()))?;
        if bundle.soft_deleted_at.is_some() {
            return Err(Error::BundleDeleting(bundle_id.to_string()));
        }
        let prev = sc
            .skills
            .get(bundle_id)
            .and_then(|m| m.get(slug))
            .ok_or_else(|| Error::SkillNotFound(slug.to_string()))?;

        let mut skill = prev.clone();
        let location_changed = patch.location.as_ref().is_some_and(|l| *l != prev.location);
        if let Some(location) = patch.location {
            skill.location = location;
        }
        if location_changed {
            skill.presence = Some(SkillPresence::unknown());
        }
        if let Some(enabled) = patch.is_enabled {
            skill.is_enabled = enabled;
        }
        if skill.is_enabled == prev.is_enabled && !location_changed {
            return Ok(prev.clone());
        }
        skill.modified_at = Utc::now();
        validate_skill(&skill)?;

        let old_def = self.inner.def_for(prev);
        let new_def = self.inner.def_for(&skill);
        let was_desired = bundle.is_enabled && prev.is_enabled;
        let now_desired = bundle.is_enabled && skill.is_enabled;

        let mut next = (*sc).clone();
        if let Some(slot) = next.skills.get_mut(bundle_id).and_then(|m| m.get_mut(slug)) {
            *slot = skill.clone();
        }

        // Add the new def first so a bad location fails before anything is
        // removed (replacement safety on the foreground path).
        if now_desired && (location_changed || !was_desired) {
            if let Err(e) = self.inner.reconciler.try_add_foreground(&new_def).await {
                return Err(Error::invalid(format!("skill cannot be indexed: {e}")));
            }
        }
        if was_desired
            && self
                .inner
                .desired_def_counts(&next)
                .get(&old_def)
                .copied()
                .unwrap_or(0)
                == 0
        {
            if let Err(e) = self.inner.reconciler.try_remove_foreground(&old_def).await {
                tracing::warn!(error = %e, "runtime remove during patch failed");
            }
        }

        if let Err(e) = self.inner.commit(next) {
            self.inner.strict_rollback("patch_skill commit").await;
            return Err(e);
        }
        self.inner.schedule_resync("patch_skill");
        Ok(skill)
    }

    /// Delete a user skill, dropping its def from the runtime when the last
    /// referent goes away.
    pub async fn delete_skill(&self, bundle_id: &str, slug: &str) -> Result<()> {
        if self.inner.builtin.contains_bundle(bundle_id) {
            return Err(Error::BuiltInReadOnly(bundle_id.to_string()));
        }

        let _w = self.inner.write_mu.lock().await;
        let sc = self.inner.user.get_all(false)?;
        let bundle = sc
            .bundles
            .get(bundle_id)
            .ok_or_else(|| Error::BundleNotFound(bundle_id.to_string()))?;
        if bundle.soft_deleted_at.is_some() {
            return Err(Error::BundleDeleting(bundle_id.to_string()));
        }
        let prev = sc
            .skills
            .get(bundle_id)
            .and_then(|m| m.get(slug))
            .ok_or_else(|| Error::SkillNotFound(slug.to_string()))?;
        if prev
            .presence
            .as_ref()
            .is_some_and(|p| p.status == PresenceStatus::Missing)
        {
            return Err(Error::SkillIsMissing(slug.to_string()));
        }

        let old_def = self.inner.def_for(prev);
        let was_desired = bundle.is_enabled && prev.is_enabled;

        let mut next = (*sc).clone();
        if let Some(by_slug) = next.skills.get_mut(bundle_id) {
            by_slug.remove(slug);
            if by_slug.is_empty() {
                next.skills.remove(bundle_id);
            }
        }

        if was_desired
            && self
                .inner
                .desired_def_counts(&next)
                .get(&old_def)
                .copied()
                .unwrap_or(0)
                == 0
        {
            if let Err(e) = self.inner.reconciler.try_remove_foreground(&old_def).await {
                tracing::warn!(error = %e, "runtime remove during delete failed");
            }
        }

        if let Err(e) = self.inner.commit(next) {
            self.inner.strict_rollback("delete_skill commit").await;
            return Err(e);
        }
        TraceEvent::SkillDeleted {
            bundle_id: bundle_id.to_string(),
            skill_slug: slug.to_string(),
        }
        .emit();
        self.inner.schedule_resync("delete_skill");
        Ok(())
    }

    /// Stat the skill's resolved location and update its presence record.
    /// Pure store metadata: no runtime interaction, `modifiedAt` untouched.
    pub async fn refresh_skill_presence(&self, bundle_id: &str, slug: &str) -> Result<Skill> {
        if self.inner.builtin.contains_bundle(bundle_id) {
            return Err(Error::BuiltInReadOnly(bundle_id.to_string()));
        }

        let _w = self.inner.write_mu.lock().await;
        let sc = self.inner.user.get_all(false)?;
        let bundle = sc
            .bundles
            .get(bundle_id)
            .ok_or_else(|| Error::BundleNotFound(bundle_id.to_string()))?;
        if bundle.soft_deleted_at.is_some() {
            return Err(Error::BundleDeleting(bundle_id.to_string()));
        }
        let prev = sc
            .skills
            .get(bundle_id)
            .and_then(|m| m.get(slug))
            .ok_or_else(|| Error::SkillNotFound(slug.to_string()))?;

        let now = Utc::now();
        let on_disk = Path::new(&self.inner.runtime_location(prev)).is_dir();
        let mut presence = prev
            .presence
            .clone()
            .unwrap_or_else(SkillPresence::unknown);
        presence.last_checked_at = Some(now);
        if on_disk {
            presence.status = PresenceStatus::Present;
            presence.last_seen_at = Some(now);
            presence.missing_since = None;
        } else {
            presence.status = PresenceStatus::Missing;
            if presence.missing_since.is_none() {
                presence.missing_since = Some(now);
            }
        }

        let mut next = (*sc).clone();
        let updated = {
            let slot = next
                .skills
                .get_mut(bundle_id)
                .and_then(|m| m.get_mut(slug))
                .ok_or_else(|| Error::SkillNotFound(slug.to_string()))?;
            slot.presence = Some(presence);
            slot.clone()
        };
        self.inner.commit(next)?;
        TraceEvent::PresenceRefreshed {
            bundle_id: bundle_id.to_string(),
            skill_slug: slug.to_string(),
            status: match updated.presence.as_ref().map(|p| p.status) {
                Some(PresenceStatus::Present) => "present".to_string(),
                Some(PresenceStatus::Missing) => "missing".to_string(),
                Some(PresenceStatus::Error) => "error".to_string(),
                _ => "unknown".to_string(),
            },
        }
        .emit();
        Ok(updated)
    }

    // ── Helpers ─────────────────────────────────────────────────────

    /// Apply a bundle enable-state change to the runtime: enabling
    /// validates every enabled member, disabling removes defs that lose
    /// their last referent.
    async fn bundle_enable_delta(
        &self,
        sc: &SkillStoreSchema,
        next: &SkillStoreSchema,
        bundle_id: &str,
        enabling: bool,
    ) -> Result<()> {
        let members: Vec<Skill> = sc
            .skills
            .get(bundle_id)
            .map(|m| m.values().filter(|s| s.is_enabled).cloned().collect())
            .unwrap_or_default();

        if enabling {
            for sk in &members {
                let def = self.inner.def_for(sk);
                if let Err(e) = self.inner.reconciler.try_add_foreground(&def).await {
                    // Earlier members may have been added speculatively.
                    self.inner.strict_rollback("bundle enable validation").await;
                    return Err(Error::invalid(format!(
                        "bundle cannot be enabled, skill {:?} failed validation: {e}",
                        sk.slug
                    )));
                }
            }
        } else {
            let next_counts = self.inner.desired_def_counts(next);
            let defs: HashSet<SkillDef> = members.iter().map(|sk| self.inner.def_for(sk)).collect();
            for def in defs {
                if next_counts.get(&def).copied().unwrap_or(0) == 0 {
                    if let Err(e) = self.inner.reconciler.try_remove_foreground(&def).await {
                        tracing::warn!(error = %e, "runtime remove during bundle disable failed");
                    }
                }
            }
        }
        Ok(())
    }

    async fn patch_builtin_skill(
        &self,
        bundle_id: &str,
        slug: &str,
        patch: PatchSkill,
    ) -> Result<Skill> {
        if patch.location.is_some() {
            return Err(Error::BuiltInReadOnly(format!("{bundle_id}::{slug}")));
        }
        let enabled = patch
            .is_enabled
            .ok_or_else(|| Error::invalid("patch requires at least one field"))?;

        let current = self
            .inner
            .builtin
            .get_skill(bundle_id, slug)
            .ok_or_else(|| Error::SkillNotFound(slug.to_string()))?;
        if current.is_enabled == enabled {
            return Ok(current);
        }

        if enabled {
            // The runtime reads the hydrated copy, so hydrate first.
            (self.inner.hydrate_fn)(&self.inner.hydrate_dir)?;
            let def = self.inner.def_for(&current);
            if let Err(e) = self.inner.reconciler.try_add_foreground(&def).await {
                return Err(Error::invalid(format!("skill cannot be indexed: {e}")));
            }
        }

        let updated = self.inner.builtin.set_skill_enabled(bundle_id, slug, enabled)?;

        if !enabled {
            let sc = self.inner.user.get_all(false)?;
            let def = self.inner.def_for(&updated);
            if self
                .inner
                .desired_def_counts(&sc)
                .get(&def)
                .copied()
                .unwrap_or(0)
                == 0
            {
                if let Err(e) = self.inner.reconciler.try_remove_foreground(&def).await {
                    tracing::warn!(error = %e, "runtime remove during built-in disable failed");
                }
            }
        }

        self.inner.schedule_resync("patch_skill builtin");
        Ok(updated)
    }
}
