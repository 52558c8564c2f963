//! Runtime reconciliation.
//!
//! All runtime mutations funnel through one mutex so the shared runtime
//! sees at most one caller at a time. Two flavors share the diff: the
//! best-effort resync logs failures and keeps going; the strict resync
//! (used to roll back a failed store commit) aborts on the first
//! non-benign error and is retried by the caller.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use curio_domain::error::{Error, Result};
use curio_domain::runtime::{RuntimeError, SkillDef, SkillsRuntime};
use curio_domain::trace::TraceEvent;

pub(crate) const FOREGROUND_TIMEOUT: Duration = Duration::from_secs(15);
pub(crate) const RESYNC_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const ROLLBACK_ATTEMPTS: u32 = 3;
pub(crate) const ROLLBACK_BACKOFF: Duration = Duration::from_millis(150);

fn rejected(op: &str, message: impl std::fmt::Display) -> Error {
    Error::RuntimeRejected {
        op: op.to_string(),
        message: message.to_string(),
    }
}

fn sorted(defs: impl IntoIterator<Item = SkillDef>) -> Vec<SkillDef> {
    let mut v: Vec<_> = defs.into_iter().collect();
    v.sort_by(|a, b| (&a.name, &a.location).cmp(&(&b.name, &b.location)));
    v
}

pub(crate) struct Reconciler {
    runtime: Arc<dyn SkillsRuntime>,
    mu: tokio::sync::Mutex<()>,
}

impl Reconciler {
    pub fn new(runtime: Arc<dyn SkillsRuntime>) -> Self {
        Self {
            runtime,
            mu: tokio::sync::Mutex::new(()),
        }
    }

    /// Foreground validation add. `AlreadyExists` counts as success.
    pub async fn try_add_foreground(&self, def: &SkillDef) -> Result<()> {
        let _g = self.mu.lock().await;
        match tokio::time::timeout(FOREGROUND_TIMEOUT, self.runtime.add_skill(def.clone())).await {
            Err(_) => Err(rejected("addSkill", "timed out")),
            Ok(Ok(_)) | Ok(Err(RuntimeError::AlreadyExists(_))) => Ok(()),
            Ok(Err(e)) => Err(rejected("addSkill", e)),
        }
    }

    /// Foreground removal. `NotFound` counts as success.
    pub async fn try_remove_foreground(&self, def: &SkillDef) -> Result<()> {
        let _g = self.mu.lock().await;
        match tokio::time::timeout(FOREGROUND_TIMEOUT, self.runtime.remove_skill(def.clone())).await
        {
            Err(_) => Err(rejected("removeSkill", "timed out")),
            Ok(Ok(_)) | Ok(Err(RuntimeError::NotFound(_))) => Ok(()),
            Ok(Err(e)) => Err(rejected("removeSkill", e)),
        }
    }

    /// Drive the runtime towards `desired`, logging failures. Never
    /// surfaces errors to callers.
    pub async fn resync_best_effort(&self, desired: &HashSet<SkillDef>, reason: &str) {
        match self.resync(desired, false).await {
            Ok(()) => TraceEvent::RuntimeResynced {
                reason: reason.to_string(),
                desired: desired.len(),
            }
            .emit(),
            Err(e) => tracing::warn!(reason, error = %e, "best-effort resync failed"),
        }
    }

    /// Strict resync: any non-benign add/remove failure aborts.
    pub async fn resync_strict(&self, desired: &HashSet<SkillDef>) -> Result<()> {
        self.resync(desired, true).await
    }

    async fn resync(&self, desired: &HashSet<SkillDef>, strict: bool) -> Result<()> {
        let _g = self.mu.lock().await;
        match tokio::time::timeout(RESYNC_TIMEOUT, self.resync_locked(desired, strict)).await {
            Ok(res) => res,
            Err(_) => Err(rejected("resync", "timed out")),
        }
    }

    async fn resync_locked(&self, desired: &HashSet<SkillDef>, strict: bool) -> Result<()> {
        let current = self
            .runtime
            .list_skills(None)
            .await
            .map_err(|e| rejected("listSkills", e))?;
        let mut present: HashSet<SkillDef> = current.into_iter().map(|r| r.def).collect();

        // Add missing defs first so replacements land before removals.
        for def in sorted(desired.difference(&present).cloned()) {
            match self.runtime.add_skill(def.clone()).await {
                Ok(_) | Err(RuntimeError::AlreadyExists(_)) => {
                    present.insert(def);
                }
                Err(e) if strict => return Err(rejected("addSkill", e)),
                Err(e) => {
                    tracing::warn!(name = %def.name, location = %def.location, error = %e, "resync add failed");
                }
            }
        }

        for def in sorted(present.difference(desired).cloned()) {
            // Replacement safety: when the desired set moves a skill to a
            // new location that has not landed in the runtime, keep the old
            // def so a bad location cannot drop the skill entirely.
            let replacement_pending = desired.iter().any(|r| {
                r.skill_type == def.skill_type && r.name == def.name && !present.contains(r)
            });
            if replacement_pending {
                tracing::warn!(
                    name = %def.name,
                    location = %def.location,
                    "keeping old skill until its replacement is indexed"
                );
                continue;
            }
            match self.runtime.remove_skill(def.clone()).await {
                Ok(_) | Err(RuntimeError::NotFound(_)) => {}
                Err(e) if strict => return Err(rejected("removeSkill", e)),
                Err(e) => {
                    tracing::warn!(name = %def.name, location = %def.location, error = %e, "resync remove failed");
                }
            }
        }
        Ok(())
    }

    /// Rollback path: strict resync retried with backoff. Returns whether
    /// the runtime converged.
    pub async fn resync_strict_with_retry(&self, desired: &HashSet<SkillDef>, reason: &str) -> bool {
        for attempt in 1..=ROLLBACK_ATTEMPTS {
            match self.resync_strict(desired).await {
                Ok(()) => {
                    TraceEvent::RuntimeRollback {
                        reason: reason.to_string(),
                        converged: true,
                    }
                    .emit();
                    return true;
                }
                Err(e) => {
                    tracing::warn!(reason, attempt, error = %e, "strict resync attempt failed");
                    if attempt < ROLLBACK_ATTEMPTS {
                        tokio::time::sleep(ROLLBACK_BACKOFF).await;
                    }
                }
            }
        }
        tracing::error!(reason, "runtime rollback did not converge");
        TraceEvent::RuntimeRollback {
            reason: reason.to_string(),
            converged: false,
        }
        .emit();
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MemoryRuntime;
    use curio_domain::skills::SkillType;

    fn def(name: &str, location: &str) -> SkillDef {
        SkillDef {
            skill_type: SkillType::Fs,
            name: name.to_string(),
            location: location.to_string(),
        }
    }

    fn skill_dir(root: &std::path::Path, name: &str) -> String {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("SKILL.md"),
            format!("---\nname: {name}\ndescription: test skill\n---\n"),
        )
        .unwrap();
        dir.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn resync_adds_missing_and_removes_extras() {
        let tmp = tempfile::tempdir().unwrap();
        let rt = MemoryRuntime::new();
        let rec = Reconciler::new(rt.clone());

        let extra = def("old", &skill_dir(tmp.path(), "old"));
        rt.add_skill(extra.clone()).await.unwrap();

        let wanted = def("new", &skill_dir(tmp.path(), "new"));
        let desired: HashSet<_> = [wanted.clone()].into();
        rec.resync_best_effort(&desired, "test").await;

        let defs = rt.current_defs();
        assert!(defs.contains(&wanted));
        assert!(!defs.contains(&extra));
    }

    #[tokio::test]
    async fn replacement_safety_keeps_old_def_when_new_location_is_bad() {
        let tmp = tempfile::tempdir().unwrap();
        let rt = MemoryRuntime::new();
        let rec = Reconciler::new(rt.clone());

        let old = def("tool", &skill_dir(tmp.path(), "tool"));
        rt.add_skill(old.clone()).await.unwrap();

        // Same (type, name), invalid location: the add fails, so the old
        // def must survive.
        let bad = def("tool", &tmp.path().join("nope").to_string_lossy());
        let desired: HashSet<_> = [bad.clone()].into();
        rec.resync_best_effort(&desired, "test").await;

        let defs = rt.current_defs();
        assert!(defs.contains(&old), "old def kept");
        assert!(!defs.contains(&bad));
    }

    #[tokio::test]
    async fn replacement_landing_allows_old_def_removal() {
        let tmp = tempfile::tempdir().unwrap();
        let rt = MemoryRuntime::new();
        let rec = Reconciler::new(rt.clone());

        let old = def("tool", &skill_dir(tmp.path(), "tool"));
        rt.add_skill(old.clone()).await.unwrap();

        let new = def("tool", &skill_dir(tmp.path(), "tool-v2"));
        let desired: HashSet<_> = [new.clone()].into();
        rec.resync_best_effort(&desired, "test").await;

        let defs = rt.current_defs();
        assert!(defs.contains(&new));
        assert!(!defs.contains(&old), "old def removed once replacement landed");
    }

    #[tokio::test]
    async fn strict_resync_aborts_on_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let rt = MemoryRuntime::new();
        let rec = Reconciler::new(rt.clone());

        let bad = def("tool", &tmp.path().join("missing").to_string_lossy());
        let desired: HashSet<_> = [bad].into();
        assert!(rec.resync_strict(&desired).await.is_err());
    }

    #[tokio::test]
    async fn foreground_add_treats_already_exists_as_success() {
        let tmp = tempfile::tempdir().unwrap();
        let rt = MemoryRuntime::new();
        let rec = Reconciler::new(rt.clone());

        let d = def("tool", &skill_dir(tmp.path(), "tool"));
        rec.try_add_foreground(&d).await.unwrap();
        rec.try_add_foreground(&d).await.unwrap();
        assert_eq!(rt.current_defs().len(), 1);
    }
}
