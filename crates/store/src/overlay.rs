//! Overlay key-value store.
//!
//! A small durable map `(group, key) → {value, modifiedAt}` used to layer
//! enable flags (and the per-provider default-model choice) over the
//! immutable built-in base. Groups are declared at open; access to an
//! undeclared group is a programming error surfaced as `InvalidRequest`.

use std::collections::BTreeMap;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use curio_domain::error::{Error, Result};

use crate::mapfile::atomic_write;

/// One persisted flag: an arbitrary JSON value plus its write time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagRecord {
    pub value: serde_json::Value,
    pub modified_at: DateTime<Utc>,
}

/// A decoded flag handed back to typed callers.
#[derive(Debug, Clone, PartialEq)]
pub struct Flag<V> {
    pub value: V,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OverlayDoc {
    #[serde(default)]
    groups: BTreeMap<String, BTreeMap<String, FlagRecord>>,
}

/// Durable flag store. Single writer, snapshot readers, atomic commits.
pub struct OverlayStore {
    path: PathBuf,
    declared: Vec<String>,
    state: RwLock<Arc<OverlayDoc>>,
    write_mu: Mutex<()>,
}

impl OverlayStore {
    /// Open the store at `path`, creating it when missing. `groups` is the
    /// closed set of group IDs this store will serve.
    pub fn open(path: impl Into<PathBuf>, groups: &[&str]) -> Result<Arc<Self>> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let doc = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            let doc = OverlayDoc::default();
            atomic_write(&path, &serde_json::to_vec_pretty(&doc)?)?;
            doc
        };

        tracing::debug!(path = %path.display(), groups = ?groups, "overlay store opened");
        Ok(Arc::new(Self {
            path,
            declared: groups.iter().map(|g| g.to_string()).collect(),
            state: RwLock::new(Arc::new(doc)),
            write_mu: Mutex::new(()),
        }))
    }

    fn check_declared(&self, group: &str) -> Result<()> {
        if !self.declared.iter().any(|g| g == group) {
            return Err(Error::invalid(format!("undeclared overlay group {group:?}")));
        }
        Ok(())
    }

    /// Typed view over one group.
    pub fn typed<V>(self: &Arc<Self>, group: &str) -> Result<TypedGroup<V>> {
        self.check_declared(group)?;
        Ok(TypedGroup {
            store: self.clone(),
            group: group.to_string(),
            _marker: PhantomData,
        })
    }

    fn get_raw(&self, group: &str, key: &str) -> Option<FlagRecord> {
        self.state.read().groups.get(group)?.get(key).cloned()
    }

    /// All records of one group, for view rematerialization.
    pub fn group_snapshot(&self, group: &str) -> Result<BTreeMap<String, FlagRecord>> {
        self.check_declared(group)?;
        Ok(self
            .state
            .read()
            .groups
            .get(group)
            .cloned()
            .unwrap_or_default())
    }

    fn set_raw(&self, group: &str, key: &str, value: serde_json::Value) -> Result<FlagRecord> {
        let _w = self.write_mu.lock();
        let record = FlagRecord {
            value,
            modified_at: Utc::now(),
        };

        let mut doc = OverlayDoc {
            groups: self.state.read().groups.clone(),
        };
        doc.groups
            .entry(group.to_string())
            .or_default()
            .insert(key.to_string(), record.clone());

        atomic_write(&self.path, &serde_json::to_vec_pretty(&doc)?)?;
        *self.state.write() = Arc::new(doc);
        Ok(record)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub struct TypedGroup<V> {
    store: Arc<OverlayStore>,
    group: String,
    _marker: PhantomData<V>,
}

impl<V> TypedGroup<V>
where
    V: Serialize + DeserializeOwned,
{
    pub fn get(&self, key: &str) -> Result<Option<Flag<V>>> {
        match self.store.get_raw(&self.group, key) {
            None => Ok(None),
            Some(rec) => {
                let value: V = serde_json::from_value(rec.value)?;
                Ok(Some(Flag {
                    value,
                    modified_at: rec.modified_at,
                }))
            }
        }
    }

    /// Persist `value` under `key`, stamping `modifiedAt = now`.
    pub fn set(&self, key: &str, value: V) -> Result<Flag<V>> {
        let raw = serde_json::to_value(&value)?;
        let rec = self.store.set_raw(&self.group, key, raw)?;
        Ok(Flag {
            value,
            modified_at: rec.modified_at,
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overlay.db");
        let _store = OverlayStore::open(&path, &["bundles"]).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn set_then_get_round_trips_with_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = OverlayStore::open(dir.path().join("overlay.db"), &["bundles"]).unwrap();
        let group: TypedGroup<bool> = store.typed("bundles").unwrap();

        assert!(group.get("b1").unwrap().is_none());
        let written = group.set("b1", true).unwrap();
        let read = group.get("b1").unwrap().unwrap();
        assert!(read.value);
        assert_eq!(read.modified_at, written.modified_at);
    }

    #[test]
    fn flags_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overlay.db");
        {
            let store = OverlayStore::open(&path, &["skills"]).unwrap();
            let group: TypedGroup<bool> = store.typed("skills").unwrap();
            group.set("b1::s1", false).unwrap();
        }
        let store = OverlayStore::open(&path, &["skills"]).unwrap();
        let group: TypedGroup<bool> = store.typed("skills").unwrap();
        assert_eq!(group.get("b1::s1").unwrap().unwrap().value, false);
    }

    #[test]
    fn undeclared_group_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = OverlayStore::open(dir.path().join("overlay.db"), &["bundles"]).unwrap();
        assert!(store.typed::<bool>("nope").is_err());
    }

    #[test]
    fn groups_are_independent_namespaces() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            OverlayStore::open(dir.path().join("overlay.db"), &["bundles", "skills"]).unwrap();
        let bundles: TypedGroup<bool> = store.typed("bundles").unwrap();
        let skills: TypedGroup<bool> = store.typed("skills").unwrap();
        bundles.set("x", true).unwrap();
        assert!(skills.get("x").unwrap().is_none());
    }

    #[test]
    fn string_values_work_too() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            OverlayStore::open(dir.path().join("overlay.db"), &["provider_defaults"]).unwrap();
        let defaults: TypedGroup<String> = store.typed("provider_defaults").unwrap();
        defaults.set("anthropic", "claude-fast".to_string()).unwrap();
        assert_eq!(
            defaults.get("anthropic").unwrap().unwrap().value,
            "claude-fast"
        );
    }
}
