//! Skill catalog schema types.
//!
//! Persisted as camelCase JSON in `skill_bundles.json` (user store) and the
//! embedded built-in manifest.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a skill's content lives. User skills are `fs` (a real directory);
/// built-in skills are `embeddedfs` (a path inside the embedded tree,
/// resolved through the hydration directory at runtime).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillType {
    Fs,
    Embeddedfs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Unknown,
    Present,
    Missing,
    Error,
}

/// Last observed on-disk state of a skill's content directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillPresence {
    pub status: PresenceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_since: Option<DateTime<Utc>>,
}

impl SkillPresence {
    pub fn unknown() -> Self {
        Self {
            status: PresenceStatus::Unknown,
            last_checked_at: None,
            last_seen_at: None,
            missing_since: None,
        }
    }
}

/// A group of skills. Deletion is a two-step lifecycle: `softDeletedAt`
/// tombstones the bundle, the sweeper hard-deletes it after the grace
/// window if it stayed empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillBundle {
    pub schema_version: String,
    pub id: String,
    pub slug: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub is_enabled: bool,
    pub is_built_in: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_deleted_at: Option<DateTime<Utc>>,
}

/// One executable/descriptive unit inside a bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skill {
    pub schema_version: String,
    pub id: String,
    pub slug: String,
    #[serde(rename = "type")]
    pub skill_type: SkillType,
    pub location: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<SkillPresence>,
    pub is_enabled: bool,
    pub is_built_in: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// The whole user-side skill document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillStoreSchema {
    pub schema_version: String,
    #[serde(default)]
    pub bundles: BTreeMap<String, SkillBundle>,
    /// Keyed bundle ID → skill slug → skill. Every outer key must exist in
    /// `bundles`.
    #[serde(default)]
    pub skills: BTreeMap<String, BTreeMap<String, Skill>>,
}

impl Default for SkillStoreSchema {
    fn default() -> Self {
        Self {
            schema_version: crate::SCHEMA_VERSION.to_string(),
            bundles: BTreeMap::new(),
            skills: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skill_type_wire_names() {
        assert_eq!(serde_json::to_value(SkillType::Fs).unwrap(), "fs");
        assert_eq!(
            serde_json::to_value(SkillType::Embeddedfs).unwrap(),
            "embeddedfs"
        );
    }

    #[test]
    fn presence_defaults_to_unknown() {
        let p = SkillPresence::unknown();
        assert_eq!(p.status, PresenceStatus::Unknown);
        assert!(p.last_checked_at.is_none());
        assert!(p.missing_since.is_none());
    }

    #[test]
    fn soft_deleted_at_omitted_when_absent() {
        let b = SkillBundle {
            schema_version: crate::SCHEMA_VERSION.into(),
            id: "b1".into(),
            slug: "b1".into(),
            display_name: "Bundle".into(),
            description: String::new(),
            is_enabled: true,
            is_built_in: false,
            created_at: Utc::now(),
            modified_at: Utc::now(),
            soft_deleted_at: None,
        };
        let json = serde_json::to_value(&b).unwrap();
        assert!(json.get("softDeletedAt").is_none());
    }
}
