//! Skills Runtime collaborator interface.
//!
//! The runtime is supplied by the host process: it indexes skill
//! directories (reading SKILL.md, computing a content digest), tracks
//! per-session activity, and renders the prompt XML. The skill store drives
//! it through this trait and never reaches into its internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::skills::SkillType;

/// Identity of a skill inside the runtime: everything the indexing provider
/// needs to load it. Two store entries pointing at the same `(type, name,
/// location)` triple are the same runtime skill.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillDef {
    #[serde(rename = "type")]
    pub skill_type: SkillType,
    pub name: String,
    pub location: String,
}

/// What the runtime knows about an indexed skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillRecord {
    pub def: SkillDef,
    #[serde(default)]
    pub description: String,
    /// Content digest computed by the indexing provider.
    #[serde(default)]
    pub digest: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionActivity {
    Active,
    Inactive,
    #[default]
    Any,
}

/// Filter for runtime listings and prompt rendering.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub activity: SessionActivity,
    pub types: Vec<SkillType>,
    pub name_prefix: Option<String>,
    pub location_prefix: Option<String>,
    pub allow_skills: Vec<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub allow_skills: Vec<String>,
    pub types: Vec<SkillType>,
}

/// Runtime-side failures. `AlreadyExists` on add and `NotFound` on remove
/// are benign for the store's duplicate-safe accounting; everything else is
/// a rejection.
#[derive(thiserror::Error, Debug)]
pub enum RuntimeError {
    #[error("skill already exists: {0}")]
    AlreadyExists(String),

    #[error("skill not found: {0}")]
    NotFound(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Capability set of the in-process Skills Runtime.
#[async_trait::async_trait]
pub trait SkillsRuntime: Send + Sync {
    /// Index a skill. Fails with `Rejected` when the location cannot be
    /// indexed (no SKILL.md, unreadable directory, bad frontmatter).
    async fn add_skill(&self, def: SkillDef) -> RuntimeResult<SkillRecord>;

    /// Drop a skill from the index.
    async fn remove_skill(&self, def: SkillDef) -> RuntimeResult<SkillRecord>;

    async fn list_skills(&self, filter: Option<SessionFilter>) -> RuntimeResult<Vec<SkillRecord>>;

    /// Open a session; returns the session ID and the initially-active set.
    async fn new_session(&self, options: SessionOptions)
        -> RuntimeResult<(String, Vec<SkillRecord>)>;

    async fn close_session(&self, session_id: &str) -> RuntimeResult<()>;

    /// Render the `<skills>` prompt block for the filtered skill set.
    async fn skills_prompt_xml(&self, filter: Option<SessionFilter>) -> RuntimeResult<String>;
}
