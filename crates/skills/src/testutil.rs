//! In-memory Skills Runtime.
//!
//! A faithful stand-in for the host's runtime, used by this crate's tests
//! and available to embedders that need one (demos, dry-runs). Indexing
//! succeeds only when the def's location is a readable directory with a
//! valid SKILL.md, matching the real indexing provider's contract.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use curio_domain::runtime::{
    RuntimeError, RuntimeResult, SessionFilter, SessionOptions, SkillDef, SkillRecord,
    SkillsRuntime,
};

use crate::manifest;

#[derive(Default)]
struct SessionState {
    allow_skills: Vec<String>,
}

pub struct MemoryRuntime {
    skills: Mutex<HashMap<SkillDef, SkillRecord>>,
    sessions: Mutex<HashMap<String, SessionState>>,
    /// Locations forced to fail indexing, for fault-injection tests.
    rejected_locations: Mutex<HashSet<String>>,
}

impl MemoryRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            skills: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            rejected_locations: Mutex::new(HashSet::new()),
        })
    }

    /// Make every future add for `location` fail, regardless of content.
    pub fn reject_location(&self, location: &str) {
        self.rejected_locations.lock().insert(location.to_string());
    }

    pub fn clear_rejections(&self) {
        self.rejected_locations.lock().clear();
    }

    /// Current indexed defs, for assertions.
    pub fn current_defs(&self) -> HashSet<SkillDef> {
        self.skills.lock().keys().cloned().collect()
    }

    fn index(&self, def: &SkillDef) -> RuntimeResult<SkillRecord> {
        if self.rejected_locations.lock().contains(&def.location) {
            return Err(RuntimeError::Rejected(format!(
                "location rejected: {}",
                def.location
            )));
        }

        let dir = Path::new(&def.location);
        let md_path = dir.join("SKILL.md");
        let content = std::fs::read_to_string(&md_path)
            .map_err(|_| RuntimeError::Rejected(format!("no SKILL.md under {}", def.location)))?;

        let (parsed, _body) = manifest::parse_frontmatter(&content);
        let m = parsed.ok_or_else(|| {
            RuntimeError::Rejected(format!("unparseable SKILL.md frontmatter in {}", def.location))
        })?;
        let basename = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let validation = m.validate(&basename);
        if !validation.is_valid() {
            return Err(RuntimeError::Rejected(validation.errors.join("; ")));
        }

        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Ok(SkillRecord {
            def: def.clone(),
            description: m.description.unwrap_or_default(),
            digest: hex::encode(hasher.finalize()),
            added_at: Utc::now(),
        })
    }

    fn matches(record: &SkillRecord, filter: &SessionFilter) -> bool {
        if !filter.types.is_empty() && !filter.types.contains(&record.def.skill_type) {
            return false;
        }
        if let Some(prefix) = &filter.name_prefix {
            if !record.def.name.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(prefix) = &filter.location_prefix {
            if !record.def.location.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if !filter.allow_skills.is_empty() && !filter.allow_skills.contains(&record.def.name) {
            return false;
        }
        true
    }
}

#[async_trait::async_trait]
impl SkillsRuntime for MemoryRuntime {
    async fn add_skill(&self, def: SkillDef) -> RuntimeResult<SkillRecord> {
        if let Some(existing) = self.skills.lock().get(&def) {
            return Err(RuntimeError::AlreadyExists(existing.def.name.clone()));
        }
        let record = self.index(&def)?;
        self.skills.lock().insert(def, record.clone());
        Ok(record)
    }

    async fn remove_skill(&self, def: SkillDef) -> RuntimeResult<SkillRecord> {
        self.skills
            .lock()
            .remove(&def)
            .ok_or_else(|| RuntimeError::NotFound(def.name.clone()))
    }

    async fn list_skills(&self, filter: Option<SessionFilter>) -> RuntimeResult<Vec<SkillRecord>> {
        // A session-scoped filter narrows to the session's allow list.
        if let Some(sid) = filter.as_ref().and_then(|f| f.session_id.clone()) {
            let sessions = self.sessions.lock();
            let state = sessions
                .get(&sid)
                .ok_or_else(|| RuntimeError::SessionNotFound(sid.clone()))?;
            if !state.allow_skills.is_empty() {
                let allowed = state.allow_skills.clone();
                drop(sessions);
                let skills = self.skills.lock();
                let mut records: Vec<SkillRecord> = skills
                    .values()
                    .filter(|r| allowed.contains(&r.def.name))
                    .cloned()
                    .collect();
                records.sort_by(|a, b| {
                    (&a.def.name, &a.def.location).cmp(&(&b.def.name, &b.def.location))
                });
                return Ok(records);
            }
        }

        let skills = self.skills.lock();
        let mut records: Vec<SkillRecord> = match &filter {
            None => skills.values().cloned().collect(),
            Some(f) => skills.values().filter(|r| Self::matches(r, f)).cloned().collect(),
        };
        records.sort_by(|a, b| {
            (&a.def.name, &a.def.location).cmp(&(&b.def.name, &b.def.location))
        });
        Ok(records)
    }

    async fn new_session(
        &self,
        options: SessionOptions,
    ) -> RuntimeResult<(String, Vec<SkillRecord>)> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let filter = SessionFilter {
            types: options.types.clone(),
            allow_skills: options.allow_skills.clone(),
            ..SessionFilter::default()
        };
        let active = self.list_skills(Some(filter)).await?;
        self.sessions.lock().insert(
            session_id.clone(),
            SessionState {
                allow_skills: options.allow_skills,
            },
        );
        Ok((session_id, active))
    }

    async fn close_session(&self, session_id: &str) -> RuntimeResult<()> {
        self.sessions
            .lock()
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::SessionNotFound(session_id.to_string()))
    }

    async fn skills_prompt_xml(&self, filter: Option<SessionFilter>) -> RuntimeResult<String> {
        let records = self.list_skills(filter).await?;
        let mut xml = String::from("<skills>\n");
        for r in &records {
            xml.push_str(&format!(
                "  <skill name=\"{}\" location=\"{}\">{}</skill>\n",
                r.def.name, r.def.location, r.description
            ));
        }
        xml.push_str("</skills>");
        Ok(xml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curio_domain::skills::SkillType;

    fn skill_dir(root: &Path, name: &str) -> String {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("SKILL.md"),
            format!("---\nname: {name}\ndescription: a test skill\n---\nBody.\n"),
        )
        .unwrap();
        dir.to_string_lossy().into_owned()
    }

    fn def(name: &str, location: &str) -> SkillDef {
        SkillDef {
            skill_type: SkillType::Fs,
            name: name.to_string(),
            location: location.to_string(),
        }
    }

    #[tokio::test]
    async fn add_requires_valid_skill_md() {
        let tmp = tempfile::tempdir().unwrap();
        let rt = MemoryRuntime::new();

        let good = def("alpha", &skill_dir(tmp.path(), "alpha"));
        let rec = rt.add_skill(good).await.unwrap();
        assert_eq!(rec.description, "a test skill");
        assert!(!rec.digest.is_empty());

        let bad = def("beta", &tmp.path().join("beta").to_string_lossy());
        assert!(matches!(
            rt.add_skill(bad).await,
            Err(RuntimeError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_add_and_missing_remove_are_flagged() {
        let tmp = tempfile::tempdir().unwrap();
        let rt = MemoryRuntime::new();
        let d = def("alpha", &skill_dir(tmp.path(), "alpha"));

        rt.add_skill(d.clone()).await.unwrap();
        assert!(matches!(
            rt.add_skill(d.clone()).await,
            Err(RuntimeError::AlreadyExists(_))
        ));
        rt.remove_skill(d.clone()).await.unwrap();
        assert!(matches!(
            rt.remove_skill(d).await,
            Err(RuntimeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn prompt_xml_lists_indexed_skills() {
        let tmp = tempfile::tempdir().unwrap();
        let rt = MemoryRuntime::new();
        rt.add_skill(def("alpha", &skill_dir(tmp.path(), "alpha")))
            .await
            .unwrap();

        let xml = rt.skills_prompt_xml(None).await.unwrap();
        assert!(xml.starts_with("<skills>"));
        assert!(xml.contains("name=\"alpha\""));
    }

    #[tokio::test]
    async fn sessions_open_and_close() {
        let rt = MemoryRuntime::new();
        let (id, active) = rt.new_session(SessionOptions::default()).await.unwrap();
        assert!(active.is_empty());
        rt.close_session(&id).await.unwrap();
        assert!(matches!(
            rt.close_session(&id).await,
            Err(RuntimeError::SessionNotFound(_))
        ));
    }
}
