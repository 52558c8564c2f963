//! Skill manifest — parsed from SKILL.md YAML frontmatter.
//!
//! Every skill directory carries a SKILL.md whose frontmatter is a YAML
//! block delimited by `---` at the top of the file:
//!
//! ```yaml
//! ---
//! name: web-search
//! description: Search the web and summarize results with citations.
//! ---
//! ```
//!
//! `name` must equal the directory basename; `description` is required.

use serde::{Deserialize, Serialize};

use curio_domain::tag::is_valid_tag;

/// Parsed frontmatter from a SKILL.md file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SkillManifest {
    #[serde(default)]
    pub name: Option<String>,
    /// Trigger description — tells the model when to invoke this skill.
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Validation issues found in a manifest.
#[derive(Debug, Clone)]
pub struct ManifestValidation {
    pub errors: Vec<String>,
}

impl ManifestValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl SkillManifest {
    pub fn validate(&self, dir_basename: &str) -> ManifestValidation {
        let mut errors = Vec::new();

        match &self.name {
            None => errors.push("missing required field: name".into()),
            Some(n) if !is_valid_tag(n) => {
                errors.push(format!("invalid skill name {n:?}"));
            }
            Some(n) if n != dir_basename => {
                errors.push(format!(
                    "skill name {n:?} does not match directory {dir_basename:?}"
                ));
            }
            _ => {}
        }

        match &self.description {
            None => errors.push("missing required field: description".into()),
            Some(d) if d.trim().is_empty() => {
                errors.push("description must not be empty".into())
            }
            _ => {}
        }

        ManifestValidation { errors }
    }
}

/// Parse YAML frontmatter from SKILL.md content.
///
/// Returns `(manifest, body)` where body is the markdown after the
/// frontmatter. A missing or unparseable frontmatter block yields `None`
/// and the full content as body.
pub fn parse_frontmatter(content: &str) -> (Option<SkillManifest>, String) {
    let trimmed = content.trim_start();
    if !trimmed.starts_with("---") {
        return (None, content.to_string());
    }

    let after_open = &trimmed[3..];
    if let Some(close_idx) = after_open.find("\n---") {
        let yaml_str = &after_open[..close_idx];
        let body_start = close_idx + 4; // skip "\n---"
        let body = after_open[body_start..].trim_start_matches('\n').to_string();

        match serde_yaml::from_str::<SkillManifest>(yaml_str) {
            Ok(manifest) => (Some(manifest), body),
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse SKILL.md frontmatter");
                (None, content.to_string())
            }
        }
    } else {
        (None, content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic_frontmatter() {
        let md = "---\nname: web-search\ndescription: Search the web.\ntags: [research]\n---\n# Web search\nBody here.\n";
        let (manifest, body) = parse_frontmatter(md);
        let m = manifest.unwrap();
        assert_eq!(m.name.as_deref(), Some("web-search"));
        assert_eq!(m.description.as_deref(), Some("Search the web."));
        assert_eq!(m.tags, vec!["research"]);
        assert!(body.starts_with("# Web search"));
    }

    #[test]
    fn parse_no_frontmatter() {
        let md = "# Just a doc\nNo frontmatter here.";
        let (manifest, body) = parse_frontmatter(md);
        assert!(manifest.is_none());
        assert_eq!(body, md);
    }

    #[test]
    fn validate_requires_name_matching_directory() {
        let m = SkillManifest {
            name: Some("web-search".into()),
            description: Some("ok".into()),
            tags: vec![],
        };
        assert!(m.validate("web-search").is_valid());
        assert!(!m.validate("other-dir").is_valid());
    }

    #[test]
    fn validate_requires_description() {
        let m = SkillManifest {
            name: Some("web-search".into()),
            description: None,
            tags: vec![],
        };
        let v = m.validate("web-search");
        assert!(!v.is_valid());
        assert!(v.errors[0].contains("description"));
    }
}
