//! Structural and referential validation.
//!
//! Pure functions over the schema types; every failure is
//! `Error::InvalidRequest` (or `SchemaVersionMismatch`) naming the field.
//! Stores call these before any state is persisted.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::presets::{ModelPreset, OutputParam, PresetsSchema, ProviderPreset, ReasoningParams};
use crate::skills::{Skill, SkillBundle, SkillStoreSchema, SkillType};
use crate::tag::{is_valid_schema_name, is_valid_tag};
use crate::SCHEMA_VERSION;

pub const MAX_DISPLAY_NAME_LEN: usize = 256;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_DESCRIPTION_LEN: usize = 4096;
pub const MAX_LOCATION_LEN: usize = 4096;
pub const MAX_STOP_SEQUENCES: usize = 4;

fn check_schema_version(found: &str) -> Result<()> {
    if found != SCHEMA_VERSION {
        return Err(Error::SchemaVersionMismatch {
            found: found.to_string(),
            expected: SCHEMA_VERSION.to_string(),
        });
    }
    Ok(())
}

fn check_timestamps(what: &str, created: DateTime<Utc>, modified: DateTime<Utc>) -> Result<()> {
    if created == DateTime::UNIX_EPOCH || modified == DateTime::UNIX_EPOCH {
        return Err(Error::invalid(format!("{what}: zero timestamp")));
    }
    if modified < created {
        return Err(Error::invalid(format!(
            "{what}: modifiedAt precedes createdAt"
        )));
    }
    Ok(())
}

fn check_tag(what: &str, value: &str) -> Result<()> {
    if !is_valid_tag(value) {
        return Err(Error::invalid(format!("{what}: invalid tag {value:?}")));
    }
    Ok(())
}

fn check_non_blank(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::invalid(format!("{what} must not be blank")));
    }
    Ok(())
}

fn check_len(what: &str, value: &str, max: usize) -> Result<()> {
    if value.len() > max {
        return Err(Error::invalid(format!(
            "{what} exceeds {max} bytes ({} given)",
            value.len()
        )));
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model presets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn validate_reasoning(r: &ReasoningParams) -> Result<()> {
    match r {
        ReasoningParams::HybridWithTokens { tokens, .. } => {
            if *tokens == 0 {
                return Err(Error::invalid("reasoning.tokens must be > 0"));
            }
        }
        // Level and summary style are closed enums; the decode already
        // rejects unknown values.
        ReasoningParams::SingleWithLevels { .. } => {}
    }
    Ok(())
}

pub fn validate_output_param(o: &OutputParam) -> Result<()> {
    match o {
        OutputParam::Text => Ok(()),
        OutputParam::JsonSchema { schema } => {
            if !is_valid_schema_name(&schema.name) {
                return Err(Error::invalid(format!(
                    "outputParam.schema.name: invalid name {:?}",
                    schema.name
                )));
            }
            Ok(())
        }
    }
}

pub fn validate_model_preset(m: &ModelPreset) -> Result<()> {
    check_schema_version(&m.schema_version)?;
    check_tag("modelPreset.id", &m.id)?;
    check_tag("modelPreset.name", &m.name)?;
    check_tag("modelPreset.slug", &m.slug)?;
    check_non_blank("modelPreset.displayName", &m.display_name)?;
    check_len("modelPreset.displayName", &m.display_name, MAX_DISPLAY_NAME_LEN)?;
    if m.temperature.is_none() && m.reasoning.is_none() {
        return Err(Error::invalid(
            "modelPreset requires temperature or reasoning",
        ));
    }
    if let Some(r) = &m.reasoning {
        validate_reasoning(r)?;
    }
    if m.stop_sequences.len() > MAX_STOP_SEQUENCES {
        return Err(Error::invalid(format!(
            "modelPreset.stopSequences: at most {MAX_STOP_SEQUENCES} entries"
        )));
    }
    if m.stop_sequences.iter().any(|s| s.trim().is_empty()) {
        return Err(Error::invalid("modelPreset.stopSequences: blank entry"));
    }
    if let Some(o) = &m.output_param {
        validate_output_param(o)?;
    }
    check_timestamps("modelPreset", m.created_at, m.modified_at)
}

pub fn validate_provider_preset(p: &ProviderPreset) -> Result<()> {
    check_schema_version(&p.schema_version)?;
    check_tag("providerPreset.name", &p.name)?;
    check_non_blank("providerPreset.displayName", &p.display_name)?;
    check_non_blank("providerPreset.origin", &p.origin)?;
    check_non_blank(
        "providerPreset.chatCompletionPathPrefix",
        &p.chat_completion_path_prefix,
    )?;
    if let Some(id) = p.default_model_preset_id.as_deref() {
        if !id.is_empty() && !p.model_presets.contains_key(id) {
            return Err(Error::invalid(format!(
                "providerPreset.defaultModelPresetID {id:?} does not resolve"
            )));
        }
    }
    for (id, m) in &p.model_presets {
        if *id != m.id {
            return Err(Error::invalid(format!(
                "modelPresets key {id:?} does not match preset id {:?}",
                m.id
            )));
        }
        if m.is_built_in != p.is_built_in {
            return Err(Error::invalid(format!(
                "modelPreset {id:?}: isBuiltIn differs from its provider"
            )));
        }
        validate_model_preset(m)?;
    }
    check_timestamps("providerPreset", p.created_at, p.modified_at)
}

/// Whole-document check for the user preset file. The persisted
/// `defaultProvider` is deliberately not resolved here: values loaded from
/// disk may dangle and the read path falls back (patches are validated
/// separately).
pub fn validate_presets_schema(sc: &PresetsSchema) -> Result<()> {
    check_schema_version(&sc.schema_version)?;
    for (name, p) in &sc.provider_presets {
        if *name != p.name {
            return Err(Error::invalid(format!(
                "providerPresets key {name:?} does not match provider name {:?}",
                p.name
            )));
        }
        validate_provider_preset(p)?;
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Skills
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn validate_skill_bundle(b: &SkillBundle) -> Result<()> {
    check_schema_version(&b.schema_version)?;
    check_tag("bundle.id", &b.id)?;
    check_tag("bundle.slug", &b.slug)?;
    check_non_blank("bundle.displayName", &b.display_name)?;
    check_len("bundle.displayName", &b.display_name, MAX_DISPLAY_NAME_LEN)?;
    check_len("bundle.description", &b.description, MAX_DESCRIPTION_LEN)?;
    if b.soft_deleted_at.is_some() && b.is_enabled {
        return Err(Error::invalid("bundle: soft-deleted bundles cannot be enabled"));
    }
    check_timestamps("bundle", b.created_at, b.modified_at)
}

pub fn validate_skill(s: &Skill) -> Result<()> {
    check_schema_version(&s.schema_version)?;
    check_tag("skill.id", &s.id)?;
    check_tag("skill.slug", &s.slug)?;
    check_non_blank("skill.location", &s.location)?;
    check_len("skill.location", &s.location, MAX_LOCATION_LEN)?;
    check_non_blank("skill.name", &s.name)?;
    check_len("skill.name", &s.name, MAX_NAME_LEN)?;
    if let Some(d) = &s.display_name {
        check_len("skill.displayName", d, MAX_DISPLAY_NAME_LEN)?;
    }
    if let Some(d) = &s.description {
        check_len("skill.description", d, MAX_DESCRIPTION_LEN)?;
    }
    match (s.skill_type, s.is_built_in) {
        (SkillType::Fs, true) => {
            return Err(Error::invalid("skill: built-in skills must be embeddedfs"));
        }
        (SkillType::Embeddedfs, false) => {
            return Err(Error::invalid("skill: user skills must be fs"));
        }
        _ => {}
    }
    check_timestamps("skill", s.created_at, s.modified_at)
}

/// Whole-document check for the user skill file: per-record validity plus
/// the referential rules (skill submaps only under existing bundles, map
/// keys equal to record identity).
pub fn validate_skill_schema(sc: &SkillStoreSchema) -> Result<()> {
    check_schema_version(&sc.schema_version)?;
    for (id, b) in &sc.bundles {
        if *id != b.id {
            return Err(Error::invalid(format!(
                "bundles key {id:?} does not match bundle id {:?}",
                b.id
            )));
        }
        validate_skill_bundle(b)?;
    }
    for (bundle_id, by_slug) in &sc.skills {
        if !sc.bundles.contains_key(bundle_id) {
            return Err(Error::invalid(format!(
                "skills submap {bundle_id:?} has no bundle record"
            )));
        }
        for (slug, sk) in by_slug {
            if *slug != sk.slug {
                return Err(Error::invalid(format!(
                    "skills key {slug:?} does not match skill slug {:?}",
                    sk.slug
                )));
            }
            validate_skill(sk)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::{OutputSchema, ReasoningLevel};
    use std::collections::BTreeMap;

    fn model(id: &str) -> ModelPreset {
        ModelPreset {
            schema_version: SCHEMA_VERSION.into(),
            id: id.into(),
            name: "test-model".into(),
            slug: id.into(),
            display_name: "Test model".into(),
            is_enabled: true,
            is_built_in: false,
            temperature: Some(0.7),
            reasoning: None,
            max_prompt_length: Some(200_000),
            max_output_length: Some(8192),
            timeout: Some(120),
            stop_sequences: vec![],
            output_param: None,
            created_at: Utc::now(),
            modified_at: Utc::now(),
        }
    }

    fn provider(name: &str) -> ProviderPreset {
        ProviderPreset {
            schema_version: SCHEMA_VERSION.into(),
            name: name.into(),
            display_name: "Test".into(),
            sdk_type: "openai-compat".into(),
            is_enabled: true,
            is_built_in: false,
            origin: "https://api.test.example".into(),
            chat_completion_path_prefix: "/v1/chat/completions".into(),
            api_key_header_key: "authorization".into(),
            default_headers: BTreeMap::new(),
            default_model_preset_id: None,
            model_presets: BTreeMap::new(),
            created_at: Utc::now(),
            modified_at: Utc::now(),
        }
    }

    fn bundle(id: &str) -> SkillBundle {
        SkillBundle {
            schema_version: SCHEMA_VERSION.into(),
            id: id.into(),
            slug: id.into(),
            display_name: "Bundle".into(),
            description: String::new(),
            is_enabled: true,
            is_built_in: false,
            created_at: Utc::now(),
            modified_at: Utc::now(),
            soft_deleted_at: None,
        }
    }

    fn skill(slug: &str) -> Skill {
        Skill {
            schema_version: SCHEMA_VERSION.into(),
            id: "0190b5a2-4f00-7cc3-9a3e-000000000001".into(),
            slug: slug.into(),
            skill_type: SkillType::Fs,
            location: "/tmp/skills/git-helper".into(),
            name: "git-helper".into(),
            display_name: None,
            description: None,
            tags: vec![],
            presence: None,
            is_enabled: true,
            is_built_in: false,
            created_at: Utc::now(),
            modified_at: Utc::now(),
        }
    }

    #[test]
    fn model_preset_needs_temperature_or_reasoning() {
        let mut m = model("m1");
        m.temperature = None;
        m.reasoning = None;
        assert!(validate_model_preset(&m).is_err());

        m.reasoning = Some(ReasoningParams::SingleWithLevels {
            level: ReasoningLevel::Medium,
            summary_style: None,
        });
        assert!(validate_model_preset(&m).is_ok());
    }

    #[test]
    fn reasoning_token_budget_must_be_positive() {
        let r = ReasoningParams::HybridWithTokens {
            tokens: 0,
            summary_style: None,
        };
        assert!(validate_reasoning(&r).is_err());
    }

    #[test]
    fn stop_sequence_limits() {
        let mut m = model("m1");
        m.stop_sequences = vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into()];
        assert!(validate_model_preset(&m).is_err());
        m.stop_sequences = vec!["a".into(), "  ".into()];
        assert!(validate_model_preset(&m).is_err());
        m.stop_sequences = vec!["END".into()];
        assert!(validate_model_preset(&m).is_ok());
    }

    #[test]
    fn json_schema_name_pattern() {
        let bad = OutputParam::JsonSchema {
            schema: OutputSchema {
                name: "bad name!".into(),
                schema: serde_json::json!({"type": "object"}),
            },
        };
        assert!(validate_output_param(&bad).is_err());
        let good = OutputParam::JsonSchema {
            schema: OutputSchema {
                name: "Report_v1".into(),
                schema: serde_json::json!({"type": "object"}),
            },
        };
        assert!(validate_output_param(&good).is_ok());
    }

    #[test]
    fn default_model_must_resolve_in_same_provider() {
        let mut p = provider("local");
        p.default_model_preset_id = Some("missing".into());
        assert!(validate_provider_preset(&p).is_err());

        p.model_presets.insert("m1".into(), model("m1"));
        p.default_model_preset_id = Some("m1".into());
        assert!(validate_provider_preset(&p).is_ok());
    }

    #[test]
    fn modified_at_must_not_precede_created_at() {
        let mut p = provider("local");
        p.modified_at = p.created_at - chrono::Duration::seconds(1);
        assert!(validate_provider_preset(&p).is_err());
    }

    #[test]
    fn soft_deleted_bundle_cannot_be_enabled() {
        let mut b = bundle("b1");
        b.soft_deleted_at = Some(Utc::now());
        assert!(validate_skill_bundle(&b).is_err());
        b.is_enabled = false;
        assert!(validate_skill_bundle(&b).is_ok());
    }

    #[test]
    fn skill_type_pairing() {
        let mut s = skill("s1");
        s.is_built_in = true; // fs + built-in is illegal
        assert!(validate_skill(&s).is_err());
        s.skill_type = SkillType::Embeddedfs;
        assert!(validate_skill(&s).is_ok());
        s.is_built_in = false; // embeddedfs + user is illegal
        assert!(validate_skill(&s).is_err());
    }

    #[test]
    fn skill_schema_referential_rules() {
        let mut sc = SkillStoreSchema::default();
        sc.skills
            .entry("ghost".into())
            .or_default()
            .insert("s1".into(), skill("s1"));
        assert!(validate_skill_schema(&sc).is_err(), "orphan submap");

        let mut sc = SkillStoreSchema::default();
        sc.bundles.insert("b1".into(), bundle("b1"));
        sc.skills
            .entry("b1".into())
            .or_default()
            .insert("wrong".into(), skill("s1"));
        assert!(validate_skill_schema(&sc).is_err(), "key/slug mismatch");

        let mut sc = SkillStoreSchema::default();
        sc.bundles.insert("b1".into(), bundle("b1"));
        sc.skills
            .entry("b1".into())
            .or_default()
            .insert("s1".into(), skill("s1"));
        assert!(validate_skill_schema(&sc).is_ok());
    }

    #[test]
    fn schema_version_is_strict() {
        let mut p = provider("local");
        p.schema_version = "v0".into();
        match validate_provider_preset(&p) {
            Err(Error::SchemaVersionMismatch { found, expected }) => {
                assert_eq!(found, "v0");
                assert_eq!(expected, SCHEMA_VERSION);
            }
            other => panic!("expected SchemaVersionMismatch, got {other:?}"),
        }
    }
}
