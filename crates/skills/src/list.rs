//! Skill catalog listing and pagination.
//!
//! Bundles page over the merged set with a `(modifiedAt, id)` cursor.
//! Skills page in two phases carried inside the token: `builtin` walks the
//! embedded catalog in `(bundleID, slug)` order, then `user` walks user
//! skills in `(modifiedAt desc, bundleID, slug)` order. Unlike the preset
//! catalog, an unparseable token here is an error.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use curio_domain::error::{Error, Result};
use curio_domain::skills::{PresenceStatus, Skill, SkillBundle, SkillType};
use curio_store::pagetoken;

use crate::store::SkillStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bundles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSkillBundles {
    #[serde(default)]
    pub bundle_ids: Vec<String>,
    #[serde(default)]
    pub include_disabled: bool,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillBundlePage {
    pub items: Vec<SkillBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundlePageToken {
    bundle_ids: Vec<String>,
    include_disabled: bool,
    page_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cursor: Option<BundleCursor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleCursor {
    modified_at: DateTime<Utc>,
    id: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Skills (global, two-phase)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSkills {
    #[serde(default)]
    pub bundle_ids: Vec<String>,
    #[serde(default)]
    pub types: Vec<SkillType>,
    #[serde(default)]
    pub include_disabled: bool,
    #[serde(default)]
    pub include_missing: bool,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillPage {
    pub items: Vec<Skill>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SkillPhase {
    Builtin,
    User,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SkillPageToken {
    bundle_ids: Vec<String>,
    types: Vec<SkillType>,
    include_disabled: bool,
    include_missing: bool,
    page_size: usize,
    phase: SkillPhase,
    /// `"<bundleID>|<slug>"` inside `builtin`,
    /// `"<modifiedAt RFC3339Nano>|<bundleID>|<slug>"` inside `user`,
    /// empty at a phase start.
    cursor: String,
}

fn passes(
    bundle: &SkillBundle,
    sk: &Skill,
    bundle_ids: &[String],
    types: &[SkillType],
    include_disabled: bool,
    include_missing: bool,
) -> bool {
    if !bundle_ids.is_empty() && !bundle_ids.iter().any(|id| *id == bundle.id) {
        return false;
    }
    if !types.is_empty() && !types.contains(&sk.skill_type) {
        return false;
    }
    if !include_disabled && !(bundle.is_enabled && sk.is_enabled) {
        return false;
    }
    if !include_missing
        && sk
            .presence
            .as_ref()
            .is_some_and(|p| p.status == PresenceStatus::Missing)
    {
        return false;
    }
    true
}

fn user_cursor(modified_at: DateTime<Utc>, bundle_id: &str, slug: &str) -> String {
    format!(
        "{}|{bundle_id}|{slug}",
        modified_at.to_rfc3339_opts(SecondsFormat::Nanos, true)
    )
}

fn parse_user_cursor(cursor: &str) -> Result<(DateTime<Utc>, String, String)> {
    let mut parts = cursor.splitn(3, '|');
    let (Some(ts), Some(bundle_id), Some(slug)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::invalid(format!("malformed page cursor {cursor:?}")));
    };
    let t = DateTime::parse_from_rfc3339(ts)
        .map_err(|e| Error::invalid(format!("malformed page cursor timestamp: {e}")))?;
    Ok((t.with_timezone(&Utc), bundle_id.to_string(), slug.to_string()))
}

impl SkillStore {
    pub fn list_skill_bundles(&self, req: ListSkillBundles) -> Result<SkillBundlePage> {
        let clamp = |n: usize| n.clamp(1, self.inner.opts.max_page_size);

        let (bundle_ids, include_disabled, page_size, cursor) =
            match req.page_token.as_deref().filter(|t| !t.is_empty()) {
                Some(raw) => {
                    let tok: BundlePageToken = pagetoken::decode(raw)
                        .ok_or_else(|| Error::invalid("unparseable page token"))?;
                    (
                        tok.bundle_ids,
                        tok.include_disabled,
                        clamp(tok.page_size),
                        tok.cursor,
                    )
                }
                None => (
                    req.bundle_ids,
                    req.include_disabled,
                    clamp(req.page_size.unwrap_or(self.inner.opts.default_page_size)),
                    None,
                ),
            };

        let sc = self.inner.user.get_all(false)?;
        let view = self.inner.builtin.view();
        let mut items: Vec<SkillBundle> = sc
            .bundles
            .values()
            .filter(|b| b.soft_deleted_at.is_none())
            .cloned()
            .chain(view.bundles.values().cloned())
            .collect();

        if !bundle_ids.is_empty() {
            items.retain(|b| bundle_ids.iter().any(|id| *id == b.id));
        }
        if !include_disabled {
            items.retain(|b| b.is_enabled);
        }
        items.sort_by(|a, b| {
            b.modified_at
                .cmp(&a.modified_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(c) = &cursor {
            items.retain(|b| {
                b.modified_at < c.modified_at || (b.modified_at == c.modified_at && b.id > c.id)
            });
        }

        let more = items.len() > page_size;
        items.truncate(page_size);

        let next_page_token = match (more, items.last()) {
            (true, Some(last)) => Some(pagetoken::encode(&BundlePageToken {
                bundle_ids,
                include_disabled,
                page_size,
                cursor: Some(BundleCursor {
                    modified_at: last.modified_at,
                    id: last.id.clone(),
                }),
            })?),
            _ => None,
        };

        Ok(SkillBundlePage {
            items,
            next_page_token,
        })
    }

    pub fn list_skills(&self, req: ListSkills) -> Result<SkillPage> {
        let clamp = |n: usize| n.clamp(1, self.inner.opts.max_page_size);

        let (bundle_ids, types, include_disabled, include_missing, page_size, mut phase, mut cursor) =
            match req.page_token.as_deref().filter(|t| !t.is_empty()) {
                Some(raw) => {
                    let tok: SkillPageToken = pagetoken::decode(raw)
                        .ok_or_else(|| Error::invalid("unparseable page token"))?;
                    (
                        tok.bundle_ids,
                        tok.types,
                        tok.include_disabled,
                        tok.include_missing,
                        clamp(tok.page_size),
                        tok.phase,
                        tok.cursor,
                    )
                }
                None => (
                    req.bundle_ids,
                    req.types,
                    req.include_disabled,
                    req.include_missing,
                    clamp(req.page_size.unwrap_or(self.inner.opts.default_page_size)),
                    SkillPhase::Builtin,
                    String::new(),
                ),
            };

        let mut items: Vec<Skill> = Vec::new();
        let mut more = false;
        let mut next_cursor = String::new();

        if phase == SkillPhase::Builtin {
            // The cursor wire format is "<bundleID>|<slug>", but resumption
            // compares structurally to match the (bundleID, slug) walk order.
            let builtin_cursor: Option<(String, String)> = if cursor.is_empty() {
                None
            } else {
                let mut parts = cursor.splitn(2, '|');
                match (parts.next(), parts.next()) {
                    (Some(b), Some(s)) => Some((b.to_string(), s.to_string())),
                    _ => {
                        return Err(Error::invalid(format!("malformed page cursor {cursor:?}")))
                    }
                }
            };

            let view = self.inner.builtin.view();
            'walk: for (bundle_id, by_slug) in &view.skills {
                let Some(bundle) = view.bundles.get(bundle_id) else {
                    continue;
                };
                for (slug, sk) in by_slug {
                    if let Some((cb, cs)) = &builtin_cursor {
                        if (bundle_id.as_str(), slug.as_str()) <= (cb.as_str(), cs.as_str()) {
                            continue;
                        }
                    }
                    if !passes(bundle, sk, &bundle_ids, &types, include_disabled, include_missing) {
                        continue;
                    }
                    if items.len() == page_size {
                        // Page is full and built-ins still have items:
                        // stay in this phase.
                        more = true;
                        break 'walk;
                    }
                    items.push(sk.clone());
                    next_cursor = format!("{bundle_id}|{slug}");
                }
            }
            if !more {
                // Built-ins exhausted: flip to the user phase.
                phase = SkillPhase::User;
                cursor.clear();
                next_cursor.clear();
            }
        }

        if phase == SkillPhase::User && !more {
            let sc = self.inner.user.get_all(false)?;
            let mut user_items: Vec<(&String, &Skill)> = Vec::new();
            for (bundle_id, by_slug) in &sc.skills {
                let Some(bundle) = sc.bundles.get(bundle_id) else {
                    continue;
                };
                if bundle.soft_deleted_at.is_some() {
                    continue;
                }
                for sk in by_slug.values() {
                    if passes(bundle, sk, &bundle_ids, &types, include_disabled, include_missing) {
                        user_items.push((bundle_id, sk));
                    }
                }
            }
            user_items.sort_by(|(a_bundle, a), (b_bundle, b)| {
                b.modified_at
                    .cmp(&a.modified_at)
                    .then_with(|| a_bundle.cmp(b_bundle))
                    .then_with(|| a.slug.cmp(&b.slug))
            });

            if !cursor.is_empty() {
                let (t, c_bundle, c_slug) = parse_user_cursor(&cursor)?;
                user_items.retain(|(bundle_id, sk)| {
                    sk.modified_at < t
                        || (sk.modified_at == t
                            && (bundle_id.as_str(), sk.slug.as_str())
                                > (c_bundle.as_str(), c_slug.as_str()))
                });
            }

            for (bundle_id, sk) in user_items {
                if items.len() == page_size {
                    more = true;
                    break;
                }
                next_cursor = user_cursor(sk.modified_at, bundle_id, &sk.slug);
                items.push(sk.clone());
            }
            if !more {
                next_cursor.clear();
            }
        }

        let next_page_token = if more {
            Some(pagetoken::encode(&SkillPageToken {
                bundle_ids,
                types,
                include_disabled,
                include_missing,
                page_size,
                phase,
                cursor: next_cursor,
            })?)
        } else {
            None
        };

        Ok(SkillPage {
            items,
            next_page_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_cursor_round_trips_nanosecond_timestamps() {
        let t = Utc::now();
        let cursor = user_cursor(t, "bundle-1", "slug-1");
        let (parsed, bundle, slug) = parse_user_cursor(&cursor).unwrap();
        assert_eq!(parsed, t);
        assert_eq!(bundle, "bundle-1");
        assert_eq!(slug, "slug-1");
    }

    #[test]
    fn malformed_user_cursor_is_invalid() {
        assert!(parse_user_cursor("no-pipes-here").is_err());
        assert!(parse_user_cursor("not-a-time|b|s").is_err());
    }

    #[test]
    fn phase_names_on_the_wire() {
        assert_eq!(
            serde_json::to_value(SkillPhase::Builtin).unwrap(),
            "builtin"
        );
        assert_eq!(serde_json::to_value(SkillPhase::User).unwrap(), "user");
    }
}
