//! Provider preset listing and pagination.
//!
//! The merged (user + built-in) set is sorted `modifiedAt desc, name asc`
//! and paged through an opaque token. A token carries the full filter state
//! and an absolute cursor, and wins over same-request parameters so a scan
//! cannot drift; an unparseable token resets to the first page with default
//! filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use curio_domain::error::Result;
use curio_domain::presets::ProviderPreset;
use curio_store::pagetoken;

use crate::store::PresetStore;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListProviderPresets {
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub include_disabled: bool,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderPresetPage {
    pub items: Vec<ProviderPreset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderPageToken {
    names: Vec<String>,
    include_disabled: bool,
    page_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cursor: Option<ProviderCursor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderCursor {
    modified_at: DateTime<Utc>,
    name: String,
}

fn after_cursor(p: &ProviderPreset, c: &ProviderCursor) -> bool {
    p.modified_at < c.modified_at || (p.modified_at == c.modified_at && p.name > c.name)
}

impl PresetStore {
    pub fn list_provider_presets(&self, req: ListProviderPresets) -> Result<ProviderPresetPage> {
        let clamp = |n: usize| n.clamp(1, self.opts.max_page_size);

        let (names, include_disabled, page_size, cursor) =
            match req.page_token.as_deref().filter(|t| !t.is_empty()) {
                Some(raw) => match pagetoken::decode::<ProviderPageToken>(raw) {
                    // The token's embedded filters override the request.
                    Some(tok) => (
                        tok.names,
                        tok.include_disabled,
                        clamp(tok.page_size),
                        tok.cursor,
                    ),
                    // Unparseable: first page, default filters.
                    None => (Vec::new(), false, self.opts.default_page_size, None),
                },
                None => (
                    req.names,
                    req.include_disabled,
                    clamp(req.page_size.unwrap_or(self.opts.default_page_size)),
                    None,
                ),
            };

        let sc = self.user.get_all(false)?;
        let mut items: Vec<ProviderPreset> = sc
            .provider_presets
            .values()
            .cloned()
            .chain(self.builtin.view().values().cloned())
            .collect();

        if !names.is_empty() {
            items.retain(|p| names.iter().any(|n| *n == p.name));
        }
        if !include_disabled {
            items.retain(|p| p.is_enabled);
        }
        items.sort_by(|a, b| {
            b.modified_at
                .cmp(&a.modified_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        if let Some(c) = &cursor {
            items.retain(|p| after_cursor(p, c));
        }

        let more = items.len() > page_size;
        items.truncate(page_size);

        let next_page_token = match (more, items.last()) {
            (true, Some(last)) => Some(pagetoken::encode(&ProviderPageToken {
                names,
                include_disabled,
                page_size,
                cursor: Some(ProviderCursor {
                    modified_at: last.modified_at,
                    name: last.name.clone(),
                }),
            })?),
            _ => None,
        };

        Ok(ProviderPresetPage {
            items,
            next_page_token,
        })
    }
}
