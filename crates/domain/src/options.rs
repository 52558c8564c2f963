//! Store construction options.
//!
//! Plain-old-data with serde defaults so a host can embed these in its own
//! config document. Base directories are constructor arguments, not config.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetStoreOptions {
    /// Page size applied when a list request carries none.
    #[serde(default = "d_default_page_size")]
    pub default_page_size: usize,
    /// Hard clamp for requested page sizes.
    #[serde(default = "d_max_page_size")]
    pub max_page_size: usize,
    /// Upper bound on built-in view staleness before the rebuilder
    /// rematerializes it anyway.
    #[serde(default = "d_max_snapshot_age_secs")]
    pub max_snapshot_age_secs: u64,
}

impl Default for PresetStoreOptions {
    fn default() -> Self {
        Self {
            default_page_size: d_default_page_size(),
            max_page_size: d_max_page_size(),
            max_snapshot_age_secs: d_max_snapshot_age_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillStoreOptions {
    #[serde(default = "d_default_page_size")]
    pub default_page_size: usize,
    #[serde(default = "d_max_page_size")]
    pub max_page_size: usize,
    #[serde(default = "d_max_snapshot_age_secs")]
    pub max_snapshot_age_secs: u64,
    /// How often the sweeper scans for expired soft-deleted bundles.
    #[serde(default = "d_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Grace window a soft-deleted bundle survives before hard deletion.
    #[serde(default = "d_soft_delete_grace_secs")]
    pub soft_delete_grace_secs: u64,
}

impl Default for SkillStoreOptions {
    fn default() -> Self {
        Self {
            default_page_size: d_default_page_size(),
            max_page_size: d_max_page_size(),
            max_snapshot_age_secs: d_max_snapshot_age_secs(),
            sweep_interval_secs: d_sweep_interval_secs(),
            soft_delete_grace_secs: d_soft_delete_grace_secs(),
        }
    }
}

fn d_default_page_size() -> usize {
    25
}

fn d_max_page_size() -> usize {
    100
}

fn d_max_snapshot_age_secs() -> u64 {
    300
}

fn d_sweep_interval_secs() -> u64 {
    24 * 60 * 60
}

fn d_soft_delete_grace_secs() -> u64 {
    48 * 60 * 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let o = SkillStoreOptions::default();
        assert_eq!(o.default_page_size, 25);
        assert_eq!(o.sweep_interval_secs, 86_400);
        assert_eq!(o.soft_delete_grace_secs, 172_800);
    }

    #[test]
    fn empty_document_fills_defaults() {
        let o: PresetStoreOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(o.default_page_size, 25);
        assert_eq!(o.max_page_size, 100);
    }
}
