use serde::Serialize;

/// Structured trace events emitted across the Curio crates.
///
/// Events ride on `tracing` as a single JSON field so hosts can split the
/// catalog audit stream from ordinary log lines with one filter.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ProviderPresetWritten {
        provider: String,
        replaced: bool,
    },
    ProviderPresetDeleted {
        provider: String,
    },
    ModelPresetWritten {
        provider: String,
        model_preset_id: String,
        replaced: bool,
    },
    ModelPresetDeleted {
        provider: String,
        model_preset_id: String,
        default_reset: bool,
    },
    DefaultProviderChanged {
        provider: String,
    },
    BuiltinFlagFlipped {
        catalog: String,
        key: String,
        enabled: bool,
    },
    EmbeddedTreeHydrated {
        digest: String,
        files: usize,
    },
    BundleWritten {
        bundle_id: String,
        replaced: bool,
        enabled: bool,
    },
    BundleSoftDeleted {
        bundle_id: String,
    },
    BundleSwept {
        bundle_id: String,
    },
    SkillWritten {
        bundle_id: String,
        skill_slug: String,
        enabled: bool,
    },
    SkillDeleted {
        bundle_id: String,
        skill_slug: String,
    },
    PresenceRefreshed {
        bundle_id: String,
        skill_slug: String,
        status: String,
    },
    RuntimeResynced {
        reason: String,
        desired: usize,
    },
    RuntimeRollback {
        reason: String,
        converged: bool,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "curio_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_tag_themselves() {
        let e = TraceEvent::BundleSoftDeleted {
            bundle_id: "b1".into(),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["event"], "BundleSoftDeleted");
        assert_eq!(json["bundle_id"], "b1");
    }
}
