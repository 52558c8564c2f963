//! Model preset catalog: a read-write user store merged with the read-only
//! built-in providers shipped in the embedded filesystem.

pub mod builtin;
pub mod list;
pub mod store;

pub use builtin::BuiltinPresets;
pub use list::{ListProviderPresets, ProviderPresetPage};
pub use store::{
    PatchModelPreset, PatchProviderPreset, PresetStore, PutModelPreset, PutProviderPreset,
};

/// Built-in preset manifest shipped with this build.
#[derive(rust_embed::RustEmbed)]
#[folder = "assets/"]
pub struct BuiltinPresetAssets;

/// File names inside a preset catalog base directory.
pub const USER_FILE: &str = "model_presets.json";
pub const OVERLAY_FILE: &str = "model_presets_builtin_overlay.db";
