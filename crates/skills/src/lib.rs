//! Skill catalog: user bundles on disk, built-in bundles from the embedded
//! filesystem, and a store that keeps the in-process Skills Runtime
//! reconciled with the enabled subset through a foreground saga plus a
//! background resync.

pub mod builtin;
pub mod hydrate;
pub mod list;
pub mod manifest;
pub mod reconcile;
pub mod store;
pub mod sweeper;
pub mod testutil;

pub use builtin::BuiltinSkills;
pub use list::{ListSkillBundles, ListSkills, SkillBundlePage, SkillPage};
pub use store::{PatchSkill, PatchSkillBundle, PutSkill, PutSkillBundle, SkillStore};

/// Built-in bundles and skills shipped with this build.
#[derive(rust_embed::RustEmbed)]
#[folder = "assets/"]
pub struct BuiltinSkillAssets;

/// File and directory names inside a skill catalog base directory.
pub const USER_FILE: &str = "skill_bundles.json";
pub const OVERLAY_FILE: &str = "skill_bundles_builtin_overlay.db";
pub const HYDRATE_DIR: &str = ".skills-embeddedfs-hydrated";
