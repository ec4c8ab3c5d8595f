//! Purpose: Shared defaults for the extension home directory and repository.
//! Exports: `default_extension_home`, `DEFAULT_EXTENSION_REPO`.
//! Role: Keep CLI and API-client defaults aligned from one source.
//! Invariants: Default extension home remains `~/.exthub/extensions`.

use std::path::PathBuf;

pub const DEFAULT_EXTENSION_REPO: &str = "http://extension.exthub.dev/";

pub fn default_extension_home() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".exthub").join("extensions")
}
