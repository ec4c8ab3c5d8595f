//! Purpose: On-disk and in-repository layout for extension artifacts.
//! Exports: `platform`, `artifact_file_name`, `install_dir`, `artifact_path`, `artifact_url_path`.
//! Role: One source for path rules shared by the installer, registry, and CLI listing.
//! Invariants: Local layout is `<home>/v<version>/<platform>/<name>/lib<name>.exthub_extension`.
//! Invariants: Repository layout mirrors the local one below the repo root.
//! Invariants: Extension names never contain path separators or `..`.

use std::path::{Path, PathBuf};

use super::error::{Error, ErrorKind};

pub const ARTIFACT_EXTENSION: &str = "exthub_extension";
pub const INSTALL_RECORD_FILE: &str = "install.json";
pub const INSTALL_LOCK_FILE: &str = ".install.lock";
pub const DOWNLOADS_DIR: &str = "downloads";

pub fn engine_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Platform tag used in both local and repository paths, e.g. `linux_amd64`.
pub fn platform() -> String {
    let os = match std::env::consts::OS {
        "macos" => "osx",
        "windows" => "win",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };
    format!("{os}_{arch}")
}

pub fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::new(ErrorKind::Usage).with_message("extension name must not be empty"));
    }
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("extension names must not contain path separators")
            .with_extension(name)
            .with_hint("Use LOAD <path> to load an extension from a file."));
    }
    Ok(())
}

pub fn artifact_file_name(name: &str) -> String {
    format!("lib{name}.{ARTIFACT_EXTENSION}")
}

pub fn install_dir(home: &Path, name: &str) -> PathBuf {
    home.join(format!("v{}", engine_version()))
        .join(platform())
        .join(name)
}

pub fn artifact_path(home: &Path, name: &str) -> PathBuf {
    install_dir(home, name).join(artifact_file_name(name))
}

/// Relative path of an artifact below a repository root, always `/`-separated.
pub fn artifact_url_path(name: &str) -> String {
    format!(
        "v{}/{}/{}/{}",
        engine_version(),
        platform(),
        name,
        artifact_file_name(name)
    )
}

/// Derives an extension identity from a library path: `libfoo.so` -> `foo`.
pub fn extension_name_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let name = stem.strip_prefix("lib").unwrap_or(stem);
    if name.is_empty() {
        return None;
    }
    Some(name.to_string())
}
