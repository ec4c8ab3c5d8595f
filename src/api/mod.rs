//! Purpose: Define the stable public Rust API boundary for exthub.
//! Exports: Request/message types, collaborator traits, default collaborators, and `ExtensionManager`.
//! Role: Public, additive-only surface used by the CLI and embedding engines.
//! Invariants: Result message wording is part of the contract and never changes silently.

mod manager;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::installer::{ExtensionInstaller, InstallRecord, RepoLocation};
pub use crate::core::layout::{engine_version, platform};
pub use crate::core::official::{OFFICIAL_EXTENSIONS, is_official_extension};
pub use crate::core::ops::{
    ExtensionRegistry, ExtensionResolution, InstallRequest, Installer, Linkage, LoadRequest,
    install_extension, load_extension, uninstall_extension,
};
pub use crate::core::registry::{
    ActiveExtension, Activator, LoadedExtension, NativeActivator, Registry,
};
pub use crate::core::statement::{Statement, parse_script, parse_statement};
pub use crate::ext_paths::{DEFAULT_EXTENSION_REPO, default_extension_home};
pub use manager::{ApiResult, ExtensionManager, ExtensionStatus};
