//! Purpose: Explicit context handle that runs extension statements against a registry and installer.
//! Exports: `ExtensionManager`, `ExtensionStatus`.
//! Role: Stable boundary for the CLI and embedders; owns no policy beyond default repo selection.
//! Invariants: Every call delegates to `core::ops`; resolution is re-derived per call.
//! Invariants: A script stops at the first failing statement.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::core::error::{Error, ErrorKind};
use crate::core::installer::ExtensionInstaller;
use crate::core::official::{self, OFFICIAL_EXTENSIONS};
use crate::core::ops::{
    self, ExtensionRegistry, ExtensionResolution, InstallRequest, Installer, LoadRequest,
};
use crate::core::registry::Registry;
use crate::core::statement::{self, Statement};
use crate::ext_paths::{DEFAULT_EXTENSION_REPO, default_extension_home};

pub type ApiResult<T> = Result<T, Error>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExtensionStatus {
    pub name: String,
    pub official: bool,
    pub resolution: ExtensionResolution,
    pub loaded: bool,
}

pub struct ExtensionManager {
    registry: Registry,
    installer: Box<dyn Installer>,
    default_repo: String,
}

impl ExtensionManager {
    pub fn new() -> Self {
        Self::with_home(default_extension_home())
    }

    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            registry: Registry::new(&home),
            installer: Box::new(ExtensionInstaller::new(home)),
            default_repo: DEFAULT_EXTENSION_REPO.to_string(),
        }
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_installer(mut self, installer: impl Installer + 'static) -> Self {
        self.installer = Box::new(installer);
        self
    }

    pub fn with_default_repo(mut self, repo: impl Into<String>) -> Self {
        self.default_repo = repo.into();
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn default_repo(&self) -> &str {
        &self.default_repo
    }

    pub fn install(&self, name: &str, repo: Option<&str>, force: bool) -> ApiResult<String> {
        let request = InstallRequest::new(name, repo.unwrap_or(&self.default_repo)).force(force);
        ops::install_extension(&self.registry, self.installer.as_ref(), &request)
    }

    pub fn update(&self, name: &str, repo: Option<&str>) -> ApiResult<String> {
        self.install(name, repo, true)
    }

    pub fn load(&self, path: &str) -> ApiResult<String> {
        ops::load_extension(&self.registry, &LoadRequest::new(path))
    }

    pub fn uninstall(&self, name: &str) -> ApiResult<String> {
        if self.registry.is_loaded(name) {
            return Err(Error::new(ErrorKind::Busy)
                .with_message("extension is loaded in this process")
                .with_extension(name));
        }
        ops::uninstall_extension(&self.registry, self.installer.as_ref(), name)
    }

    pub fn resolution(&self, name: &str) -> ExtensionResolution {
        ops::resolve(&self.registry, self.installer.as_ref(), name)
    }

    pub fn run(&self, statement: &Statement) -> ApiResult<String> {
        match statement {
            Statement::Install { name, repo, force } => {
                self.install(name, repo.as_deref(), *force)
            }
            Statement::Load { path } => self.load(path),
            Statement::Uninstall { name } => self.uninstall(name),
        }
    }

    pub fn execute(&self, input: &str) -> ApiResult<String> {
        let statement = statement::parse_statement(input)?;
        self.run(&statement)
    }

    /// Parses the whole script up front, then runs statements in order.
    pub fn execute_script(&self, input: &str) -> ApiResult<Vec<String>> {
        let statements = statement::parse_script(input)?;
        statements.iter().map(|stmt| self.run(stmt)).collect()
    }

    /// Official extensions plus anything else installed or loaded.
    pub fn list(&self) -> ApiResult<Vec<ExtensionStatus>> {
        let mut names: BTreeSet<String> =
            OFFICIAL_EXTENSIONS.iter().map(|name| name.to_string()).collect();
        names.extend(self.installer.installed_extensions()?);
        names.extend(self.registry.static_extensions().map(str::to_string));
        names.extend(self.registry.loaded().into_iter().map(|ext| ext.name));

        Ok(names
            .into_iter()
            .map(|name| ExtensionStatus {
                official: official::is_official_extension(&name),
                resolution: self.resolution(&name),
                loaded: self.registry.is_loaded(&name) || self.registry.is_static_linked(&name),
                name,
            })
            .collect())
    }
}

impl Default for ExtensionManager {
    fn default() -> Self {
        Self::new()
    }
}
