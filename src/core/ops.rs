//! Purpose: Decision logic for INSTALL / UPDATE / LOAD / UNINSTALL and their result messages.
//! Exports: `InstallRequest`, `LoadRequest`, `Linkage`, `ExtensionResolution`,
//!          `ExtensionRegistry`, `Installer`, `install_extension`, `load_extension`,
//!          `uninstall_extension`.
//! Role: Pure orchestration over collaborator traits; owns no state across calls.
//! Invariants: The static-link check runs before any installer or loader call.
//! Invariants: Exactly one message is produced per successful invocation.
//! Invariants: A forced install that reports no install is an Internal error, never a success.

use super::error::{Error, ErrorKind};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstallRequest {
    pub name: String,
    pub repo: String,
    pub force_install: bool,
}

impl InstallRequest {
    pub fn new(name: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            repo: repo.into(),
            force_install: false,
        }
    }

    pub fn force(mut self, force_install: bool) -> Self {
        self.force_install = force_install;
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoadRequest {
    pub path: String,
}

impl LoadRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// How an extension is linked into the running engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Linkage {
    Static,
    Dynamic,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExtensionResolution {
    StaticallyLinked,
    NotInstalled,
    AlreadyInstalled,
}

impl ExtensionResolution {
    pub fn as_str(self) -> &'static str {
        match self {
            ExtensionResolution::StaticallyLinked => "static",
            ExtensionResolution::NotInstalled => "not_installed",
            ExtensionResolution::AlreadyInstalled => "installed",
        }
    }
}

/// Tracks link state and performs in-process activation.
pub trait ExtensionRegistry {
    fn is_static_linked(&self, name: &str) -> bool;

    fn is_official_extension(&self, path: &str) -> bool;

    /// Resolves, stages if needed, and activates. Repeated calls are no-ops.
    fn load_extension(&self, path: &str) -> Result<(), Error>;

    fn linkage(&self, name: &str) -> Linkage {
        if self.is_static_linked(name) {
            Linkage::Static
        } else {
            Linkage::Dynamic
        }
    }
}

/// Fetches and stages extension artifacts.
pub trait Installer {
    /// Returns `true` when an install was performed, `false` when the artifact
    /// was already present. Forced requests always install.
    fn install(&self, request: &InstallRequest) -> Result<bool, Error>;

    fn uninstall(&self, name: &str) -> Result<(), Error>;

    fn is_installed(&self, name: &str) -> bool;

    /// Names with an installed artifact, sorted.
    fn installed_extensions(&self) -> Result<Vec<String>, Error>;
}

pub fn resolve(
    registry: &dyn ExtensionRegistry,
    installer: &dyn Installer,
    name: &str,
) -> ExtensionResolution {
    match registry.linkage(name) {
        Linkage::Static => ExtensionResolution::StaticallyLinked,
        Linkage::Dynamic if installer.is_installed(name) => ExtensionResolution::AlreadyInstalled,
        Linkage::Dynamic => ExtensionResolution::NotInstalled,
    }
}

fn static_linked_message(name: &str) -> String {
    format!("Extension {name} is already static linked with core.")
}

pub fn install_extension(
    registry: &dyn ExtensionRegistry,
    installer: &dyn Installer,
    request: &InstallRequest,
) -> Result<String, Error> {
    if registry.linkage(&request.name) == Linkage::Static {
        tracing::debug!(extension = %request.name, "install skipped: statically linked");
        return Ok(static_linked_message(&request.name));
    }

    let installed = installer.install(request)?;
    if request.force_install && !installed {
        tracing::error!(
            extension = %request.name,
            repo = %request.repo,
            "installer reported no install for a forced request"
        );
        return Err(Error::new(ErrorKind::Internal)
            .with_message("forced install completed without installing")
            .with_extension(&request.name));
    }

    let message = if request.force_install {
        format!(
            "Extension: {} updated from the repo: {}.",
            request.name, request.repo
        )
    } else if installed {
        format!(
            "Extension: {} installed from the repo: {}.",
            request.name, request.repo
        )
    } else {
        format!(
            "Extension: {name} is already installed.\nTo update it, you can run: UPDATE {name}.",
            name = request.name
        )
    };
    Ok(message)
}

pub fn load_extension(
    registry: &dyn ExtensionRegistry,
    request: &LoadRequest,
) -> Result<String, Error> {
    if registry.is_official_extension(&request.path)
        && registry.linkage(&request.path) == Linkage::Static
    {
        tracing::debug!(extension = %request.path, "load skipped: statically linked");
        return Ok(static_linked_message(&request.path));
    }

    registry.load_extension(&request.path)?;
    Ok(format!("Extension: {} has been loaded.", request.path))
}

pub fn uninstall_extension(
    registry: &dyn ExtensionRegistry,
    installer: &dyn Installer,
    name: &str,
) -> Result<String, Error> {
    match resolve(registry, installer, name) {
        ExtensionResolution::StaticallyLinked => Err(Error::new(ErrorKind::Usage)
            .with_message("statically linked extensions cannot be uninstalled")
            .with_extension(name)),
        ExtensionResolution::NotInstalled => Err(Error::new(ErrorKind::NotFound)
            .with_message("extension is not installed")
            .with_extension(name)),
        ExtensionResolution::AlreadyInstalled => {
            installer.uninstall(name)?;
            Ok(format!("Extension: {name} has been uninstalled."))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeSet;

    #[derive(Default)]
    struct FakeRegistry {
        static_linked: BTreeSet<String>,
        loaded: RefCell<BTreeSet<String>>,
        load_calls: Cell<usize>,
        activations: Cell<usize>,
    }

    impl FakeRegistry {
        fn with_static(names: &[&str]) -> Self {
            Self {
                static_linked: names.iter().map(|n| n.to_string()).collect(),
                ..Self::default()
            }
        }
    }

    impl ExtensionRegistry for FakeRegistry {
        fn is_static_linked(&self, name: &str) -> bool {
            self.static_linked.contains(name)
        }

        fn is_official_extension(&self, path: &str) -> bool {
            crate::core::official::is_official_extension(path)
        }

        fn load_extension(&self, path: &str) -> Result<(), Error> {
            self.load_calls.set(self.load_calls.get() + 1);
            if path == "broken" {
                return Err(Error::new(ErrorKind::Incompatible).with_message("bad binary"));
            }
            if self.loaded.borrow_mut().insert(path.to_string()) {
                self.activations.set(self.activations.get() + 1);
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeInstaller {
        installed: RefCell<BTreeSet<String>>,
        calls: Cell<usize>,
        lie_on_force: bool,
    }

    impl Installer for FakeInstaller {
        fn install(&self, request: &InstallRequest) -> Result<bool, Error> {
            self.calls.set(self.calls.get() + 1);
            if request.repo == "unreachable" {
                return Err(Error::new(ErrorKind::Network).with_message("request failed"));
            }
            if request.force_install {
                self.installed.borrow_mut().insert(request.name.clone());
                return Ok(!self.lie_on_force);
            }
            Ok(self.installed.borrow_mut().insert(request.name.clone()))
        }

        fn uninstall(&self, name: &str) -> Result<(), Error> {
            self.installed.borrow_mut().remove(name);
            Ok(())
        }

        fn is_installed(&self, name: &str) -> bool {
            self.installed.borrow().contains(name)
        }

        fn installed_extensions(&self) -> Result<Vec<String>, Error> {
            Ok(self.installed.borrow().iter().cloned().collect())
        }
    }

    #[test]
    fn static_extension_install_never_reaches_installer() {
        let registry = FakeRegistry::with_static(&["json"]);
        let installer = FakeInstaller::default();
        for force in [false, true] {
            let request = InstallRequest::new("json", "http://repo/").force(force);
            let message = install_extension(&registry, &installer, &request).expect("install");
            assert_eq!(message, "Extension json is already static linked with core.");
        }
        assert_eq!(installer.calls.get(), 0);
    }

    #[test]
    fn install_then_reinstall_reports_already_installed() {
        let registry = FakeRegistry::default();
        let installer = FakeInstaller::default();
        let request = InstallRequest::new("httpfs", "https://example.org/ext");

        let first = install_extension(&registry, &installer, &request).expect("first");
        assert_eq!(
            first,
            "Extension: httpfs installed from the repo: https://example.org/ext."
        );
        let second = install_extension(&registry, &installer, &request).expect("second");
        assert_eq!(
            second,
            "Extension: httpfs is already installed.\nTo update it, you can run: UPDATE httpfs."
        );
        assert!(installer.is_installed("httpfs"));
    }

    #[test]
    fn forced_install_reports_update() {
        let registry = FakeRegistry::default();
        let installer = FakeInstaller::default();
        let request = InstallRequest::new("fts", "http://repo/").force(true);
        for _ in 0..2 {
            let message = install_extension(&registry, &installer, &request).expect("update");
            assert_eq!(message, "Extension: fts updated from the repo: http://repo/.");
        }
    }

    #[test]
    fn forced_install_without_install_is_internal_error() {
        let registry = FakeRegistry::default();
        let installer = FakeInstaller {
            lie_on_force: true,
            ..FakeInstaller::default()
        };
        let request = InstallRequest::new("fts", "http://repo/").force(true);
        let err = install_extension(&registry, &installer, &request).expect_err("violation");
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.extension(), Some("fts"));
    }

    #[test]
    fn installer_errors_propagate() {
        let registry = FakeRegistry::default();
        let installer = FakeInstaller::default();
        let request = InstallRequest::new("fts", "unreachable");
        let err = install_extension(&registry, &installer, &request).expect_err("network");
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(installer.calls.get(), 1);
    }

    #[test]
    fn static_official_extension_load_short_circuits() {
        let registry = FakeRegistry::with_static(&["json"]);
        let message = load_extension(&registry, &LoadRequest::new("json")).expect("load");
        assert_eq!(message, "Extension json is already static linked with core.");
        assert_eq!(registry.load_calls.get(), 0);
    }

    #[test]
    fn static_check_only_applies_to_official_names() {
        let registry = FakeRegistry::with_static(&["custom"]);
        let message = load_extension(&registry, &LoadRequest::new("custom")).expect("load");
        assert_eq!(message, "Extension: custom has been loaded.");
        assert_eq!(registry.load_calls.get(), 1);
    }

    #[test]
    fn repeated_load_is_idempotent() {
        let registry = FakeRegistry::default();
        let request = LoadRequest::new("/opt/ext/libgeo.so");
        let first = load_extension(&registry, &request).expect("first");
        let second = load_extension(&registry, &request).expect("second");
        assert_eq!(first, "Extension: /opt/ext/libgeo.so has been loaded.");
        assert_eq!(first, second);
        assert_eq!(registry.activations.get(), 1);
    }

    #[test]
    fn load_failures_propagate() {
        let registry = FakeRegistry::default();
        let err = load_extension(&registry, &LoadRequest::new("broken")).expect_err("broken");
        assert_eq!(err.kind(), ErrorKind::Incompatible);
    }

    #[test]
    fn uninstall_follows_resolution() {
        let registry = FakeRegistry::with_static(&["json"]);
        let installer = FakeInstaller::default();

        let err = uninstall_extension(&registry, &installer, "json").expect_err("static");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = uninstall_extension(&registry, &installer, "fts").expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);

        installer
            .install(&InstallRequest::new("fts", "http://repo/"))
            .expect("install");
        assert_eq!(
            resolve(&registry, &installer, "fts"),
            ExtensionResolution::AlreadyInstalled
        );
        let message = uninstall_extension(&registry, &installer, "fts").expect("uninstall");
        assert_eq!(message, "Extension: fts has been uninstalled.");
        assert_eq!(
            resolve(&registry, &installer, "fts"),
            ExtensionResolution::NotInstalled
        );
    }
}
