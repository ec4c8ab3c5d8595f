//! Purpose: Default `ExtensionRegistry`: static-link set plus in-process activation of native extensions.
//! Exports: `Registry`, `Activator`, `NativeActivator`, `ActiveExtension`, `LoadedExtension`,
//!          `ABI_VERSION`, `INIT_SYMBOL`, `ABI_VERSION_SYMBOL`.
//! Role: Process-wide state created at engine startup and passed to the core by reference.
//! Invariants: The static-link set never changes after construction.
//! Invariants: Each extension identity is activated at most once per registry.
//! Invariants: A failed activation leaves no entry in the loaded table.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use url::Url;

use super::error::{Error, ErrorKind, io_error_kind};
use super::installer::MAX_ARTIFACT_BYTES;
use super::layout::{self, DOWNLOADS_DIR, extension_name_from_path};
use super::official;
use super::ops::ExtensionRegistry;

pub const ABI_VERSION: u32 = 1;
pub const INIT_SYMBOL: &[u8] = b"exthub_extension_init";
pub const ABI_VERSION_SYMBOL: &[u8] = b"exthub_extension_abi_version";

/// Keeps activated extension code alive; dropping it may unload the library.
pub struct ActiveExtension {
    _library: Option<libloading::Library>,
}

impl ActiveExtension {
    pub fn native(library: libloading::Library) -> Self {
        Self {
            _library: Some(library),
        }
    }

    /// Handle for activators that do not hold a library (tests, embedded hosts).
    pub fn detached() -> Self {
        Self { _library: None }
    }
}

/// Turns a staged artifact into running code.
pub trait Activator: Send + Sync {
    fn activate(&self, name: &str, path: &Path) -> Result<ActiveExtension, Error>;
}

/// Opens shared libraries with `libloading` and runs their init entry point.
#[derive(Debug, Default)]
pub struct NativeActivator;

type InitFn = unsafe extern "C" fn() -> i32;
type AbiVersionFn = unsafe extern "C" fn() -> u32;

impl Activator for NativeActivator {
    fn activate(&self, name: &str, path: &Path) -> Result<ActiveExtension, Error> {
        // SAFETY: loading runs the library's initializers; the artifact is trusted
        // once the user has asked to load it.
        let library = unsafe { libloading::Library::new(path) }.map_err(|err| {
            Error::new(ErrorKind::Incompatible)
                .with_message("failed to open extension library")
                .with_extension(name)
                .with_path(path)
                .with_source(err)
        })?;

        // SAFETY: symbol signatures are part of the extension ABI contract.
        unsafe {
            if let Ok(abi_version) = library.get::<AbiVersionFn>(ABI_VERSION_SYMBOL) {
                let found = abi_version();
                if found != ABI_VERSION {
                    return Err(Error::new(ErrorKind::Incompatible)
                        .with_message(format!(
                            "extension ABI version {found} does not match engine ABI version {ABI_VERSION}"
                        ))
                        .with_extension(name)
                        .with_path(path));
                }
            }

            let init = library.get::<InitFn>(INIT_SYMBOL).map_err(|err| {
                Error::new(ErrorKind::Incompatible)
                    .with_message("extension library has no init entry point")
                    .with_extension(name)
                    .with_path(path)
                    .with_source(err)
            })?;
            let status = init();
            if status != 0 {
                return Err(Error::new(ErrorKind::Internal)
                    .with_message(format!("extension init returned status {status}"))
                    .with_extension(name)
                    .with_path(path));
            }
        }

        Ok(ActiveExtension::native(library))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoadedExtension {
    pub name: String,
    pub path: PathBuf,
    pub source: String,
}

struct LoadedEntry {
    info: LoadedExtension,
    _active: ActiveExtension,
}

pub struct Registry {
    home: PathBuf,
    static_linked: BTreeSet<String>,
    activator: Box<dyn Activator>,
    agent: ureq::Agent,
    loaded: Mutex<BTreeMap<String, LoadedEntry>>,
}

impl Registry {
    /// Registry for this binary: builtin extensions are the compiled-in set.
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self::with_static_extensions(home, official::builtin_extensions())
    }

    pub fn with_static_extensions<I, S>(home: impl Into<PathBuf>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            home: home.into(),
            static_linked: names.into_iter().map(Into::into).collect(),
            activator: Box::new(NativeActivator),
            agent: ureq::AgentBuilder::new()
                .timeout_connect(Duration::from_secs(30))
                .build(),
            loaded: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_activator(mut self, activator: impl Activator + 'static) -> Self {
        self.activator = Box::new(activator);
        self
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn static_extensions(&self) -> impl Iterator<Item = &str> {
        self.static_linked.iter().map(String::as_str)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        let name = official::canonical_name(name).unwrap_or(name);
        self.lock_loaded()
            .map(|loaded| loaded.contains_key(name))
            .unwrap_or(false)
    }

    pub fn loaded(&self) -> Vec<LoadedExtension> {
        self.lock_loaded()
            .map(|loaded| loaded.values().map(|entry| entry.info.clone()).collect())
            .unwrap_or_default()
    }

    fn lock_loaded(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, LoadedEntry>>, Error> {
        self.loaded.lock().map_err(|_| {
            Error::new(ErrorKind::Internal).with_message("extension registry lock poisoned")
        })
    }

    fn resolve_target(&self, target: &str) -> Result<(String, ResolvedSource), Error> {
        if let Some(name) = official::canonical_name(target) {
            let path = layout::artifact_path(&self.home, name);
            if !path.is_file() {
                return Err(Error::new(ErrorKind::NotFound)
                    .with_message("extension is not installed")
                    .with_extension(name)
                    .with_path(path)
                    .with_hint(format!("Install it first: INSTALL {name}")));
            }
            return Ok((name.to_string(), ResolvedSource::Local(path)));
        }

        if let Ok(url) = Url::parse(target)
            && matches!(url.scheme(), "http" | "https")
        {
            let file_name = url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::new(ErrorKind::Usage)
                        .with_message("extension url must end with a file name")
                })?;
            let name = extension_name_from_path(Path::new(&file_name)).ok_or_else(|| {
                Error::new(ErrorKind::Usage).with_message("cannot derive extension name from url")
            })?;
            return Ok((name, ResolvedSource::Remote { url, file_name }));
        }

        let path = PathBuf::from(target);
        if !path.is_file() {
            return Err(Error::new(ErrorKind::NotFound)
                .with_message("extension file not found")
                .with_path(path)
                .with_hint("Pass an official extension name, a library path, or an http(s) url."));
        }
        let name = extension_name_from_path(&path).ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message("cannot derive extension name from path")
                .with_path(&path)
        })?;
        Ok((name, ResolvedSource::Local(path)))
    }

    fn download(&self, url: &Url, file_name: &str) -> Result<PathBuf, Error> {
        let dir = self.home.join(DOWNLOADS_DIR);
        fs::create_dir_all(&dir).map_err(|err| {
            Error::new(io_error_kind(&err))
                .with_message("failed to create download directory")
                .with_path(&dir)
                .with_source(err)
        })?;
        let response = match self.agent.get(url.as_str()).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => {
                return Err(Error::new(ErrorKind::NotFound)
                    .with_message(format!("extension not found at {url}")));
            }
            Err(ureq::Error::Status(code, _)) => {
                return Err(Error::new(ErrorKind::Network)
                    .with_message(format!("extension download returned status {code}")));
            }
            Err(ureq::Error::Transport(err)) => {
                return Err(Error::new(ErrorKind::Network)
                    .with_message("request failed")
                    .with_source(err));
            }
        };

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_ARTIFACT_BYTES + 1)
            .read_to_end(&mut bytes)
            .map_err(|err| {
                Error::new(ErrorKind::Network)
                    .with_message("failed to read extension download")
                    .with_source(err)
            })?;
        if bytes.len() as u64 > MAX_ARTIFACT_BYTES {
            return Err(Error::new(ErrorKind::Incompatible)
                .with_message(format!("extension download exceeds {MAX_ARTIFACT_BYTES} bytes")));
        }

        let path = dir.join(file_name);
        fs::File::create(&path)
            .and_then(|mut file| file.write_all(&bytes))
            .map_err(|err| {
                Error::new(io_error_kind(&err))
                    .with_message("failed to write extension download")
                    .with_path(&path)
                    .with_source(err)
            })?;
        Ok(path)
    }
}

enum ResolvedSource {
    Local(PathBuf),
    Remote { url: Url, file_name: String },
}

impl ExtensionRegistry for Registry {
    fn is_static_linked(&self, name: &str) -> bool {
        self.static_linked
            .iter()
            .any(|linked| linked.eq_ignore_ascii_case(name))
    }

    fn is_official_extension(&self, path: &str) -> bool {
        official::is_official_extension(path)
    }

    fn load_extension(&self, target: &str) -> Result<(), Error> {
        let (name, source) = self.resolve_target(target)?;

        let mut loaded = self.lock_loaded()?;
        if let Some(entry) = loaded.get(&name) {
            let same_origin = match &source {
                ResolvedSource::Local(path) => entry.info.path == *path,
                ResolvedSource::Remote { .. } => entry.info.source == target,
            };
            if same_origin {
                tracing::debug!(extension = %name, "already loaded");
            } else {
                tracing::warn!(
                    extension = %name,
                    loaded = %entry.info.path.display(),
                    requested = %target,
                    "extension already loaded from a different location; keeping the loaded library"
                );
            }
            return Ok(());
        }

        let path = match source {
            ResolvedSource::Local(path) => path,
            ResolvedSource::Remote { url, file_name } => self.download(&url, &file_name)?,
        };
        let active = self.activator.activate(&name, &path).inspect_err(|err| {
            tracing::warn!(extension = %name, path = %path.display(), error = %err, "activation failed");
        })?;
        tracing::info!(extension = %name, path = %path.display(), "extension loaded");

        loaded.insert(
            name.clone(),
            LoadedEntry {
                info: LoadedExtension {
                    name,
                    path,
                    source: target.to_string(),
                },
                _active: active,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct CountingActivator {
        calls: Arc<AtomicUsize>,
    }

    impl Activator for CountingActivator {
        fn activate(&self, name: &str, _path: &Path) -> Result<ActiveExtension, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if name == "broken" {
                return Err(Error::new(ErrorKind::Incompatible).with_message("bad"));
            }
            Ok(ActiveExtension::detached())
        }
    }

    fn write_file(path: &Path) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, b"\x7fELF").expect("write");
    }

    #[test]
    fn static_check_is_case_insensitive() {
        let registry = Registry::with_static_extensions("/unused", ["json"]);
        assert!(registry.is_static_linked("json"));
        assert!(registry.is_static_linked("JSON"));
        assert!(!registry.is_static_linked("fts"));
    }

    #[test]
    fn loading_by_name_and_path_activates_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let activator = CountingActivator::default();
        let registry = Registry::with_static_extensions(temp.path(), Vec::<String>::new())
            .with_activator(activator.clone());
        let artifact = layout::artifact_path(temp.path(), "fts");
        write_file(&artifact);

        registry.load_extension("fts").expect("by name");
        registry
            .load_extension(artifact.to_str().expect("utf8"))
            .expect("by path");
        registry.load_extension("FTS").expect("by name again");

        assert_eq!(activator.calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_loaded("fts"));
        assert!(registry.is_loaded("FTS"));
        let loaded = registry.loaded();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].path, artifact);
        assert_eq!(loaded[0].source, "fts");
    }

    #[test]
    fn same_stem_from_another_directory_keeps_first_library() {
        let temp = tempfile::tempdir().expect("tempdir");
        let activator = CountingActivator::default();
        let registry = Registry::with_static_extensions(temp.path(), Vec::<String>::new())
            .with_activator(activator.clone());
        let first = temp.path().join("a").join("libgeo.so");
        let second = temp.path().join("b").join("libgeo.so");
        write_file(&first);
        write_file(&second);

        registry
            .load_extension(first.to_str().expect("utf8"))
            .expect("first");
        registry
            .load_extension(second.to_str().expect("utf8"))
            .expect("second");

        assert_eq!(activator.calls.load(Ordering::SeqCst), 1);
        let loaded = registry.loaded();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].path, first);
    }

    #[test]
    fn uninstalled_official_extension_hints_install() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry = Registry::with_static_extensions(temp.path(), Vec::<String>::new())
            .with_activator(CountingActivator::default());
        let err = registry.load_extension("httpfs").expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.hint(), Some("Install it first: INSTALL httpfs"));
    }

    #[test]
    fn failed_activation_leaves_no_entry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let activator = CountingActivator::default();
        let registry = Registry::with_static_extensions(temp.path(), Vec::<String>::new())
            .with_activator(activator.clone());
        let path = temp.path().join("libbroken.so");
        write_file(&path);

        let target = path.to_str().expect("utf8");
        assert!(registry.load_extension(target).is_err());
        assert!(registry.load_extension(target).is_err());
        assert!(!registry.is_loaded("broken"));
        assert_eq!(activator.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn native_activator_rejects_non_libraries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry = Registry::with_static_extensions(temp.path(), Vec::<String>::new());
        let path = temp.path().join("libnotalib.so");
        fs::write(&path, b"plain text").expect("write");
        let err = registry
            .load_extension(path.to_str().expect("utf8"))
            .expect_err("not a library");
        assert_eq!(err.kind(), ErrorKind::Incompatible);
        assert!(!registry.is_loaded("notalib"));
    }

    #[test]
    fn missing_path_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry = Registry::with_static_extensions(temp.path(), Vec::<String>::new());
        let err = registry
            .load_extension(temp.path().join("libnope.so").to_str().expect("utf8"))
            .expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
