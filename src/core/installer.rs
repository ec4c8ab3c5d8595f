//! Purpose: Default `Installer`: fetch extension artifacts from a repository and stage them locally.
//! Exports: `ExtensionInstaller`, `RepoLocation`, `InstallRecord`, `MAX_ARTIFACT_BYTES`.
//! Role: Filesystem + HTTP collaborator behind `ops::install_extension`.
//! Invariants: Installs for one extension are serialized by an exclusive file lock.
//! Invariants: Presence is re-checked after the lock is held; a concurrent install wins once.
//! Invariants: Artifacts are written to a `.partial` sibling and renamed into place.
//! Invariants: No retries; fetch failures propagate to the caller.
//! Invariants: Official names are stored and fetched under their canonical spelling.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use super::error::{Error, ErrorKind, io_error_kind};
use super::layout::{
    self, INSTALL_LOCK_FILE, INSTALL_RECORD_FILE, artifact_file_name, artifact_url_path,
    install_dir, validate_name,
};
use super::official;
use super::ops::{InstallRequest, Installer};

pub const MAX_ARTIFACT_BYTES: u64 = 512 * 1024 * 1024;

/// Where a repository lives.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RepoLocation {
    Http(Url),
    Local(PathBuf),
}

impl RepoLocation {
    pub fn parse(repo: &str) -> Result<Self, Error> {
        let trimmed = repo.trim();
        if trimmed.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("repository must not be empty"));
        }
        if let Ok(url) = Url::parse(trimmed) {
            match url.scheme() {
                "http" | "https" => return Ok(RepoLocation::Http(url)),
                "file" => {
                    let path = url.to_file_path().map_err(|_| {
                        Error::new(ErrorKind::Usage)
                            .with_message(format!("invalid file repository url: {trimmed}"))
                    })?;
                    return Ok(RepoLocation::Local(path));
                }
                _ => {}
            }
        }
        Ok(RepoLocation::Local(PathBuf::from(trimmed)))
    }

    fn artifact_url(base: &Url, name: &str) -> Result<Url, Error> {
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(&artifact_url_path(name)).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("invalid repository url")
                .with_source(err)
        })
    }
}

/// Sidecar written next to each installed artifact.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallRecord {
    pub name: String,
    pub repo: String,
    pub engine_version: String,
    pub platform: String,
    pub sha256: String,
    pub installed_at: String,
}

#[derive(Clone, Debug)]
pub struct ExtensionInstaller {
    home: PathBuf,
    agent: ureq::Agent,
}

impl ExtensionInstaller {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(30))
            .build();
        Self {
            home: home.into(),
            agent,
        }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn artifact_path(&self, name: &str) -> PathBuf {
        layout::artifact_path(&self.home, storage_name(name))
    }

    pub fn install_record(&self, name: &str) -> Result<Option<InstallRecord>, Error> {
        let path = install_dir(&self.home, storage_name(name)).join(INSTALL_RECORD_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(Error::new(io_error_kind(&err))
                    .with_message("failed to read install record")
                    .with_path(&path)
                    .with_source(err));
            }
        };
        let record = serde_json::from_str(&text).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("install record is not valid json")
                .with_path(&path)
                .with_source(err)
        })?;
        Ok(Some(record))
    }

    fn fetch(&self, repo: &RepoLocation, name: &str) -> Result<Vec<u8>, Error> {
        match repo {
            RepoLocation::Http(base) => {
                let url = RepoLocation::artifact_url(base, name)?;
                tracing::info!(extension = %name, url = %url, "downloading extension");
                match self.agent.get(url.as_str()).call() {
                    Ok(response) => read_limited(response.into_reader(), name),
                    Err(ureq::Error::Status(404, _)) => Err(Error::new(ErrorKind::NotFound)
                        .with_message(format!("extension not found in repository: {url}"))
                        .with_extension(name)
                        .with_hint("Check the extension name and that the repository serves this engine version and platform.")),
                    Err(ureq::Error::Status(code, _)) => Err(Error::new(ErrorKind::Network)
                        .with_message(format!("repository returned status {code}"))
                        .with_extension(name)),
                    Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Network)
                        .with_message("request failed")
                        .with_extension(name)
                        .with_source(err)),
                }
            }
            RepoLocation::Local(root) => {
                let path = root.join(artifact_url_path(name));
                tracing::info!(extension = %name, path = %path.display(), "copying extension");
                let file = File::open(&path).map_err(|err| {
                    let kind = io_error_kind(&err);
                    let err = Error::new(kind)
                        .with_message("failed to open extension in repository")
                        .with_extension(name)
                        .with_path(&path)
                        .with_source(err);
                    if kind == ErrorKind::NotFound {
                        err.with_hint("Check the extension name and the repository directory layout.")
                    } else {
                        err
                    }
                })?;
                read_limited(file, name)
            }
        }
    }
}

impl Installer for ExtensionInstaller {
    fn install(&self, request: &InstallRequest) -> Result<bool, Error> {
        validate_name(&request.name)?;
        let name = storage_name(&request.name);
        let dir = install_dir(&self.home, name);
        let artifact = dir.join(artifact_file_name(name));

        if !request.force_install && artifact.is_file() {
            tracing::debug!(extension = %name, "already installed");
            return Ok(false);
        }

        let repo = RepoLocation::parse(&request.repo)?;
        fs::create_dir_all(&dir).map_err(|err| {
            Error::new(io_error_kind(&err))
                .with_message("failed to create extension directory")
                .with_path(&dir)
                .with_source(err)
        })?;

        let _lock = InstallLock::acquire(&dir)?;
        if !request.force_install && artifact.is_file() {
            tracing::debug!(extension = %name, "installed concurrently");
            return Ok(false);
        }

        let bytes = self.fetch(&repo, name)?;
        stage_artifact(&artifact, &bytes)?;

        let record = InstallRecord {
            name: name.to_string(),
            repo: request.repo.clone(),
            engine_version: layout::engine_version().to_string(),
            platform: layout::platform(),
            sha256: sha256_hex(&bytes),
            installed_at: now_rfc3339(),
        };
        write_record(&dir.join(INSTALL_RECORD_FILE), &record)?;

        tracing::info!(
            extension = %name,
            repo = %request.repo,
            bytes = bytes.len(),
            force = request.force_install,
            "extension installed"
        );
        Ok(true)
    }

    fn uninstall(&self, name: &str) -> Result<(), Error> {
        validate_name(name)?;
        let name = storage_name(name);
        let dir = install_dir(&self.home, name);
        {
            let _lock = InstallLock::acquire(&dir)?;
            let artifact = dir.join(artifact_file_name(name));
            remove_if_present(&artifact)?;
            remove_if_present(&dir.join(INSTALL_RECORD_FILE))?;
        }
        fs::remove_dir_all(&dir).map_err(|err| {
            Error::new(io_error_kind(&err))
                .with_message("failed to remove extension directory")
                .with_path(&dir)
                .with_source(err)
        })?;
        tracing::info!(extension = %name, "extension uninstalled");
        Ok(())
    }

    fn is_installed(&self, name: &str) -> bool {
        validate_name(name).is_ok() && self.artifact_path(name).is_file()
    }

    fn installed_extensions(&self) -> Result<Vec<String>, Error> {
        let root = install_dir(&self.home, "");
        let entries = match fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(Error::new(io_error_kind(&err))
                    .with_message("failed to read extension directory")
                    .with_path(&root)
                    .with_source(err));
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read extension directory entry")
                    .with_path(&root)
                    .with_source(err)
            })?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if self.is_installed(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

fn storage_name(name: &str) -> &str {
    official::canonical_name(name).unwrap_or(name)
}

struct InstallLock {
    file: File,
}

impl InstallLock {
    fn acquire(dir: &Path) -> Result<Self, Error> {
        let path = dir.join(INSTALL_LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|err| {
                Error::new(io_error_kind(&err))
                    .with_message("failed to open install lock")
                    .with_path(&path)
                    .with_source(err)
            })?;
        file.lock_exclusive().map_err(|err| {
            Error::new(io_error_kind(&err))
                .with_message("failed to lock extension directory")
                .with_path(&path)
                .with_source(err)
        })?;
        Ok(Self { file })
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn read_limited(reader: impl Read, name: &str) -> Result<Vec<u8>, Error> {
    let mut bytes = Vec::new();
    reader
        .take(MAX_ARTIFACT_BYTES + 1)
        .read_to_end(&mut bytes)
        .map_err(|err| {
            Error::new(ErrorKind::Network)
                .with_message("failed to read extension artifact")
                .with_extension(name)
                .with_source(err)
        })?;
    if bytes.len() as u64 > MAX_ARTIFACT_BYTES {
        return Err(Error::new(ErrorKind::Incompatible)
            .with_message(format!(
                "extension artifact exceeds {MAX_ARTIFACT_BYTES} bytes"
            ))
            .with_extension(name));
    }
    if bytes.is_empty() {
        return Err(Error::new(ErrorKind::Incompatible)
            .with_message("extension artifact is empty")
            .with_extension(name));
    }
    Ok(bytes)
}

fn stage_artifact(artifact: &Path, bytes: &[u8]) -> Result<(), Error> {
    let mut partial = artifact.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    let result = File::create(&partial)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&partial, artifact));
    result.map_err(|err| {
        let _ = fs::remove_file(&partial);
        Error::new(io_error_kind(&err))
            .with_message("failed to stage extension artifact")
            .with_path(artifact)
            .with_source(err)
    })
}

fn write_record(path: &Path, record: &InstallRecord) -> Result<(), Error> {
    let json = serde_json::to_string_pretty(record).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode install record")
            .with_source(err)
    })?;
    fs::write(path, json).map_err(|err| {
        Error::new(io_error_kind(&err))
            .with_message("failed to write install record")
            .with_path(path)
            .with_source(err)
    })
}

fn remove_if_present(path: &Path) -> Result<(), Error> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(Error::new(io_error_kind(&err))
            .with_message("failed to remove file")
            .with_path(path)
            .with_source(err)),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn now_rfc3339() -> String {
    use time::format_description::well_known::Rfc3339;
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
