//! Process-wide shared state with a one-shot initialization contract
//! (spec.md §4.4).
//!
//! spec.md §9 re-architects the source's static-singleton accessors into a
//! single value constructed at startup and passed explicitly to each
//! component; tests instantiate independent values via [`SharedResources::build`]
//! directly. The one-shot `setup`/`AlreadyInitiated`/`NotInitiated` contract
//! is preserved for the process-wide entry point (`setup`/`get`) that the
//! binary actually uses, backed by a `OnceLock` rather than a type carrying
//! its own static accessors.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::events::EventBus;
use crate::remote::RemoteApi;

static INSTANCE: OnceLock<Arc<SharedResources>> = OnceLock::new();

/// A logical partition of the remote account (spec.md GLOSSARY, "Zone").
/// Surfaced only as metadata; the engine does not interpret zone contents
/// beyond "did fetching it succeed."
#[derive(Debug, Clone)]
pub struct Zone {
    pub id: String,
    pub name: String,
}

/// Primary/shared zone descriptors, populated after authentication
/// (spec.md §4.4). `shared_zone_available` is computed from this struct's
/// own `shared_zone` field, not from `primary_zone` — spec.md §9's
/// documented bug fix for the source's apparent `sharedZone`-read-from-
/// `primaryZone` mistake.
#[derive(Debug, Clone, Default)]
pub struct ZoneDescriptors {
    pub primary_zone: Option<Zone>,
    pub shared_zone: Option<Zone>,
}

impl ZoneDescriptors {
    pub fn shared_zone_available(&self) -> bool {
        self.shared_zone.is_some()
    }
}

/// On-disk resource file contents (spec.md §3, §6): `.photos-library.db`,
/// UTF-8 JSON. Absent file is not an error — callers create one with the
/// current library version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceFile {
    #[serde(rename = "libraryVersion")]
    pub library_version: u32,
    #[serde(rename = "trustToken", skip_serializing_if = "Option::is_none")]
    pub trust_token: Option<String>,
}

/// The resource file's `libraryVersion` this build writes for a fresh file.
pub const CURRENT_LIBRARY_VERSION: u32 = 1;

impl ResourceFile {
    fn read(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                EngineError::InvalidResourceFile {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self {
                library_version: CURRENT_LIBRARY_VERSION,
                trust_token: None,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomic rewrite: write to a sibling temp file, then rename over the
    /// target (spec.md §3, "Written atomically on mutation"). The temp name
    /// carries a random suffix so two processes racing a rewrite of the
    /// same resource file never clobber each other's in-flight temp file.
    fn write_atomic(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).map_err(|e| {
            EngineError::InvalidResourceFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4()));
        std::fs::write(&tmp_path, contents).map_err(|e| EngineError::UnableToWriteFile {
            path: tmp_path.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp_path, path).map_err(|e| EngineError::UnableToWriteFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }
}

/// Shared, process-wide state handed to every component (spec.md §4.4).
pub struct SharedResources {
    pub config: Config,
    pub network: Arc<dyn RemoteApi>,
    pub events: EventBus,
    resource_file_path: PathBuf,
    trust_token: RwLock<Option<String>>,
    zones: RwLock<ZoneDescriptors>,
}

/// Resolves the trust token an `HttpRemoteApi` should authenticate with:
/// an explicit `config.trust_token` wins, falling back to whatever the
/// resource file already persisted (spec.md §6, `trust_token`). Exposed
/// so a caller building the network collaborator can resolve the same
/// value `SharedResources::build` would, before `build` itself runs.
pub fn resolve_trust_token(config: &Config) -> Result<Option<String>> {
    if config.refresh_token {
        return Ok(config.trust_token.clone());
    }
    let resource_file = ResourceFile::read(&config.resource_file_path())?;
    Ok(config.trust_token.clone().or(resource_file.trust_token))
}

impl SharedResources {
    /// Process-wide entry point. Must be called exactly once before
    /// [`SharedResources::get`]; a second call fails with
    /// `AlreadyInitiated` (spec.md §4.4).
    pub fn setup(config: Config, network: Arc<dyn RemoteApi>) -> Result<Arc<Self>> {
        if INSTANCE.get().is_some() {
            return Err(EngineError::AlreadyInitiated);
        }
        let built = Arc::new(Self::build(config, network)?);
        INSTANCE
            .set(built.clone())
            .map_err(|_| EngineError::AlreadyInitiated)?;
        Ok(built)
    }

    /// Fails with `NotInitiated` if `setup` has not yet run (spec.md §4.4).
    pub fn get() -> Result<Arc<Self>> {
        INSTANCE.get().cloned().ok_or(EngineError::NotInitiated)
    }

    /// Constructs an independent value without touching the process-wide
    /// singleton, for tests (spec.md §9, "tests instantiate independent
    /// values").
    pub fn build(config: Config, network: Arc<dyn RemoteApi>) -> Result<Self> {
        let resource_file_path = config.resource_file_path();
        let trust_token = resolve_trust_token(&config)?;
        let mut resource_file = ResourceFile::read(&resource_file_path)?;
        resource_file.trust_token = trust_token.clone();
        resource_file.library_version = CURRENT_LIBRARY_VERSION;

        if let Err(e) = resource_file.write_atomic(&resource_file_path) {
            // Resource-file write is best-effort (spec.md §7,
            // `UnableToWriteFile` is a warning, not fatal).
            warn!("could not persist resource file at {resource_file_path:?}: {e}");
        }

        Ok(Self {
            config,
            network,
            events: EventBus::default(),
            resource_file_path,
            trust_token: RwLock::new(trust_token),
            zones: RwLock::new(ZoneDescriptors::default()),
        })
    }

    pub fn trust_token(&self) -> Option<String> {
        self.trust_token.read().expect("trust token lock poisoned").clone()
    }

    /// Mutating the trust token triggers an immediate atomic rewrite of the
    /// resource file (spec.md §4.4). The rewrite is best-effort: a failure
    /// to persist it is a warning, not a hard error (spec.md §7,
    /// `UnableToWriteFile`), matching `build`'s own handling of the same
    /// write.
    pub fn set_trust_token(&self, token: Option<String>) -> Result<()> {
        *self.trust_token.write().expect("trust token lock poisoned") = token.clone();
        let resource_file = ResourceFile {
            library_version: CURRENT_LIBRARY_VERSION,
            trust_token: token,
        };
        if let Err(e) = resource_file.write_atomic(&self.resource_file_path) {
            warn!(
                "could not persist resource file at {:?}: {e}",
                self.resource_file_path
            );
        }
        Ok(())
    }

    pub fn zones(&self) -> ZoneDescriptors {
        self.zones.read().expect("zone lock poisoned").clone()
    }

    /// In-memory only; never persisted (spec.md §4.4).
    pub fn set_zones(&self, zones: ZoneDescriptors) {
        *self.zones.write().expect("zone lock poisoned") = zones;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MockRemoteApi;

    fn config(data_dir: &Path) -> Config {
        Config {
            data_dir: data_dir.to_path_buf(),
            username: "user".to_string(),
            password: "pass".to_string(),
            trust_token: None,
            refresh_token: false,
            port: 10000,
            max_retries: 3,
            download_threads: 4,
            schedule: None,
            enable_crash_reporting: false,
            fail_on_mfa: false,
            force: false,
            remote_delete: false,
            silent: false,
            log_to_cli: false,
            suppress_warnings: false,
            export_metrics: false,
            log_level: crate::config::LogLevel::Info,
            metadata_rate: crate::config::MetadataRate::default(),
        }
    }

    #[test]
    fn creates_resource_file_with_current_version_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let resources = SharedResources::build(config(dir.path()), Arc::new(MockRemoteApi::empty())).unwrap();
        assert_eq!(resources.trust_token(), None);

        let contents = std::fs::read_to_string(dir.path().join(".photos-library.db")).unwrap();
        let parsed: ResourceFile = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.library_version, CURRENT_LIBRARY_VERSION);
    }

    #[test]
    fn refresh_token_flag_clears_stored_trust_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".photos-library.db");
        std::fs::write(
            &path,
            r#"{"libraryVersion":1,"trustToken":"stale-token"}"#,
        )
        .unwrap();

        let mut cfg = config(dir.path());
        cfg.refresh_token = true;
        let resources = SharedResources::build(cfg, Arc::new(MockRemoteApi::empty())).unwrap();
        assert_eq!(resources.trust_token(), None);
    }

    #[test]
    fn set_trust_token_rewrites_resource_file_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let resources = SharedResources::build(config(dir.path()), Arc::new(MockRemoteApi::empty())).unwrap();
        resources.set_trust_token(Some("fresh".to_string())).unwrap();
        assert_eq!(resources.trust_token(), Some("fresh".to_string()));

        let contents = std::fs::read_to_string(dir.path().join(".photos-library.db")).unwrap();
        let parsed: ResourceFile = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.trust_token.as_deref(), Some("fresh"));
    }
}
