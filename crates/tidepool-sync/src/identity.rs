use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use parking_lot::Mutex;
use thiserror::Error;
use tidepool_core::ClientIdentity;
use tracing::{debug, warn};

const IDENTITY_FILE: &str = "identity";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity storage unavailable: {0}")]
    Unavailable(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Persistence seam for the client identifier.
pub trait IdentityStore: Send + Sync {
    /// Returns `Ok(None)` when nothing has been stored yet.
    fn load(&self) -> Result<Option<ClientIdentity>, IdentityError>;
    fn save(&self, identity: &ClientIdentity) -> Result<(), IdentityError>;
}

impl<T: IdentityStore + ?Sized> IdentityStore for &T {
    fn load(&self) -> Result<Option<ClientIdentity>, IdentityError> {
        (**self).load()
    }

    fn save(&self, identity: &ClientIdentity) -> Result<(), IdentityError> {
        (**self).save(identity)
    }
}

/// Stores the identifier as a single line in `<dir>/identity`.
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(IDENTITY_FILE))
    }

    /// `~/.tidepool/identity`.
    pub fn default_location() -> Result<Self, IdentityError> {
        let base = BaseDirs::new()
            .ok_or_else(|| IdentityError::Unavailable("unable to determine home directory".into()))?;
        Ok(Self::in_dir(base.home_dir().join(".tidepool")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityStore for FileIdentityStore {
    fn load(&self) -> Result<Option<ClientIdentity>, IdentityError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(ClientIdentity::new(raw).ok())
    }

    fn save(&self, identity: &ClientIdentity) -> Result<(), IdentityError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut options = OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;
        writeln!(file, "{identity}")?;
        Ok(())
    }
}

/// Process-local store for tests and sessions without a home directory.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    slot: Mutex<Option<ClientIdentity>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(identity: ClientIdentity) -> Self {
        Self {
            slot: Mutex::new(Some(identity)),
        }
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self) -> Result<Option<ClientIdentity>, IdentityError> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, identity: &ClientIdentity) -> Result<(), IdentityError> {
        *self.slot.lock() = Some(identity.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// Read back from the store.
    Stored,
    /// Freshly generated and persisted.
    Generated,
    /// Storage failed; valid for this process only.
    Ephemeral,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub identity: ClientIdentity,
    pub source: IdentitySource,
}

/// Resolves the client identity once and hands out the same value afterwards.
pub struct IdentityResolver<S: IdentityStore> {
    store: S,
    resolved: Mutex<Option<ResolvedIdentity>>,
}

impl<S: IdentityStore> IdentityResolver<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            resolved: Mutex::new(None),
        }
    }

    pub fn resolve(&self) -> ClientIdentity {
        self.resolve_detailed().identity
    }

    /// Never fails: storage problems degrade to an ephemeral identifier.
    pub fn resolve_detailed(&self) -> ResolvedIdentity {
        let mut guard = self.resolved.lock();
        if let Some(resolved) = guard.as_ref() {
            return resolved.clone();
        }

        let resolved = match self.store.load() {
            Ok(Some(identity)) => {
                debug!(target = "tidepool::identity", id = %identity, "loaded stored identity");
                ResolvedIdentity {
                    identity,
                    source: IdentitySource::Stored,
                }
            }
            Ok(None) => {
                let identity = ClientIdentity::generate();
                match self.store.save(&identity) {
                    Ok(()) => {
                        debug!(target = "tidepool::identity", id = %identity, "generated new identity");
                        ResolvedIdentity {
                            identity,
                            source: IdentitySource::Generated,
                        }
                    }
                    Err(err) => {
                        warn!(
                            target = "tidepool::identity",
                            error = %err,
                            "failed to persist identity; using an ephemeral id for this session"
                        );
                        ResolvedIdentity {
                            identity,
                            source: IdentitySource::Ephemeral,
                        }
                    }
                }
            }
            Err(err) => {
                warn!(
                    target = "tidepool::identity",
                    error = %err,
                    "identity storage unavailable; using an ephemeral id for this session"
                );
                ResolvedIdentity {
                    identity: ClientIdentity::generate(),
                    source: IdentitySource::Ephemeral,
                }
            }
        };

        *guard = Some(resolved.clone());
        resolved
    }
}
