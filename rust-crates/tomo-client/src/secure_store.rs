use crate::{
    Error,
    Result,
};
use std::{
    collections::HashMap,
    io,
    path::{
        Path,
        PathBuf,
    },
    sync::{
        Arc,
        Mutex,
    },
};
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub const DEFAULT_SECURE_DIR: &str = "~/.tomo/secure";

/// Opaque key-value blob store. Values are never inspected or logged here.
pub trait SecureStore {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>>;
    fn set(&self, key: &str, value: &[u8]) -> impl Future<Output = Result<()>>;
    fn remove(&self, key: &str) -> impl Future<Output = Result<()>>;
}

#[derive(Clone, Default)]
pub struct InMemorySecureStore {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| Error::SecureStore("in-memory store lock poisoned".to_string()))
    }
}

impl SecureStore for InMemorySecureStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// One file per key inside a private directory.
#[derive(Clone, Debug)]
pub struct FileSecureStore {
    dir: PathBuf,
}

impl FileSecureStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Expands a leading `~` before using the directory.
    pub fn from_user_path(dir: &str) -> Self {
        Self::new(shellexpand::tilde(dir).into_owned())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(file_name)
    }
}

impl Default for FileSecureStore {
    fn default() -> Self {
        Self::from_user_path(DEFAULT_SECURE_DIR)
    }
}

fn store_error(action: &str, path: &Path, err: io::Error) -> Error {
    Error::SecureStore(format!("failed to {action} {}: {err}", path.display()))
}

impl SecureStore for FileSecureStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(store_error("read", &path, err)),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        create_private_dir(&self.dir).await?;

        let path = self.path_for(key);
        let staging = path.with_extension("tmp");
        let mut file = create_private_file(&staging).await?;
        file.write_all(value)
            .await
            .map_err(|e| store_error("write", &staging, e))?;
        file.sync_all()
            .await
            .map_err(|e| store_error("sync", &staging, e))?;
        drop(file);
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| store_error("replace", &path, e))?;

        debug!(path = %path.display(), "secure entry written");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(store_error("remove", &path, err)),
        }
    }
}

/// Creates the directory owner-only and tightens it if it already existed.
async fn create_private_dir(dir: &Path) -> Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder
        .create(dir)
        .await
        .map_err(|e| store_error("create", dir, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
            .await
            .map_err(|e| store_error("restrict", dir, e))?;
    }
    Ok(())
}

/// Opens a new owner-only file. The mode is set at creation, before any byte
/// is written, so a leftover staging file is removed first.
async fn create_private_file(path: &Path) -> Result<tokio::fs::File> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(store_error("clear", path, err)),
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    options
        .open(path)
        .await
        .map_err(|e| store_error("create", path, e))
}
