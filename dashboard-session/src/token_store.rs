use crate::Result;
use dashboard_api::BearerToken;
use parking_lot::Mutex;
use std::path::PathBuf;
use tracing::debug;

/// Durable slot holding the full bearer token between runs.
///
/// Only [`BearerToken`] can be stored; restricted tokens have no path in.
pub trait TokenStorage: Send + Sync {
    /// Read the stored token. An empty slot is `Ok(None)`.
    fn load(&self) -> Result<Option<BearerToken>>;

    /// Replace the stored token.
    fn save(&self, token: &BearerToken) -> Result<()>;

    /// Empty the slot. Clearing an empty slot succeeds.
    fn clear(&self) -> Result<()>;
}

/// File-backed token storage.
///
/// The token lives in `{base_dir}/access_token`, written with mode 0600.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    base_dir: PathBuf,
}

impl FileTokenStore {
    /// Name of the single slot file.
    pub const SLOT: &'static str = "access_token";

    /// Create a token store rooted at the given directory.
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Default location based on the application name.
    ///
    /// - macOS: `~/Library/Application Support/{app_name}/`
    /// - Linux: `~/.local/share/{app_name}/`
    pub fn default_path(app_name: &str) -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(app_name)
    }

    fn token_path(&self) -> PathBuf {
        self.base_dir.join(Self::SLOT)
    }
}

impl TokenStorage for FileTokenStore {
    fn load(&self) -> Result<Option<BearerToken>> {
        let path = self.token_path();
        if !path.exists() {
            return Ok(None);
        }
        let token = std::fs::read_to_string(&path)?;
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        Ok(Some(BearerToken::new(trimmed)))
    }

    fn save(&self, token: &BearerToken) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.base_dir, std::fs::Permissions::from_mode(0o700))?;
        }

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(self.token_path())?;
            file.write_all(token.as_str().as_bytes())?;
        }

        #[cfg(not(unix))]
        std::fs::write(self.token_path(), token.as_str())?;

        debug!("Wrote access token to {:?}", self.token_path());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(self.token_path()) {
            Ok(()) => {
                debug!("Removed access token from {:?}", self.base_dir);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Token storage that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    slot: Mutex<Option<BearerToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a token already in the slot.
    pub fn with_token(token: BearerToken) -> Self {
        Self {
            slot: Mutex::new(Some(token)),
        }
    }
}

impl TokenStorage for MemoryTokenStore {
    fn load(&self) -> Result<Option<BearerToken>> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, token: &BearerToken) -> Result<()> {
        *self.slot.lock() = Some(token.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot.lock() = None;
        Ok(())
    }
}

impl<T: TokenStorage + ?Sized> TokenStorage for std::sync::Arc<T> {
    fn load(&self) -> Result<Option<BearerToken>> {
        (**self).load()
    }

    fn save(&self, token: &BearerToken) -> Result<()> {
        (**self).save(token)
    }

    fn clear(&self) -> Result<()> {
        (**self).clear()
    }
}
