// Owner-only file modes and OS keychain access.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};

pub const KEYRING_SERVICE: &str = "com.storyverse.app";

/// Tighten an existing file to 0600. Missing paths are left alone.
pub fn ensure_owner_only_file(path: &Path) -> Result<()> {
    restrict_mode(path, 0o600)
}

/// Tighten an existing directory to 0700. Missing paths are left alone.
pub fn ensure_owner_only_dir(path: &Path) -> Result<()> {
    restrict_mode(path, 0o700)
}

#[cfg(unix)]
fn restrict_mode(path: &Path, wanted: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let current = match fs::metadata(path) {
        Ok(metadata) => metadata.permissions().mode() & 0o777,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(error) => {
            return Err(error)
                .with_context(|| format!("failed to read metadata for `{}`", path.display()))
        }
    };
    if current != wanted {
        fs::set_permissions(path, fs::Permissions::from_mode(wanted))
            .with_context(|| format!("failed to restrict `{}` to {wanted:o}", path.display()))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn restrict_mode(_path: &Path, _wanted: u32) -> Result<()> {
    Ok(())
}

/// Create or truncate `path` for writing, readable by the owner only.
pub fn open_private_truncate(path: &Path) -> std::io::Result<fs::File> {
    let mut options = OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

/// Secret storage keyed by (service, account).
pub trait SecretStore: Send + Sync {
    fn set_secret(&self, service: &str, account: &str, value: &str) -> Result<()>;
    fn get_secret(&self, service: &str, account: &str) -> Result<Option<String>>;
    fn delete_secret(&self, service: &str, account: &str) -> Result<()>;
}

/// OS keychain via the `keyring` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringSecretStore;

fn keychain_entry(service: &str, account: &str) -> Result<keyring::Entry> {
    keyring::Entry::new(service, account)
        .with_context(|| format!("failed to open keychain entry `{service}/{account}`"))
}

impl SecretStore for KeyringSecretStore {
    fn set_secret(&self, service: &str, account: &str, value: &str) -> Result<()> {
        keychain_entry(service, account)?
            .set_password(value)
            .context("failed to write keychain entry")
    }

    fn get_secret(&self, service: &str, account: &str) -> Result<Option<String>> {
        match keychain_entry(service, account)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(error).context("failed to read keychain entry"),
        }
    }

    fn delete_secret(&self, service: &str, account: &str) -> Result<()> {
        match keychain_entry(service, account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(error).context("failed to delete keychain entry"),
        }
    }
}

/// Process-local secret store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    values: Mutex<HashMap<(String, String), String>>,
}

impl MemorySecretStore {
    fn values(&self) -> MutexGuard<'_, HashMap<(String, String), String>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SecretStore for MemorySecretStore {
    fn set_secret(&self, service: &str, account: &str, value: &str) -> Result<()> {
        self.values().insert((service.to_owned(), account.to_owned()), value.to_owned());
        Ok(())
    }

    fn get_secret(&self, service: &str, account: &str) -> Result<Option<String>> {
        Ok(self.values().get(&(service.to_owned(), account.to_owned())).cloned())
    }

    fn delete_secret(&self, service: &str, account: &str) -> Result<()> {
        self.values().remove(&(service.to_owned(), account.to_owned()));
        Ok(())
    }
}
