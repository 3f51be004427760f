//! Plaintext credential record.
//!
//! The record is two lines: client id, then client secret. Values are stored
//! as-is, so neither may contain a line break.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Storage for a single client id / secret pair.
pub trait CredentialStore {
    /// Replaces the stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if a value contains a line break or the record cannot
    /// be written.
    fn save(&self, id: &str, secret: &str) -> Result<()>;

    /// Returns the stored record, if a complete one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read.
    fn load(&self) -> Result<Option<(String, String)>>;
}

/// Credential record kept in a file.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn check_value(name: &str, value: &str) -> Result<()> {
    if value.contains(['\n', '\r']) {
        return Err(Error::Credentials(format!("{name} must not contain a line break")));
    }
    Ok(())
}

impl CredentialStore for FileCredentialStore {
    fn save(&self, id: &str, secret: &str) -> Result<()> {
        check_value("client id", id)?;
        check_value("client secret", secret)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, format!("{id}\n{secret}"))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }
        log::info!("Saved credentials to {}", self.path.display());
        Ok(())
    }

    fn load(&self) -> Result<Option<(String, String)>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut lines = contents.lines();
        match (lines.next(), lines.next()) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Ok(Some((id.to_string(), secret.to_string())))
            }
            _ => {
                log::warn!("Ignoring incomplete credentials in {}", self.path.display());
                Ok(None)
            }
        }
    }
}
