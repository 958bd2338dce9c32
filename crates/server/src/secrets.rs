//! File-based secret loading.
//!
//! Passwords are mounted as one file per secret (Docker/Kubernetes style)
//! below a base directory, `/run/secrets` unless `SECRET_BASE_PATH` says
//! otherwise.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory secrets are read from when `SECRET_BASE_PATH` is unset.
pub const DEFAULT_SECRET_BASE_PATH: &str = "/run/secrets";

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Secret {} does not exist", .0.display())]
    Missing(PathBuf),
    #[error("Secret {} is empty", .0.display())]
    Empty(PathBuf),
    #[error("Failed to read secret {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Base directory for secrets, honouring `SECRET_BASE_PATH`.
pub fn secret_base_path() -> PathBuf {
    std::env::var_os("SECRET_BASE_PATH")
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SECRET_BASE_PATH))
}

/// Read the secret `name` below `base`, trimming surrounding whitespace.
///
/// A zero-length file is an error; a file holding only whitespace yields an
/// empty string.
#[tracing::instrument(level = "debug", skip(base))]
pub fn read_secret(base: &Path, name: &str) -> Result<String, SecretError> {
    let path = base.join(name);
    if !path.exists() {
        return Err(SecretError::Missing(path));
    }

    let value = std::fs::read_to_string(&path).map_err(|source| SecretError::Io {
        path: path.clone(),
        source,
    })?;
    if value.is_empty() {
        return Err(SecretError::Empty(path));
    }

    Ok(value.trim().to_string())
}
