use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS credentials (
  username   TEXT PRIMARY KEY NOT NULL,
  digest     TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
";

/// Digests of the last password each user logged in with successfully.
///
/// Only a SHA-256 digest of `user:password` is stored, never the password.
pub struct CredentialStore {
  conn: Connection,
}

/// Hex-encoded SHA-256 of `user:password`.
pub fn digest(username: &str, password: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(username.as_bytes());
  hasher.update(b":");
  hasher.update(password.as_bytes());
  hex::encode(hasher.finalize())
}

impl CredentialStore {
  /// Open or create the store at the default location
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create credential directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open credential store at {}: {}", path.display(), e))?;
    conn
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to initialize credential store: {}", e))?;

    Ok(Self { conn })
  }

  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("forgetasks").join("credentials.db"))
  }

  /// Whether `password` is the one `username` last logged in with.
  pub fn matches(&self, username: &str, password: &str) -> Result<bool> {
    let stored: Option<String> = self
      .conn
      .query_row(
        "SELECT digest FROM credentials WHERE username = ?1",
        params![username],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read stored credentials: {}", e))?;

    Ok(stored.is_some_and(|d| d == digest(username, password)))
  }

  /// Record a password that just worked.
  pub fn remember(&self, username: &str, password: &str) -> Result<()> {
    self
      .conn
      .execute(
        "INSERT INTO credentials (username, digest, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(username) DO UPDATE SET digest = excluded.digest, updated_at = excluded.updated_at",
        params![
          username,
          digest(username, password),
          chrono::Utc::now().to_rfc3339()
        ],
      )
      .map_err(|e| eyre!("Failed to store credentials: {}", e))?;
    Ok(())
  }

  pub fn forget(&self, username: &str) -> Result<()> {
    self
      .conn
      .execute("DELETE FROM credentials WHERE username = ?1", params![username])
      .map_err(|e| eyre!("Failed to remove stored credentials: {}", e))?;
    Ok(())
  }
}
