//! Entries of the documents & files area.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use url::Url;

use crate::error::Fault;

/// Remote id of a folder. The root folder has no id of its own on the site.
pub type FolderId = u32;

pub const ROOT_FOLDER: FolderId = 0;

/// Lifecycle state of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FileStatus {
  Draft,
  Reviewed,
  Baselined,
  Stable,
  Archival,
  Obsolete,
}

impl FileStatus {
  pub const ALL: [FileStatus; 6] = [
    FileStatus::Draft,
    FileStatus::Reviewed,
    FileStatus::Baselined,
    FileStatus::Stable,
    FileStatus::Archival,
    FileStatus::Obsolete,
  ];

  /// Name shown by the site.
  pub fn display_name(self) -> &'static str {
    match self {
      FileStatus::Draft => "Draft",
      FileStatus::Reviewed => "Reviewed",
      FileStatus::Baselined => "Baselined",
      FileStatus::Stable => "Stable",
      FileStatus::Archival => "Archival",
      FileStatus::Obsolete => "Obsolete",
    }
  }
}

impl fmt::Display for FileStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.display_name())
  }
}

impl FromStr for FileStatus {
  type Err = Fault;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let wanted = s.trim();
    FileStatus::ALL
      .into_iter()
      .find(|status| status.display_name().eq_ignore_ascii_case(wanted))
      .ok_or_else(|| Fault::parse(format!("unknown file status '{}'", wanted)))
  }
}

/// One file in a folder, as listed at fetch time.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
  pub id: u32,
  pub name: String,
  pub folder: FolderId,
  /// Download location
  pub location: Url,
  pub status: FileStatus,
  /// User name of the last modifier
  pub modified_by: String,
  pub modified: NaiveDateTime,
  pub description: String,
}

impl PartialEq for FileEntry {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id && self.folder == other.folder
  }
}

impl Eq for FileEntry {}

impl Hash for FileEntry {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.id.hash(state);
    self.folder.hash(state);
  }
}
