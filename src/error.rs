//! Error types shared by every remote operation.
//!
//! Low-level collaborators (transport, markup queries, local checks) report a
//! [`Fault`]. The operation wrapper in [`crate::operation`] turns a fault into
//! a [`ProcessingError`], the only error type callers of the library see.

use std::error::Error as StdError;
use std::fmt;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result alias used throughout the library.
pub type Result<T, E = ProcessingError> = std::result::Result<T, E>;

/// A failure raised while talking to the remote site or reading its pages.
#[derive(Debug, thiserror::Error)]
pub enum Fault {
  /// I/O or connection-level failure, including HTTP error statuses.
  #[error("{message}")]
  Transport {
    message: String,
    #[source]
    source: Option<BoxError>,
  },
  /// The fetched document did not have the structure the operation expected.
  #[error("{0}")]
  Parse(String),
  /// A precondition checked locally did not hold.
  #[error("{0}")]
  Validation(String),
  /// The server answered normally but reported an error in the page body.
  #[error("server reported: {0}")]
  RemoteRejection(String),
  /// An error already translated by a nested operation.
  #[error(transparent)]
  Nested(Box<ProcessingError>),
}

impl Fault {
  pub fn transport(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
    Fault::Transport {
      message: message.into(),
      source: Some(source.into()),
    }
  }

  pub fn parse(message: impl Into<String>) -> Self {
    Fault::Parse(message.into())
  }

  pub fn validation(message: impl Into<String>) -> Self {
    Fault::Validation(message.into())
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Fault::Transport { .. } => ErrorKind::Transport,
      Fault::Parse(_) => ErrorKind::Parse,
      Fault::Validation(_) => ErrorKind::Validation,
      Fault::RemoteRejection(_) => ErrorKind::RemoteRejection,
      Fault::Nested(inner) => inner.kind(),
    }
  }
}

impl From<ProcessingError> for Fault {
  fn from(err: ProcessingError) -> Self {
    Fault::Nested(Box::new(err))
  }
}

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Transport,
  Parse,
  Validation,
  RemoteRejection,
}

/// A failed remote operation: the operation label plus the underlying fault.
#[derive(Debug)]
pub struct ProcessingError {
  label: String,
  fault: Fault,
}

impl ProcessingError {
  pub(crate) fn new(label: String, fault: Fault) -> Self {
    Self { label, fault }
  }

  /// Human-readable name of the operation that failed.
  pub fn label(&self) -> &str {
    &self.label
  }

  pub fn fault(&self) -> &Fault {
    &self.fault
  }

  pub fn kind(&self) -> ErrorKind {
    self.fault.kind()
  }
}

impl fmt::Display for ProcessingError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.label, self.fault)
  }
}

impl StdError for ProcessingError {
  // The fault's message is already part of our Display, so expose its cause.
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    self.fault.source()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_display_prepends_label() {
    let err = ProcessingError::new(
      "Failed to list forums of demo".to_string(),
      Fault::parse("no forum table"),
    );
    assert_eq!(err.to_string(), "Failed to list forums of demo: no forum table");
    assert_eq!(err.kind(), ErrorKind::Parse);
  }

  #[test]
  fn test_source_chain_is_preserved() {
    let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
    let err = ProcessingError::new(
      "Failed to fetch issue 3".to_string(),
      Fault::transport("request to http://x/ failed", io),
    );
    let source = err.source().map(|s| s.to_string());
    assert_eq!(source.as_deref(), Some("timed out"));
    assert_eq!(err.kind(), ErrorKind::Transport);
  }

  #[test]
  fn test_nested_fault_keeps_inner_kind() {
    let inner = ProcessingError::new("inner".to_string(), Fault::RemoteRejection("denied".into()));
    let fault: Fault = inner.into();
    assert_eq!(fault.kind(), ErrorKind::RemoteRejection);
    assert_eq!(fault.to_string(), "inner: server reported: denied");
  }
}
