//! Client library for project hosting sites that only speak HTML.
//!
//! A [`Connection`] wraps one logged-in session. Everything reachable from it
//! (folders, files, issues, mailing lists, forums, members) is fetched lazily
//! and cached in process; see [`cache`] for the caching rules and
//! [`operation`] for how failures are reported.

pub mod batch;
pub mod cache;
pub mod error;
pub mod forge;
pub mod operation;
pub mod transport;

pub use batch::BatchPolicy;
pub use error::{ErrorKind, Fault, ProcessingError, Result};
pub use forge::{Connection, Project, ProjectSettings};
pub use transport::{HttpTransport, Transport};
