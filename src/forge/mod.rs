//! Entities of a hosting site: projects and everything hanging off them.
//!
//! Every entity keeps a shared [`Session`] handle and caches what it fetched.
//! Mutations go through the site's HTML forms and then either patch the
//! affected cache in place or invalidate it.

mod connection;
mod file;
mod folder;
mod forum;
mod issue;
mod mailing_list;
mod membership;
mod project;
mod registry;
mod session;

#[cfg(test)]
pub(crate) mod fake_site;

pub use connection::Connection;
pub use file::{FileEntry, FileStatus, FolderId, ROOT_FOLDER};
pub use folder::Folder;
pub use forum::Forum;
pub use issue::{parse_export, Comment, Issue, IssueTracker};
pub use mailing_list::{ListSummary, MailingList, SubscriptionMode, YearMonth};
pub use membership::{Membership, Role, User};
pub use project::{Project, ProjectSettings};
pub use session::Session;
