use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use super::folder::{DocumentTree, Folder};
use super::forum::{parse_forums, Forum, ForumCollection};
use super::issue::IssueTracker;
use super::mailing_list::{parse_lists, ListCollection, MailingList};
use super::membership::{parse_members, Membership, Role, User};
use super::session::{text_fields, Session};
use crate::batch::BatchPolicy;
use crate::cache::LazyCollection;
use crate::error::{Fault, Result};
use crate::operation;

/// Tuning shared by every project of a connection.
#[derive(Debug, Clone, Copy)]
pub struct ProjectSettings {
  pub batch: BatchPolicy,
  /// Issues kept alive by the issue cache without outside references
  pub issue_capacity: usize,
}

impl Default for ProjectSettings {
  fn default() -> Self {
    Self {
      batch: BatchPolicy::default(),
      issue_capacity: crate::cache::DEFAULT_CAPACITY,
    }
  }
}

/// One hosted project.
pub struct Project {
  name: String,
  session: Arc<Session>,
  settings: ProjectSettings,
  documents: Arc<DocumentTree>,
  issues: IssueTracker,
  mailing_lists: Arc<ListCollection>,
  forums: Arc<ForumCollection>,
  members: LazyCollection<String, Membership>,
}

impl Project {
  pub(crate) fn new(name: &str, session: Arc<Session>, settings: ProjectSettings) -> Self {
    Self {
      name: name.to_string(),
      documents: DocumentTree::new(name, Arc::clone(&session)),
      issues: IssueTracker::new(
        name,
        Arc::clone(&session),
        settings.batch,
        settings.issue_capacity,
      ),
      mailing_lists: Arc::new(LazyCollection::new()),
      forums: Arc::new(LazyCollection::new()),
      members: LazyCollection::new(),
      session,
      settings,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Root of the documents & files area.
  pub fn root_folder(&self) -> Folder {
    self.documents.root()
  }

  /// Folder at a slash-separated path such as `/specs/drafts`.
  pub fn folder(&self, path: &str) -> Result<Option<Folder>> {
    self.root_folder().folder_at(path)
  }

  pub fn issues(&self) -> &IssueTracker {
    &self.issues
  }

  pub fn mailing_lists(&self) -> Result<Arc<IndexMap<String, Arc<MailingList>>>> {
    self.mailing_lists.get_or_load(|| {
      let label = format!("Failed to list mailing lists of {}", self.name);
      operation::run(label, || {
        let url = self.session.project_url(&self.name, &["lists"])?;
        let response = self.session.get(&url)?;
        let previous = self.mailing_lists.last_known();
        parse_lists(&response.page(), previous.as_deref(), |list| {
          MailingList::new(
            &self.name,
            list,
            Arc::clone(&self.session),
            self.settings.batch,
            Arc::downgrade(&self.mailing_lists),
          )
        })
      })
    })
  }

  pub fn mailing_list(&self, name: &str) -> Result<Option<Arc<MailingList>>> {
    Ok(self.mailing_lists()?.get(name).cloned())
  }

  /// Create a mailing list; it shows up in [`Project::mailing_lists`] right away.
  pub fn create_mailing_list(&self, name: &str, description: &str) -> Result<Arc<MailingList>> {
    let label = format!("Failed to create mailing list {} in {}", name, self.name);
    operation::run(label.clone(), || {
      if name.trim().is_empty() || name.contains(|c: char| c == '/' || c == '@' || c.is_whitespace()) {
        return Err(Fault::validation(format!("'{}' is not a valid list name", name)));
      }
      let url = self.session.project_url(&self.name, &["lists", "add"])?;
      let fields = text_fields(&[("name", name), ("description", description)]);
      self.session.submit_at(&url, "form#list-add", &fields)?;
      Ok(())
    })?;

    self.mailing_lists.invalidate();
    info!(project = %self.name, list = name, "created mailing list");

    match self.mailing_list(name)? {
      Some(list) => Ok(list),
      None => operation::run(label, || {
        Err(Fault::parse(format!("list {} is not listed after creation", name)))
      }),
    }
  }

  pub fn forums(&self) -> Result<Arc<IndexMap<String, Arc<Forum>>>> {
    self.forums.get_or_load(|| {
      let label = format!("Failed to list forums of {}", self.name);
      operation::run(label, || {
        let url = self.session.project_url(&self.name, &["forums"])?;
        let response = self.session.get(&url)?;
        parse_forums(&response.page(), &self.name, &self.session, &self.forums)
      })
    })
  }

  pub fn forum(&self, name: &str) -> Result<Option<Arc<Forum>>> {
    Ok(self.forums()?.get(name).cloned())
  }

  /// Create a forum; it shows up in [`Project::forums`] right away.
  pub fn create_forum(&self, name: &str, description: &str) -> Result<Arc<Forum>> {
    let label = format!("Failed to create forum {} in {}", name, self.name);
    operation::run(label.clone(), || {
      if name.trim().is_empty() {
        return Err(Fault::validation("forum name is empty"));
      }
      let url = self.session.project_url(&self.name, &["forums", "add"])?;
      let fields = text_fields(&[("name", name), ("description", description)]);
      self.session.submit_at(&url, "form#forum-add", &fields)?;
      Ok(())
    })?;

    self.forums.invalidate();
    info!(project = %self.name, forum = name, "created forum");

    match self.forum(name)? {
      Some(forum) => Ok(forum),
      None => operation::run(label, || {
        Err(Fault::parse(format!("forum {} is not listed after creation", name)))
      }),
    }
  }

  /// Project members keyed by user name.
  pub fn members(&self) -> Result<Arc<IndexMap<String, Membership>>> {
    self.members.get_or_load(|| {
      let label = format!("Failed to list members of {}", self.name);
      operation::run(label, || {
        let url = self.session.project_url(&self.name, &["members"])?;
        parse_members(&self.session.get(&url)?.page())
      })
    })
  }

  pub fn grant_role(&self, user: &User, role: &Role) -> Result<()> {
    self.change_role("grant", user, role)
  }

  pub fn revoke_role(&self, user: &User, role: &Role) -> Result<()> {
    self.change_role("revoke", user, role)
  }

  fn change_role(&self, action: &str, user: &User, role: &Role) -> Result<()> {
    let label = format!(
      "Failed to {} role {} for {} in {}",
      action, role.name, user.name, self.name
    );
    operation::run(label, || {
      let url = self.session.project_url(&self.name, &["members", action])?;
      let form = format!("form#{}-role", action);
      let fields = text_fields(&[("user", user.name.as_str()), ("role", role.name.as_str())]);
      self.session.submit_at(&url, &form, &fields)?;
      Ok(())
    })?;

    self.members.invalidate();
    info!(project = %self.name, user = %user.name, role = %role.name, action, "changed role");
    Ok(())
  }

  /// Forget every cached collection of this project except issues.
  pub fn refresh(&self) {
    self.root_folder().refresh();
    self.mailing_lists.invalidate();
    self.forums.invalidate();
    self.members.invalidate();
  }
}

impl fmt::Debug for Project {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Project")
      .field("name", &self.name)
      .finish_non_exhaustive()
  }
}
