//! Discussion forums of a project.

use indexmap::IndexMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::info;

use super::session::{with_query, Session};
use crate::cache::LazyCollection;
use crate::error::{Fault, Result};
use crate::operation;
use crate::transport::{child_text, required_attr, required_text, Page};

pub(crate) type ForumCollection = LazyCollection<String, Arc<Forum>>;

pub struct Forum {
  id: u32,
  name: String,
  description: String,
  project: String,
  session: Arc<Session>,
  siblings: Weak<ForumCollection>,
}

impl Forum {
  pub fn id(&self) -> u32 {
    self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn description(&self) -> &str {
    &self.description
  }

  /// Delete the forum and all of its messages.
  pub fn delete(&self) -> Result<()> {
    let label = format!("Failed to delete forum {} in {}", self.name, self.project);
    operation::run(label, || {
      let url = with_query(
        self.session.project_url(&self.project, &["forums", "delete"])?,
        "forumID",
        &self.id.to_string(),
      );
      self.session.submit_at(&url, "form#forum-delete", &[])?;
      Ok(())
    })?;

    if let Some(siblings) = self.siblings.upgrade() {
      siblings.invalidate();
    }
    info!(project = %self.project, forum = self.id, "deleted forum");
    Ok(())
  }
}

impl fmt::Debug for Forum {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Forum")
      .field("id", &self.id)
      .field("name", &self.name)
      .field("project", &self.project)
      .finish_non_exhaustive()
  }
}

/// Parse the forum overview. Forums already listed keep their instance.
pub(crate) fn parse_forums(
  page: &Page,
  project: &str,
  session: &Arc<Session>,
  siblings: &Arc<ForumCollection>,
) -> std::result::Result<IndexMap<String, Arc<Forum>>, Fault> {
  page.require("#forums")?;
  let previous = siblings.last_known();
  let mut forums = IndexMap::new();

  for row in page.select_all("tr.forum")? {
    let raw_id = required_attr(row, "data-id")?;
    let id: u32 = raw_id
      .trim()
      .parse()
      .map_err(|_| Fault::parse(format!("bad forum id '{}'", raw_id)))?;
    let name = required_text(row, "a.name")?;
    let description = child_text(row, "td.description")?.unwrap_or_default();

    let reused = previous
      .as_ref()
      .and_then(|p| p.get(&name))
      .filter(|f| f.id == id && f.description == description)
      .cloned();
    let forum = reused.unwrap_or_else(|| {
      Arc::new(Forum {
        id,
        name: name.clone(),
        description,
        project: project.to_string(),
        session: Arc::clone(session),
        siblings: Arc::downgrade(siblings),
      })
    });
    forums.insert(name, forum);
  }
  Ok(forums)
}
