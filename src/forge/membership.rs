//! Users, roles and project membership.

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::Fault;
use crate::transport::{required_text, Page};

/// A site user, known by login name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct User {
  pub name: String,
  /// Set for the user this connection is logged in as
  pub is_current: bool,
}

/// A project role such as "Developer" or "Observer".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Role {
  pub name: String,
}

/// Roles one user holds in a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Membership {
  pub user: String,
  pub roles: Vec<String>,
}

impl Membership {
  pub fn has_role(&self, role: &str) -> bool {
    self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
  }
}

/// Parse the member table: one row per (user, role) pair.
pub(crate) fn parse_members(page: &Page) -> Result<IndexMap<String, Membership>, Fault> {
  page.require("#members")?;
  let mut members: IndexMap<String, Membership> = IndexMap::new();

  for row in page.select_all("tr.member")? {
    let user = required_text(row, "td.user")?;
    let role = required_text(row, "td.role")?;
    let entry = members.entry(user.clone()).or_insert_with(|| Membership {
      user,
      roles: Vec::new(),
    });
    if !entry.roles.contains(&role) {
      entry.roles.push(role);
    }
  }
  Ok(members)
}
