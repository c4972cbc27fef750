use std::sync::Arc;
use tracing::info;
use url::Url;

use super::membership::{Role, User};
use super::project::{Project, ProjectSettings};
use super::registry::Registry;
use super::session::{text_fields, Session};
use crate::error::{Fault, Result};
use crate::operation;
use crate::transport::Transport;

/// Entry point: one logical session against one hosting site.
///
/// Projects, users and roles handed out by a connection are interned by name,
/// so asking twice yields the same `Arc`.
pub struct Connection {
  session: Arc<Session>,
  registry: Registry,
  settings: ProjectSettings,
  username: Option<String>,
}

impl Connection {
  pub fn new(
    transport: impl Transport + 'static,
    site: Url,
    settings: ProjectSettings,
    username: Option<String>,
  ) -> Self {
    Self {
      session: Arc::new(Session::new(Box::new(transport), site)),
      registry: Registry::default(),
      settings,
      username,
    }
  }

  pub fn site(&self) -> &Url {
    self.session.site()
  }

  pub fn username(&self) -> Option<&str> {
    self.username.as_deref()
  }

  /// Sign in through the site's login form.
  pub fn login(&self, password: &str) -> Result<()> {
    let user = self.username.as_deref().unwrap_or_default();
    let label = format!("Failed to log in to {} as {}", self.site(), user);
    operation::run(label, || {
      let user = self
        .username
        .as_deref()
        .ok_or_else(|| Fault::validation("no user name configured"))?;
      let url = self.session.site_url("login")?;
      let fields = text_fields(&[("loginID", user), ("password", password)]);
      let response = self.session.submit_at(&url, "form#login", &fields)?;

      // A rejected login lands on the login form again.
      if response.page().select_one("form#login")?.is_some() {
        return Err(Fault::RemoteRejection("the site did not accept the credentials".to_string()));
      }
      Ok(())
    })?;

    info!(site = %self.site(), user, "logged in");
    Ok(())
  }

  pub fn project(&self, name: &str) -> Arc<Project> {
    self.registry.project(name, || {
      Project::new(name, Arc::clone(&self.session), self.settings)
    })
  }

  /// Projects opened on this connection so far, by name.
  pub fn open_projects(&self) -> Vec<String> {
    self.registry.project_names()
  }

  pub fn user(&self, name: &str) -> Arc<User> {
    let is_current = self.username.as_deref() == Some(name);
    self.registry.user(name, is_current)
  }

  /// The logged-in user, if a user name is configured.
  pub fn current_user(&self) -> Option<Arc<User>> {
    self.username.as_deref().map(|name| self.user(name))
  }

  pub fn role(&self, name: &str) -> Arc<Role> {
    self.registry.role(name)
  }
}

impl std::fmt::Debug for Connection {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Connection")
      .field("site", self.site())
      .field("username", &self.username)
      .finish_non_exhaustive()
  }
}
