use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::membership::{Role, User};
use super::project::Project;

/// Name-keyed entities scoped to one connection.
///
/// An entry is created on first request and the same `Arc` is handed out for
/// as long as the connection lives.
#[derive(Default)]
pub(crate) struct Registry {
  projects: Interner<Project>,
  users: Interner<User>,
  roles: Interner<Role>,
}

struct Interner<V> {
  entries: Mutex<HashMap<String, Arc<V>>>,
}

impl<V> Default for Interner<V> {
  fn default() -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
    }
  }
}

impl<V> Interner<V> {
  fn get_or_insert_with(&self, name: &str, make: impl FnOnce() -> V) -> Arc<V> {
    let mut entries = self.entries.lock();
    if let Some(existing) = entries.get(name) {
      return Arc::clone(existing);
    }
    let created = Arc::new(make());
    entries.insert(name.to_string(), Arc::clone(&created));
    created
  }

  fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.entries.lock().keys().cloned().collect();
    names.sort();
    names
  }
}

impl Registry {
  pub fn project(&self, name: &str, make: impl FnOnce() -> Project) -> Arc<Project> {
    self.projects.get_or_insert_with(name, make)
  }

  pub fn user(&self, name: &str, is_current: bool) -> Arc<User> {
    self.users.get_or_insert_with(name, || User {
      name: name.to_string(),
      is_current,
    })
  }

  pub fn role(&self, name: &str) -> Arc<Role> {
    self.roles.get_or_insert_with(name, || Role {
      name: name.to_string(),
    })
  }

  pub fn project_names(&self) -> Vec<String> {
    self.projects.names()
  }
}
