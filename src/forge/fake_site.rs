//! Stateful in-memory hosting site for tests.
//!
//! Serves the same page structure as the real site for one project, `demo`,
//! and applies form submissions to its state.

use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use url::Url;

use super::{Connection, Project, ProjectSettings};
use crate::error::Fault;
use crate::transport::fake::{FakeTransport, Request};

pub(crate) const SITE: &str = "https://forge.example.org/";
pub(crate) const PROJECT: &str = "demo";
pub(crate) const USER: &str = "alice";
pub(crate) const PASSWORD: &str = "secret";

const FORMS: [&str; 13] = [
  "login",
  "folder-add",
  "folder-delete",
  "file-add",
  "file-delete",
  "issue-comment",
  "list-add",
  "subscribers",
  "list-delete",
  "forum-add",
  "forum-delete",
  "grant-role",
  "revoke-role",
];

#[derive(Debug, Clone)]
pub(crate) struct FakeFolder {
  pub id: u32,
  pub parent: u32,
  pub name: String,
}

#[derive(Debug, Clone)]
pub(crate) struct FakeFile {
  pub id: u32,
  pub folder: u32,
  pub name: String,
  pub status: String,
}

#[derive(Debug, Clone)]
pub(crate) struct FakeIssue {
  pub summary: String,
  pub changed: String,
  pub comments: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeList {
  pub description: String,
  pub subscribers: BTreeMap<String, BTreeSet<String>>,
  pub histogram: Vec<(String, u32)>,
}

#[derive(Debug, Clone)]
pub(crate) struct FakeForum {
  pub id: u32,
  pub name: String,
  pub description: String,
}

/// Everything the fake site knows.
#[derive(Debug)]
pub(crate) struct SiteState {
  pub folders: Vec<FakeFolder>,
  pub files: Vec<FakeFile>,
  pub issues: BTreeMap<u32, FakeIssue>,
  pub lists: IndexMap<String, FakeList>,
  pub forums: Vec<FakeForum>,
  pub members: Vec<(String, String)>,
  /// Requests whose `path?query` contains this fail at the transport level
  pub fail_on: Option<String>,
  /// Bodies served verbatim for an exact `path?query`
  pub pages: HashMap<String, String>,
  next_id: u32,
}

impl SiteState {
  pub fn new() -> Self {
    Self {
      folders: Vec::new(),
      files: Vec::new(),
      issues: BTreeMap::new(),
      lists: IndexMap::new(),
      forums: Vec::new(),
      members: Vec::new(),
      fail_on: None,
      pages: HashMap::new(),
      next_id: 100,
    }
  }

  pub fn folder(mut self, id: u32, parent: u32, name: &str) -> Self {
    self.folders.push(FakeFolder {
      id,
      parent,
      name: name.to_string(),
    });
    self
  }

  pub fn file(mut self, id: u32, folder: u32, name: &str) -> Self {
    self.files.push(FakeFile {
      id,
      folder,
      name: name.to_string(),
      status: "Draft".to_string(),
    });
    self
  }

  pub fn issue(mut self, id: u32, summary: &str, changed: &str) -> Self {
    self.issues.insert(
      id,
      FakeIssue {
        summary: summary.to_string(),
        changed: changed.to_string(),
        comments: Vec::new(),
      },
    );
    self
  }

  pub fn list(mut self, name: &str, description: &str) -> Self {
    self.lists.insert(
      name.to_string(),
      FakeList {
        description: description.to_string(),
        ..FakeList::default()
      },
    );
    self
  }

  pub fn subscriber(mut self, list: &str, mode: &str, address: &str) -> Self {
    if let Some(list) = self.lists.get_mut(list) {
      list
        .subscribers
        .entry(mode.to_string())
        .or_default()
        .insert(address.to_string());
    }
    self
  }

  pub fn posts(mut self, list: &str, month: &str, count: u32) -> Self {
    if let Some(list) = self.lists.get_mut(list) {
      list.histogram.push((month.to_string(), count));
    }
    self
  }

  pub fn forum(mut self, id: u32, name: &str, description: &str) -> Self {
    self.forums.push(FakeForum {
      id,
      name: name.to_string(),
      description: description.to_string(),
    });
    self
  }

  pub fn member(mut self, user: &str, role: &str) -> Self {
    self.members.push((user.to_string(), role.to_string()));
    self
  }

  fn allocate_id(&mut self) -> u32 {
    self.next_id += 1;
    self.next_id
  }
}

pub(crate) struct FakeSite {
  state: Mutex<SiteState>,
}

fn not_found(target: &str) -> Fault {
  Fault::Transport {
    message: format!("{} returned HTTP 404 Not Found", target),
    source: None,
  }
}

fn banner(message: &str) -> String {
  format!(r#"<div class="error-banner">{}</div>"#, message)
}

fn form_page() -> String {
  FORMS
    .iter()
    .map(|id| {
      format!(
        r#"<form id="{}" method="post"><input type="hidden" name="token" value="t0k3n"></form>"#,
        id
      )
    })
    .collect()
}

impl FakeSite {
  fn handle(&self, request: &Request) -> Result<String, Fault> {
    let target = request.target();
    let mut state = self.state.lock();
    if let Some(needle) = &state.fail_on {
      if target.contains(needle.as_str()) {
        return Err(Fault::Transport {
          message: format!("connection reset while requesting {}", target),
          source: None,
        });
      }
    }

    if let Some(body) = state.pages.get(&target) {
      return Ok(body.clone());
    }

    let (url, form) = match request {
      Request::Fetch(url) => (url, None),
      Request::Submit { page, form, .. } => (page, Some(form.as_str())),
    };
    let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
    let param = |name: &str| query.get(name).and_then(|v| v.parse::<u32>().ok()).unwrap_or(0);
    let field = |name: &str| request.field(name).unwrap_or_default().to_string();

    let segments: Vec<&str> = url.path_segments().map(|s| s.collect()).unwrap_or_default();
    if segments == ["login"] {
      return Ok(match form {
        Some(_) if field("loginID") == USER && field("password") == PASSWORD => {
          "<p>Welcome back</p>".to_string()
        }
        _ => form_page(),
      });
    }
    let [_, project, rest @ ..] = segments.as_slice() else {
      return Err(not_found(&target));
    };
    if *project != PROJECT {
      return Err(not_found(&target));
    }

    match (rest, form) {
      (["docs", "list"], None) => Ok(state.listing(param("folderID"))),
      (["docs", "folder", "add"], Some(_)) => {
        let parent = param("parentID");
        let name = field("name");
        if state.folders.iter().any(|f| f.parent == parent && f.name == name) {
          return Ok(banner("A folder with that name already exists"));
        }
        let id = state.allocate_id();
        state.folders.push(FakeFolder { id, parent, name });
        Ok(format!(r#"<span id="created-folder" data-id="{}"></span>"#, id))
      }
      (["docs", "folder", "delete"], Some(_)) => {
        let id = param("folderID");
        state.folders.retain(|f| f.id != id && f.parent != id);
        state.files.retain(|f| f.folder != id);
        Ok("<p>Folder deleted</p>".to_string())
      }
      (["docs", "file", "add"], Some(_)) => {
        let id = state.allocate_id();
        state.files.push(FakeFile {
          id,
          folder: param("folderID"),
          name: field("name"),
          status: field("status"),
        });
        Ok("<p>File added</p>".to_string())
      }
      (["docs", "file", "delete"], Some(_)) => {
        let id = param("documentID");
        state.files.retain(|f| f.id != id);
        Ok("<p>File deleted</p>".to_string())
      }
      (["issues", "xml"], None) => Ok(state.export(&query)),
      (["issues", "comment"], Some(_)) => match state.issues.get_mut(&param("id")) {
        Some(issue) => {
          issue.comments.push(field("comment"));
          Ok("<p>Comment added</p>".to_string())
        }
        None => Ok(banner("No such issue")),
      },
      (["lists"], None) => Ok(state.list_overview()),
      (["lists", "add"], Some(_)) => {
        let name = field("name");
        if state.lists.contains_key(&name) {
          return Ok(banner("List already exists"));
        }
        state.lists.insert(
          name,
          FakeList {
            description: field("description"),
            ..FakeList::default()
          },
        );
        Ok("<p>List created</p>".to_string())
      }
      (["lists", name, page], form) => {
        let Some(list) = state.lists.get_mut(*name) else {
          return Ok(banner("No such mailing list"));
        };
        match (*page, form) {
          ("info", None) => Ok(list.info()),
          ("subscribers", None) => Ok(list.subscriber_page(query.get("mode").map_or("normal", String::as_str))),
          ("subscribe", Some(_)) => Ok(list.change(&field("action"), &field("mode"), &field("addresses"))),
          ("delete", Some(_)) => {
            state.lists.shift_remove(*name);
            Ok("<p>List deleted</p>".to_string())
          }
          (_, None) => Ok(form_page()),
          _ => Err(not_found(&target)),
        }
      }
      (["forums"], None) => Ok(state.forum_overview()),
      (["forums", "add"], Some(_)) => {
        let id = state.allocate_id();
        state.forums.push(FakeForum {
          id,
          name: field("name"),
          description: field("description"),
        });
        Ok("<p>Forum created</p>".to_string())
      }
      (["forums", "delete"], Some(_)) => {
        let id = param("forumID");
        state.forums.retain(|f| f.id != id);
        Ok("<p>Forum deleted</p>".to_string())
      }
      (["members"], None) => Ok(state.member_page()),
      (["members", "grant"], Some(_)) => {
        let pair = (field("user"), field("role"));
        if !state.members.contains(&pair) {
          state.members.push(pair);
        }
        Ok("<p>Role granted</p>".to_string())
      }
      (["members", "revoke"], Some(_)) => {
        let pair = (field("user"), field("role"));
        state.members.retain(|m| *m != pair);
        Ok("<p>Role revoked</p>".to_string())
      }
      (_, None) => Ok(form_page()),
      (_, Some(_)) => Err(not_found(&target)),
    }
  }
}

impl SiteState {
  fn listing(&self, folder: u32) -> String {
    if folder != 0 && !self.folders.iter().any(|f| f.id == folder) {
      return banner("Folder not found");
    }
    let mut rows = String::new();
    for f in self.folders.iter().filter(|f| f.parent == folder) {
      rows.push_str(&format!(
        r#"<tr class="folder" data-id="{}"><td><a class="name" href="list?folderID={}">{}</a></td><td class="description">{} folder</td></tr>"#,
        f.id, f.id, f.name, f.name
      ));
    }
    for f in self.files.iter().filter(|f| f.folder == folder) {
      rows.push_str(&format!(
        r#"<tr class="file" data-id="{}"><td><a class="name" href="/files/{}/{}">{}</a></td><td class="status">{}</td><td class="modified-by">alice</td><td class="modified">2024-03-01 10:00</td><td class="description"></td></tr>"#,
        f.id, f.id, f.name, f.name, f.status
      ));
    }
    format!(r#"<table id="document-list">{}</table>"#, rows)
  }

  fn export(&self, query: &HashMap<String, String>) -> String {
    let mut body = String::new();
    if let Some(ids) = query.get("id") {
      for raw in ids.split(',') {
        let id: u32 = raw.parse().unwrap_or(0);
        match self.issues.get(&id) {
          Some(issue) => body.push_str(&issue_xml(id, issue)),
          None => body.push_str(&format!(
            r#"<issue status_code="404" status_message="NotFound"><issue_id>{}</issue_id></issue>"#,
            raw
          )),
        }
      }
    } else {
      // The site's range is inclusive at both ends.
      let from = query.get("changedFrom").cloned().unwrap_or_default();
      let to = query.get("changedTo").cloned().unwrap_or_default();
      for (id, issue) in &self.issues {
        if from <= issue.changed && issue.changed <= to {
          body.push_str(&issue_xml(*id, issue));
        }
      }
    }
    format!("<?xml version=\"1.0\"?><issues>{}</issues>", body)
  }

  fn list_overview(&self) -> String {
    let rows: String = self
      .lists
      .keys()
      .map(|name| format!(r#"<tr class="list"><td><a class="name" href="lists/{0}/info">{0}</a></td></tr>"#, name))
      .collect();
    format!(r#"<table id="mailing-lists">{}</table>"#, rows)
  }

  fn forum_overview(&self) -> String {
    let rows: String = self
      .forums
      .iter()
      .map(|f| {
        format!(
          r#"<tr class="forum" data-id="{}"><td><a class="name">{}</a></td><td class="description">{}</td></tr>"#,
          f.id, f.name, f.description
        )
      })
      .collect();
    format!(r#"<table id="forums">{}</table>"#, rows)
  }

  fn member_page(&self) -> String {
    let rows: String = self
      .members
      .iter()
      .map(|(user, role)| {
        format!(
          r#"<tr class="member"><td class="user">{}</td><td class="role">{}</td></tr>"#,
          user, role
        )
      })
      .collect();
    format!(r#"<table id="members">{}</table>"#, rows)
  }
}

impl FakeList {
  fn info(&self) -> String {
    let total: u32 = self.histogram.iter().map(|(_, n)| n).sum();
    let rows: String = self
      .histogram
      .iter()
      .map(|(month, n)| format!(r#"<tr class="month" data-month="{}"><td class="count">{}</td></tr>"#, month, n))
      .collect();
    format!(
      r#"<p id="description">{}</p><p>Messages: <span id="message-count">{}</span></p><table>{}</table>"#,
      self.description, total, rows
    )
  }

  fn subscriber_page(&self, mode: &str) -> String {
    let rows: String = self
      .subscribers
      .get(mode)
      .into_iter()
      .flatten()
      .map(|a| format!(r#"<tr><td class="address">{}</td></tr>"#, a))
      .collect();
    format!(r#"<table id="subscriber-list">{}</table>"#, rows)
  }

  fn change(&mut self, action: &str, mode: &str, addresses: &str) -> String {
    let set = self.subscribers.entry(mode.to_string()).or_default();
    let mut changed = 0;
    for address in addresses.lines().filter(|a| !a.is_empty()) {
      let done = match action {
        "subscribe" => set.insert(address.to_string()),
        _ => set.remove(address),
      };
      if done {
        changed += 1;
      }
    }
    format!(r#"<p><span id="result-count">{}</span> addresses changed</p>"#, changed)
  }
}

fn issue_xml(id: u32, issue: &FakeIssue) -> String {
  let comments: String = issue
    .comments
    .iter()
    .map(|text| {
      format!(
        "<long_desc><who>{}</who><issue_when>2024-02-01 09:30:00</issue_when><thetext>{}</thetext></long_desc>",
        USER, text
      )
    })
    .collect();
  format!(
    r#"<issue status_code="200"><issue_id>{}</issue_id><short_desc>{}</short_desc><issue_status>NEW</issue_status><priority>P3</priority><reporter>bob</reporter><assigned_to>{}</assigned_to><creation_ts>2024-01-01 08:00:00</creation_ts><delta_ts>{}</delta_ts>{}</issue>"#,
    id, issue.summary, USER, issue.changed, comments
  )
}

/// A connection wired to a fresh fake site.
pub(crate) struct Harness {
  pub site: Arc<FakeSite>,
  pub transport: Arc<FakeTransport>,
  pub connection: Connection,
}

impl Harness {
  pub fn new(state: SiteState) -> Self {
    Self::with_settings(state, ProjectSettings::default())
  }

  pub fn with_settings(state: SiteState, settings: ProjectSettings) -> Self {
    let site = Arc::new(FakeSite {
      state: Mutex::new(state),
    });
    let handler_site = Arc::clone(&site);
    let transport = Arc::new(FakeTransport::new(move |request| handler_site.handle(request)));
    let connection = Connection::new(
      Arc::clone(&transport),
      Url::parse(SITE).expect("valid site url"),
      settings,
      Some(USER.to_string()),
    );
    Self {
      site,
      transport,
      connection,
    }
  }

  pub fn project(&self) -> Arc<Project> {
    self.connection.project(PROJECT)
  }

  /// Direct access to the remote state, e.g. to simulate other clients.
  pub fn state(&self) -> MutexGuard<'_, SiteState> {
    self.site.state.lock()
  }

  pub fn fetches(&self, needle: &str) -> usize {
    self.transport.fetch_count(needle)
  }

  /// Page fetches of exactly `target` (`path?query`).
  pub fn fetches_of(&self, target: &str) -> usize {
    self
      .transport
      .requests()
      .iter()
      .filter(|r| matches!(r, Request::Fetch(_)) && r.target() == target)
      .count()
  }

  pub fn submissions(&self, form: &str) -> Vec<Request> {
    self.transport.submissions(form)
  }
}
