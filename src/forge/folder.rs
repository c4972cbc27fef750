//! Folder tree of a project's documents & files area.
//!
//! Folders live in a flat, append-only node table owned by the project's
//! [`DocumentTree`]; a node refers to its parent by index. A [`Folder`] is a
//! cheap handle (tree, index). Listing the same remote folder id again maps to
//! the same node, so handles stay valid across reloads.

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use parking_lot::RwLock;
use scraper::ElementRef;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use url::Url;

use super::file::{FileEntry, FileStatus, FolderId, ROOT_FOLDER};
use super::session::{text_fields, with_query, Session};
use crate::cache::LazyCollection;
use crate::error::{Fault, Result};
use crate::operation;
use crate::transport::{child_text, required_attr, required_text, selector, FormValue};

const FILE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

pub(crate) struct DocumentTree {
  project: String,
  session: Arc<Session>,
  table: RwLock<NodeTable>,
}

struct NodeTable {
  nodes: Vec<Arc<FolderNode>>,
  by_id: HashMap<FolderId, usize>,
}

struct FolderNode {
  id: FolderId,
  name: String,
  description: String,
  parent: Option<usize>,
  sub_folders: LazyCollection<String, usize>,
  files: LazyCollection<String, FileEntry>,
  deleted: AtomicBool,
}

struct FolderRow {
  id: FolderId,
  name: String,
  description: String,
}

impl FolderNode {
  fn new(row: FolderRow, parent: Option<usize>) -> Self {
    Self {
      id: row.id,
      name: row.name,
      description: row.description,
      parent,
      sub_folders: LazyCollection::new(),
      files: LazyCollection::new(),
      deleted: AtomicBool::new(false),
    }
  }
}

impl DocumentTree {
  pub(crate) fn new(project: &str, session: Arc<Session>) -> Arc<Self> {
    let root = FolderNode::new(
      FolderRow {
        id: ROOT_FOLDER,
        name: String::new(),
        description: String::new(),
      },
      None,
    );
    Arc::new(Self {
      project: project.to_string(),
      session,
      table: RwLock::new(NodeTable {
        nodes: vec![Arc::new(root)],
        by_id: HashMap::from([(ROOT_FOLDER, 0)]),
      }),
    })
  }

  pub(crate) fn root(self: &Arc<Self>) -> Folder {
    Folder {
      tree: Arc::clone(self),
      index: 0,
    }
  }

  fn node(&self, index: usize) -> Arc<FolderNode> {
    Arc::clone(&self.table.read().nodes[index])
  }

  /// Map a listed folder to its node, creating the node on first sight.
  fn adopt(&self, parent: usize, row: FolderRow) -> usize {
    let mut table = self.table.write();
    if let Some(&index) = table.by_id.get(&row.id) {
      let current = &table.nodes[index];
      if current.name != row.name || current.parent != Some(parent) {
        table.nodes[index] = Arc::new(FolderNode::new(row, Some(parent)));
      }
      return index;
    }

    let index = table.nodes.len();
    table.by_id.insert(row.id, index);
    table.nodes.push(Arc::new(FolderNode::new(row, Some(parent))));
    index
  }

  /// URL of a documents page, scoped to `folder` unless it is the root.
  fn page_url(&self, segments: &[&str], param: &str, folder: FolderId) -> std::result::Result<Url, Fault> {
    let url = self.session.project_url(&self.project, segments)?;
    Ok(if folder == ROOT_FOLDER {
      url
    } else {
      with_query(url, param, &folder.to_string())
    })
  }

  fn fetch_listing(
    &self,
    folder: FolderId,
  ) -> std::result::Result<(Vec<FolderRow>, IndexMap<String, FileEntry>), Fault> {
    let url = self.page_url(&["docs", "list"], "folderID", folder)?;
    let response = self.session.get(&url)?;
    let page = response.page();
    page.require("#document-list")?;

    let mut folders = Vec::new();
    for row in page.select_all("tr.folder")? {
      folders.push(FolderRow {
        id: parse_id(required_attr(row, "data-id")?)?,
        name: required_text(row, "a.name")?,
        description: child_text(row, "td.description")?.unwrap_or_default(),
      });
    }

    let mut files = IndexMap::new();
    for row in page.select_all("tr.file")? {
      let entry = parse_file_row(row, folder, &response.final_url)?;
      files.insert(entry.name.clone(), entry);
    }

    Ok((folders, files))
  }
}

fn parse_id(raw: &str) -> std::result::Result<u32, Fault> {
  raw
    .trim()
    .parse()
    .map_err(|_| Fault::parse(format!("'{}' is not a numeric id", raw)))
}

fn parse_file_row(
  row: ElementRef<'_>,
  folder: FolderId,
  base: &Url,
) -> std::result::Result<FileEntry, Fault> {
  let link = row
    .select(&selector("a.name")?)
    .next()
    .ok_or_else(|| Fault::parse("file row has no name link"))?;
  let href = required_attr(link, "href")?;
  let modified = required_text(row, "td.modified")?;

  Ok(FileEntry {
    id: parse_id(required_attr(row, "data-id")?)?,
    name: crate::transport::text_of(link),
    folder,
    location: base
      .join(href)
      .map_err(|e| Fault::parse(format!("bad file link '{}': {}", href, e)))?,
    status: required_text(row, "td.status")?.parse()?,
    modified_by: required_text(row, "td.modified-by")?,
    modified: NaiveDateTime::parse_from_str(&modified, FILE_TIME_FORMAT)
      .map_err(|e| Fault::parse(format!("bad modification time '{}': {}", modified, e)))?,
    description: child_text(row, "td.description")?.unwrap_or_default(),
  })
}

/// Handle to one folder of a project.
#[derive(Clone)]
pub struct Folder {
  tree: Arc<DocumentTree>,
  index: usize,
}

impl Folder {
  fn node(&self) -> Arc<FolderNode> {
    self.tree.node(self.index)
  }

  fn at(&self, index: usize) -> Folder {
    Folder {
      tree: Arc::clone(&self.tree),
      index,
    }
  }

  fn ensure_live(&self, node: &FolderNode) -> std::result::Result<(), Fault> {
    if node.deleted.load(Ordering::Acquire) {
      return Err(Fault::validation(format!("folder {} was deleted", self.path())));
    }
    Ok(())
  }

  pub fn id(&self) -> FolderId {
    self.node().id
  }

  pub fn name(&self) -> String {
    self.node().name.clone()
  }

  pub fn description(&self) -> String {
    self.node().description.clone()
  }

  pub fn is_root(&self) -> bool {
    self.node().parent.is_none()
  }

  pub fn is_deleted(&self) -> bool {
    self.node().deleted.load(Ordering::Acquire)
  }

  pub fn parent(&self) -> Option<Folder> {
    self.node().parent.map(|index| self.at(index))
  }

  /// Slash-separated path from the root, e.g. `/specs/drafts`.
  pub fn path(&self) -> String {
    let mut names = Vec::new();
    let mut current = Some(self.index);
    while let Some(index) = current {
      let node = self.tree.node(index);
      if node.parent.is_some() {
        names.push(node.name.clone());
      }
      current = node.parent;
    }
    names.reverse();
    format!("/{}", names.join("/"))
  }

  /// Fetch and parse this folder's listing page.
  fn load_listing(
    &self,
    node: &FolderNode,
  ) -> Result<(IndexMap<String, usize>, IndexMap<String, FileEntry>)> {
    let label = format!("Failed to list folder {} of {}", self.path(), self.tree.project);
    let (rows, files) = operation::run(label, || {
      self.ensure_live(node)?;
      self.tree.fetch_listing(node.id)
    })?;

    let folders = rows
      .into_iter()
      .map(|row| (row.name.clone(), self.tree.adopt(self.index, row)))
      .collect();
    Ok((folders, files))
  }

  /// Child folders keyed by name, in listing order.
  pub fn sub_folders(&self) -> Result<IndexMap<String, Folder>> {
    let node = self.node();
    // One listing page carries both halves; keep the files if not cached yet.
    let snapshot = node.sub_folders.get_or_load(|| {
      let (folders, files) = self.load_listing(&node)?;
      node.files.get_or_load(|| Ok(files))?;
      Ok(folders)
    })?;

    Ok(
      snapshot
        .iter()
        .map(|(name, index)| (name.clone(), self.at(*index)))
        .collect(),
    )
  }

  pub fn sub_folder(&self, name: &str) -> Result<Option<Folder>> {
    Ok(self.sub_folders()?.shift_remove(name))
  }

  /// Resolve a slash-separated path relative to this folder.
  pub fn folder_at(&self, path: &str) -> Result<Option<Folder>> {
    let mut current = self.clone();
    for name in path.split('/').filter(|s| !s.is_empty()) {
      match current.sub_folder(name)? {
        Some(next) => current = next,
        None => return Ok(None),
      }
    }
    Ok(Some(current))
  }

  /// Files keyed by name, in listing order.
  pub fn files(&self) -> Result<Arc<IndexMap<String, FileEntry>>> {
    let node = self.node();
    node.files.get_or_load(|| {
      let (folders, files) = self.load_listing(&node)?;
      node.sub_folders.get_or_load(|| Ok(folders))?;
      Ok(files)
    })
  }

  pub fn file(&self, name: &str) -> Result<Option<FileEntry>> {
    Ok(self.files()?.get(name).cloned())
  }

  /// Create a child folder. It is resolvable by name as soon as this returns.
  pub fn create_folder(&self, name: &str, description: &str) -> Result<Folder> {
    let node = self.node();
    let label = format!("Failed to create folder {} in {}", name, self.path());

    let id = operation::run(label, || {
      self.ensure_live(&node)?;
      if name.trim().is_empty() || name.contains('/') {
        return Err(Fault::validation(format!("'{}' is not a valid folder name", name)));
      }

      let url = self.tree.page_url(&["docs", "folder", "add"], "parentID", node.id)?;
      let fields = text_fields(&[("name", name), ("description", description)]);
      let response = self.tree.session.submit_at(&url, "form#folder-add", &fields)?;

      let page = response.page();
      let created = page.require("#created-folder")?;
      parse_id(required_attr(created, "data-id")?)
    })?;

    let index = self.tree.adopt(
      self.index,
      FolderRow {
        id,
        name: name.to_string(),
        description: description.to_string(),
      },
    );
    node.sub_folders.patch(|children| {
      children.insert(name.to_string(), index);
    });

    info!(project = %self.tree.project, folder = id, path = %self.path(), name, "created folder");
    Ok(self.at(index))
  }

  /// Delete this folder on the site.
  pub fn delete(&self) -> Result<()> {
    let node = self.node();
    let label = format!("Failed to delete folder {} of {}", self.path(), self.tree.project);

    operation::run(label, || {
      if node.parent.is_none() {
        return Err(Fault::validation("the root folder cannot be deleted"));
      }
      self.ensure_live(&node)?;

      let url = self.tree.page_url(&["docs", "folder", "delete"], "folderID", node.id)?;
      self.tree.session.submit_at(&url, "form#folder-delete", &[])?;
      Ok(())
    })?;

    node.deleted.store(true, Ordering::Release);
    if let Some(parent) = node.parent {
      self.tree.node(parent).sub_folders.invalidate();
    }

    info!(project = %self.tree.project, folder = node.id, "deleted folder");
    Ok(())
  }

  /// Upload a local file into this folder.
  pub fn upload_file(
    &self,
    name: &str,
    status: FileStatus,
    description: &str,
    source: &Path,
  ) -> Result<FileEntry> {
    let node = self.node();
    let label = format!("Failed to upload {} to {}", name, self.path());

    operation::run(label.clone(), || {
      self.ensure_live(&node)?;
      if !source.is_file() {
        return Err(Fault::validation(format!("{} is not a readable file", source.display())));
      }

      let url = self.tree.page_url(&["docs", "file", "add"], "folderID", node.id)?;
      let mut fields = text_fields(&[
        ("name", name),
        ("status", status.display_name()),
        ("description", description),
      ]);
      fields.push(("file".to_string(), FormValue::File(source.to_path_buf())));
      self.tree.session.submit_at(&url, "form#file-add", &fields)?;
      Ok(())
    })?;

    node.files.invalidate();
    info!(project = %self.tree.project, folder = node.id, name, "uploaded file");

    match self.file(name)? {
      Some(entry) => Ok(entry),
      None => operation::run(label, || {
        Err(Fault::parse(format!("{} is not listed after the upload", name)))
      }),
    }
  }

  /// Delete a file of this folder.
  pub fn delete_file(&self, file: &FileEntry) -> Result<()> {
    let node = self.node();
    let label = format!("Failed to delete file {} in {}", file.name, self.path());

    operation::run(label, || {
      self.ensure_live(&node)?;
      if file.folder != node.id {
        return Err(Fault::validation(format!(
          "{} does not belong to folder {}",
          file.name,
          self.path()
        )));
      }

      let url = with_query(
        self.tree.session.project_url(&self.tree.project, &["docs", "file", "delete"])?,
        "documentID",
        &file.id.to_string(),
      );
      self.tree.session.submit_at(&url, "form#file-delete", &[])?;
      Ok(())
    })?;

    node.files.invalidate();
    info!(project = %self.tree.project, file = file.id, "deleted file");
    Ok(())
  }

  /// Drop cached listings of this folder.
  pub fn refresh(&self) {
    let node = self.node();
    node.sub_folders.invalidate();
    node.files.invalidate();
  }
}

impl PartialEq for Folder {
  fn eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.tree, &other.tree) && self.index == other.index
  }
}

impl Eq for Folder {}

impl fmt::Debug for Folder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Folder")
      .field("project", &self.tree.project)
      .field("id", &self.id())
      .field("path", &self.path())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ErrorKind;
  use crate::forge::fake_site::{Harness, SiteState};
  use crate::transport::fake::Request;
  use std::io::Write;

  fn site() -> Harness {
    Harness::new(
      SiteState::new()
        .folder(1, 0, "specs")
        .folder(2, 1, "drafts")
        .file(7, 0, "readme.txt"),
    )
  }

  #[test]
  fn test_one_listing_fills_folders_and_files() {
    let h = site();
    let root = h.project().root_folder();

    let folders = root.sub_folders().unwrap();
    assert_eq!(folders.keys().collect::<Vec<_>>(), vec!["specs"]);
    let readme = root.file("readme.txt").unwrap().unwrap();

    assert_eq!(h.fetches("/docs/list"), 1);
    assert_eq!(readme.status, FileStatus::Draft);
    assert_eq!(readme.folder, ROOT_FOLDER);
    assert_eq!(readme.location.as_str(), "https://forge.example.org/files/7/readme.txt");
  }

  #[test]
  fn test_resolve_nested_path() {
    let h = site();
    let project = h.project();

    let drafts = project.folder("/specs/drafts").unwrap().unwrap();
    assert_eq!(drafts.id(), 2);
    assert_eq!(drafts.path(), "/specs/drafts");
    assert_eq!(drafts.parent().unwrap().name(), "specs");
    assert!(project.folder("/specs/final").unwrap().is_none());

    // Listings are cached, so a second lookup costs nothing.
    let again = project.folder("specs/drafts").unwrap().unwrap();
    assert_eq!(drafts, again);
    assert_eq!(h.fetches("/docs/list"), 2);
  }

  #[test]
  fn test_create_then_delete_folder() {
    let h = site();
    let root = h.project().root_folder();
    root.sub_folders().unwrap();

    let created = root.create_folder("x", "scratch space").unwrap();
    assert_eq!(created.path(), "/x");
    assert_eq!(root.sub_folder("x").unwrap(), Some(created.clone()));
    // Resolved from the patched listing, not a new fetch.
    assert_eq!(h.fetches("/docs/list"), 1);

    created.delete().unwrap();
    assert!(created.is_deleted());
    assert!(root.sub_folder("x").unwrap().is_none());
    assert_eq!(h.fetches("/docs/list"), 2);

    let err = created.sub_folders().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
  }

  #[test]
  fn test_created_folder_keeps_identity_after_reload() {
    let h = site();
    let specs = h.project().folder("/specs").unwrap().unwrap();

    let created = specs.create_folder("review", "").unwrap();
    let submitted = h.submissions("form#folder-add");
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].field("name"), Some("review"));
    assert!(submitted[0].target().ends_with("parentID=1"));

    specs.refresh();
    let listed = specs.sub_folder("review").unwrap().unwrap();
    assert_eq!(listed, created);
  }

  #[test]
  fn test_duplicate_name_is_rejected_by_site() {
    let h = site();
    let root = h.project().root_folder();

    let err = root.create_folder("specs", "").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteRejection);
    assert!(err.to_string().starts_with("Failed to create folder specs in /: "));
    assert_eq!(root.sub_folders().unwrap().len(), 1);
  }

  #[test]
  fn test_invalid_names_never_reach_the_site() {
    let h = site();
    let root = h.project().root_folder();
    for name in ["", "  ", "a/b"] {
      let err = root.create_folder(name, "").unwrap_err();
      assert_eq!(err.kind(), ErrorKind::Validation);
    }
    assert!(h.transport.requests().is_empty());
  }

  #[test]
  fn test_root_cannot_be_deleted() {
    let h = site();
    let err = h.project().root_folder().delete().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(h.submissions("form#folder-delete").is_empty());
  }

  #[test]
  fn test_failed_listing_is_reported_and_retried() {
    let h = site();
    let root = h.project().root_folder();
    h.state().fail_on = Some("docs/list".to_string());

    let err = root.sub_folders().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.to_string().starts_with("Failed to list folder / of demo: "));

    h.state().fail_on = None;
    assert_eq!(root.sub_folders().unwrap().len(), 1);
  }

  #[test]
  fn test_upload_and_delete_file() {
    let h = site();
    let specs = h.project().folder("/specs").unwrap().unwrap();
    let mut source = tempfile::NamedTempFile::new().unwrap();
    writeln!(source, "minutes of the kickoff").unwrap();

    let entry = specs
      .upload_file("minutes.txt", FileStatus::Stable, "kickoff", source.path())
      .unwrap();
    assert_eq!(entry.status, FileStatus::Stable);
    assert_eq!(entry.folder, 1);

    let upload = &h.submissions("form#file-add")[0];
    assert_eq!(upload.field("status"), Some("Stable"));
    match upload {
      Request::Submit { fields, .. } => assert!(fields
        .iter()
        .any(|(name, value)| name == "file" && *value == FormValue::File(source.path().to_path_buf()))),
      Request::Fetch(_) => unreachable!(),
    }

    specs.delete_file(&entry).unwrap();
    assert!(specs.file("minutes.txt").unwrap().is_none());
  }

  #[test]
  fn test_upload_requires_local_file() {
    let h = site();
    let root = h.project().root_folder();
    let err = root
      .upload_file("ghost.txt", FileStatus::Draft, "", Path::new("/nonexistent/ghost.txt"))
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(h.submissions("form#file-add").is_empty());
  }
}
