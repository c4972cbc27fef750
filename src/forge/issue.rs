//! Issue tracker access through the site's XML export.

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::session::{text_fields, with_query, Session};
use crate::batch::BatchPolicy;
use crate::cache::{Entity, EntityCache};
use crate::error::{Fault, Result};
use crate::operation;

const ISSUE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One comment on an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comment {
  pub author: String,
  pub posted: NaiveDateTime,
  pub text: String,
}

/// An issue as exported by the tracker at fetch time.
#[derive(Debug, Clone, Serialize)]
pub struct Issue {
  id: u32,
  fields: BTreeMap<String, String>,
  created: Option<NaiveDateTime>,
  last_modified: Option<NaiveDateTime>,
  comments: Vec<Comment>,
}

impl Entity for Issue {
  type Id = u32;

  fn id(&self) -> u32 {
    self.id
  }

  fn entity_type() -> &'static str {
    "issue"
  }
}

impl PartialEq for Issue {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id
  }
}

impl Issue {
  fn from_xml(node: roxmltree::Node<'_, '_>) -> std::result::Result<Self, Fault> {
    let mut fields = BTreeMap::new();
    let mut comments = Vec::new();

    for child in node.children().filter(|n| n.is_element()) {
      let name = child.tag_name().name();
      if name == "long_desc" {
        comments.push(parse_comment(child)?);
      } else if !child.children().any(|n| n.is_element()) {
        fields.insert(name.to_string(), element_text(child));
      }
    }

    let id = fields
      .get("issue_id")
      .ok_or_else(|| Fault::parse("issue without issue_id"))?;
    let id = id
      .parse()
      .map_err(|_| Fault::parse(format!("bad issue id '{}'", id)))?;

    Ok(Self {
      id,
      created: parse_time(fields.get("creation_ts"))?,
      last_modified: parse_time(fields.get("delta_ts"))?,
      fields,
      comments,
    })
  }

  pub fn id(&self) -> u32 {
    self.id
  }

  /// Raw value of any exported field.
  pub fn field(&self, name: &str) -> Option<&str> {
    self.fields.get(name).map(String::as_str)
  }

  pub fn fields(&self) -> &BTreeMap<String, String> {
    &self.fields
  }

  pub fn summary(&self) -> Option<&str> {
    self.field("short_desc")
  }

  pub fn status(&self) -> Option<&str> {
    self.field("issue_status")
  }

  pub fn resolution(&self) -> Option<&str> {
    self.field("resolution").filter(|r| !r.is_empty())
  }

  pub fn priority(&self) -> Option<&str> {
    self.field("priority")
  }

  pub fn issue_type(&self) -> Option<&str> {
    self.field("issue_type")
  }

  pub fn reporter(&self) -> Option<&str> {
    self.field("reporter")
  }

  pub fn assignee(&self) -> Option<&str> {
    self.field("assigned_to")
  }

  pub fn created(&self) -> Option<NaiveDateTime> {
    self.created
  }

  pub fn last_modified(&self) -> Option<NaiveDateTime> {
    self.last_modified
  }

  /// Comments in posting order.
  pub fn comments(&self) -> &[Comment] {
    &self.comments
  }
}

fn element_text(node: roxmltree::Node<'_, '_>) -> String {
  node
    .descendants()
    .filter(|n| n.is_text())
    .filter_map(|n| n.text())
    .collect::<String>()
    .trim()
    .to_string()
}

fn parse_time(raw: Option<&String>) -> std::result::Result<Option<NaiveDateTime>, Fault> {
  match raw.map(|s| s.trim()).filter(|s| !s.is_empty()) {
    Some(raw) => NaiveDateTime::parse_from_str(raw, ISSUE_TIME_FORMAT)
      .map(Some)
      .map_err(|e| Fault::parse(format!("bad timestamp '{}': {}", raw, e))),
    None => Ok(None),
  }
}

fn parse_comment(node: roxmltree::Node<'_, '_>) -> std::result::Result<Comment, Fault> {
  let part = |tag: &str| {
    node
      .children()
      .find(|n| n.has_tag_name(tag))
      .map(element_text)
      .ok_or_else(|| Fault::parse(format!("comment without <{}>", tag)))
  };
  let when = part("issue_when")?;

  Ok(Comment {
    author: part("who")?,
    posted: NaiveDateTime::parse_from_str(&when, ISSUE_TIME_FORMAT)
      .map_err(|e| Fault::parse(format!("bad comment time '{}': {}", when, e)))?,
    text: part("thetext")?,
  })
}

/// Parse an XML export into issues. Ids the tracker reports as unknown are
/// left out.
pub fn parse_export(xml: &str) -> std::result::Result<Vec<Issue>, Fault> {
  let doc = roxmltree::Document::parse(xml)
    .map_err(|e| Fault::parse(format!("malformed issue export: {}", e)))?;
  let root = doc.root_element();
  if !root.has_tag_name("issues") {
    return Err(Fault::parse(format!(
      "expected <issues>, found <{}>",
      root.tag_name().name()
    )));
  }

  let mut issues = Vec::new();
  for node in root.children().filter(|n| n.has_tag_name("issue")) {
    match node.attribute("status_code") {
      None | Some("200") => issues.push(Issue::from_xml(node)?),
      Some("404") => continue,
      Some(code) => {
        return Err(Fault::RemoteRejection(format!(
          "issue export failed with {}: {}",
          code,
          node.attribute("status_message").unwrap_or("no message")
        )))
      }
    }
  }
  Ok(issues)
}

/// The issue tracker of one project.
pub struct IssueTracker {
  project: String,
  session: Arc<Session>,
  batch: BatchPolicy,
  cache: EntityCache<Issue>,
}

impl IssueTracker {
  pub(crate) fn new(project: &str, session: Arc<Session>, batch: BatchPolicy, capacity: usize) -> Self {
    Self {
      project: project.to_string(),
      session,
      batch,
      cache: EntityCache::with_capacity(capacity),
    }
  }

  /// Download the export for `ids`, split into URL-size-safe requests.
  fn export(&self, ids: &[u32]) -> std::result::Result<Vec<Issue>, Fault> {
    let ids: Vec<String> = ids.iter().map(u32::to_string).collect();
    let mut issues = Vec::new();

    for chunk in self.batch.plan(&ids, String::len) {
      let url = with_query(
        self.session.project_url(&self.project, &["issues", "xml"])?,
        "id",
        &chunk.join(","),
      );
      debug!(project = %self.project, count = chunk.len(), "fetching issue export");
      let response = self.session.get_raw(&url)?;
      issues.extend(parse_export(&response.body)?);
    }
    Ok(issues)
  }

  /// One issue; an unknown id is an error here.
  pub fn issue(&self, id: u32) -> Result<Arc<Issue>> {
    self.cache.get(&id, |id| {
      let label = format!("Failed to fetch issue {} of {}", id, self.project);
      operation::run(label, || {
        self
          .export(&[*id])?
          .into_iter()
          .find(|issue| issue.id == *id)
          .ok_or_else(|| Fault::validation(format!("issue {} does not exist", id)))
      })
    })
  }

  /// Many issues at once. Cached ones are reused, all others come from one
  /// export; unknown ids are absent from the result.
  pub fn issues(&self, ids: &[u32]) -> Result<IndexMap<u32, Arc<Issue>>> {
    self.cache.get_many(ids, |missing| {
      let label = format!("Failed to fetch {} issues of {}", missing.len(), self.project);
      operation::run(label, || self.export(missing))
    })
  }

  /// Issues last changed within `[start, end)`.
  pub fn changed_between(&self, start: NaiveDateTime, end: NaiveDateTime) -> Result<Vec<Arc<Issue>>> {
    let label = format!(
      "Failed to list issues of {} changed between {} and {}",
      self.project, start, end
    );
    let issues = operation::run(label, || {
      if end < start {
        return Err(Fault::validation("the end of the range must not precede its start"));
      }
      if end == start {
        return Ok(Vec::new());
      }
      let url = self.session.project_url(&self.project, &["issues", "xml"])?;
      let url = with_query(url, "changedFrom", &start.format(ISSUE_TIME_FORMAT).to_string());
      let url = with_query(url, "changedTo", &end.format(ISSUE_TIME_FORMAT).to_string());
      parse_export(&self.session.get_raw(&url)?.body)
    })?;

    Ok(
      issues
        .into_iter()
        .filter(|issue| {
          issue
            .last_modified
            .is_some_and(|when| start <= when && when < end)
        })
        .map(|issue| self.cache.intern(issue))
        .collect(),
    )
  }

  /// Build issues from an export fetched elsewhere, reusing cached instances.
  pub fn intern_document(&self, xml: &str) -> Result<Vec<Arc<Issue>>> {
    let label = format!("Failed to read issue export of {}", self.project);
    let issues = operation::run(label, || parse_export(xml))?;
    Ok(issues.into_iter().map(|issue| self.cache.intern(issue)).collect())
  }

  /// Already fetched issue, without touching the network.
  pub fn cached(&self, id: u32) -> Option<Arc<Issue>> {
    self.cache.lookup(&id)
  }

  /// Post a comment; the next lookup of the issue fetches it again.
  pub fn add_comment(&self, id: u32, text: &str) -> Result<()> {
    let label = format!("Failed to comment on issue {} of {}", id, self.project);
    operation::run(label, || {
      if text.trim().is_empty() {
        return Err(Fault::validation("comment text is empty"));
      }
      let url = with_query(
        self.session.project_url(&self.project, &["issues", "comment"])?,
        "id",
        &id.to_string(),
      );
      self
        .session
        .submit_at(&url, "form#issue-comment", &text_fields(&[("comment", text)]))?;
      Ok(())
    })?;

    self.cache.evict(&id);
    info!(project = %self.project, issue = id, "added comment");
    Ok(())
  }
}
