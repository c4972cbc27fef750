//! Mailing lists of a project.

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::info;

use super::session::{text_fields, with_query, Session};
use crate::batch::BatchPolicy;
use crate::cache::{Lazy, LazyCollection};
use crate::error::{Fault, Result};
use crate::operation;
use crate::transport::{required_attr, required_text, text_of};

/// How a subscriber receives list traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SubscriptionMode {
  Normal,
  Digest,
  Moderator,
}

impl SubscriptionMode {
  pub const ALL: [SubscriptionMode; 3] = [
    SubscriptionMode::Normal,
    SubscriptionMode::Digest,
    SubscriptionMode::Moderator,
  ];

  /// Name used in page URLs and forms.
  pub fn as_str(self) -> &'static str {
    match self {
      SubscriptionMode::Normal => "normal",
      SubscriptionMode::Digest => "digest",
      SubscriptionMode::Moderator => "moderator",
    }
  }

  fn slot(self) -> usize {
    match self {
      SubscriptionMode::Normal => 0,
      SubscriptionMode::Digest => 1,
      SubscriptionMode::Moderator => 2,
    }
  }
}

impl fmt::Display for SubscriptionMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SubscriptionMode {
  type Err = Fault;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    SubscriptionMode::ALL
      .into_iter()
      .find(|mode| mode.as_str().eq_ignore_ascii_case(s.trim()))
      .ok_or_else(|| Fault::validation(format!("unknown subscription mode '{}'", s)))
  }
}

/// Calendar month of a histogram bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct YearMonth {
  pub year: i32,
  pub month: u32,
}

impl FromStr for YearMonth {
  type Err = Fault;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    let bad = || Fault::parse(format!("'{}' is not a YYYY-MM month", s));
    let (year, month) = s.trim().split_once('-').ok_or_else(bad)?;
    let year = year.parse().map_err(|_| bad())?;
    let month: u32 = month.parse().map_err(|_| bad())?;
    if !(1..=12).contains(&month) {
      return Err(bad());
    }
    Ok(YearMonth { year, month })
  }
}

impl fmt::Display for YearMonth {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:04}-{:02}", self.year, self.month)
  }
}

/// Data shown on a list's info page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListSummary {
  pub description: String,
  pub total_messages: u32,
  /// Messages posted per month
  pub histogram: BTreeMap<YearMonth, u32>,
}

pub(crate) type ListCollection = LazyCollection<String, Arc<MailingList>>;

/// One mailing list.
pub struct MailingList {
  project: String,
  name: String,
  session: Arc<Session>,
  batch: BatchPolicy,
  /// The project's list collection this list was listed in
  siblings: Weak<ListCollection>,
  summary: Lazy<ListSummary>,
  subscribers: [Lazy<IndexSet<String>>; 3],
  deleted: AtomicBool,
}

fn parse_count(raw: &str) -> std::result::Result<u32, Fault> {
  raw
    .trim()
    .replace(',', "")
    .parse()
    .map_err(|_| Fault::parse(format!("'{}' is not a count", raw)))
}

/// Separator between addresses in the `addresses` form field.
const ADDRESS_SEPARATOR: &str = "\n";

/// Size of a value once form-encoded.
fn escaped_len(value: &str) -> usize {
  url::form_urlencoded::byte_serialize(value.as_bytes())
    .map(str::len)
    .sum()
}

/// Request size one address adds to a batch under `policy`.
///
/// Together with the policy's per-item overhead this covers the encoded
/// address plus its encoded separator.
fn address_weight(policy: &BatchPolicy, address: &str) -> usize {
  escaped_len(address) + escaped_len(ADDRESS_SEPARATOR).saturating_sub(policy.per_item_overhead)
}

impl MailingList {
  pub(crate) fn new(
    project: &str,
    name: &str,
    session: Arc<Session>,
    batch: BatchPolicy,
    siblings: Weak<ListCollection>,
  ) -> Self {
    Self {
      project: project.to_string(),
      name: name.to_string(),
      session,
      batch,
      siblings,
      summary: Lazy::new(),
      subscribers: Default::default(),
      deleted: AtomicBool::new(false),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn project(&self) -> &str {
    &self.project
  }

  /// Set once the list was deleted through this instance.
  pub fn is_deleted(&self) -> bool {
    self.deleted.load(Ordering::Acquire)
  }

  /// URL of one of this list's pages.
  fn page_url(&self, page: &str) -> std::result::Result<url::Url, Fault> {
    self
      .session
      .project_url(&self.project, &["lists", &self.name, page])
  }

  pub fn summary(&self) -> Result<Arc<ListSummary>> {
    self.summary.get_or_load(|| {
      let label = format!("Failed to read info of list {} in {}", self.name, self.project);
      operation::run(label, || {
        let response = self.session.get(&self.page_url("info")?)?;
        let page = response.page();

        let description = text_of(page.require("#description")?);
        let total_messages = parse_count(&text_of(page.require("#message-count")?))?;
        let mut histogram = BTreeMap::new();
        for row in page.select_all("tr.month")? {
          let month: YearMonth = required_attr(row, "data-month")?.parse()?;
          histogram.insert(month, parse_count(&required_text(row, "td.count")?)?);
        }

        Ok(ListSummary {
          description,
          total_messages,
          histogram,
        })
      })
    })
  }

  pub fn description(&self) -> Result<String> {
    Ok(self.summary()?.description.clone())
  }

  pub fn total_message_count(&self) -> Result<u32> {
    Ok(self.summary()?.total_messages)
  }

  pub fn message_count_histogram(&self) -> Result<BTreeMap<YearMonth, u32>> {
    Ok(self.summary()?.histogram.clone())
  }

  /// Subscribers receiving the list in `mode`.
  pub fn subscribers(&self, mode: SubscriptionMode) -> Result<Arc<IndexSet<String>>> {
    self.subscribers[mode.slot()].get_or_load(|| {
      let label = format!(
        "Failed to list {} subscribers of {} in {}",
        mode, self.name, self.project
      );
      operation::run(label, || {
        let url = with_query(self.page_url("subscribers")?, "mode", mode.as_str());
        let response = self.session.get(&url)?;
        let page = response.page();
        page.require("#subscriber-list")?;

        Ok(
          page
            .select_all("td.address")?
            .into_iter()
            .map(text_of)
            .filter(|address| !address.is_empty())
            .collect(),
        )
      })
    })
  }

  pub fn is_subscribed(&self, address: &str, mode: SubscriptionMode) -> Result<bool> {
    Ok(self.subscribers(mode)?.contains(address))
  }

  pub fn subscribe(&self, address: &str, mode: SubscriptionMode) -> Result<()> {
    self.mass_subscribe(&[address.to_string()], mode, |_, _| {})?;
    Ok(())
  }

  pub fn unsubscribe(&self, address: &str, mode: SubscriptionMode) -> Result<()> {
    self.mass_unsubscribe(&[address.to_string()], mode, |_, _| {})?;
    Ok(())
  }

  /// Subscribe many addresses; returns how many the site accepted.
  pub fn mass_subscribe<P>(&self, addresses: &[String], mode: SubscriptionMode, progress: P) -> Result<usize>
  where
    P: FnMut(usize, usize),
  {
    self.change_subscriptions("subscribe", addresses, mode, progress)
  }

  /// Unsubscribe many addresses; returns how many the site removed.
  pub fn mass_unsubscribe<P>(&self, addresses: &[String], mode: SubscriptionMode, progress: P) -> Result<usize>
  where
    P: FnMut(usize, usize),
  {
    self.change_subscriptions("unsubscribe", addresses, mode, progress)
  }

  fn change_subscriptions<P>(
    &self,
    action: &str,
    addresses: &[String],
    mode: SubscriptionMode,
    progress: P,
  ) -> Result<usize>
  where
    P: FnMut(usize, usize),
  {
    if let Some(bad) = addresses.iter().find(|a| !a.contains('@')) {
      let label = format!("Failed to {} addresses on list {} in {}", action, self.name, self.project);
      return operation::run(label, || {
        Err(Fault::validation(format!("'{}' is not an email address", bad)))
      });
    }

    let outcome = self.batch.run(
      addresses,
      |address: &String| address_weight(&self.batch, address),
      |batch| {
        let label = format!(
          "Failed to {} {} addresses ({}) on list {} in {}",
          action,
          batch.len(),
          mode,
          self.name,
          self.project
        );
        operation::run(label, || {
          let joined = batch.join(ADDRESS_SEPARATOR);
          let fields = text_fields(&[
            ("addresses", joined.as_str()),
            ("mode", mode.as_str()),
            ("action", action),
          ]);
          let response = self
            .session
            .submit_at(&self.page_url("subscribe")?, "form#subscribers", &fields)?;
          let page = response.page();
          let count = parse_count(&text_of(page.require("#result-count")?))?;
          Ok(count as usize)
        })
      },
      progress,
    );

    // Even a failed run may have changed some batches remotely.
    self.subscribers[mode.slot()].invalidate();

    let changed = outcome?;
    info!(
      project = %self.project,
      list = %self.name,
      %mode,
      action,
      requested = addresses.len(),
      changed,
      "changed subscriptions"
    );
    Ok(changed)
  }

  /// Delete the list on the site.
  pub fn delete(&self) -> Result<()> {
    let label = format!("Failed to delete list {} in {}", self.name, self.project);
    operation::run(label, || {
      self
        .session
        .submit_at(&self.page_url("delete")?, "form#list-delete", &[])?;
      Ok(())
    })?;

    // A list re-created under this name must not inherit our cached pages.
    self.deleted.store(true, Ordering::Release);
    self.refresh();
    if let Some(siblings) = self.siblings.upgrade() {
      siblings.invalidate();
    }
    info!(project = %self.project, list = %self.name, "deleted mailing list");
    Ok(())
  }

  /// Forget every cached page of this list.
  pub fn refresh(&self) {
    self.summary.invalidate();
    for subscribers in &self.subscribers {
      subscribers.invalidate();
    }
  }
}

impl fmt::Debug for MailingList {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MailingList")
      .field("project", &self.project)
      .field("name", &self.name)
      .finish_non_exhaustive()
  }
}

/// Parse the project's list overview, reusing instances listed before.
pub(crate) fn parse_lists(
  page: &crate::transport::Page,
  previous: Option<&IndexMap<String, Arc<MailingList>>>,
  make: impl Fn(&str) -> MailingList,
) -> std::result::Result<IndexMap<String, Arc<MailingList>>, Fault> {
  page.require("#mailing-lists")?;
  let mut lists = IndexMap::new();
  for row in page.select_all("tr.list")? {
    let name = required_text(row, "a.name")?;
    let list = previous
      .and_then(|p| p.get(&name).cloned())
      .filter(|list| !list.is_deleted())
      .unwrap_or_else(|| Arc::new(make(&name)));
    lists.insert(name, list);
  }
  Ok(lists)
}
