//! Splitting large change lists into requests the remote site accepts.
//!
//! The site silently truncates form submissions past a size ceiling, so long
//! lists (mass subscriptions, bulk issue exports) are sent in several requests.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::Result;

/// Limits used to pack items into requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BatchPolicy {
  /// Lists shorter than this go out as a single request; no batch ever
  /// reaches this many items.
  pub threshold: usize,
  /// Size ceiling of one request, in escaped characters.
  pub budget: usize,
  /// Characters added per item in transit (separator and escaping).
  pub per_item_overhead: usize,
}

impl Default for BatchPolicy {
  fn default() -> Self {
    Self {
      threshold: 250,
      budget: 7000,
      per_item_overhead: 2,
    }
  }
}

impl BatchPolicy {
  /// Split `items` into consecutive batches, in input order.
  ///
  /// `weight` gives the size an item occupies in the request. A batch grows
  /// while `sum(weight) + per_item_overhead * count` stays below the budget.
  /// An item too large to fit any batch is sent on its own.
  pub fn plan<'a, T, W>(&self, items: &'a [T], weight: W) -> Vec<&'a [T]>
  where
    W: Fn(&T) -> usize,
  {
    if items.is_empty() {
      return Vec::new();
    }
    if items.len() < self.threshold {
      return vec![items];
    }

    let max_items = self.threshold.saturating_sub(1).max(1);
    let mut batches = Vec::new();
    let mut start = 0;
    let mut chars = 0;

    for (i, item) in items.iter().enumerate() {
      let w = weight(item);
      let count = i - start + 1;
      let fits = chars + w + self.per_item_overhead * count < self.budget;

      if i > start && (!fits || count > max_items) {
        batches.push(&items[start..i]);
        start = i;
        chars = 0;
      }

      if w + self.per_item_overhead >= self.budget {
        warn!(weight = w, budget = self.budget, "item exceeds request budget on its own");
      }
      chars += w;
    }
    batches.push(&items[start..]);

    batches
  }

  /// Submit `items` batch by batch and return the summed success counts.
  ///
  /// `submit` sends one batch and reports how many items the site accepted.
  /// After each batch `progress` receives `(accepted so far, items requested)`.
  /// The first failing batch aborts the run.
  pub fn run<T, W, S, P>(&self, items: &[T], weight: W, mut submit: S, mut progress: P) -> Result<usize>
  where
    W: Fn(&T) -> usize,
    S: FnMut(&[T]) -> Result<usize>,
    P: FnMut(usize, usize),
  {
    let batches = self.plan(items, weight);
    let total = items.len();
    let mut done = 0;

    debug!(items = total, batches = batches.len(), "submitting in batches");

    for batch in batches {
      done += submit(batch)?;
      progress(done, total);
    }

    Ok(done)
  }
}
