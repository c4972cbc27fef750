//! Talking HTTP to the hosting site.
//!
//! The site has no API: everything is a page fetch or an HTML form
//! submission. [`Transport`] is the seam between the caches and the network;
//! [`HttpTransport`] is the real implementation and tests plug in a scripted
//! fake.

mod http;
mod page;

#[cfg(test)]
pub(crate) mod fake;

pub use http::HttpTransport;
pub use page::{child_text, required_attr, required_text, text_of, FormSpec, Page};
pub(crate) use page::selector;

use std::path::PathBuf;
use url::Url;

use crate::error::Fault;

/// A fetched page.
#[derive(Debug, Clone)]
pub struct Response {
  pub status: u16,
  pub body: String,
  /// URL after redirects
  pub final_url: Url,
}

impl Response {
  /// Parse the body as HTML.
  pub fn page(&self) -> Page {
    Page::parse(&self.body)
  }
}

/// Value submitted for one form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue {
  Text(String),
  /// Contents of a local file, sent as a multipart upload
  File(PathBuf),
}

impl From<&str> for FormValue {
  fn from(value: &str) -> Self {
    FormValue::Text(value.to_string())
  }
}

impl From<String> for FormValue {
  fn from(value: String) -> Self {
    FormValue::Text(value)
  }
}

/// Session-carrying access to the remote site.
///
/// Implementations keep cookies across calls. One transport backs one
/// logical session and is not meant to be driven from several threads at
/// once.
pub trait Transport: Send + Sync {
  /// GET `url`, following redirects.
  fn fetch(&self, url: &Url) -> Result<Response, Fault>;

  /// Submit the form matched by `form_selector` on `page`.
  ///
  /// Fields already present in the form keep their values unless overridden
  /// by `fields`.
  fn submit_form(
    &self,
    page: &Response,
    form_selector: &str,
    fields: &[(String, FormValue)],
  ) -> Result<Response, Fault>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
  fn fetch(&self, url: &Url) -> Result<Response, Fault> {
    (**self).fetch(url)
  }

  fn submit_form(
    &self,
    page: &Response,
    form_selector: &str,
    fields: &[(String, FormValue)],
  ) -> Result<Response, Fault> {
    (**self).submit_form(page, form_selector, fields)
  }
}
