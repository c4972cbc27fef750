use url::Url;

use crate::error::Fault;
use crate::transport::{FormValue, Response, Transport};

/// The remote session shared by every entity of one connection.
///
/// Holds the transport (and with it cookies and the current page) plus the
/// site root all page URLs are built from.
pub struct Session {
  transport: Box<dyn Transport>,
  site: Url,
}

impl Session {
  pub fn new(transport: Box<dyn Transport>, mut site: Url) -> Self {
    if !site.path().ends_with('/') {
      let path = format!("{}/", site.path());
      site.set_path(&path);
    }
    Self { transport, site }
  }

  pub fn site(&self) -> &Url {
    &self.site
  }

  /// URL of a site-level page such as `login`.
  pub fn site_url(&self, path: &str) -> Result<Url, Fault> {
    self
      .site
      .join(path)
      .map_err(|e| Fault::validation(format!("Bad page path '{}': {}", path, e)))
  }

  /// URL of a page below `projects/<project>/`.
  ///
  /// Each segment is escaped separately, so names may contain any character.
  pub fn project_url(&self, project: &str, segments: &[&str]) -> Result<Url, Fault> {
    let mut url = self.site.clone();
    url
      .path_segments_mut()
      .map_err(|_| Fault::validation(format!("{} cannot be used as a site root", self.site)))?
      .pop_if_empty()
      .push("projects")
      .push(project)
      .extend(segments);
    Ok(url)
  }

  /// Fetch an HTML page and fail if it carries an error banner.
  pub fn get(&self, url: &Url) -> Result<Response, Fault> {
    let response = self.transport.fetch(url)?;
    response.page().check_for_errors()?;
    Ok(response)
  }

  /// Fetch a non-HTML document (e.g., an XML export) as-is.
  pub fn get_raw(&self, url: &Url) -> Result<Response, Fault> {
    self.transport.fetch(url)
  }

  /// Submit a form on an already fetched page.
  pub fn submit(
    &self,
    page: &Response,
    form: &str,
    fields: &[(String, FormValue)],
  ) -> Result<Response, Fault> {
    let response = self.transport.submit_form(page, form, fields)?;
    response.page().check_for_errors()?;
    Ok(response)
  }

  /// Fetch the page at `url` and submit its form.
  pub fn submit_at(
    &self,
    url: &Url,
    form: &str,
    fields: &[(String, FormValue)],
  ) -> Result<Response, Fault> {
    let page = self.get(url)?;
    self.submit(&page, form, fields)
  }
}

/// Build a form field list from text values.
pub(crate) fn text_fields(pairs: &[(&str, &str)]) -> Vec<(String, FormValue)> {
  pairs
    .iter()
    .map(|(name, value)| (name.to_string(), FormValue::from(*value)))
    .collect()
}

/// Append `name=value` to the query of `url`.
pub(crate) fn with_query(mut url: Url, name: &str, value: &str) -> Url {
  url.query_pairs_mut().append_pair(name, value);
  url
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ErrorKind;
  use crate::transport::fake::FakeTransport;

  fn session(body: &'static str) -> Session {
    let fake = FakeTransport::new(move |_| Ok(body.to_string()));
    Session::new(
      Box::new(fake),
      Url::parse("https://forge.example.org/base").unwrap(),
    )
  }

  #[test]
  fn test_project_url_escapes_segments() {
    let s = session("");
    let url = s.project_url("demo", &["lists", "dev talk", "info"]).unwrap();
    assert_eq!(
      url.as_str(),
      "https://forge.example.org/base/projects/demo/lists/dev%20talk/info"
    );
  }

  #[test]
  fn test_site_url_keeps_base_path() {
    let s = session("");
    assert_eq!(
      s.site_url("login").unwrap().as_str(),
      "https://forge.example.org/base/login"
    );
  }

  #[test]
  fn test_get_rejects_error_banner() {
    let s = session(r#"<div class="error-banner">Permission denied</div>"#);
    let url = s.site_url("x").unwrap();
    let err = s.get(&url).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteRejection);
    assert!(s.get_raw(&url).is_ok());
  }
}
