use reqwest::blocking::{multipart, Client, RequestBuilder};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{FormValue, Response, Transport};
use crate::error::Fault;

/// Blocking HTTP transport with a persistent cookie store.
pub struct HttpTransport {
  client: Client,
  credentials: Option<(String, String)>,
}

impl HttpTransport {
  pub fn new(timeout: Duration) -> Result<Self, Fault> {
    let client = Client::builder()
      .cookie_store(true)
      .timeout(timeout)
      .user_agent(concat!("forgetasks/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| Fault::transport("Failed to create HTTP client", e))?;

    Ok(Self {
      client,
      credentials: None,
    })
  }

  /// Send HTTP basic credentials with every request.
  pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
    self.credentials = Some((username.to_string(), password.to_string()));
    self
  }

  fn send(&self, request: RequestBuilder, url: &Url) -> Result<Response, Fault> {
    let request = match &self.credentials {
      Some((user, password)) => request.basic_auth(user, Some(password)),
      None => request,
    };

    let response = request
      .send()
      .map_err(|e| Fault::transport(format!("Request to {} failed", url), e))?;

    let status = response.status();
    let final_url = response.url().clone();
    debug!(%url, %final_url, status = status.as_u16(), "response");

    let body = response
      .text()
      .map_err(|e| Fault::transport(format!("Failed to read response from {}", final_url), e))?;

    if status.is_client_error() || status.is_server_error() {
      return Err(Fault::Transport {
        message: format!("{} returned HTTP {}", final_url, status),
        source: None,
      });
    }

    Ok(Response {
      status: status.as_u16(),
      body,
      final_url,
    })
  }
}

/// How a form's fields travel to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Encoding {
  /// Appended to the target's query string
  Query,
  UrlEncoded,
  /// Required as soon as a file is attached
  Multipart,
}

/// A filled-in form, ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FormRequest {
  /// Resolved action URL; for [`Encoding::Query`] it already carries the values
  pub target: Url,
  pub encoding: Encoding,
  pub values: Vec<(String, String)>,
  pub files: Vec<(String, PathBuf)>,
}

/// Fill the form matched by `form_selector` on `page` with `fields`.
///
/// A given field replaces every value the form already has under that name.
pub(crate) fn build_form_request(
  page: &Response,
  form_selector: &str,
  fields: &[(String, FormValue)],
) -> Result<FormRequest, Fault> {
  let form = page.page().form(form_selector)?;

  let action = match form.action.as_deref() {
    Some(action) if !action.is_empty() => page
      .final_url
      .join(action)
      .map_err(|e| Fault::parse(format!("Bad form action '{}': {}", action, e)))?,
    _ => page.final_url.clone(),
  };

  let mut values = form.fields;
  let mut files = Vec::new();
  for (name, value) in fields {
    values.retain(|(existing, _)| existing != name);
    match value {
      FormValue::Text(text) => values.push((name.clone(), text.clone())),
      FormValue::File(path) => files.push((name.clone(), path.clone())),
    }
  }

  let encoding = if !files.is_empty() {
    Encoding::Multipart
  } else if form.method == "POST" {
    Encoding::UrlEncoded
  } else {
    Encoding::Query
  };

  let mut target = action;
  if encoding == Encoding::Query {
    target.query_pairs_mut().extend_pairs(&values);
  }

  Ok(FormRequest {
    target,
    encoding,
    values,
    files,
  })
}

impl Transport for HttpTransport {
  fn fetch(&self, url: &Url) -> Result<Response, Fault> {
    self.send(self.client.get(url.clone()), url)
  }

  fn submit_form(
    &self,
    page: &Response,
    form_selector: &str,
    fields: &[(String, FormValue)],
  ) -> Result<Response, Fault> {
    let form = build_form_request(page, form_selector, fields)?;
    debug!(
      target = %form.target,
      form = form_selector,
      fields = form.values.len(),
      files = form.files.len(),
      "submitting form"
    );

    let request = match form.encoding {
      Encoding::Multipart => {
        let mut body = multipart::Form::new();
        for (name, value) in form.values {
          body = body.text(name, value);
        }
        for (name, path) in form.files {
          body = body
            .file(name, &path)
            .map_err(|e| Fault::transport(format!("Failed to read {}", path.display()), e))?;
        }
        self.client.post(form.target.clone()).multipart(body)
      }
      Encoding::UrlEncoded => self.client.post(form.target.clone()).form(&form.values),
      Encoding::Query => self.client.get(form.target.clone()),
    };

    self.send(request, &form.target)
  }
}
