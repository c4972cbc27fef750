//! Scripted in-memory transport for tests.

use parking_lot::Mutex;
use url::Url;

use super::{FormValue, Response, Transport};
use crate::error::Fault;

#[derive(Debug, Clone)]
pub(crate) enum Request {
  Fetch(Url),
  Submit {
    page: Url,
    form: String,
    fields: Vec<(String, FormValue)>,
  },
}

impl Request {
  /// Text value of a submitted field.
  pub fn field(&self, name: &str) -> Option<&str> {
    match self {
      Request::Submit { fields, .. } => fields.iter().find_map(|(n, v)| match v {
        FormValue::Text(text) if n == name => Some(text.as_str()),
        _ => None,
      }),
      Request::Fetch(_) => None,
    }
  }

  /// `path?query` of the requested (or submitted-from) page.
  pub fn target(&self) -> String {
    let url = match self {
      Request::Fetch(url) => url,
      Request::Submit { page, .. } => page,
    };
    match url.query() {
      Some(query) => format!("{}?{}", url.path(), query),
      None => url.path().to_string(),
    }
  }
}

type Handler = Box<dyn Fn(&Request) -> Result<String, Fault> + Send + Sync>;

/// Transport answering every request with a closure and recording it.
pub(crate) struct FakeTransport {
  handler: Handler,
  log: Mutex<Vec<Request>>,
}

impl FakeTransport {
  pub fn new<F>(handler: F) -> Self
  where
    F: Fn(&Request) -> Result<String, Fault> + Send + Sync + 'static,
  {
    Self {
      handler: Box::new(handler),
      log: Mutex::new(Vec::new()),
    }
  }

  pub fn requests(&self) -> Vec<Request> {
    self.log.lock().clone()
  }

  /// Number of page fetches whose target contains `needle`.
  pub fn fetch_count(&self, needle: &str) -> usize {
    self
      .log
      .lock()
      .iter()
      .filter(|r| matches!(r, Request::Fetch(_)) && r.target().contains(needle))
      .count()
  }

  /// Submissions of the form matched by `form`.
  pub fn submissions(&self, form: &str) -> Vec<Request> {
    self
      .log
      .lock()
      .iter()
      .filter(|r| matches!(r, Request::Submit { form: f, .. } if f == form))
      .cloned()
      .collect()
  }

  fn answer(&self, request: Request, url: Url) -> Result<Response, Fault> {
    self.log.lock().push(request.clone());
    let body = (self.handler)(&request)?;
    Ok(Response {
      status: 200,
      body,
      final_url: url,
    })
  }
}

impl Transport for FakeTransport {
  fn fetch(&self, url: &Url) -> Result<Response, Fault> {
    self.answer(Request::Fetch(url.clone()), url.clone())
  }

  fn submit_form(
    &self,
    page: &Response,
    form_selector: &str,
    fields: &[(String, FormValue)],
  ) -> Result<Response, Fault> {
    page.page().form(form_selector)?;
    let request = Request::Submit {
      page: page.final_url.clone(),
      form: form_selector.to_string(),
      fields: fields.to_vec(),
    };
    self.answer(request, page.final_url.clone())
  }
}
