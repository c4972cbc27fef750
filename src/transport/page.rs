//! Structural queries over fetched HTML.

use scraper::{ElementRef, Html, Selector};

use crate::error::Fault;

/// Elements the site uses to report a failed request inside a normal page.
const ERROR_BANNER: &str = ".errormessage, .error-banner, div.error";

/// A parsed HTML document.
pub struct Page {
  html: Html,
}

/// The fields a form would submit as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSpec {
  pub action: Option<String>,
  pub method: String,
  pub fields: Vec<(String, String)>,
}

pub(crate) fn selector(css: &str) -> Result<Selector, Fault> {
  Selector::parse(css).map_err(|e| Fault::parse(format!("invalid selector '{}': {}", css, e)))
}

/// Text content with whitespace runs collapsed.
pub fn text_of(element: ElementRef<'_>) -> String {
  element
    .text()
    .flat_map(str::split_whitespace)
    .collect::<Vec<_>>()
    .join(" ")
}

/// Text of the first descendant matching `css`.
pub fn child_text(element: ElementRef<'_>, css: &str) -> Result<Option<String>, Fault> {
  let sel = selector(css)?;
  Ok(element.select(&sel).next().map(text_of))
}

/// Like [`child_text`], but the descendant must exist.
pub fn required_text(element: ElementRef<'_>, css: &str) -> Result<String, Fault> {
  child_text(element, css)?.ok_or_else(|| Fault::parse(format!("missing '{}' in row", css)))
}

/// Attribute of the element itself, which must be present.
pub fn required_attr<'a>(element: ElementRef<'a>, name: &str) -> Result<&'a str, Fault> {
  element
    .value()
    .attr(name)
    .ok_or_else(|| Fault::parse(format!("<{}> has no '{}' attribute", element.value().name(), name)))
}

impl Page {
  pub fn parse(body: &str) -> Self {
    Self {
      html: Html::parse_document(body),
    }
  }

  pub fn select_all(&self, css: &str) -> Result<Vec<ElementRef<'_>>, Fault> {
    let sel = selector(css)?;
    Ok(self.html.select(&sel).collect())
  }

  pub fn select_one(&self, css: &str) -> Result<Option<ElementRef<'_>>, Fault> {
    let sel = selector(css)?;
    Ok(self.html.select(&sel).next())
  }

  /// The first element matching `css`; a missing element is a parse fault.
  pub fn require(&self, css: &str) -> Result<ElementRef<'_>, Fault> {
    self
      .select_one(css)?
      .ok_or_else(|| Fault::parse(format!("page has no element matching '{}'", css)))
  }

  /// Message of an embedded error banner, if the page carries one.
  pub fn error_banner(&self) -> Option<String> {
    let sel = selector(ERROR_BANNER).ok()?;
    self
      .html
      .select(&sel)
      .map(text_of)
      .find(|message| !message.is_empty())
  }

  /// Fail with a remote rejection when the page reports an error.
  pub fn check_for_errors(&self) -> Result<(), Fault> {
    match self.error_banner() {
      Some(message) => Err(Fault::RemoteRejection(message)),
      None => Ok(()),
    }
  }

  /// Read the form matched by `css`; a missing form is a validation fault.
  pub fn form(&self, css: &str) -> Result<FormSpec, Fault> {
    let form = self
      .select_one(css)?
      .ok_or_else(|| Fault::validation(format!("page has no form matching '{}'", css)))?;

    let controls = selector("input[name], select[name], textarea[name]")?;
    let options = selector("option")?;
    let mut fields = Vec::new();

    for control in form.select(&controls) {
      let element = control.value();
      let Some(name) = element.attr("name") else {
        continue;
      };

      let value = match element.name() {
        "select" => {
          let all: Vec<_> = control.select(&options).collect();
          all
            .iter()
            .find(|o| o.value().attr("selected").is_some())
            .or_else(|| all.first())
            .map(|o| {
              o.value()
                .attr("value")
                .map(String::from)
                .unwrap_or_else(|| text_of(*o))
            })
        }
        "textarea" => Some(control.text().collect::<String>()),
        _ => {
          let kind = element.attr("type").unwrap_or("text").to_ascii_lowercase();
          match kind.as_str() {
            "submit" | "button" | "image" | "reset" | "file" => None,
            "checkbox" | "radio" if element.attr("checked").is_none() => None,
            "checkbox" | "radio" => Some(element.attr("value").unwrap_or("on").to_string()),
            _ => Some(element.attr("value").unwrap_or_default().to_string()),
          }
        }
      };

      if let Some(value) = value {
        fields.push((name.to_string(), value));
      }
    }

    Ok(FormSpec {
      action: form.value().attr("action").map(String::from),
      method: form
        .value()
        .attr("method")
        .unwrap_or("get")
        .to_ascii_uppercase(),
      fields,
    })
  }
}
