//! Request and response types seen by the worker.
//!
//! These are host-independent snapshots: the transport that intercepts page
//! requests converts into a `Request`, and everything the worker returns or
//! stores is a fully buffered `Response`.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
  Options,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
      Method::Options => "OPTIONS",
    }
  }

  /// Only plain retrievals are ever intercepted or cached.
  pub fn is_retrieval(&self) -> bool {
    matches!(self, Method::Get)
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Method {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "HEAD" => Ok(Method::Head),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "PATCH" => Ok(Method::Patch),
      "DELETE" => Ok(Method::Delete),
      "OPTIONS" => Ok(Method::Options),
      other => Err(eyre!("Unsupported HTTP method: {}", other)),
    }
  }
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::Get, url)
  }

  /// A page navigation, content-negotiated as HTML.
  pub fn navigate(url: Url) -> Self {
    Self::get(url).with_header("Accept", "text/html,application/xhtml+xml")
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  pub fn accepts_html(&self) -> bool {
    self
      .header("accept")
      .map(|accept| accept.contains("text/html"))
      .unwrap_or(false)
  }

  /// Identity used for cache lookups: method plus the full URL.
  pub fn cache_key(&self) -> String {
    format!("{} {}", self.method, self.url)
  }
}

/// A buffered response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  /// A plain-text response, used for synthetic fallbacks.
  pub fn text(status: u16, body: &str) -> Self {
    Self::new(status, body.as_bytes().to_vec()).with_header("Content-Type", "text/plain")
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Any 2xx status.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Exactly 200, the only status that asset caching accepts.
  pub fn is_ok(&self) -> bool {
    self.status == 200
  }

  pub fn body_text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
  headers
    .iter()
    .find(|(n, _)| n.eq_ignore_ascii_case(name))
    .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_navigate_accepts_html() {
    let req = Request::navigate(url("https://example.com/"));
    assert!(req.accepts_html());
    assert!(!Request::get(url("https://example.com/")).accepts_html());
  }

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let req = Request::get(url("https://example.com/")).with_header("ACCEPT", "text/html");
    assert_eq!(req.header("accept"), Some("text/html"));
  }

  #[test]
  fn test_cache_key_includes_method_and_url() {
    let req = Request::get(url("https://example.com/css/main.css?v=2"));
    assert_eq!(req.cache_key(), "GET https://example.com/css/main.css?v=2");
  }

  #[test]
  fn test_method_parse() {
    assert_eq!("post".parse::<Method>().unwrap(), Method::Post);
    assert!("BREW".parse::<Method>().is_err());
    assert!(Method::Get.is_retrieval());
    assert!(!Method::Head.is_retrieval());
  }

  #[test]
  fn test_status_classes() {
    assert!(Response::new(204, Vec::new()).is_success());
    assert!(!Response::new(204, Vec::new()).is_ok());
    assert!(!Response::new(404, Vec::new()).is_success());
  }
}
