//! Request and response shapes exchanged with the backend.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  /// Reads are eligible for caching; everything else passes through.
  pub fn is_read(self) -> bool {
    matches!(self, Method::Get | Method::Head)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl From<Method> for reqwest::Method {
  fn from(method: Method) -> Self {
    match method {
      Method::Get => reqwest::Method::GET,
      Method::Head => reqwest::Method::HEAD,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Patch => reqwest::Method::PATCH,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

/// An outbound request, addressed by path (and query) relative to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
  pub method: Method,
  pub path: String,
  pub content_type: Option<String>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      content_type: None,
      body: None,
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::Get, path)
  }

  pub fn with_body(mut self, content_type: impl Into<String>, body: Vec<u8>) -> Self {
    self.content_type = Some(content_type.into());
    self.body = Some(body);
    self
  }

  /// Path without its query string.
  pub fn route(&self) -> &str {
    self.path.split(['?', '#']).next().unwrap_or_default()
  }
}

/// A response as seen by callers of the interceptor and stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, content_type: Option<String>, body: Vec<u8>) -> Self {
    Self {
      status,
      content_type,
      body,
    }
  }

  pub fn ok(body: Vec<u8>) -> Self {
    Self::new(200, None, body)
  }

  /// Fixed response returned by cache-first routes when offline with nothing cached.
  pub fn offline_placeholder() -> Self {
    Self::new(503, Some("text/plain".to_string()), b"Offline".to_vec())
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_route_strips_query() {
    assert_eq!(Request::get("/rest/v1/vehicles?select=*").route(), "/rest/v1/vehicles");
    assert_eq!(Request::get("/index.html#top").route(), "/index.html");
    assert_eq!(Request::get("/").route(), "/");
  }

  #[test]
  fn test_reads() {
    assert!(Method::Get.is_read());
    assert!(Method::Head.is_read());
    assert!(!Method::Post.is_read());
    assert!(!Method::Delete.is_read());
  }

  #[test]
  fn test_placeholder_is_not_success() {
    let placeholder = Response::offline_placeholder();
    assert!(!placeholder.is_success());
    assert_eq!(placeholder.text(), "Offline");
  }
}
