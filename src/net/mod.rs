//! Network seam shared by the gateway, the sync coordinator and the cache router.

mod http;

pub use http::HttpNetwork;

use async_trait::async_trait;
use reqwest::Method;
use url::Url;

/// How the request was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Full-page navigation
  Navigate,
  /// Script-issued request (API call, asset load)
  Fetch,
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  /// Already-encoded body text, sent verbatim
  pub body: Option<String>,
  pub mode: RequestMode,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
      body: None,
      mode: RequestMode::Fetch,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
    self.headers.extend(headers);
    self
  }

  pub fn with_body(mut self, body: impl Into<String>) -> Self {
    self.body = Some(body.into());
    self
  }
}

/// A response snapshot: everything needed to serve it again later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, content_type: Option<&str>, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      content_type: content_type.map(String::from),
      body: body.into(),
    }
  }

  /// 2xx status
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// No response was received.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NetworkError {
  #[error("network unreachable: {0}")]
  Unreachable(String),
  #[error("request timed out")]
  Timeout,
}

/// Something that can carry a request to the server.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// Session metadata attached to every same-origin JSON call.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
  pub csrf_token: Option<String>,
  /// Raw Cookie header value carrying the session
  pub session_cookie: Option<String>,
}

impl Credentials {
  pub fn new(csrf_token: Option<String>, session_cookie: Option<String>) -> Self {
    // An explicit token wins; otherwise look for one in the cookie jar
    let csrf_token = csrf_token.or_else(|| {
      session_cookie
        .as_deref()
        .and_then(csrf_from_cookie_header)
    });
    Self {
      csrf_token,
      session_cookie,
    }
  }

  /// The JSON headers contract used for submissions and their replays.
  ///
  /// Session credentials are only attached when `target` shares `origin`.
  pub fn json_headers(&self, origin: &Url, target: &Url) -> Vec<(String, String)> {
    let mut headers = vec![
      ("Content-Type".to_string(), "application/json".to_string()),
      ("Accept".to_string(), "application/json".to_string()),
    ];
    if origin.origin() != target.origin() {
      return headers;
    }
    if let Some(token) = &self.csrf_token {
      headers.push(("X-CSRF-Token".to_string(), token.clone()));
    }
    if let Some(cookie) = &self.session_cookie {
      headers.push(("Cookie".to_string(), cookie.clone()));
    }
    headers
  }
}

/// Extract a CSRF token from a Cookie header (`csrftoken` or `csrf_token`).
pub fn csrf_from_cookie_header(cookies: &str) -> Option<String> {
  for cookie in cookies.split(';') {
    let cookie = cookie.trim();
    if let Some(value) = cookie.strip_prefix("csrftoken=") {
      return Some(value.to_string());
    }
    if let Some(value) = cookie.strip_prefix("csrf_token=") {
      return Some(value.to_string());
    }
  }
  None
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_csrf_from_cookie_prefers_first_match() {
    assert_eq!(
      csrf_from_cookie_header("session=abc; csrftoken=tok1; csrf_token=tok2"),
      Some("tok1".to_string())
    );
    assert_eq!(
      csrf_from_cookie_header("csrf_token=tok2"),
      Some("tok2".to_string())
    );
    assert_eq!(csrf_from_cookie_header("session=abc"), None);
  }

  #[test]
  fn test_explicit_token_wins_over_cookie() {
    let creds = Credentials::new(
      Some("explicit".to_string()),
      Some("csrftoken=from-cookie".to_string()),
    );
    assert_eq!(creds.csrf_token.as_deref(), Some("explicit"));

    let creds = Credentials::new(None, Some("csrftoken=from-cookie".to_string()));
    assert_eq!(creds.csrf_token.as_deref(), Some("from-cookie"));
  }

  fn origin() -> Url {
    Url::parse("https://skool.example.com").unwrap()
  }

  #[test]
  fn test_json_headers() {
    let target = origin().join("/game/answer").unwrap();
    let headers = Credentials::new(Some("t".to_string()), Some("sid=1".to_string()))
      .json_headers(&origin(), &target);

    assert!(headers.contains(&("Content-Type".to_string(), "application/json".to_string())));
    assert!(headers.contains(&("Accept".to_string(), "application/json".to_string())));
    assert!(headers.contains(&("X-CSRF-Token".to_string(), "t".to_string())));
    assert!(headers.contains(&("Cookie".to_string(), "sid=1".to_string())));

    let bare = Credentials::default().json_headers(&origin(), &target);
    assert_eq!(bare.len(), 2);
  }

  #[test]
  fn test_credentials_stay_on_same_origin() {
    let creds = Credentials::new(Some("t".to_string()), Some("sid=1".to_string()));
    let elsewhere = Url::parse("https://tracker.example.com/collect").unwrap();
    let other_port = Url::parse("https://skool.example.com:8443/game/answer").unwrap();

    for target in [elsewhere, other_port] {
      let headers = creds.json_headers(&origin(), &target);
      assert_eq!(headers.len(), 2);
      assert!(headers.iter().all(|(name, _)| name != "Cookie" && name != "X-CSRF-Token"));
    }
  }

  #[test]
  fn test_success_range() {
    assert!(Response::new(200, None, "").is_success());
    assert!(Response::new(204, None, "").is_success());
    assert!(!Response::new(304, None, "").is_success());
    assert!(!Response::new(500, None, "").is_success());
  }
}
