//! Per-request serving strategy.

use reqwest::Method;
use url::Url;

use crate::net::{Request, RequestMode};

/// How a request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Forwarded to the network untouched, never cached
  PassThrough,
  /// Network first; cached snapshot, then the offline page, on failure
  NetworkFirstPage,
  /// Network first; cached snapshot on failure, else the failure itself
  NetworkFirstApi,
  /// Cache first; fetched and stored on a miss
  CacheFirst,
}

/// Routing table, evaluated top to bottom.
#[derive(Debug, Clone)]
pub struct RouteTable {
  origin: Url,
  api_prefix: String,
  static_prefix: String,
}

impl RouteTable {
  pub fn new(origin: Url, api_prefix: impl Into<String>, static_prefix: impl Into<String>) -> Self {
    Self {
      origin,
      api_prefix: api_prefix.into(),
      static_prefix: static_prefix.into(),
    }
  }

  pub fn origin(&self) -> &Url {
    &self.origin
  }

  pub fn classify(&self, request: &Request) -> Strategy {
    if request.url.origin() != self.origin.origin() {
      return Strategy::PassThrough;
    }

    let path = request.url.path();
    let is_get = request.method == Method::GET;

    // Only GET snapshots can be stored, so other navigations fall through
    if request.mode == RequestMode::Navigate && is_get {
      return Strategy::NetworkFirstPage;
    }

    if path.starts_with(&self.api_prefix) {
      return if is_get {
        Strategy::NetworkFirstApi
      } else {
        Strategy::PassThrough
      };
    }

    if is_get && path.starts_with(&self.static_prefix) {
      return Strategy::CacheFirst;
    }

    Strategy::PassThrough
  }
}
