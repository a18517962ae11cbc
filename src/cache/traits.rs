//! Core types for the response cache.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::net::{Request, Response};

/// Identity of a request inside a cache generation: method plus absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: &str, url: &str) -> Self {
    Self {
      method: method.to_uppercase(),
      url: url.to_string(),
    }
  }

  pub fn of(request: &Request) -> Self {
    Self::new(request.method.as_str(), request.url.as_str())
  }

  /// SHA256 hash for stable, fixed-length keys
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A stored response snapshot.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  pub stored_at: DateTime<Utc>,
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
  /// Fresh from the network, possibly stored on the way
  Network,
  /// From the active cache generation
  Cache,
  /// The offline fallback page, standing in for a failed navigation
  OfflineFallback,
  /// Not handled by the router; fetched without touching the cache
  PassThrough,
}

/// A response together with its source.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ServedFrom,
  /// When the snapshot was stored (if from cache)
  pub stored_at: Option<DateTime<Utc>>,
}

impl Served {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ServedFrom::Network,
      stored_at: None,
    }
  }

  pub fn pass_through(response: Response) -> Self {
    Self {
      response,
      source: ServedFrom::PassThrough,
      stored_at: None,
    }
  }

  pub fn from_cache(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ServedFrom::Cache,
      stored_at: Some(cached.stored_at),
    }
  }

  pub fn offline_fallback(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ServedFrom::OfflineFallback,
      stored_at: Some(cached.stored_at),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_hash_depends_on_method_and_full_url() {
    let a = RequestKey::new("GET", "http://localhost:8000/api/progress?week=1");
    let b = RequestKey::new("get", "http://localhost:8000/api/progress?week=1");
    let c = RequestKey::new("GET", "http://localhost:8000/api/progress?week=2");
    let d = RequestKey::new("HEAD", "http://localhost:8000/api/progress?week=1");

    assert_eq!(a.cache_hash(), b.cache_hash());
    assert_ne!(a.cache_hash(), c.cache_hash());
    assert_ne!(a.cache_hash(), d.cache_hash());
    assert_eq!(a.cache_hash().len(), 64);
  }
}
