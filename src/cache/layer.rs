//! Cache router that serves requests from a named generation or the network.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::broadcast;
use url::Url;

use super::route::{RouteTable, Strategy};
use super::storage::CacheStorage;
use super::traits::{CachedResponse, RequestKey, Served};
use crate::event::ClientMessage;
use crate::net::{Network, NetworkError, Request, Response};

/// Decides per request whether to serve from the cache, the network, or the
/// offline page, and keeps the active generation populated.
pub struct CacheRouter<S: CacheStorage> {
  storage: Arc<S>,
  network: Arc<dyn Network>,
  routes: RouteTable,
  generation: String,
  offline_page: String,
  precache: Vec<String>,
  clients: broadcast::Sender<ClientMessage>,
}

impl<S: CacheStorage> CacheRouter<S> {
  pub fn new(
    storage: S,
    network: Arc<dyn Network>,
    routes: RouteTable,
    generation: impl Into<String>,
  ) -> Self {
    Self::with_shared_storage(Arc::new(storage), network, routes, generation)
  }

  /// Build a router over storage another router also uses.
  pub fn with_shared_storage(
    storage: Arc<S>,
    network: Arc<dyn Network>,
    routes: RouteTable,
    generation: impl Into<String>,
  ) -> Self {
    let (clients, _rx) = broadcast::channel(16);
    Self {
      storage,
      network,
      routes,
      generation: generation.into(),
      offline_page: "/offline".to_string(),
      precache: Vec::new(),
      clients,
    }
  }

  pub fn with_offline_page(mut self, path: impl Into<String>) -> Self {
    self.offline_page = path.into();
    self
  }

  pub fn with_precache(mut self, paths: Vec<String>) -> Self {
    self.precache = paths;
    self
  }

  pub fn with_clients(mut self, clients: broadcast::Sender<ClientMessage>) -> Self {
    self.clients = clients;
    self
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  /// Subscribe to messages sent to connected clients.
  pub fn subscribe(&self) -> broadcast::Receiver<ClientMessage> {
    self.clients.subscribe()
  }

  fn absolute(&self, path: &str) -> Result<Url> {
    self
      .routes
      .origin()
      .join(path)
      .map_err(|e| eyre!("Invalid path '{}': {}", path, e))
  }

  /// Serve one request according to the routing table.
  pub async fn handle(&self, request: &Request) -> Result<Served, NetworkError> {
    match self.routes.classify(request) {
      Strategy::PassThrough => Ok(Served::pass_through(
        self.network.fetch(request).await?,
      )),
      Strategy::NetworkFirstPage => self.network_first(request, true).await,
      Strategy::NetworkFirstApi => self.network_first(request, false).await,
      Strategy::CacheFirst => self.cache_first(request).await,
    }
  }

  async fn network_first(&self, request: &Request, is_page: bool) -> Result<Served, NetworkError> {
    let key = RequestKey::of(request);

    match self.network.fetch(request).await {
      Ok(response) => {
        self.store(&key, &response);
        Ok(Served::from_network(response))
      }
      Err(e) => {
        if let Some(cached) = self.lookup(&key) {
          tracing::info!(url = %request.url, "network failed, serving cached snapshot");
          return Ok(Served::from_cache(cached));
        }

        if is_page {
          if let Some(page) = self.offline_fallback() {
            tracing::info!(url = %request.url, "network failed, serving offline page");
            return Ok(Served::offline_fallback(page));
          }
        }

        Err(e)
      }
    }
  }

  async fn cache_first(&self, request: &Request) -> Result<Served, NetworkError> {
    let key = RequestKey::of(request);

    if let Some(cached) = self.lookup(&key) {
      return Ok(Served::from_cache(cached));
    }

    let response = self.network.fetch(request).await?;
    self.store(&key, &response);
    Ok(Served::from_network(response))
  }

  fn offline_fallback(&self) -> Option<CachedResponse> {
    let url = self.absolute(&self.offline_page).ok()?;
    self.lookup(&RequestKey::new("GET", url.as_str()))
  }

  /// Cache read; storage trouble counts as a miss.
  fn lookup(&self, key: &RequestKey) -> Option<CachedResponse> {
    match self.storage.match_entry(&self.generation, key) {
      Ok(hit) => hit,
      Err(e) => {
        tracing::warn!(url = %key.url, error = %e, "cache read failed");
        None
      }
    }
  }

  /// Cache write for successful responses; failures only lose the snapshot.
  fn store(&self, key: &RequestKey, response: &Response) {
    if !response.is_success() {
      return;
    }
    if let Err(e) = self.storage.put(&self.generation, key, response) {
      tracing::warn!(url = %key.url, error = %e, "cache write failed");
    }
  }

  /// Fetch every precache path and store them all, or none.
  ///
  /// The generation only becomes ready, and so activatable, on success.
  pub async fn install(&self) -> Result<()> {
    let urls = self
      .precache
      .iter()
      .map(|path| self.absolute(path))
      .collect::<Result<Vec<_>>>()?;

    let fetches = urls.iter().map(|url| {
      let request = Request::get(url.clone());
      async move { (request.clone(), self.network.fetch(&request).await) }
    });

    let mut entries = Vec::with_capacity(urls.len());
    for (request, outcome) in join_all(fetches).await {
      let response =
        outcome.map_err(|e| eyre!("Failed to precache {}: {}", request.url, e))?;
      if !response.is_success() {
        return Err(eyre!(
          "Failed to precache {}: HTTP {}",
          request.url,
          response.status
        ));
      }
      entries.push((RequestKey::of(&request), response));
    }

    self.storage.put_all(&self.generation, &entries)?;
    self.storage.mark_installed(&self.generation)?;

    tracing::info!(generation = %self.generation, entries = entries.len(), "cache generation installed");
    Ok(())
  }

  /// Make this generation the only one, then tell connected clients.
  ///
  /// Returns the names of the generations that were removed.
  pub fn activate(&self) -> Result<Vec<String>> {
    if !self.storage.is_installed(&self.generation)? {
      return Err(eyre!(
        "Cache generation {} has not been installed",
        self.generation
      ));
    }

    let mut removed = Vec::new();
    for name in self.storage.generations()? {
      if name != self.generation {
        self.storage.delete_generation(&name)?;
        tracing::info!(generation = %name, "deleted superseded cache generation");
        removed.push(name);
      }
    }

    if self.clients.send(ClientMessage::SwUpdated).is_err() {
      tracing::debug!("no connected clients to notify");
    }

    Ok(removed)
  }
}

impl<S: CacheStorage> Clone for CacheRouter<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
      routes: self.routes.clone(),
      generation: self.generation.clone(),
      offline_page: self.offline_page.clone(),
      precache: self.precache.clone(),
      clients: self.clients.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::traits::ServedFrom;
  use crate::cache::SqliteStorage;
  use crate::db::Database;
  use crate::net::testing::{FakeNetwork, Outcome};
  use reqwest::Method;

  const ORIGIN: &str = "http://localhost:8000";

  fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
  }

  fn routes() -> RouteTable {
    RouteTable::new(Url::parse(ORIGIN).unwrap(), "/api/", "/static/")
  }

  fn precache() -> Vec<String> {
    vec!["/static/css/common.css".to_string(), "/offline".to_string()]
  }

  fn router_on(
    storage: Arc<SqliteStorage>,
    network: Arc<FakeNetwork>,
    generation: &str,
  ) -> CacheRouter<SqliteStorage> {
    CacheRouter::with_shared_storage(storage, network, routes(), generation)
      .with_precache(precache())
      .with_offline_page("/offline")
  }

  fn setup() -> (
    Arc<SqliteStorage>,
    Arc<FakeNetwork>,
    CacheRouter<SqliteStorage>,
  ) {
    let storage = Arc::new(SqliteStorage::new(Arc::new(
      Database::open_in_memory().unwrap(),
    )));
    let network = Arc::new(FakeNetwork::new());
    let router = router_on(storage.clone(), network.clone(), "skool-v1");
    (storage, network, router)
  }

  fn serve_precache(network: &FakeNetwork) {
    network.set(Method::GET, "/static/css/common.css", Outcome::ok("body{}"));
    network.set(
      Method::GET,
      "/offline",
      Outcome::Respond(Response::new(200, Some("text/html"), "<h1>You are offline</h1>")),
    );
  }

  #[tokio::test]
  async fn test_static_asset_fetched_once() {
    let (_, network, router) = setup();
    network.set(Method::GET, "/static/js/tts.js", Outcome::ok("tts()"));

    let request = Request::get(url("/static/js/tts.js"));
    let first = router.handle(&request).await.unwrap();
    let second = router.handle(&request).await.unwrap();

    assert_eq!(first.source, ServedFrom::Network);
    assert_eq!(second.source, ServedFrom::Cache);
    assert_eq!(second.response.text(), "tts()");
    assert_eq!(network.calls_to("/static/js/tts.js"), 1);
  }

  #[tokio::test]
  async fn test_static_error_status_not_stored() {
    let (_, network, router) = setup();
    network.set(
      Method::GET,
      "/static/missing.png",
      Outcome::status(404, "not found"),
    );

    let request = Request::get(url("/static/missing.png"));
    router.handle(&request).await.unwrap();
    router.handle(&request).await.unwrap();

    assert_eq!(network.calls_to("/static/missing.png"), 2);
  }

  #[tokio::test]
  async fn test_static_miss_while_offline_fails() {
    let (_, _, router) = setup();
    let result = router.handle(&Request::get(url("/static/js/music.js"))).await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_activation_purges_previous_generation() {
    let (storage, network, v1) = setup();
    serve_precache(&network);
    network.set(Method::GET, "/static/js/racing.js", Outcome::ok("race()"));

    v1.install().await.unwrap();
    v1.activate().unwrap();
    v1.handle(&Request::get(url("/static/js/racing.js")))
      .await
      .unwrap();
    assert_eq!(network.calls_to("/static/js/racing.js"), 1);

    let v2 = router_on(storage.clone(), network.clone(), "skool-v2");
    v2.install().await.unwrap();
    let removed = v2.activate().unwrap();

    assert_eq!(removed, vec!["skool-v1".to_string()]);
    assert_eq!(storage.generations().unwrap(), vec!["skool-v2".to_string()]);

    // The v1-only asset is gone, so it comes from the network again
    let served = v2
      .handle(&Request::get(url("/static/js/racing.js")))
      .await
      .unwrap();
    assert_eq!(served.source, ServedFrom::Network);
    assert_eq!(network.calls_to("/static/js/racing.js"), 2);
  }

  #[tokio::test]
  async fn test_activation_requires_install() {
    let (_, network, router) = setup();
    network.set(Method::GET, "/static/css/common.css", Outcome::ok("body{}"));
    // /offline is unreachable, so install fails as a whole

    assert!(router.install().await.is_err());
    assert!(router.activate().is_err());
    assert!(router
      .handle(&Request::get(url("/static/css/common.css")))
      .await
      .map(|s| s.source == ServedFrom::Network)
      .unwrap());
  }

  #[tokio::test]
  async fn test_install_rejects_error_status() {
    let (storage, network, router) = setup();
    network.set(Method::GET, "/static/css/common.css", Outcome::ok("body{}"));
    network.set(Method::GET, "/offline", Outcome::status(500, "oops"));

    assert!(router.install().await.is_err());
    assert!(!storage.is_installed("skool-v1").unwrap());
  }

  #[tokio::test]
  async fn test_activation_broadcasts_update() {
    let (_, network, router) = setup();
    serve_precache(&network);
    let mut rx = router.subscribe();

    router.install().await.unwrap();
    router.activate().unwrap();

    assert_eq!(rx.recv().await.unwrap(), ClientMessage::SwUpdated);
  }

  #[tokio::test]
  async fn test_failed_navigation_without_cache_serves_offline_page() {
    let (_, network, router) = setup();
    serve_precache(&network);
    router.install().await.unwrap();

    let served = router
      .handle(&Request::navigate(url("/quiz/5")))
      .await
      .unwrap();

    assert_eq!(served.source, ServedFrom::OfflineFallback);
    assert_eq!(served.response.text(), "<h1>You are offline</h1>");
  }

  #[tokio::test]
  async fn test_failed_navigation_prefers_cached_snapshot() {
    let (_, network, router) = setup();
    serve_precache(&network);
    router.install().await.unwrap();

    network.push_once(
      Method::GET,
      "/quiz/5",
      Outcome::Respond(Response::new(200, Some("text/html"), "<h1>Quiz 5</h1>")),
    );
    let online = router
      .handle(&Request::navigate(url("/quiz/5")))
      .await
      .unwrap();
    assert_eq!(online.source, ServedFrom::Network);
    assert!(online.stored_at.is_none());

    let offline = router
      .handle(&Request::navigate(url("/quiz/5")))
      .await
      .unwrap();
    assert_eq!(offline.source, ServedFrom::Cache);
    assert_eq!(offline.response.text(), "<h1>Quiz 5</h1>");
    assert!(offline.stored_at.is_some());
  }

  #[tokio::test]
  async fn test_failed_navigation_without_offline_page_errors() {
    let (_, _, router) = setup();
    assert!(router
      .handle(&Request::navigate(url("/quiz/5")))
      .await
      .is_err());
  }

  #[tokio::test]
  async fn test_api_read_falls_back_then_propagates() {
    let (_, network, router) = setup();
    network.push_once(Method::GET, "/api/progress", Outcome::ok(r#"{"stars":3}"#));

    let request = Request::get(url("/api/progress"));
    router.handle(&request).await.unwrap();

    let cached = router.handle(&request).await.unwrap();
    assert_eq!(cached.source, ServedFrom::Cache);
    assert_eq!(cached.response.text(), r#"{"stars":3}"#);

    // Never fetched before, nothing to fall back on
    assert!(router
      .handle(&Request::get(url("/api/badges")))
      .await
      .is_err());
  }

  #[tokio::test]
  async fn test_api_reads_refresh_on_every_success() {
    let (_, network, router) = setup();
    network.push_once(Method::GET, "/api/progress", Outcome::ok(r#"{"stars":3}"#));
    network.push_once(Method::GET, "/api/progress", Outcome::ok(r#"{"stars":4}"#));

    let request = Request::get(url("/api/progress"));
    router.handle(&request).await.unwrap();
    router.handle(&request).await.unwrap();

    let cached = router.handle(&request).await.unwrap();
    assert_eq!(cached.response.text(), r#"{"stars":4}"#);
    assert_eq!(network.calls_to("/api/progress"), 3);
  }

  #[tokio::test]
  async fn test_pass_through_is_never_cached() {
    let (storage, network, router) = setup();
    network.set(Method::POST, "/api/answer", Outcome::ok("{}"));
    network.set(Method::GET, "/game/state", Outcome::ok("{}"));

    let mutation = Request::new(Method::POST, url("/api/answer")).with_body("{}");
    let served = router.handle(&mutation).await.unwrap();
    assert_eq!(served.source, ServedFrom::PassThrough);

    router
      .handle(&Request::get(url("/game/state")))
      .await
      .unwrap();

    let cross = Request::get(Url::parse("https://cdn.example.com/static/x.js").unwrap());
    assert!(router.handle(&cross).await.is_err());

    assert!(storage.generations().unwrap().is_empty());
  }
}
