use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::Arc;
use url::Url;

use crate::cache::{CacheRouter, RouteTable, ServedFrom, SqliteStorage};
use crate::config::Config;
use crate::db::Database;
use crate::event::{client_channel, ClientMessage, Event, EventHandler};
use crate::gateway::{Gateway, GatewayError};
use crate::net::{Credentials, HttpNetwork, Network, Request};
use crate::sync::{SqliteMutationStore, SyncCoordinator};

/// What the player asked for
#[derive(Debug, Clone)]
pub enum Action {
  Answer { question_id: i64, answer: String },
  Complete { session_id: i64 },
  StreakFreeze,
  Buy { item: String },
  Equip { item: String },
  Sync { tag: Option<String> },
  Queue,
  Fetch { url: String, navigate: bool },
  Install,
  Activate,
}

/// Wires the gateway, coordinator and router over one database and network.
pub struct App {
  config: Config,
  gateway: Gateway<SqliteMutationStore>,
  coordinator: SyncCoordinator<SqliteMutationStore>,
  router: CacheRouter<SqliteStorage>,
  events: EventHandler,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let db = Arc::new(Database::open_or_in_memory(&config.storage_path()?)?);
    let network: Arc<dyn Network> = Arc::new(HttpNetwork::new(&config.network)?);
    let credentials = Credentials::new(config.csrf_token(), Config::session_cookie());
    let events = EventHandler::new();

    let coordinator = SyncCoordinator::new(
      SqliteMutationStore::new(Arc::clone(&db)),
      Arc::clone(&network),
      config.origin.clone(),
      credentials.clone(),
      config.sync.tag.clone(),
    )
    .with_registrar(events.sender());

    let gateway = Gateway::new(
      Arc::clone(&network),
      config.origin.clone(),
      credentials,
      coordinator.clone(),
    )
    .with_notices(events.sender());

    let routes = RouteTable::new(
      config.origin.clone(),
      config.cache.api_prefix.clone(),
      config.cache.static_prefix.clone(),
    );
    let router = CacheRouter::new(
      SqliteStorage::new(db),
      network,
      routes,
      config.cache.generation.clone(),
    )
    .with_offline_page(config.cache.offline_page.clone())
    .with_precache(config.cache.precache.clone())
    .with_clients(client_channel());

    Ok(Self {
      config,
      gateway,
      coordinator,
      router,
      events,
    })
  }

  pub async fn run(&mut self, action: Action) -> Result<()> {
    match action {
      Action::Answer {
        question_id,
        answer,
      } => {
        let result = self.gateway.post_answer(question_id, &answer).await;
        self.report(result)
      }
      Action::Complete { session_id } => {
        let result = self.gateway.complete_session(session_id).await;
        self.report(result)
      }
      Action::StreakFreeze => {
        let result = self.gateway.buy_streak_freeze().await;
        self.report(result)
      }
      Action::Buy { item } => {
        let result = self.gateway.buy_store_item(&item).await;
        self.report(result)
      }
      Action::Equip { item } => {
        let result = self.gateway.equip_item(&item).await;
        self.report(result)
      }
      Action::Sync { tag } => {
        let tag = tag.unwrap_or_else(|| self.coordinator.sync_tag().to_string());
        match self.coordinator.on_sync(&tag).await {
          Some(report) => println!(
            "replayed {} mutation(s), {} still queued",
            report.replayed, report.remaining
          ),
          None => println!("no handler for sync tag '{}'", tag),
        }
        Ok(())
      }
      Action::Queue => {
        let pending = self.coordinator.pending()?;
        if pending.is_empty() {
          println!("queue is empty");
        }
        for m in pending {
          println!(
            "{:>4}  {}  {} {}  {}",
            m.id,
            m.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
            m.method,
            m.url,
            m.body
          );
        }
        Ok(())
      }
      Action::Fetch { url, navigate } => self.fetch(&url, navigate).await,
      Action::Install => {
        self.router.install().await?;
        println!("installed cache generation {}", self.router.generation());
        Ok(())
      }
      Action::Activate => {
        let mut clients = self.router.subscribe();
        let removed = self.router.activate()?;
        for name in removed {
          println!("deleted cache generation {}", name);
        }
        while let Ok(message) = clients.try_recv() {
          print_client_message(&message)?;
        }
        Ok(())
      }
    }
  }

  async fn fetch(&self, target: &str, navigate: bool) -> Result<()> {
    // Bare paths are resolved against the configured origin
    let url = Url::parse(target)
      .or_else(|_| self.config.origin.join(target))
      .map_err(|e| eyre!("Invalid url '{}': {}", target, e))?;
    let request = if navigate {
      Request::navigate(url)
    } else {
      Request::get(url)
    };

    let served = self
      .router
      .handle(&request)
      .await
      .map_err(|e| eyre!("{}: {}", request.url, e))?;

    let source = match served.source {
      ServedFrom::Network => "network",
      ServedFrom::Cache => "cache",
      ServedFrom::OfflineFallback => "offline page",
      ServedFrom::PassThrough => "pass-through",
    };
    match served.stored_at {
      Some(at) => eprintln!(
        "HTTP {} ({}, stored {})",
        served.response.status,
        source,
        at.format("%Y-%m-%d %H:%M:%S")
      ),
      None => eprintln!("HTTP {} ({})", served.response.status, source),
    }
    println!("{}", served.response.text());
    Ok(())
  }

  fn report(&mut self, result: Result<Value, GatewayError>) -> Result<()> {
    self.flush_events();
    match result {
      Ok(data) => {
        println!("{}", serde_json::to_string_pretty(&data)?);
        Ok(())
      }
      // Already queued or reported through a notice
      Err(GatewayError::Connectivity(_)) => Ok(()),
      Err(e) => Err(eyre!("{}", e)),
    }
  }

  fn flush_events(&mut self) {
    for event in self.events.pending() {
      match event {
        Event::Notice(message) => eprintln!("{}", message),
        Event::SyncRegistered(tag) => {
          tracing::info!(%tag, "background sync registered");
        }
      }
    }
  }
}

fn print_client_message(message: &ClientMessage) -> Result<()> {
  println!("{}", serde_json::to_string(message)?);
  Ok(())
}
