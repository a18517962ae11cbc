mod app;
mod cache;
mod config;
mod db;
mod event;
mod gateway;
mod logging;
mod net;
mod sync;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

use crate::app::Action;

#[derive(Parser, Debug)]
#[command(name = "skool-sync")]
#[command(about = "Offline answer queue and cache router for Skool")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/skool-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Submit an answer to a question
  Answer {
    question_id: i64,
    answer: String,
  },
  /// Mark a game session as complete
  Complete { session_id: i64 },
  /// Buy a streak freeze
  StreakFreeze,
  /// Buy a store item
  Buy { item: String },
  /// Equip a store item
  Equip { item: String },
  /// Deliver the connectivity-restored signal and replay queued mutations
  Sync {
    /// Signal tag (default: the configured sync tag)
    #[arg(long)]
    tag: Option<String>,
  },
  /// List mutations waiting to be replayed
  Queue,
  /// Serve a read request through the cache router
  Fetch {
    /// Absolute URL or path on the configured origin
    url: String,
    /// Treat the request as a full-page navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Precache the critical assets of the configured generation
  Install,
  /// Activate the configured generation and delete all others
  Activate,
}

impl From<Command> for Action {
  fn from(command: Command) -> Self {
    match command {
      Command::Answer {
        question_id,
        answer,
      } => Action::Answer {
        question_id,
        answer,
      },
      Command::Complete { session_id } => Action::Complete { session_id },
      Command::StreakFreeze => Action::StreakFreeze,
      Command::Buy { item } => Action::Buy { item },
      Command::Equip { item } => Action::Equip { item },
      Command::Sync { tag } => Action::Sync { tag },
      Command::Queue => Action::Queue,
      Command::Fetch { url, navigate } => Action::Fetch { url, navigate },
      Command::Install => Action::Install,
      Command::Activate => Action::Activate,
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log_directory()?, &config.logging.level)?;

  let mut app = app::App::new(config)?;
  app.run(args.command.into()).await?;

  Ok(())
}
