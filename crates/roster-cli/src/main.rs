//! `roster`: scheduled access for an access-control terminal.
//!
//! # Usage
//!
//! ```
//! roster rules set 12 weekday deny 6,7
//! roster status --at 2024-06-08T10:00
//! roster apply
//! roster serve
//! ```

mod commands;
mod config;
mod daemon;
mod device;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use roster_core::{
  directory::Privilege,
  schedule::{Axis, RuleMode, Uid},
};
use roster_store_sqlite::SqliteStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::{config::Config, device::HttpDirectory};

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "roster", version, about = "Scheduled access for an access-control terminal")]
struct Cli {
  /// Path to a TOML config file.
  #[arg(short, long, value_name = "FILE", default_value = "roster.toml")]
  config: PathBuf,

  /// Print results as JSON.
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Manage identities on the terminal directly.
  #[command(subcommand)]
  Users(UsersCommand),
  /// Show terminal metadata.
  Device,
  /// Take an identity off the terminal until `enable`.
  Disable { uid: Uid },
  /// Put an identity back from its snapshot.
  Enable {
    uid:         Uid,
    /// Also drop every rule the identity holds.
    #[arg(long)]
    clear_rules: bool,
  },
  /// Edit schedule rules.
  #[command(subcommand)]
  Rules(RulesCommand),
  /// Dry run: what a pass would decide at an instant.
  Status {
    /// `YYYY-MM-DDTHH:MM`; defaults to now.
    #[arg(long)]
    at: Option<String>,
  },
  /// Run one pass.
  Apply {
    #[arg(long)]
    at: Option<String>,
  },
  /// Run a pass every `reconcile_interval_secs` until interrupted.
  Watch,
  /// Serve the JSON API alongside the periodic pass.
  Serve,
  /// Attendance log.
  #[command(subcommand)]
  Attendance(AttendanceCommand),
  /// Import a legacy JSON state file, replacing the store's contents.
  Import {
    file:    PathBuf,
    /// Only report what would be imported.
    #[arg(long)]
    dry_run: bool,
  },
  /// Report store invariant violations.
  Audit,
}

#[derive(Subcommand, Debug)]
enum UsersCommand {
  List,
  /// Add or overwrite an identity.
  Put {
    uid:       Uid,
    name:      String,
    /// Privilege level; 0 = user, 14 = admin.
    #[arg(long, default_value_t = 0)]
    privilege: u8,
    #[arg(long, default_value = "")]
    password:  String,
    #[arg(long)]
    group:     Option<u32>,
    #[arg(long, default_value = "")]
    user_id:   String,
    #[arg(long, default_value_t = 0)]
    card:      u64,
  },
  Delete { uid: Uid },
}

#[derive(Subcommand, Debug)]
enum RulesCommand {
  List,
  Show { uid: Uid },
  /// Replace the rule on one axis.
  Set {
    uid:    Uid,
    axis:   Axis,
    mode:   RuleMode,
    /// Weekdays as ISO numbers, dates as `YYYY-MM-DD` or `FROM..TO`,
    /// windows as `HH:MM-HH:MM`. Commas separate several values.
    #[arg(required = true)]
    values: Vec<String>,
    /// Add to the existing rule instead of replacing it.
    #[arg(long)]
    extend: bool,
  },
  /// Clear one axis, or every rule without `--axis`.
  Clear {
    uid:  Uid,
    #[arg(long)]
    axis: Option<Axis>,
  },
}

#[derive(Subcommand, Debug)]
enum AttendanceCommand {
  /// Pull the terminal's punch log into the store.
  Sync,
  Show {
    #[arg(long)]
    uid:  Option<Uid>,
    /// Inclusive, `YYYY-MM-DD`.
    #[arg(long)]
    from: Option<chrono::NaiveDate>,
    #[arg(long)]
    to:   Option<chrono::NaiveDate>,
  },
  /// Punch counts per kind.
  Summary {
    #[arg(long)]
    uid:  Option<Uid>,
    #[arg(long)]
    from: Option<chrono::NaiveDate>,
    #[arg(long)]
    to:   Option<chrono::NaiveDate>,
  },
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let config = Config::load(&cli.config)?;

  if let Some(parent) = config.store_path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {}", parent.display()))?;
  }
  let store = SqliteStore::open(&config.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", config.store_path))?;
  let directory = HttpDirectory::new(&config.device)?;

  let ctx = commands::Ctx {
    store:     Arc::new(store),
    directory: Arc::new(directory),
    json:      cli.json,
  };

  match cli.command {
    Command::Users(UsersCommand::List) => commands::users_list(&ctx).await,
    Command::Users(UsersCommand::Put { uid, name, privilege, password, group, user_id, card }) => {
      let mut record = roster_core::directory::DirectoryRecord::new(uid, name);
      record.privilege = Privilege(privilege);
      record.password = password;
      record.group_id = group;
      record.user_id = user_id;
      record.card = card;
      commands::users_put(&ctx, record).await
    }
    Command::Users(UsersCommand::Delete { uid }) => commands::users_delete(&ctx, uid).await,
    Command::Device => commands::device(&ctx).await,
    Command::Disable { uid } => commands::disable(&ctx, uid).await,
    Command::Enable { uid, clear_rules } => commands::enable(&ctx, uid, clear_rules).await,
    Command::Rules(RulesCommand::List) => commands::rules_list(&ctx).await,
    Command::Rules(RulesCommand::Show { uid }) => commands::rules_show(&ctx, uid).await,
    Command::Rules(RulesCommand::Set { uid, axis, mode, values, extend }) => {
      commands::rules_set(&ctx, uid, axis, mode, &values, extend).await
    }
    Command::Rules(RulesCommand::Clear { uid, axis }) => {
      commands::rules_clear(&ctx, uid, axis).await
    }
    Command::Status { at } => commands::status(&ctx, at.as_deref()).await,
    Command::Apply { at } => commands::apply(&ctx, at.as_deref()).await,
    Command::Watch => {
      let every = std::time::Duration::from_secs(config.reconcile_interval_secs);
      tracing::info!(interval_secs = config.reconcile_interval_secs, "watching");
      daemon::pass_loop(
        ctx.store,
        ctx.directory,
        Arc::new(tokio::sync::Mutex::new(())),
        every,
        daemon::shutdown_signal(),
      )
      .await;
      Ok(())
    }
    Command::Serve => daemon::serve(&config, ctx.store, ctx.directory).await,
    Command::Attendance(AttendanceCommand::Sync) => commands::attendance_sync(&ctx).await,
    Command::Attendance(AttendanceCommand::Show { uid, from, to }) => {
      commands::attendance_show(&ctx, uid, from, to).await
    }
    Command::Attendance(AttendanceCommand::Summary { uid, from, to }) => {
      commands::attendance_summary(&ctx, uid, from, to).await
    }
    Command::Import { file, dry_run } => commands::import(&ctx, &file, dry_run).await,
    Command::Audit => commands::audit(&ctx).await,
  }
}
