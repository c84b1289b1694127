//! One function per subcommand. Each prints plain text, or JSON with
//! `--json`.

use std::{path::Path, sync::Arc};

use anyhow::Context as _;
use chrono::NaiveDate;
use roster_core::{
  attendance::{self, tally},
  directory::{Directory, DirectoryRecord},
  evaluate::{EvaluationContext, Presence, explain},
  legacy::{import_legacy, parse_legacy},
  lifecycle,
  reconcile::reconcile,
  schedule::{Axis, RuleMode, RuleSet, ScheduleRule, Uid},
  store::RestrictionStore,
};
use roster_store_sqlite::SqliteStore;
use serde::Serialize;

use crate::device::HttpDirectory;

pub struct Ctx {
  pub store:     Arc<SqliteStore>,
  pub directory: Arc<HttpDirectory>,
  pub json:      bool,
}

impl Ctx {
  fn store(&self) -> &SqliteStore { self.store.as_ref() }

  fn directory(&self) -> &HttpDirectory { self.directory.as_ref() }

  /// Print `value` as JSON, or run `text` to print it for humans.
  fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&T)) -> anyhow::Result<()> {
    if self.json {
      println!("{}", serde_json::to_string_pretty(value).context("serialising output")?);
    } else {
      text(value);
    }
    Ok(())
  }
}

fn context_at(at: Option<&str>) -> anyhow::Result<EvaluationContext> {
  Ok(EvaluationContext::at_or_now(at)?)
}

fn print_rule_set(uid: Uid, rules: &RuleSet) {
  if rules.is_empty() {
    println!("{uid}: no rules");
    return;
  }
  for rule in rules.rules() {
    println!("{uid}: {rule}");
  }
}

// ─── Users ────────────────────────────────────────────────────────────────────

pub async fn users_list(ctx: &Ctx) -> anyhow::Result<()> {
  let users = ctx.directory().list_identities().await.context("listing users")?;
  ctx.emit(&users, |users| {
    for u in users {
      let group = u.group_id.map(|g| g.to_string()).unwrap_or_else(|| "-".into());
      println!("{:>5}  {:<24} {:<8} group {:<4} card {}", u.uid, u.name, u.privilege, group, u.card);
    }
  })
}

pub async fn users_put(ctx: &Ctx, record: DirectoryRecord) -> anyhow::Result<()> {
  let uid = record.uid;
  ctx.directory().upsert_identity(record).await.with_context(|| format!("writing user {uid}"))?;
  println!("user {uid} written");
  Ok(())
}

pub async fn users_delete(ctx: &Ctx, uid: Uid) -> anyhow::Result<()> {
  ctx.directory().remove_identity(uid).await.with_context(|| format!("deleting user {uid}"))?;
  println!("user {uid} deleted");
  Ok(())
}

pub async fn device(ctx: &Ctx) -> anyhow::Result<()> {
  let info = ctx.directory().device_info().await.context("reading device info")?;
  ctx.emit(&info, |i| {
    println!("name:      {}", i.name);
    println!("serial:    {}", i.serial_number);
    println!("firmware:  {}", i.firmware);
    println!("platform:  {}", i.platform);
    println!("mac:       {}", i.mac);
  })
}

// ─── Manual lifecycle ─────────────────────────────────────────────────────────

pub async fn disable(ctx: &Ctx, uid: Uid) -> anyhow::Result<()> {
  let snapshot = lifecycle::disable(ctx.store(), ctx.directory(), uid).await?;
  ctx.emit(&snapshot, |s| println!("{} ({}) disabled", s.uid(), s.record.name))
}

pub async fn enable(ctx: &Ctx, uid: Uid, clear_rules: bool) -> anyhow::Result<()> {
  let enabled =
    lifecycle::enable(ctx.store(), ctx.directory(), uid, clear_rules, EvaluationContext::now())
      .await?;
  ctx.emit(&enabled, |e| {
    println!("{} ({}) enabled", e.snapshot.uid(), e.snapshot.record.name);
    for rule in &e.cleared_rules {
      println!("  cleared {rule}");
    }
    if !e.still_blocked.is_empty() {
      let axes: Vec<String> = e.still_blocked.iter().map(Axis::to_string).collect();
      println!("  note: the next pass will disable it again ({})", axes.join(", "));
    }
  })
}

// ─── Rules ────────────────────────────────────────────────────────────────────

pub async fn rules_list(ctx: &Ctx) -> anyhow::Result<()> {
  let image = ctx.store().load().await?;
  ctx.emit(&image.rules, |rules| {
    for (uid, set) in rules {
      print_rule_set(*uid, set);
    }
  })
}

pub async fn rules_show(ctx: &Ctx, uid: Uid) -> anyhow::Result<()> {
  let rules = ctx.store().rule_set(uid).await?;
  ctx.emit(&rules, |r| print_rule_set(uid, r))
}

pub async fn rules_set(
  ctx: &Ctx,
  uid: Uid,
  axis: Axis,
  mode: RuleMode,
  values: &[String],
  extend: bool,
) -> anyhow::Result<()> {
  let rule = ScheduleRule::parse(axis, mode, values)?;
  let stored = if extend {
    lifecycle::extend_rule(ctx.store(), uid, rule).await?
  } else {
    if let Some(old) = lifecycle::set_rule(ctx.store(), uid, rule.clone()).await? {
      tracing::info!(uid = %uid, replaced = %old, "rule replaced");
    }
    rule
  };
  ctx.emit(&stored, |r| println!("{uid}: {r}"))
}

pub async fn rules_clear(ctx: &Ctx, uid: Uid, axis: Option<Axis>) -> anyhow::Result<()> {
  let cleared = lifecycle::clear_rule(ctx.store(), ctx.directory(), uid, axis).await?;
  ctx.emit(&cleared, |c| {
    if c.removed.is_empty() {
      println!("{uid}: nothing to clear");
    }
    for rule in &c.removed {
      println!("{uid}: cleared {rule}");
    }
    if c.restored {
      println!("{uid}: restored to the terminal");
    }
  })
}

// ─── Passes ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct StatusLine {
  uid:        Uid,
  presence:   Presence,
  blocked_by: Vec<Axis>,
  snapshot:   Option<String>,
}

pub async fn status(ctx: &Ctx, at: Option<&str>) -> anyhow::Result<()> {
  let context = context_at(at)?;
  let image = ctx.store().load().await?;

  let mut uids: Vec<Uid> = image.rules.keys().chain(image.snapshots.keys()).copied().collect();
  uids.sort();
  uids.dedup();

  let lines: Vec<StatusLine> = uids
    .into_iter()
    .map(|uid| {
      let evaluation = explain(&image.rule_set(uid), &context);
      StatusLine {
        uid,
        presence: evaluation.presence,
        blocked_by: evaluation.blocked_by,
        snapshot: image.snapshots.get(&uid).map(|s| s.tag.to_string()),
      }
    })
    .collect();

  ctx.emit(&lines, |lines| {
    println!("at {} {} ({})", context.date, context.time.format("%H:%M"), context.weekday);
    for l in lines {
      let axes: Vec<String> = l.blocked_by.iter().map(Axis::to_string).collect();
      let snapshot = l.snapshot.as_deref().unwrap_or("-");
      println!("{:>5}  {:<8} snapshot {:<12} {}", l.uid, l.presence, snapshot, axes.join(", "));
    }
  })?;
  for v in &image.violations {
    tracing::warn!(violation = %v, "store invariant violated");
  }
  Ok(())
}

pub async fn apply(ctx: &Ctx, at: Option<&str>) -> anyhow::Result<()> {
  let context = context_at(at)?;
  let report = reconcile(ctx.store(), ctx.directory(), context).await?;
  ctx.emit(&report, |r| {
    for e in &r.entries {
      println!("{:>5}  {:<24} {:<8} {}", e.uid, e.name, e.desired, e.outcome);
    }
    let c = r.counts();
    println!(
      "{} disabled, {} restored, {} failed",
      c.disabled,
      c.restored,
      c.failed_disable + c.failed_restore
    );
    for v in &r.violations {
      println!("skipped: {v}");
    }
  })
}

// ─── Attendance ───────────────────────────────────────────────────────────────

pub async fn attendance_sync(ctx: &Ctx) -> anyhow::Result<()> {
  let summary = attendance::sync_attendance(ctx.store(), ctx.directory()).await?;
  ctx.emit(&summary, |s| println!("{} punches pulled, {} new", s.pulled, s.added))
}

pub async fn attendance_show(
  ctx: &Ctx,
  uid: Option<Uid>,
  from: Option<NaiveDate>,
  to: Option<NaiveDate>,
) -> anyhow::Result<()> {
  let punches = ctx.store().punches(uid, from, to).await?;
  ctx.emit(&punches, |punches| {
    for p in punches {
      println!("{:>5}  {}  {}", p.uid, p.timestamp.format("%Y-%m-%d %H:%M:%S"), p.kind);
    }
  })
}

pub async fn attendance_summary(
  ctx: &Ctx,
  uid: Option<Uid>,
  from: Option<NaiveDate>,
  to: Option<NaiveDate>,
) -> anyhow::Result<()> {
  let punches = ctx.store().punches(uid, from, to).await?;
  let counts = tally(&punches);
  ctx.emit(&counts, |counts| {
    for (kind, n) in counts {
      println!("{kind:<14} {n}");
    }
    println!("{:<14} {}", "total", punches.len());
  })
}

// ─── Import / audit ───────────────────────────────────────────────────────────

pub async fn import(ctx: &Ctx, file: &Path, dry_run: bool) -> anyhow::Result<()> {
  let json = std::fs::read_to_string(file)
    .with_context(|| format!("failed to read {}", file.display()))?;
  let image = parse_legacy(&json)?;

  for v in &image.violations {
    eprintln!("violation: {v}");
  }
  println!("{} rule sets, {} snapshots", image.rules.len(), image.snapshots.len());
  if dry_run {
    return Ok(());
  }
  import_legacy(ctx.store(), image).await?;
  println!("imported");
  Ok(())
}

pub async fn audit(ctx: &Ctx) -> anyhow::Result<()> {
  let image = ctx.store().load().await?;
  ctx.emit(&image.violations, |violations| {
    if violations.is_empty() {
      println!("no violations");
    }
    for v in violations {
      println!("{v}");
    }
  })
}
