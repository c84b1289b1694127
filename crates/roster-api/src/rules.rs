//! Handlers for `/rules` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/rules` | Every identity's rule set, keyed by uid |
//! | `GET`    | `/rules/{uid}` | Empty object if the identity holds none |
//! | `DELETE` | `/rules/{uid}` | Clear every rule |
//! | `PUT`    | `/rules/{uid}/{axis}` | Body: `{"mode":"deny","values":["6,7"]}`; `?extend=true` merges |
//! | `DELETE` | `/rules/{uid}/{axis}` | Clear one axis |
//!
//! Clearing the last rule of an identity that the schedule removed puts the
//! identity back on the terminal first.

use std::collections::BTreeMap;

use axum::{Json, extract::State};
use roster_core::{
  directory::Directory,
  lifecycle::{self, Cleared},
  schedule::{Axis, RuleMode, RuleSet, ScheduleRule, Uid},
  store::RestrictionStore,
};
use serde::Deserialize;

use crate::{
  AppState,
  error::ApiError,
  extract::{JsonBody, Path, Query},
};

// ─── Reads ────────────────────────────────────────────────────────────────────

/// `GET /rules`
pub async fn list<S, D>(
  State(state): State<AppState<S, D>>,
) -> Result<Json<BTreeMap<Uid, RuleSet>>, ApiError>
where
  S: RestrictionStore,
  D: Directory,
{
  let image = state
    .store
    .load()
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(image.rules))
}

/// `GET /rules/{uid}`
pub async fn get_one<S, D>(
  State(state): State<AppState<S, D>>,
  Path(uid): Path<Uid>,
) -> Result<Json<RuleSet>, ApiError>
where
  S: RestrictionStore,
  D: Directory,
{
  let rules = state
    .store
    .rule_set(uid)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(rules))
}

// ─── Writes ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RuleBody {
  pub mode:   RuleMode,
  /// Raw operator values; each may itself be a comma-separated list.
  pub values: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PutParams {
  #[serde(default)]
  pub extend: bool,
}

/// `PUT /rules/{uid}/{axis}`: returns the rule now stored on that axis.
pub async fn put_axis<S, D>(
  State(state): State<AppState<S, D>>,
  Path((uid, axis)): Path<(Uid, Axis)>,
  Query(params): Query<PutParams>,
  JsonBody(body): JsonBody<RuleBody>,
) -> Result<Json<ScheduleRule>, ApiError>
where
  S: RestrictionStore,
  D: Directory,
{
  let rule = ScheduleRule::parse(axis, body.mode, &body.values)
    .map_err(|e| ApiError::BadRequest(e.to_string()))?;

  let stored = if params.extend {
    lifecycle::extend_rule(state.store.as_ref(), uid, rule).await?
  } else {
    lifecycle::set_rule(state.store.as_ref(), uid, rule.clone()).await?;
    rule
  };
  tracing::info!(uid = %uid, rule = %stored, "rule stored via api");
  Ok(Json(stored))
}

/// `DELETE /rules/{uid}/{axis}`
pub async fn clear_axis<S, D>(
  State(state): State<AppState<S, D>>,
  Path((uid, axis)): Path<(Uid, Axis)>,
) -> Result<Json<Cleared>, ApiError>
where
  S: RestrictionStore,
  D: Directory,
{
  clear(state, uid, Some(axis)).await
}

/// `DELETE /rules/{uid}`
pub async fn clear_all<S, D>(
  State(state): State<AppState<S, D>>,
  Path(uid): Path<Uid>,
) -> Result<Json<Cleared>, ApiError>
where
  S: RestrictionStore,
  D: Directory,
{
  clear(state, uid, None).await
}

async fn clear<S, D>(
  state: AppState<S, D>,
  uid: Uid,
  axis: Option<Axis>,
) -> Result<Json<Cleared>, ApiError>
where
  S: RestrictionStore,
  D: Directory,
{
  // Clearing may restore the identity, which must not interleave with a pass.
  let _pass = state.pass_lock.lock().await;
  let cleared =
    lifecycle::clear_rule(state.store.as_ref(), state.directory.as_ref(), uid, axis).await?;
  Ok(Json(cleared))
}
