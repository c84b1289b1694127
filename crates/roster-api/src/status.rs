//! Read-only diagnostics: snapshots, dry-run evaluation, invariant audit.

use axum::{Json, extract::State};
use roster_core::{
  directory::Directory,
  evaluate::{Evaluation, EvaluationContext, explain},
  schedule::Uid,
  snapshot::DisabledSnapshot,
  store::{InvariantViolation, RestrictionStore},
};
use serde::{Deserialize, Serialize};

use crate::{
  AppState,
  error::ApiError,
  extract::{Path, Query},
};

/// `?at=YYYY-MM-DDTHH:MM`; the current local time when absent.
#[derive(Debug, Default, Deserialize)]
pub struct AtParams {
  pub at: Option<String>,
}

impl AtParams {
  pub fn context(&self) -> Result<EvaluationContext, ApiError> {
    EvaluationContext::at_or_now(self.at.as_deref())
      .map_err(|e| ApiError::BadRequest(e.to_string()))
  }
}

/// `GET /snapshots`
pub async fn snapshots<S, D>(
  State(state): State<AppState<S, D>>,
) -> Result<Json<Vec<DisabledSnapshot>>, ApiError>
where
  S: RestrictionStore,
  D: Directory,
{
  let snapshots = state
    .store
    .snapshots()
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(snapshots))
}

#[derive(Debug, Serialize)]
pub struct DryRun {
  pub uid:        Uid,
  pub context:    EvaluationContext,
  #[serde(flatten)]
  pub evaluation: Evaluation,
}

/// `GET /evaluate/{uid}[?at=…]`: what a pass would decide, without acting.
pub async fn evaluate<S, D>(
  State(state): State<AppState<S, D>>,
  Path(uid): Path<Uid>,
  Query(params): Query<AtParams>,
) -> Result<Json<DryRun>, ApiError>
where
  S: RestrictionStore,
  D: Directory,
{
  let context = params.context()?;
  let rules = state
    .store
    .rule_set(uid)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(DryRun { uid, context, evaluation: explain(&rules, &context) }))
}

/// `GET /audit`
pub async fn audit<S, D>(
  State(state): State<AppState<S, D>>,
) -> Result<Json<Vec<InvariantViolation>>, ApiError>
where
  S: RestrictionStore,
  D: Directory,
{
  let image = state
    .store
    .load()
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(image.violations))
}
