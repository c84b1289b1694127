//! `POST /reconcile[?at=…]`: run a pass now and return its report.

use axum::{Json, extract::State};
use roster_core::{
  directory::Directory,
  reconcile::{ReconciliationReport, reconcile},
  store::RestrictionStore,
};

use crate::{AppState, error::ApiError, extract::Query, status::AtParams};

pub async fn run<S, D>(
  State(state): State<AppState<S, D>>,
  Query(params): Query<AtParams>,
) -> Result<Json<ReconciliationReport>, ApiError>
where
  S: RestrictionStore,
  D: Directory,
{
  let context = params.context()?;
  let _pass = state.pass_lock.lock().await;
  let report = reconcile(state.store.as_ref(), state.directory.as_ref(), context).await?;
  Ok(Json(report))
}
