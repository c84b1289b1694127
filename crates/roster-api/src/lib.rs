//! JSON REST API for roster.
//!
//! Exposes an axum [`Router`] backed by any
//! [`RestrictionStore`](roster_core::store::RestrictionStore) and
//! [`Directory`](roster_core::directory::Directory). Auth, TLS, and transport
//! concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", roster_api::api_router(state))
//! ```

pub mod error;
pub mod extract;
pub mod reconcile;
pub mod rules;
pub mod status;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post, put},
};
use roster_core::{directory::Directory, store::RestrictionStore};
use tokio::sync::Mutex;

pub use error::ApiError;

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all handlers.
pub struct AppState<S, D> {
  pub store:     Arc<S>,
  pub directory: Arc<D>,
  /// Held for the whole of a reconciliation pass. Anything else that runs
  /// passes against the same store and terminal must share it.
  pub pass_lock: Arc<Mutex<()>>,
}

impl<S, D> AppState<S, D> {
  pub fn new(store: Arc<S>, directory: Arc<D>, pass_lock: Arc<Mutex<()>>) -> Self {
    Self { store, directory, pass_lock }
  }
}

impl<S, D> Clone for AppState<S, D> {
  fn clone(&self) -> Self {
    Self {
      store:     Arc::clone(&self.store),
      directory: Arc::clone(&self.directory),
      pass_lock: Arc::clone(&self.pass_lock),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build a fully-materialised API router for `state`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S, D>(state: AppState<S, D>) -> Router<()>
where
  S: RestrictionStore + 'static,
  D: Directory + 'static,
{
  Router::new()
    // Rules
    .route("/rules", get(rules::list::<S, D>))
    .route("/rules/{uid}", get(rules::get_one::<S, D>).delete(rules::clear_all::<S, D>))
    .route(
      "/rules/{uid}/{axis}",
      put(rules::put_axis::<S, D>).delete(rules::clear_axis::<S, D>),
    )
    // Snapshots and diagnostics
    .route("/snapshots", get(status::snapshots::<S, D>))
    .route("/evaluate/{uid}", get(status::evaluate::<S, D>))
    .route("/audit", get(status::audit::<S, D>))
    // Passes
    .route("/reconcile", post(reconcile::run::<S, D>))
    .with_state(state)
}
