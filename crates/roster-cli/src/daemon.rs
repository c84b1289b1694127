//! Long-running modes: the periodic pass loop and the API server.

use std::{sync::Arc, time::Duration};

use anyhow::Context as _;
use axum::Router;
use roster_api::AppState;
use roster_core::{
  directory::Directory,
  evaluate::EvaluationContext,
  reconcile::reconcile,
  store::RestrictionStore,
};
use tokio::{net::TcpListener, sync::Mutex, time::MissedTickBehavior};
use tower_http::trace::TraceLayer;

use crate::config::Config;

/// Run a pass every `every` until `shutdown` resolves.
///
/// A pass that cannot start (store or terminal unavailable) is logged and
/// retried on the next tick.
pub async fn pass_loop<S, D>(
  store: Arc<S>,
  directory: Arc<D>,
  pass_lock: Arc<Mutex<()>>,
  every: Duration,
  shutdown: impl Future<Output = ()>,
) where
  S: RestrictionStore,
  D: Directory,
{
  let mut ticker = tokio::time::interval(every);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
  tokio::pin!(shutdown);

  loop {
    tokio::select! {
      _ = &mut shutdown => break,
      _ = ticker.tick() => {}
    }

    let _pass = pass_lock.lock().await;
    match reconcile(store.as_ref(), directory.as_ref(), EvaluationContext::now()).await {
      Ok(report) => {
        let counts = report.counts();
        if report.is_quiescent() {
          tracing::debug!("pass complete, nothing to do");
        } else {
          tracing::info!(
            disabled = counts.disabled,
            restored = counts.restored,
            failed_disable = counts.failed_disable,
            failed_restore = counts.failed_restore,
            "pass complete"
          );
        }
        for violation in &report.violations {
          tracing::warn!(%violation, "store invariant violated");
        }
      }
      Err(e) => tracing::warn!(error = %e, "pass skipped"),
    }
  }
  tracing::info!("pass loop stopped");
}

/// Serve the JSON API under `/api` while the pass loop runs alongside.
pub async fn serve<S, D>(config: &Config, store: Arc<S>, directory: Arc<D>) -> anyhow::Result<()>
where
  S: RestrictionStore + 'static,
  D: Directory + 'static,
{
  let pass_lock = Arc::new(Mutex::new(()));
  let state = AppState::new(Arc::clone(&store), Arc::clone(&directory), Arc::clone(&pass_lock));
  let app = Router::new()
    .nest("/api", roster_api::api_router(state))
    .layer(TraceLayer::new_for_http());

  let address = format!("{}:{}", config.server.host, config.server.port);
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;
  tracing::info!("Listening on http://{address}");

  let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
  let mut loop_stop = stop_rx.clone();
  let every = Duration::from_secs(config.reconcile_interval_secs);
  let passes = tokio::spawn(pass_loop(store, directory, pass_lock, every, async move {
    let _ = loop_stop.wait_for(|stop| *stop).await;
  }));

  let served = axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error");

  let _ = stop_tx.send(true);
  passes.await.context("pass loop panicked")?;
  served
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
  let ctrl_c = async {
    let _ = tokio::signal::ctrl_c().await;
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut sigterm) => {
        sigterm.recv().await;
      }
      Err(_) => std::future::pending::<()>().await,
    }
  };
  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {}
    _ = terminate => {}
  }
  tracing::info!("shutdown requested");
}
