//! HTTP client for the terminal bridge.
//!
//! The bridge is a small service next to the terminal that speaks the
//! vendor protocol and exposes the directory as JSON:
//!
//! | Method   | Path | |
//! |----------|------|-|
//! | `GET`    | `/users` | every enrolled identity |
//! | `PUT`    | `/users/{uid}` | add or overwrite one record |
//! | `DELETE` | `/users/{uid}` | `404` if absent |
//! | `GET`    | `/device` | device metadata |
//! | `GET`    | `/attendance` | the whole punch log |

use std::time::Duration;

use anyhow::Context as _;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use roster_core::{
  attendance::Punch,
  directory::{DeviceInfo, Directory, DirectoryRecord},
  error::PortError,
  schedule::Uid,
};
use serde::de::DeserializeOwned;

use crate::config::DeviceConfig;

/// [`Directory`] backed by the terminal bridge.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct HttpDirectory {
  client:   Client,
  base_url: String,
}

impl HttpDirectory {
  pub fn new(config: &DeviceConfig) -> anyhow::Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client, base_url: config.url.trim_end_matches('/').to_owned() })
  }

  fn url(&self, path: &str) -> String { format!("{}{}", self.base_url, path) }

  /// Send `req`; non-2xx answers become port errors. `uid` names the
  /// identity a `404` refers to.
  async fn send(&self, req: RequestBuilder, uid: Option<Uid>) -> Result<Response, PortError> {
    let resp = req.send().await.map_err(transport_error)?;
    let status = resp.status();
    if status.is_success() {
      return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    Err(match (status, uid) {
      (StatusCode::NOT_FOUND, Some(uid)) => PortError::NotFound(uid),
      (s, _) if s.is_server_error() => PortError::Unavailable(format!("bridge answered {s}: {body}")),
      (s, _) => PortError::Rejected(format!("bridge answered {s}: {body}")),
    })
  }

  async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, PortError> {
    let resp = self.send(self.client.get(self.url(path)), None).await?;
    resp
      .json()
      .await
      .map_err(|e| PortError::Rejected(format!("GET {path}: undecodable answer: {e}")))
  }
}

fn transport_error(err: reqwest::Error) -> PortError {
  PortError::Unavailable(err.to_string())
}

impl Directory for HttpDirectory {
  async fn list_identities(&self) -> Result<Vec<DirectoryRecord>, PortError> {
    self.get_json("/users").await
  }

  async fn upsert_identity(&self, record: DirectoryRecord) -> Result<(), PortError> {
    let uid = record.uid;
    let req = self.client.put(self.url(&format!("/users/{uid}"))).json(&record);
    self.send(req, None).await?;
    tracing::debug!(uid = %uid, "record written to terminal");
    Ok(())
  }

  async fn remove_identity(&self, uid: Uid) -> Result<(), PortError> {
    let req = self.client.delete(self.url(&format!("/users/{uid}")));
    self.send(req, Some(uid)).await?;
    tracing::debug!(uid = %uid, "record removed from terminal");
    Ok(())
  }

  async fn device_info(&self) -> Result<DeviceInfo, PortError> { self.get_json("/device").await }

  async fn attendance(&self) -> Result<Vec<Punch>, PortError> {
    self.get_json("/attendance").await
  }
}

#[cfg(test)]
mod tests {
  use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
  };

  use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
  };
  use tokio::net::TcpListener;

  use super::*;

  type Users = Arc<Mutex<BTreeMap<u32, DirectoryRecord>>>;

  /// Serve a fake bridge on an ephemeral port and return its base URL.
  async fn spawn_bridge(users: Users) -> String {
    async fn list(State(users): State<Users>) -> Json<Vec<DirectoryRecord>> {
      Json(users.lock().unwrap().values().cloned().collect())
    }
    async fn upsert(
      State(users): State<Users>,
      Path(uid): Path<u32>,
      Json(record): Json<DirectoryRecord>,
    ) -> StatusCode {
      if record.name.is_empty() {
        return StatusCode::UNPROCESSABLE_ENTITY;
      }
      users.lock().unwrap().insert(uid, record);
      StatusCode::NO_CONTENT
    }
    async fn remove(State(users): State<Users>, Path(uid): Path<u32>) -> StatusCode {
      match users.lock().unwrap().remove(&uid) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
      }
    }
    async fn device() -> Json<DeviceInfo> {
      Json(DeviceInfo { name: "front door".into(), serial_number: "X1".into(), ..Default::default() })
    }
    async fn broken() -> StatusCode { StatusCode::INTERNAL_SERVER_ERROR }

    let app = Router::new()
      .route("/users", get(list))
      .route("/users/{uid}", put(upsert).delete(remove))
      .route("/device", get(device))
      .route("/attendance", get(broken))
      .with_state(users);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
  }

  fn directory(url: String) -> HttpDirectory {
    HttpDirectory::new(&DeviceConfig { url, timeout_secs: 5 }).unwrap()
  }

  #[tokio::test]
  async fn upsert_list_remove() {
    let users = Users::default();
    let dir = directory(spawn_bridge(users.clone()).await);

    let mut record = DirectoryRecord::new(Uid(7), "Alice");
    record.group_id = Some(0);
    record.card = 4242;
    dir.upsert_identity(record.clone()).await.unwrap();

    assert_eq!(dir.list_identities().await.unwrap(), vec![record]);
    dir.remove_identity(Uid(7)).await.unwrap();
    assert!(users.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn status_codes_map_to_port_errors() {
    let dir = directory(spawn_bridge(Users::default()).await);

    assert_eq!(dir.remove_identity(Uid(9)).await, Err(PortError::NotFound(Uid(9))));
    assert!(matches!(
      dir.upsert_identity(DirectoryRecord::new(Uid(1), "")).await,
      Err(PortError::Rejected(_))
    ));
    assert!(matches!(dir.attendance().await, Err(PortError::Unavailable(_))));
    assert_eq!(dir.device_info().await.unwrap().serial_number, "X1");
  }

  #[tokio::test]
  async fn unreachable_bridge_is_unavailable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dir = directory(format!("http://{addr}"));
    assert!(matches!(dir.list_identities().await, Err(PortError::Unavailable(_))));
  }
}
