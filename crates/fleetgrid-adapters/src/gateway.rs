//! JSON-over-HTTP plane clients.
//!
//! Each external plane is reached through a small gateway that speaks JSON
//! over HTTP/1.1. Identifiers travel in request bodies rather than paths, so
//! task ARNs and `ip:port` addresses need no escaping.
//!
//! | Plane | Method | Path |
//! |---|---|---|
//! | Orchestrator | GET | `/v1/units` |
//! | Orchestrator | POST | `/v1/units/protection` |
//! | Orchestrator | POST | `/v1/units/protection/update` |
//! | Session directory | POST | `/v1/sessions/search` |
//! | Fleet registry | POST | `/v1/computes/describe` |
//! | Fleet registry | POST | `/v1/computes/deregister` |
//! | Address translator | GET | `/v1/mappings` |
//!
//! Status mapping: 404 → [`PlaneError::NotFound`], 429/5xx →
//! [`PlaneError::Transient`], any other non-2xx → [`PlaneError::Rejected`].
//! Timeouts are applied by callers through [`fleetgrid_core::bounded`].

use std::collections::HashMap;

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use fleetgrid_core::*;

/// Shared HTTP client bound to one gateway base address.
#[derive(Clone)]
pub struct HttpPlaneClient {
    base: String,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpPlaneClient {
    /// `base` is `host:port` or a full `http://host:port` URL.
    pub fn new(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        let base = if base.starts_with("http://") {
            base.to_string()
        } else {
            format!("http://{base}")
        };
        Self {
            base,
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> PlaneResult<(StatusCode, Bytes)> {
        let uri = format!("{}{path}", self.base);
        let req = http::Request::builder()
            .method(method.clone())
            .uri(&uri)
            .header(http::header::CONTENT_TYPE, "application/json")
            .header(http::header::USER_AGENT, "fleetgrid/0.1")
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| PlaneError::Rejected {
                status: 0,
                message: format!("invalid request: {e}"),
            })?;

        let resp = self
            .client
            .request(req)
            .await
            .map_err(|e| PlaneError::Transient(format!("{method} {uri}: {e}")))?;
        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| PlaneError::Transient(format!("{method} {uri}: {e}")))?
            .to_bytes();

        debug!(%method, %uri, %status, "plane call");
        Ok((status, bytes))
    }

    /// GET a JSON document. 404 yields `None`.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> PlaneResult<Option<T>> {
        let (status, body) = self.send(Method::GET, path, None).await?;
        decode_optional(status, &body)
    }

    /// POST a JSON body and decode the JSON answer. 404 yields `None`.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> PlaneResult<Option<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body).map_err(|e| PlaneError::Decode(e.to_string()))?;
        let (status, answer) = self.send(Method::POST, path, Some(payload)).await?;
        decode_optional(status, &answer)
    }

    /// POST a JSON body, ignoring any answer body. 404 is an error.
    pub async fn post_unit<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        resource: &str,
    ) -> PlaneResult<()> {
        let payload = serde_json::to_vec(body).map_err(|e| PlaneError::Decode(e.to_string()))?;
        let (status, answer) = self.send(Method::POST, path, Some(payload)).await?;
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::NOT_FOUND {
            Err(PlaneError::NotFound(resource.to_string()))
        } else {
            Err(status_error(status, &answer))
        }
    }
}

fn decode_optional<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> PlaneResult<Option<T>> {
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !status.is_success() {
        return Err(status_error(status, body));
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| PlaneError::Decode(e.to_string()))
}

fn status_error(status: StatusCode, body: &[u8]) -> PlaneError {
    let message = String::from_utf8_lossy(body).into_owned();
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        PlaneError::Transient(format!("{status}: {message}"))
    } else {
        PlaneError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

fn require<T>(value: Option<T>, what: &str) -> PlaneResult<T> {
    value.ok_or_else(|| PlaneError::NotFound(what.to_string()))
}

// ── Orchestrator ──────────────────────────────────────────────────

#[derive(Serialize)]
struct ProtectionQuery<'a> {
    task_ids: &'a [String],
}

#[derive(Serialize)]
struct ProtectionUpdate<'a> {
    task_id: &'a str,
    protected: bool,
}

pub struct HttpOrchestrator {
    client: HttpPlaneClient,
}

impl HttpOrchestrator {
    pub fn new(client: HttpPlaneClient) -> Self {
        Self { client }
    }
}

impl Orchestrator for HttpOrchestrator {
    fn list_running_units(&self) -> PlaneFuture<'_, Vec<ComputeUnit>> {
        Box::pin(async move {
            let units: Option<Vec<ComputeUnit>> = self.client.get_json("/v1/units").await?;
            require(units, "/v1/units")
        })
    }

    fn protection_flags<'a>(
        &'a self,
        task_ids: &'a [String],
    ) -> PlaneFuture<'a, HashMap<String, bool>> {
        Box::pin(async move {
            let flags: Option<HashMap<String, bool>> = self
                .client
                .post_json("/v1/units/protection", &ProtectionQuery { task_ids })
                .await?;
            Ok(flags.unwrap_or_default())
        })
    }

    fn set_protection<'a>(&'a self, task_id: &'a str, protected: bool) -> PlaneFuture<'a, ()> {
        Box::pin(async move {
            self.client
                .post_unit(
                    "/v1/units/protection/update",
                    &ProtectionUpdate { task_id, protected },
                    task_id,
                )
                .await
        })
    }
}

// ── Session directory ─────────────────────────────────────────────

#[derive(Serialize)]
struct SessionSearch<'a> {
    unit_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    host_address: Option<&'a str>,
    status: SessionStatus,
}

pub struct HttpSessionDirectory {
    client: HttpPlaneClient,
}

impl HttpSessionDirectory {
    pub fn new(client: HttpPlaneClient) -> Self {
        Self { client }
    }
}

impl SessionDirectory for HttpSessionDirectory {
    fn active_sessions<'a>(
        &'a self,
        unit_id: &'a str,
        host_address: Option<&'a str>,
    ) -> PlaneFuture<'a, Vec<SessionInfo>> {
        Box::pin(async move {
            let search = SessionSearch {
                unit_id,
                host_address,
                status: SessionStatus::Active,
            };
            // A missing search endpoint must not read as "no sessions".
            let sessions: Option<Vec<SessionInfo>> =
                self.client.post_json("/v1/sessions/search", &search).await?;
            let sessions = require(sessions, "/v1/sessions/search")?;
            // The gateway filters by status; re-check hosting locally since
            // it may only filter by one of the two keys.
            let live: Vec<SessionInfo> = sessions
                .into_iter()
                .filter(|s| s.status.is_live() && s.hosted_on(unit_id, host_address))
                .collect();
            Ok(live)
        })
    }
}

// ── Fleet registry ────────────────────────────────────────────────

#[derive(Serialize)]
struct ComputeRef<'a> {
    unit_id: &'a str,
}

pub struct HttpFleetRegistry {
    client: HttpPlaneClient,
}

impl HttpFleetRegistry {
    pub fn new(client: HttpPlaneClient) -> Self {
        Self { client }
    }
}

impl FleetRegistry for HttpFleetRegistry {
    fn registration<'a>(&'a self, unit_id: &'a str) -> PlaneFuture<'a, Option<FleetRegistration>> {
        Box::pin(async move {
            self.client
                .post_json("/v1/computes/describe", &ComputeRef { unit_id })
                .await
        })
    }

    fn deregister<'a>(&'a self, unit_id: &'a str) -> PlaneFuture<'a, ()> {
        Box::pin(async move {
            self.client
                .post_unit("/v1/computes/deregister", &ComputeRef { unit_id }, unit_id)
                .await
        })
    }
}

// ── Address translator ────────────────────────────────────────────

pub struct HttpAddressTranslator {
    client: HttpPlaneClient,
}

impl HttpAddressTranslator {
    pub fn new(client: HttpPlaneClient) -> Self {
        Self { client }
    }
}

impl AddressTranslator for HttpAddressTranslator {
    fn list_mappings(&self) -> PlaneFuture<'_, Vec<AddressMapping>> {
        Box::pin(async move {
            let mappings: Option<Vec<AddressMapping>> = self.client.get_json("/v1/mappings").await?;
            require(mappings, "/v1/mappings")
        })
    }
}
