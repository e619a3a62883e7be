//! HTTP client for a Pterodactyl-style hosting panel.
//!
//! Live usage comes from the client API (keyed by the short server
//! identifier); build changes, power-state administration, creation and
//! listing go through the application API (keyed by the numeric id). A
//! server handle carries both as `{id}:{identifier}`; a handle without a
//! colon is used verbatim for both APIs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, header};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use fleet_core::config::HostingConfig;
use fleet_core::{RawUsage, ResourceLimits};

use crate::{HostingApi, HostingError, ServerSpec, ServerState, ServerSummary, ServerUtilization};

const PAGE_SIZE: u32 = 100;
const DEFAULT_IO_WEIGHT: u64 = 500;

pub struct PanelClient {
    http: Client,
    base_url: String,
    application_key: String,
    client_key: String,
}

impl PanelClient {
    pub fn new(config: &HostingConfig) -> Result<Self, HostingError> {
        Self::with_timeout(
            &config.base_url,
            &config.application_key,
            config.client_key(),
            config.request_timeout(),
        )
    }

    pub fn with_timeout(
        base_url: &str,
        application_key: &str,
        client_key: &str,
        timeout: Duration,
    ) -> Result<Self, HostingError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HostingError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            application_key: application_key.to_string(),
            client_key: client_key.to_string(),
        })
    }

    fn application(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/api/application{path}", self.base_url))
            .bearer_auth(&self.application_key)
            .header(header::ACCEPT, "application/json")
    }

    fn client(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/api/client{path}", self.base_url))
            .bearer_auth(&self.client_key)
            .header(header::ACCEPT, "application/json")
    }

    /// Send a request and turn non-2xx statuses into classified errors.
    async fn send(&self, request: RequestBuilder, server_id: &str) -> Result<Response, HostingError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(HostingError::from_status(status.as_u16(), server_id, body))
    }

    async fn server_attributes(&self, server_id: &str) -> Result<ServerAttributes, HostingError> {
        let (id, _) = split_handle(server_id);
        let response = self
            .send(self.application(Method::GET, &format!("/servers/{id}")), server_id)
            .await?;
        let envelope: Envelope<ServerAttributes> = response.json().await?;
        Ok(envelope.attributes)
    }
}

#[async_trait]
impl HostingApi for PanelClient {
    async fn get_utilization(&self, server_id: &str) -> Result<ServerUtilization, HostingError> {
        let (_, identifier) = split_handle(server_id);
        let response = self
            .send(
                self.client(Method::GET, &format!("/servers/{identifier}/resources")),
                server_id,
            )
            .await?;
        let stats: Envelope<StatsAttributes> = response.json().await?;
        let attrs = stats.attributes;
        Ok(ServerUtilization {
            usage: RawUsage {
                memory_bytes: attrs.resources.memory_bytes,
                cpu_absolute: attrs.resources.cpu_absolute,
                disk_bytes: attrs.resources.disk_bytes,
            },
            suspended: attrs.is_suspended,
            state: attrs.current_state,
        })
    }

    async fn resize(&self, server_id: &str, limits: &ResourceLimits) -> Result<(), HostingError> {
        // The build endpoint replaces the whole build; carry over what we don't own.
        let current = self.server_attributes(server_id).await?;
        let feature_limits = current
            .feature_limits
            .unwrap_or_else(|| json!({ "databases": 0, "allocations": 1, "backups": 0 }));
        let body = json!({
            "allocation": current.allocation,
            "memory": limits.memory_mb,
            "swap": 0,
            "disk": limits.disk_mb,
            "io": DEFAULT_IO_WEIGHT,
            "cpu": limits.cpu_percent,
            "threads": null,
            "feature_limits": feature_limits,
        });
        let (id, _) = split_handle(server_id);
        self.send(
            self.application(Method::PATCH, &format!("/servers/{id}/build"))
                .json(&body),
            server_id,
        )
        .await?;
        debug!(server = %server_id, memory_mb = limits.memory_mb, cpu = limits.cpu_percent, "build updated");
        Ok(())
    }

    async fn suspend(&self, server_id: &str) -> Result<(), HostingError> {
        let (id, _) = split_handle(server_id);
        self.send(
            self.application(Method::POST, &format!("/servers/{id}/suspend")),
            server_id,
        )
        .await?;
        Ok(())
    }

    async fn unsuspend(&self, server_id: &str) -> Result<(), HostingError> {
        let (id, _) = split_handle(server_id);
        self.send(
            self.application(Method::POST, &format!("/servers/{id}/unsuspend")),
            server_id,
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, server_id: &str) -> Result<(), HostingError> {
        let (id, _) = split_handle(server_id);
        self.send(self.application(Method::DELETE, &format!("/servers/{id}")), server_id)
            .await?;
        Ok(())
    }

    async fn create_server(&self, spec: &ServerSpec) -> Result<String, HostingError> {
        let t = &spec.template;
        let body = json!({
            "name": spec.name,
            "external_id": spec.external_id,
            "user": t.owner,
            "egg": t.egg,
            "docker_image": t.docker_image,
            "startup": t.startup,
            "environment": {},
            "limits": {
                "memory": spec.limits.memory_mb,
                "swap": 0,
                "disk": spec.limits.disk_mb,
                "io": DEFAULT_IO_WEIGHT,
                "cpu": spec.limits.cpu_percent,
            },
            "feature_limits": { "databases": 0, "allocations": 1, "backups": 0 },
            "deploy": { "locations": [t.location], "dedicated_ip": false, "port_range": [] },
        });
        let response = self
            .send(self.application(Method::POST, "/servers").json(&body), &spec.name)
            .await?;
        let created: Envelope<ServerAttributes> = response.json().await?;
        let handle = created.attributes.handle();
        debug!(server = %handle, external_id = %spec.external_id, "server created");
        Ok(handle)
    }

    async fn list_servers(&self) -> Result<Vec<ServerSummary>, HostingError> {
        let mut servers = Vec::new();
        let mut page = 1;
        loop {
            let response = self
                .send(
                    self.application(
                        Method::GET,
                        &format!("/servers?page={page}&per_page={PAGE_SIZE}"),
                    ),
                    "",
                )
                .await?;
            let list: ServerList = response.json().await?;
            servers.extend(list.data.into_iter().map(|e| e.attributes.into_summary()));

            match list.meta {
                Some(meta) if meta.pagination.current_page < meta.pagination.total_pages => {
                    page = meta.pagination.current_page + 1;
                }
                _ => break,
            }
        }
        Ok(servers)
    }
}

fn split_handle(handle: &str) -> (&str, &str) {
    handle.split_once(':').unwrap_or((handle, handle))
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope<T> {
    attributes: T,
}

#[derive(Deserialize)]
struct StatsAttributes {
    current_state: ServerState,
    is_suspended: bool,
    resources: StatsResources,
}

#[derive(Deserialize)]
struct StatsResources {
    memory_bytes: u64,
    cpu_absolute: f64,
    disk_bytes: u64,
}

#[derive(Deserialize)]
struct ServerAttributes {
    id: u64,
    identifier: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    external_id: Option<String>,
    #[serde(default)]
    suspended: bool,
    #[serde(default)]
    allocation: Option<u64>,
    #[serde(default)]
    feature_limits: Option<Value>,
}

impl ServerAttributes {
    fn handle(&self) -> String {
        format!("{}:{}", self.id, self.identifier)
    }

    fn into_summary(self) -> ServerSummary {
        ServerSummary {
            server_id: self.handle(),
            name: self.name,
            external_id: self.external_id,
            suspended: self.suspended,
        }
    }
}

#[derive(Deserialize)]
struct ServerList {
    data: Vec<Envelope<ServerAttributes>>,
    #[serde(default)]
    meta: Option<ListMeta>,
}

#[derive(Deserialize)]
struct ListMeta {
    pagination: Pagination,
}

#[derive(Deserialize)]
struct Pagination {
    current_page: u32,
    total_pages: u32,
}
