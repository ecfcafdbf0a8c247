//! VxSDS gateway REST adapter

use super::{classify_http, transport_error, NodeStats, PoolSummary, StorageSummary, VolumeStats};
use crate::config::VxSdsConfig;
use base64::Engine;
use cee_common::{Error, Result};
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const KB_PER_GB: u64 = 1024 * 1024;

/// Name the Cinder VxSDS driver gives the backing volume of a Cinder
/// volume: its UUID bytes, base64 encoded. The gateway caps volume names at
/// 31 characters, so the Cinder name is never used there.
pub fn backend_volume_name(cinder_volume_id: &str) -> String {
    let engine = base64::engine::general_purpose::STANDARD;
    match uuid::Uuid::parse_str(cinder_volume_id) {
        Ok(id) => engine.encode(id.as_bytes()),
        Err(_) => engine.encode(cinder_volume_id.as_bytes()),
    }
}

fn kb_to_gb(value: &Value) -> u64 {
    value.as_u64().unwrap_or(0) / KB_PER_GB
}

pub struct VxSdsClient {
    http: reqwest::Client,
    config: VxSdsConfig,
    token: RwLock<Option<String>>,
}

impl VxSdsClient {
    pub fn new(config: VxSdsConfig, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config,
            token: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.config.gateway_url.trim_end_matches('/'), path)
    }

    /// The gateway answers /api/login with a quoted session token
    async fn login(&self) -> Result<String> {
        let response = self
            .http
            .get(self.url("/login"))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 => Error::AuthenticationFailure(format!("VxSDS login rejected ({})", status)),
                code => classify_http(code, &text),
            });
        }

        let token = text.trim().trim_matches('"').to_string();
        if token.is_empty() {
            return Err(Error::AuthenticationFailure("VxSDS returned an empty token".to_string()));
        }

        info!(gateway = %self.config.gateway_url, "Authenticated against VxSDS gateway");
        *self.token.write().await = Some(token.clone());
        Ok(token)
    }

    async fn token(&self) -> Result<String> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.login().await
    }

    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = self.url(path);
        let mut relogged = false;

        loop {
            let token = self.token().await?;
            let mut builder = self
                .http
                .request(method.clone(), &url)
                .basic_auth(&self.config.username, Some(token));
            if let Some(body) = body {
                builder = builder.json(body);
            }

            debug!(method = %method, path = %path, "VxSDS request");
            let response = builder.send().await.map_err(transport_error)?;
            let status = response.status();

            if status.as_u16() == 401 && !relogged {
                *self.token.write().await = None;
                relogged = true;
                continue;
            }

            let text = response.text().await.map_err(transport_error)?;
            if !status.is_success() {
                return Err(classify_http(status.as_u16(), &text));
            }

            // Actions answer with an empty body or a bare string
            return Ok(serde_json::from_str(&text).unwrap_or(Value::Null));
        }
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.request(Method::GET, path, None).await
    }

    async fn list(&self, kind: &str) -> Result<Vec<Value>> {
        let value = self.get(&format!("/types/{}/instances", kind)).await?;
        Ok(value.as_array().cloned().unwrap_or_default())
    }

    pub async fn volume_id_by_name(&self, name: &str) -> Result<String> {
        let response = self
            .request(
                Method::POST,
                "/types/Volume/instances/action/queryIdByKey",
                Some(&json!({ "name": name })),
            )
            .await?;
        response
            .as_str()
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::NotFound(format!("VxSDS volume '{}'", name)))
    }

    /// Map a volume to the SDC of a compute node
    pub async fn map_to_node(&self, volume_id: &str, node: &str) -> Result<()> {
        let sdc_id = self.resolve_sdc(node).await?;
        self.request(
            Method::POST,
            &format!("/instances/Volume::{}/action/addMappedSdc", volume_id),
            Some(&json!({"sdcId": sdc_id, "allowMultipleMappings": "FALSE"})),
        )
        .await?;
        info!(volume = %volume_id, sdc = %sdc_id, "Mapped VxSDS volume");
        Ok(())
    }

    /// Match an SDC by ID, IP or (partial) host name
    async fn resolve_sdc(&self, node: &str) -> Result<String> {
        let sdcs = self.list("Sdc").await?;
        let by = |key: &str| sdcs.iter().find(|s| s[key] == node);

        by("id")
            .or_else(|| by("sdcIp"))
            .or_else(|| {
                sdcs.iter()
                    .find(|s| s["name"].as_str().is_some_and(|name| name.contains(node)))
            })
            .and_then(|s| s["id"].as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::NotFound(format!("No SDC for compute node '{}'", node)))
    }

    pub async fn storage_summary(&self) -> Result<Value> {
        let mut summary = StorageSummary::default();

        for pool in self.list("StoragePool").await? {
            let Some(id) = pool["id"].as_str() else {
                continue;
            };
            let name = pool["name"].as_str().unwrap_or(id).to_string();

            let stats = match self
                .get(&format!("/instances/StoragePool::{}/relationships/Statistics", id))
                .await
            {
                Ok(stats) => stats,
                Err(e) => {
                    warn!(pool = %name, error = %e, "Skipping pool without statistics");
                    continue;
                }
            };

            let used_gb = kb_to_gb(&stats["capacityInUseInKb"]);
            let free_gb = kb_to_gb(&stats["capacityAvailableForVolumeAllocationInKb"]);

            summary.capacity.total_gb += used_gb + free_gb;
            summary.capacity.free_gb += free_gb;
            summary.storage_pools.insert(
                name,
                PoolSummary {
                    capacity_gb: used_gb + free_gb,
                    free_capacity_gb: free_gb,
                    num_volumes: stats["numOfVolumes"].as_u64().unwrap_or(0),
                    media_type: pool["mediaType"].as_str().unwrap_or("SSD").to_string(),
                },
            );
        }
        summary.capacity.used_gb = summary.capacity.total_gb - summary.capacity.free_gb;

        let volumes = self.list("Volume").await?;
        summary.volumes = VolumeStats {
            total_count: volumes.len() as u64,
            total_size_gb: volumes.iter().map(|v| kb_to_gb(&v["sizeInKb"])).sum(),
            mapped_count: volumes
                .iter()
                .filter(|v| v["mappedSdcInfo"].as_array().is_some_and(|m| !m.is_empty()))
                .count() as u64,
        };

        let sdcs = self.list("Sdc").await?;
        let sdss = self.list("Sds").await?;
        summary.nodes = NodeStats {
            sdc_count: sdcs.len() as u64,
            sds_count: sdss.len() as u64,
            sdc_online: sdcs
                .iter()
                .filter(|n| n["mdmConnectionState"] == "Connected")
                .count() as u64,
            sds_online: sdss.iter().filter(|n| n["sdsState"] == "Normal").count() as u64,
        };

        serde_json::to_value(summary).map_err(|e| Error::Backend(e.to_string()))
    }

    pub async fn system_info(&self) -> Result<Value> {
        let systems = self.list("System").await?;
        systems
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound("VxSDS reports no system".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kb_conversion() {
        assert_eq!(kb_to_gb(&json!(20 * KB_PER_GB)), 20);
        assert_eq!(kb_to_gb(&json!("not a number")), 0);
    }

    #[test]
    fn test_backend_volume_name() {
        let name = backend_volume_name("6f1c5b8e-2a4d-4e3f-9b1a-0c2d3e4f5a6b");
        assert_eq!(name, "bxxbjipNTj+bGgwtPk9aaw==");
        assert_eq!(name.len(), 24);
    }

    #[test]
    fn test_api_url() {
        let config = VxSdsConfig {
            gateway_url: "https://10.0.0.5:4443/".to_string(),
            ..VxSdsConfig::default()
        };
        let client = VxSdsClient::new(config, Duration::from_secs(5)).unwrap();
        assert_eq!(client.url("/login"), "https://10.0.0.5:4443/api/login");
    }
}
