//! OpenStack REST adapter (Keystone v3, Nova, Neutron, Cinder)

use super::{classify_http, transport_error, ComputeClient, ResourceType, SecurityGroupSpec};
use crate::config::OpenStackConfig;
use async_trait::async_trait;
use cee_common::{Error, Result};
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Nova microversion that accepts `"networks": "auto"`
const NOVA_MICROVERSION: &str = "2.37";

pub struct OpenStackClient {
    http: reqwest::Client,
    config: OpenStackConfig,
    token: RwLock<Option<String>>,
}

impl OpenStackClient {
    pub fn new(config: OpenStackConfig, timeout: Duration) -> Result<Self> {
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

    fn identity(&self, path: &str) -> String {
        format!("{}{}", self.config.auth_url.trim_end_matches('/'), path)
    }

    fn compute(&self, path: &str) -> String {
        format!("{}{}", self.config.compute_url.trim_end_matches('/'), path)
    }

    fn network(&self, path: &str) -> String {
        format!("{}/v2.0{}", self.config.network_url.trim_end_matches('/'), path)
    }

    fn volume(&self, path: &str) -> String {
        format!("{}{}", self.config.volume_url.trim_end_matches('/'), path)
    }

    /// Password authentication scoped to the configured project
    async fn authenticate(&self) -> Result<String> {
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": self.config.username,
                            "domain": {"id": self.config.user_domain_id},
                            "password": self.config.password,
                        }
                    }
                },
                "scope": {
                    "project": {
                        "name": self.config.project_name,
                        "domain": {"id": self.config.project_domain_id},
                    }
                }
            }
        });

        let response = self
            .http
            .post(self.identity("/auth/tokens"))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match classify_http(status.as_u16(), &text) {
                Error::NotFound(detail) => Error::AuthenticationFailure(detail),
                other => other,
            });
        }

        let token = response
            .headers()
            .get("X-Subject-Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::AuthenticationFailure("Keystone response has no X-Subject-Token".to_string())
            })?;

        info!(user = %self.config.username, "Authenticated against Keystone");
        *self.token.write().await = Some(token.clone());
        Ok(token)
    }

    async fn token(&self) -> Result<String> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.authenticate().await
    }

    /// Send a request, re-authenticating once on 401
    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        microversion: Option<&str>,
    ) -> Result<Value> {
        let mut reauthenticated = false;

        loop {
            let token = self.token().await?;
            let mut builder = self
                .http
                .request(method.clone(), url)
                .header("X-Auth-Token", token);

            if let Some(version) = microversion {
                builder = builder.header("OpenStack-API-Version", format!("compute {}", version));
            }
            if let Some(body) = body {
                builder = builder.json(body);
            }

            debug!(method = %method, url = %url, "OpenStack request");
            let response = builder.send().await.map_err(transport_error)?;
            let status = response.status();

            if status.as_u16() == 401 && !reauthenticated {
                *self.token.write().await = None;
                reauthenticated = true;
                continue;
            }

            let text = response.text().await.map_err(transport_error)?;

            if !status.is_success() {
                return Err(classify_http(status.as_u16(), &text));
            }
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text)
                .map_err(|e| Error::Backend(format!("Invalid JSON from {}: {}", url, e)));
        }
    }

    async fn get(&self, url: &str) -> Result<Value> {
        self.request(Method::GET, url, None, None).await
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value> {
        self.request(Method::POST, url, Some(body), None).await
    }

    /// Accepts a flavor name or ID
    async fn resolve_flavor(&self, flavor: &str) -> Result<String> {
        let flavors = self.get(&self.compute("/flavors")).await?;
        find_id(&flavors, "flavors", flavor)
            .ok_or_else(|| Error::NotFound(format!("Flavor '{}'", flavor)))
    }

    /// Accepts an image name or ID. Goes through the Nova image proxy, which
    /// is still served at the base microversion.
    async fn resolve_image(&self, image: &str) -> Result<String> {
        let images = self.get(&self.compute("/images")).await?;
        find_id(&images, "images", image)
            .ok_or_else(|| Error::NotFound(format!("Image '{}'", image)))
    }

    /// Cinder volume, bootable when created from `image`
    pub async fn create_volume(
        &self,
        name: &str,
        size_gb: u64,
        volume_type: &str,
        image: Option<&str>,
    ) -> Result<String> {
        let mut volume = json!({
            "name": name,
            "size": size_gb,
            "volume_type": volume_type,
        });
        if let Some(image) = image {
            volume["imageRef"] = json!(self.resolve_image(image).await?);
        }

        let response = self
            .post(&self.volume("/volumes"), &json!({ "volume": volume }))
            .await?;
        let id = string_at(&response, "/volume/id")?;

        info!(
            volume = %name,
            id = %id,
            size_gb = size_gb,
            volume_type = %volume_type,
            "Created Cinder volume"
        );
        Ok(id)
    }

    pub async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        self.request(
            Method::DELETE,
            &self.volume(&format!("/volumes/{}", volume_id)),
            None,
            None,
        )
        .await?;
        Ok(())
    }
}

/// ID of the entry under `key` whose ID or name is `wanted`
fn find_id(listing: &Value, key: &str, wanted: &str) -> Option<String> {
    listing[key]
        .as_array()
        .into_iter()
        .flatten()
        .find(|entry| entry["id"] == wanted || entry["name"] == wanted)
        .and_then(|entry| entry["id"].as_str())
        .map(str::to_string)
}

fn string_at(value: &Value, pointer: &str) -> Result<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::Backend(format!("Response has no '{}'", pointer)))
}

fn array_len(value: &Value, key: &str) -> usize {
    value[key].as_array().map_or(0, Vec::len)
}

#[async_trait]
impl ComputeClient for OpenStackClient {
    async fn create_project(&self, name: &str, description: &str) -> Result<String> {
        let description = if description.is_empty() {
            format!("CEE Tenant: {}", name)
        } else {
            description.to_string()
        };
        let body = json!({
            "project": {
                "name": name,
                "description": description,
                "domain_id": self.config.project_domain_id,
                "enabled": true,
            }
        });

        let response = self.post(&self.identity("/projects"), &body).await?;
        string_at(&response, "/project/id")
    }

    async fn create_user(&self, name: &str, password: &str, project_id: &str) -> Result<String> {
        let body = json!({
            "user": {
                "name": name,
                "password": password,
                "default_project_id": project_id,
                "domain_id": self.config.user_domain_id,
                "enabled": true,
            }
        });

        let response = self.post(&self.identity("/users"), &body).await?;
        string_at(&response, "/user/id")
    }

    async fn assign_role(&self, user_id: &str, project_id: &str, role: &str) -> Result<()> {
        let roles = self
            .get(&self.identity(&format!("/roles?name={}", urlencoding::encode(role))))
            .await?;
        let role_id = string_at(&roles, "/roles/0/id")
            .map_err(|_| Error::NotFound(format!("Role '{}'", role)))?;

        self.request(
            Method::PUT,
            &self.identity(&format!(
                "/projects/{}/users/{}/roles/{}",
                project_id, user_id, role_id
            )),
            None,
            None,
        )
        .await?;
        Ok(())
    }

    async fn set_quota(&self, project_id: &str, quotas: &HashMap<String, u64>) -> Result<()> {
        let body = json!({ "quota_set": quotas });
        self.request(
            Method::PUT,
            &self.volume(&format!("/os-quota-sets/{}", project_id)),
            Some(&body),
            None,
        )
        .await?;
        Ok(())
    }

    async fn create_network(&self, project_id: &str, name: &str, cidr: &str) -> Result<String> {
        let body = json!({
            "network": {
                "name": name,
                "project_id": project_id,
                "admin_state_up": true,
                "description": format!("Tenant network {}", cidr),
                "provider:network_type": self.config.tenant_network_type,
            }
        });

        let response = self.post(&self.network("/networks"), &body).await?;
        string_at(&response, "/network/id")
    }

    async fn create_subnet(&self, project_id: &str, network_id: &str, cidr: &str) -> Result<String> {
        let body = json!({
            "subnet": {
                "name": format!("subnet-{}", cidr.replace('/', "-")),
                "network_id": network_id,
                "project_id": project_id,
                "ip_version": 4,
                "cidr": cidr,
                "enable_dhcp": true,
            }
        });

        let response = self.post(&self.network("/subnets"), &body).await?;
        string_at(&response, "/subnet/id")
    }

    async fn create_router(&self, project_id: &str, name: &str) -> Result<String> {
        let body = json!({
            "router": {
                "name": name,
                "project_id": project_id,
                "admin_state_up": true,
            }
        });

        let response = self.post(&self.network("/routers"), &body).await?;
        string_at(&response, "/router/id")
    }

    async fn add_router_interface(&self, router_id: &str, subnet_id: &str) -> Result<()> {
        self.request(
            Method::PUT,
            &self.network(&format!("/routers/{}/add_router_interface", router_id)),
            Some(&json!({ "subnet_id": subnet_id })),
            None,
        )
        .await?;
        Ok(())
    }

    async fn create_security_group(
        &self,
        project_id: &str,
        group: &SecurityGroupSpec,
    ) -> Result<String> {
        let body = json!({
            "security_group": {
                "name": group.name,
                "description": group.description,
                "project_id": project_id,
            }
        });
        let response = self.post(&self.network("/security-groups"), &body).await?;
        let group_id = string_at(&response, "/security_group/id")?;

        for rule in &group.rules {
            let body = json!({
                "security_group_rule": {
                    "security_group_id": group_id,
                    "project_id": project_id,
                    "direction": "ingress",
                    "ethertype": "IPv4",
                    "protocol": rule.protocol,
                    "port_range_min": rule.port_min,
                    "port_range_max": rule.port_max,
                    "remote_ip_prefix": rule.remote_ip_prefix,
                }
            });
            self.post(&self.network("/security-group-rules"), &body).await?;
        }

        debug!(group = %group.name, rules = group.rules.len(), "Security group created");
        Ok(group_id)
    }

    async fn create_vm(
        &self,
        name: &str,
        image: &str,
        flavor: &str,
        volume_id: Option<&str>,
    ) -> Result<String> {
        let flavor_ref = self.resolve_flavor(flavor).await?;

        let mut server = json!({
            "name": name,
            "flavorRef": flavor_ref,
            "networks": "auto",
        });

        match volume_id {
            Some(volume_id) => {
                server["block_device_mapping_v2"] = json!([{
                    "boot_index": 0,
                    "uuid": volume_id,
                    "source_type": "volume",
                    "destination_type": "volume",
                    "delete_on_termination": false,
                }]);
            }
            None => server["imageRef"] = json!(image),
        }

        let response = self
            .request(
                Method::POST,
                &self.compute("/servers"),
                Some(&json!({ "server": server })),
                Some(NOVA_MICROVERSION),
            )
            .await?;
        string_at(&response, "/server/id")
    }

    async fn get_resource_status(&self, resource: ResourceType, id: &str) -> Result<String> {
        let status = match resource {
            ResourceType::Server => {
                let server = self.get(&self.compute(&format!("/servers/{}", id))).await?;
                string_at(&server, "/server/status")?
            }
            ResourceType::Volume => {
                let volume = self.get(&self.volume(&format!("/volumes/{}", id))).await?;
                string_at(&volume, "/volume/status")?
            }
            ResourceType::Network => {
                let network = self.get(&self.network(&format!("/networks/{}", id))).await?;
                string_at(&network, "/network/status")?
            }
            ResourceType::Project => {
                let project = self.get(&self.identity(&format!("/projects/{}", id))).await?;
                if project["project"]["enabled"].as_bool().unwrap_or(false) {
                    "active".to_string()
                } else {
                    "disabled".to_string()
                }
            }
        };

        Ok(status.to_lowercase())
    }

    async fn get_cluster_status(&self) -> Result<Value> {
        let services = self.get(&self.compute("/os-services")).await?;
        let hypervisors = self.get(&self.compute("/os-hypervisors")).await?;
        let servers = self.get(&self.compute("/servers?all_tenants=1")).await?;
        let agents = self.get(&self.network("/agents")).await?;
        let networks = self.get(&self.network("/networks")).await?;
        let subnets = self.get(&self.network("/subnets")).await?;

        let service_list = services["services"].as_array().cloned().unwrap_or_default();
        let agent_list = agents["agents"].as_array().cloned().unwrap_or_default();

        let compute_enabled = service_list
            .iter()
            .filter(|s| s["status"] == "enabled")
            .count();
        let compute_down = service_list.iter().filter(|s| s["state"] == "down").count();
        let agents_up = agent_list
            .iter()
            .filter(|a| a["admin_state_up"].as_bool().unwrap_or(false))
            .count();
        let agents_dead = agent_list
            .iter()
            .filter(|a| !a["alive"].as_bool().unwrap_or(true))
            .count();
        let ovs_agents = agent_list
            .iter()
            .filter(|a| a["agent_type"] == "Open vSwitch agent")
            .count();

        Ok(json!({
            "compute": {
                "compute_services": compute_enabled,
                "services_down": compute_down,
                "total_hypervisors": array_len(&hypervisors, "hypervisors"),
                "total_instances": array_len(&servers, "servers"),
            },
            "network": {
                "network_agents": agents_up,
                "agents_dead": agents_dead,
                "ovs_agents": ovs_agents,
                "total_networks": array_len(&networks, "networks"),
                "total_subnets": array_len(&subnets, "subnets"),
            }
        }))
    }

    async fn list_projects(&self) -> Result<Vec<String>> {
        let projects = self.get(&self.identity("/projects")).await?;
        Ok(projects["projects"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|p| p["name"].as_str().map(str::to_string))
            .collect())
    }
}
