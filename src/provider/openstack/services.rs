//! Sub-service bindings implementing the capability traits over REST.

use async_trait::async_trait;
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use reqwest::Method;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{ConfigError, ProviderError, Result};
use crate::provider::classify::RequestTarget;
use crate::provider::{
    BlockStorageVerbs, ComputeVerbs, Creator, Deleter, Filter, GroupRef, Getter, Interface,
    Lister, NetworkVerbs, ProviderObject, QuotaProvider, RebootKind, ResourceKind,
    UNMETERED_QUOTA, VolumeAttachment,
};

use super::client::{ApiRequest, RestClient};
use super::normalize::{normalize, normalize_all};

/// Compute microversion that returns the image id from `createImage`.
const CREATE_IMAGE_MICROVERSION: &str = "2.45";

/// URL layout of one resource kind.
#[derive(Debug, Clone, Copy)]
struct Collection {
    /// Path of the collection, relative to the service root.
    path: &'static str,
    /// Path used for listing, when it differs (e.g. `/servers/detail`).
    list_path: &'static str,
    /// Key wrapping a single object.
    singular: &'static str,
    /// Key wrapping a list; `None` when the response is the bare list object.
    plural: &'static str,
    /// Whether single-object responses are wrapped.
    wrapped: bool,
}

const fn collection(kind: ResourceKind) -> Collection {
    let (path, list_path, singular, plural, wrapped) = match kind {
        ResourceKind::Server => ("servers", "servers/detail", "server", "servers", true),
        ResourceKind::Keypair => ("os-keypairs", "os-keypairs", "keypair", "keypairs", true),
        ResourceKind::ServerGroup => (
            "os-server-groups",
            "os-server-groups",
            "server_group",
            "server_groups",
            true,
        ),
        ResourceKind::Flavor => ("flavors", "flavors/detail", "flavor", "flavors", true),
        ResourceKind::Network => ("networks", "networks", "network", "networks", true),
        ResourceKind::Subnet => ("subnets", "subnets", "subnet", "subnets", true),
        ResourceKind::Port => ("ports", "ports", "port", "ports", true),
        ResourceKind::SecurityGroup => (
            "security-groups",
            "security-groups",
            "security_group",
            "security_groups",
            true,
        ),
        ResourceKind::FloatingIp => ("floatingips", "floatingips", "floatingip", "floatingips", true),
        ResourceKind::Router => ("routers", "routers", "router", "routers", true),
        ResourceKind::Volume => ("volumes", "volumes/detail", "volume", "volumes", true),
        ResourceKind::VolumeSnapshot => ("snapshots", "snapshots/detail", "snapshot", "snapshots", true),
        ResourceKind::VolumeBackup => ("backups", "backups/detail", "backup", "backups", true),
        ResourceKind::Image => ("images", "images", "image", "images", false),
    };
    Collection {
        path,
        list_path,
        singular,
        plural,
        wrapped,
    }
}

/// Shared plumbing of a sub-service binding.
#[derive(Debug, Clone)]
struct Endpoint {
    client: Arc<RestClient>,
    base: String,
    /// Whether the service applies list filters server-side.
    server_side_filters: bool,
}

impl Endpoint {
    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base)
    }

    async fn list(&self, kind: ResourceKind, filter: &Filter) -> Result<Vec<ProviderObject>> {
        let layout = collection(kind);
        let query = if self.server_side_filters {
            filter.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        } else {
            Vec::new()
        };
        let request = ApiRequest::new(Method::GET, self.url(layout.list_path)).with_query(query);
        let body = self.client.execute(&request).await?.unwrap_or(Value::Null);

        let items = match body.get(layout.plural) {
            Some(Value::Array(items)) => items.clone(),
            _ => {
                return Err(ProviderError::invalid_response(format!(
                    "Listing {} returned no '{}' array",
                    kind.plural(),
                    layout.plural
                ))
                .into());
            }
        };

        // Compute name filters are regular expressions; always re-check exactly.
        let objects = normalize_all(kind, items)?;
        Ok(objects.into_iter().filter(|o| filter.matches(o)).collect())
    }

    async fn get(&self, kind: ResourceKind, id: &str) -> Result<ProviderObject> {
        let layout = collection(kind);
        let request = ApiRequest::new(Method::GET, self.url(&format!("{}/{id}", layout.path)))
            .with_target(RequestTarget { kind, id: Some(id) });
        let body = self.client.execute(&request).await?;
        unwrap_single(kind, layout, body)
    }

    async fn create(&self, kind: ResourceKind, payload: &Map<String, Value>) -> Result<ProviderObject> {
        let layout = collection(kind);
        let body = if layout.wrapped {
            json!({ layout.singular: payload })
        } else {
            Value::Object(payload.clone())
        };
        self.post_create(kind, &body).await
    }

    async fn post_create(&self, kind: ResourceKind, body: &Value) -> Result<ProviderObject> {
        let layout = collection(kind);
        info!("Creating {kind}");
        let request = ApiRequest::new(Method::POST, self.url(layout.path)).with_body(body);
        let response = self.client.execute(&request).await?;
        unwrap_single(kind, layout, response)
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<()> {
        let layout = collection(kind);
        info!("Deleting {kind} {id}");
        let request = ApiRequest::new(Method::DELETE, self.url(&format!("{}/{id}", layout.path)))
            .with_target(RequestTarget { kind, id: Some(id) });
        self.client.execute(&request).await?;
        Ok(())
    }

    /// Reads one entry of an `os-quota-sets`/`quotas` document.
    async fn quota_entry(&self, path: &str, wrapper: &str, key: &str) -> Result<i64> {
        let request = ApiRequest::new(Method::GET, self.url(path));
        let body = self.client.execute(&request).await?.unwrap_or(Value::Null);
        body.get(wrapper)
            .and_then(|q| q.get(key))
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                ProviderError::invalid_response(format!("Quota document has no '{key}' entry"))
                    .into()
            })
    }
}

fn unwrap_single(
    kind: ResourceKind,
    layout: Collection,
    body: Option<Value>,
) -> Result<ProviderObject> {
    let body = body.ok_or_else(|| ProviderError::invalid_response(format!("Empty {kind} response")))?;
    let object = if layout.wrapped {
        body.get(layout.singular).cloned().ok_or_else(|| {
            ProviderError::invalid_response(format!("Response has no '{}' object", layout.singular))
        })?
    } else {
        body
    };
    normalize(kind, object)
}

/// Compute (Nova) binding.
#[derive(Debug, Clone)]
pub struct ComputeApi {
    endpoint: Endpoint,
    project_id: String,
}

impl ComputeApi {
    /// Creates a binding rooted at `base`.
    #[must_use]
    pub fn new(client: Arc<RestClient>, base: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint {
                client,
                base: base.into(),
                server_side_filters: true,
            },
            project_id: project_id.into(),
        }
    }

    async fn action(&self, server_id: &str, body: Value) -> Result<Option<Value>> {
        debug!("Server {server_id} action: {body}");
        let request = ApiRequest::new(
            Method::POST,
            self.endpoint.url(&format!("servers/{server_id}/action")),
        )
        .with_body(&body)
        .with_target(RequestTarget {
            kind: ResourceKind::Server,
            id: Some(server_id),
        });
        self.endpoint.client.execute(&request).await
    }

    async fn server_get(&self, server_id: &str, suffix: &str) -> Result<Value> {
        let request = ApiRequest::new(
            Method::GET,
            self.endpoint.url(&format!("servers/{server_id}/{suffix}")),
        )
        .with_target(RequestTarget {
            kind: ResourceKind::Server,
            id: Some(server_id),
        });
        Ok(self.endpoint.client.execute(&request).await?.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl Lister for ComputeApi {
    async fn list(&self, kind: ResourceKind, filter: &Filter) -> Result<Vec<ProviderObject>> {
        self.endpoint.list(kind, filter).await
    }
}

#[async_trait]
impl Getter for ComputeApi {
    async fn get(&self, kind: ResourceKind, id: &str) -> Result<ProviderObject> {
        self.endpoint.get(kind, id).await
    }
}

#[async_trait]
impl Creator for ComputeApi {
    async fn create(&self, kind: ResourceKind, payload: &Map<String, Value>) -> Result<ProviderObject> {
        if kind == ResourceKind::Server {
            let body = server_request_body(payload)?;
            return self.endpoint.post_create(kind, &body).await;
        }
        self.endpoint.create(kind, payload).await
    }
}

/// Translates a server payload into the compute `POST /servers` body.
///
/// The payload uses the declaration's vocabulary (`image`, `flavor`, `nics`,
/// `meta`, `security_groups` as names, legacy `block_device_mapping` as
/// `device -> "id:type:size:delete"`, `scheduler_hints`, `userdata`). Keys
/// the compute API already understands pass through unchanged.
fn server_request_body(payload: &Map<String, Value>) -> Result<Value> {
    let mut server = Map::new();
    let mut hints = None;

    for (key, value) in payload {
        match key.as_str() {
            "image" => {
                if let Some(image) = value.as_str().filter(|i| !i.is_empty()) {
                    server.insert(String::from("imageRef"), Value::from(image));
                }
            }
            "flavor" => {
                server.insert(String::from("flavorRef"), value.clone());
            }
            "nics" => {
                server.insert(String::from("networks"), nova_networks(value));
            }
            "security_groups" => {
                let groups: Vec<Value> = value
                    .as_array()
                    .map(|names| {
                        names
                            .iter()
                            .filter_map(Value::as_str)
                            .map(|name| json!({"name": name}))
                            .collect()
                    })
                    .unwrap_or_default();
                if !groups.is_empty() {
                    server.insert(String::from("security_groups"), Value::Array(groups));
                }
            }
            "meta" => {
                server.insert(String::from("metadata"), value.clone());
            }
            "userdata" | "user_data" => {
                if let Some(data) = value.as_str().filter(|d| !d.is_empty()) {
                    server.insert(
                        String::from("user_data"),
                        Value::from(BASE64_STANDARD.encode(data)),
                    );
                }
            }
            "block_device_mapping" => {
                server.insert(String::from("block_device_mapping"), legacy_bdm(value)?);
            }
            "scheduler_hints" => hints = Some(value.clone()),
            "key_name" if value.is_null() => {}
            _ => {
                server.insert(key.clone(), value.clone());
            }
        }
    }

    let mut body = Map::new();
    body.insert(String::from("server"), Value::Object(server));
    if let Some(hints) = hints {
        body.insert(String::from("os:scheduler_hints"), hints);
    }
    Ok(Value::Object(body))
}

fn nova_networks(nics: &Value) -> Value {
    let networks = nics
        .as_array()
        .map(|nics| {
            nics.iter()
                .map(|nic| {
                    let mut network = Map::new();
                    if let Some(port) = nic.get("port-id").and_then(Value::as_str) {
                        network.insert(String::from("port"), Value::from(port));
                    } else if let Some(net) = nic.get("net-id").and_then(Value::as_str) {
                        network.insert(String::from("uuid"), Value::from(net));
                    }
                    if let Some(ip) = nic.get("v4-fixed-ip").and_then(Value::as_str) {
                        network.insert(String::from("fixed_ip"), Value::from(ip));
                    }
                    Value::Object(network)
                })
                .collect()
        })
        .unwrap_or_default();
    Value::Array(networks)
}

/// Expands `{"vda": "<id>:<type>:<size>:<delete>"}` into mapping entries.
fn legacy_bdm(mapping: &Value) -> Result<Value> {
    let Some(devices) = mapping.as_object() else {
        return Ok(mapping.clone());
    };

    let mut entries = Vec::with_capacity(devices.len());
    for (device, spec) in devices {
        let spec = spec.as_str().ok_or_else(|| {
            ConfigError::invalid(
                "server.block_device_mapping",
                format!("mapping for {device} must be a string"),
            )
        })?;
        let mut parts = spec.split(':');
        let id = parts.next().unwrap_or_default();
        let source = parts.next().unwrap_or_default();
        let size = parts.next().unwrap_or_default();
        let delete = parts.next().unwrap_or_default();

        let mut entry = Map::new();
        entry.insert(String::from("device_name"), Value::from(device.as_str()));
        let id_key = if source == "snap" { "snapshot_id" } else { "volume_id" };
        entry.insert(String::from(id_key), Value::from(id));
        if let Ok(size) = size.parse::<u64>() {
            if size > 0 {
                entry.insert(String::from("volume_size"), Value::from(size));
            }
        }
        entry.insert(
            String::from("delete_on_termination"),
            Value::from(matches!(delete, "1" | "true" | "True")),
        );
        entries.push(Value::Object(entry));
    }
    Ok(Value::Array(entries))
}

#[async_trait]
impl Deleter for ComputeApi {
    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<()> {
        self.endpoint.delete(kind, id).await
    }
}

#[async_trait]
impl QuotaProvider for ComputeApi {
    async fn quota(&self, kind: ResourceKind) -> Result<i64> {
        let key = match kind {
            ResourceKind::Server => "instances",
            ResourceKind::Keypair => "key_pairs",
            ResourceKind::ServerGroup => "server_groups",
            _ => return Ok(UNMETERED_QUOTA),
        };
        self.endpoint
            .quota_entry(&format!("os-quota-sets/{}", self.project_id), "quota_set", key)
            .await
    }
}

#[async_trait]
impl ComputeVerbs for ComputeApi {
    async fn start_server(&self, server_id: &str) -> Result<()> {
        self.action(server_id, json!({"os-start": null})).await.map(drop)
    }

    async fn stop_server(&self, server_id: &str) -> Result<()> {
        self.action(server_id, json!({"os-stop": null})).await.map(drop)
    }

    async fn reboot_server(&self, server_id: &str, kind: RebootKind) -> Result<()> {
        self.action(server_id, json!({"reboot": {"type": kind.as_str()}}))
            .await
            .map(drop)
    }

    async fn suspend_server(&self, server_id: &str) -> Result<()> {
        self.action(server_id, json!({"suspend": null})).await.map(drop)
    }

    async fn resume_server(&self, server_id: &str) -> Result<()> {
        self.action(server_id, json!({"resume": null})).await.map(drop)
    }

    async fn rebuild_server(&self, server_id: &str, image_id: &str) -> Result<()> {
        self.action(server_id, json!({"rebuild": {"imageRef": image_id}}))
            .await
            .map(drop)
    }

    async fn backup_server(
        &self,
        server_id: &str,
        name: &str,
        backup_type: &str,
        rotation: u32,
    ) -> Result<()> {
        let body = json!({"createBackup": {
            "name": name,
            "backup_type": backup_type,
            "rotation": rotation,
        }});
        self.action(server_id, body).await.map(drop)
    }

    async fn create_server_image(&self, server_id: &str, name: &str) -> Result<String> {
        let body = json!({"createImage": {"name": name}});
        let request = ApiRequest::new(
            Method::POST,
            self.endpoint.url(&format!("servers/{server_id}/action")),
        )
        .with_body(&body)
        .with_microversion(CREATE_IMAGE_MICROVERSION)
        .with_target(RequestTarget {
            kind: ResourceKind::Server,
            id: Some(server_id),
        });
        let response = self.endpoint.client.execute(&request).await?;
        response
            .as_ref()
            .and_then(|r| r.get("image_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::invalid_response("createImage returned no image_id").into())
    }

    async fn attach_volume(
        &self,
        server_id: &str,
        volume_id: &str,
        device: Option<String>,
    ) -> Result<()> {
        let mut attachment = Map::new();
        attachment.insert(String::from("volumeId"), Value::from(volume_id));
        if let Some(device) = device {
            attachment.insert(String::from("device"), Value::from(device));
        }
        let body = json!({"volumeAttachment": attachment});
        let request = ApiRequest::new(
            Method::POST,
            self.endpoint
                .url(&format!("servers/{server_id}/os-volume_attachments")),
        )
        .with_body(&body);
        self.endpoint.client.execute(&request).await.map(drop)
    }

    async fn detach_volume(&self, server_id: &str, attachment_id: &str) -> Result<()> {
        let request = ApiRequest::new(
            Method::DELETE,
            self.endpoint.url(&format!(
                "servers/{server_id}/os-volume_attachments/{attachment_id}"
            )),
        );
        self.endpoint.client.execute(&request).await.map(drop)
    }

    async fn volume_attachments(&self, server_id: &str) -> Result<Vec<VolumeAttachment>> {
        let body = self.server_get(server_id, "os-volume_attachments").await?;
        let attachments = body
            .get("volumeAttachments")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(attachments
            .iter()
            .map(|a| VolumeAttachment {
                id: json_str(a, "id"),
                server_id: json_str(a, "serverId"),
                volume_id: json_str(a, "volumeId"),
                device: a.get("device").and_then(Value::as_str).map(str::to_string),
            })
            .collect())
    }

    async fn attach_interface(
        &self,
        server_id: &str,
        port_id: Option<String>,
        net_id: Option<String>,
    ) -> Result<()> {
        let mut interface = Map::new();
        if let Some(port_id) = port_id {
            interface.insert(String::from("port_id"), Value::from(port_id));
        }
        if let Some(net_id) = net_id {
            interface.insert(String::from("net_id"), Value::from(net_id));
        }
        let body = json!({"interfaceAttachment": interface});
        let request = ApiRequest::new(
            Method::POST,
            self.endpoint.url(&format!("servers/{server_id}/os-interface")),
        )
        .with_body(&body);
        self.endpoint.client.execute(&request).await.map(drop)
    }

    async fn interfaces(&self, server_id: &str) -> Result<Vec<Interface>> {
        let body = self.server_get(server_id, "os-interface").await?;
        Ok(body
            .get("interfaceAttachments")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|i| Interface {
                        port_id: json_str(i, "port_id"),
                        net_id: json_str(i, "net_id"),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn add_security_group(&self, server_id: &str, group_name: &str) -> Result<()> {
        self.action(server_id, json!({"addSecurityGroup": {"name": group_name}}))
            .await
            .map(drop)
    }

    async fn remove_security_group(&self, server_id: &str, group_name: &str) -> Result<()> {
        self.action(server_id, json!({"removeSecurityGroup": {"name": group_name}}))
            .await
            .map(drop)
    }

    async fn server_security_groups(&self, server_id: &str) -> Result<Vec<GroupRef>> {
        let body = self.server_get(server_id, "os-security-groups").await?;
        Ok(body
            .get("security_groups")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|g| GroupRef {
                        id: json_str(g, "id"),
                        name: json_str(g, "name"),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn add_floating_ip(
        &self,
        server_id: &str,
        address: &str,
        fixed_ip: Option<String>,
    ) -> Result<()> {
        let mut body = Map::new();
        body.insert(String::from("address"), Value::from(address));
        if let Some(fixed_ip) = fixed_ip {
            body.insert(String::from("fixed_address"), Value::from(fixed_ip));
        }
        self.action(server_id, json!({"addFloatingIp": body})).await.map(drop)
    }

    async fn remove_floating_ip(&self, server_id: &str, address: &str) -> Result<()> {
        self.action(server_id, json!({"removeFloatingIp": {"address": address}}))
            .await
            .map(drop)
    }

    async fn encrypted_password(&self, server_id: &str) -> Result<Option<String>> {
        let body = self.server_get(server_id, "os-server-password").await?;
        Ok(body
            .get("password")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .map(str::to_string))
    }
}

fn json_str(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Networking (Neutron) binding.
#[derive(Debug, Clone)]
pub struct NetworkApi {
    endpoint: Endpoint,
    project_id: String,
}

impl NetworkApi {
    /// Creates a binding rooted at `base` (the `/v2.0` suffix is added).
    #[must_use]
    pub fn new(client: Arc<RestClient>, base: &str, project_id: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint {
                client,
                base: format!("{}/v2.0", base.trim_end_matches('/')),
                server_side_filters: true,
            },
            project_id: project_id.into(),
        }
    }
}

#[async_trait]
impl Lister for NetworkApi {
    async fn list(&self, kind: ResourceKind, filter: &Filter) -> Result<Vec<ProviderObject>> {
        self.endpoint.list(kind, filter).await
    }
}

#[async_trait]
impl Getter for NetworkApi {
    async fn get(&self, kind: ResourceKind, id: &str) -> Result<ProviderObject> {
        self.endpoint.get(kind, id).await
    }
}

#[async_trait]
impl Creator for NetworkApi {
    async fn create(&self, kind: ResourceKind, payload: &Map<String, Value>) -> Result<ProviderObject> {
        self.endpoint.create(kind, payload).await
    }
}

#[async_trait]
impl Deleter for NetworkApi {
    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<()> {
        self.endpoint.delete(kind, id).await
    }
}

#[async_trait]
impl QuotaProvider for NetworkApi {
    async fn quota(&self, kind: ResourceKind) -> Result<i64> {
        let key = match kind {
            ResourceKind::Network => "network",
            ResourceKind::Subnet => "subnet",
            ResourceKind::Port => "port",
            ResourceKind::SecurityGroup => "security_group",
            ResourceKind::FloatingIp => "floatingip",
            ResourceKind::Router => "router",
            _ => return Ok(UNMETERED_QUOTA),
        };
        self.endpoint
            .quota_entry(&format!("quotas/{}", self.project_id), "quota", key)
            .await
    }
}

#[async_trait]
impl NetworkVerbs for NetworkApi {
    async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        patch: &Map<String, Value>,
    ) -> Result<ProviderObject> {
        let layout = collection(kind);
        let body = json!({ layout.singular: patch });
        debug!("Updating {kind} {id}: {body}");
        let request = ApiRequest::new(
            Method::PUT,
            self.endpoint.url(&format!("{}/{id}", layout.path)),
        )
        .with_body(&body)
        .with_target(RequestTarget { kind, id: Some(id) });
        let response = self.endpoint.client.execute(&request).await?;
        unwrap_single(kind, layout, response)
    }

    async fn add_router_interface(&self, router_id: &str, subnet_id: &str) -> Result<()> {
        self.router_interface(router_id, subnet_id, "add_router_interface")
            .await
    }

    async fn remove_router_interface(&self, router_id: &str, subnet_id: &str) -> Result<()> {
        self.router_interface(router_id, subnet_id, "remove_router_interface")
            .await
    }
}

impl NetworkApi {
    async fn router_interface(&self, router_id: &str, subnet_id: &str, action: &str) -> Result<()> {
        debug!("{action} router {router_id} subnet {subnet_id}");
        let body = json!({ "subnet_id": subnet_id });
        let request = ApiRequest::new(
            Method::PUT,
            self.endpoint.url(&format!("routers/{router_id}/{action}")),
        )
        .with_body(&body)
        .with_target(RequestTarget {
            kind: ResourceKind::Router,
            id: Some(router_id),
        });
        self.endpoint.client.execute(&request).await?;
        Ok(())
    }
}

/// Block storage (Cinder) binding.
#[derive(Debug, Clone)]
pub struct BlockStorageApi {
    endpoint: Endpoint,
    project_id: String,
}

impl BlockStorageApi {
    /// Creates a binding rooted at `base`, which already carries the project.
    #[must_use]
    pub fn new(client: Arc<RestClient>, base: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint {
                client,
                base: base.into(),
                server_side_filters: true,
            },
            project_id: project_id.into(),
        }
    }

    async fn post_for_id(&self, path: &str, body: &Value, wrapper: &str) -> Result<String> {
        let request = ApiRequest::new(Method::POST, self.endpoint.url(path)).with_body(body);
        let response = self.endpoint.client.execute(&request).await?;
        response
            .as_ref()
            .and_then(|r| r.get(wrapper))
            .and_then(|o| o.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::invalid_response(format!("{path} returned no id")).into())
    }
}

#[async_trait]
impl Lister for BlockStorageApi {
    async fn list(&self, kind: ResourceKind, filter: &Filter) -> Result<Vec<ProviderObject>> {
        self.endpoint.list(kind, filter).await
    }
}

#[async_trait]
impl Getter for BlockStorageApi {
    async fn get(&self, kind: ResourceKind, id: &str) -> Result<ProviderObject> {
        self.endpoint.get(kind, id).await
    }
}

#[async_trait]
impl Creator for BlockStorageApi {
    async fn create(&self, kind: ResourceKind, payload: &Map<String, Value>) -> Result<ProviderObject> {
        self.endpoint.create(kind, payload).await
    }
}

#[async_trait]
impl Deleter for BlockStorageApi {
    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<()> {
        self.endpoint.delete(kind, id).await
    }
}

#[async_trait]
impl QuotaProvider for BlockStorageApi {
    async fn quota(&self, kind: ResourceKind) -> Result<i64> {
        let key = match kind {
            ResourceKind::Volume => "volumes",
            ResourceKind::VolumeSnapshot => "snapshots",
            ResourceKind::VolumeBackup => "backups",
            _ => return Ok(UNMETERED_QUOTA),
        };
        self.endpoint
            .quota_entry(&format!("os-quota-sets/{}", self.project_id), "quota_set", key)
            .await
    }
}

#[async_trait]
impl BlockStorageVerbs for BlockStorageApi {
    async fn create_backup(&self, volume_id: &str, name: &str) -> Result<String> {
        info!("Creating backup {name} of volume {volume_id}");
        let body = json!({"backup": {"volume_id": volume_id, "name": name}});
        self.post_for_id("backups", &body, "backup").await
    }

    async fn restore_backup(&self, backup_id: &str, volume_id: &str) -> Result<()> {
        info!("Restoring backup {backup_id} onto volume {volume_id}");
        let body = json!({"restore": {"volume_id": volume_id}});
        let request = ApiRequest::new(
            Method::POST,
            self.endpoint.url(&format!("backups/{backup_id}/restore")),
        )
        .with_body(&body)
        .with_target(RequestTarget {
            kind: ResourceKind::VolumeBackup,
            id: Some(backup_id),
        });
        self.endpoint.client.execute(&request).await.map(drop)
    }

    async fn create_snapshot(&self, volume_id: &str, name: &str, force: bool) -> Result<String> {
        info!("Creating snapshot {name} of volume {volume_id}");
        let body = json!({"snapshot": {"volume_id": volume_id, "name": name, "force": force}});
        self.post_for_id("snapshots", &body, "snapshot").await
    }
}

/// Image (Glance) binding. The image service has no quota API.
#[derive(Debug, Clone)]
pub struct ImageApi {
    endpoint: Endpoint,
}

impl ImageApi {
    /// Creates a binding rooted at `base` (the `/v2` suffix is added).
    #[must_use]
    pub fn new(client: Arc<RestClient>, base: &str) -> Self {
        Self {
            endpoint: Endpoint {
                client,
                base: format!("{}/v2", base.trim_end_matches('/')),
                server_side_filters: true,
            },
        }
    }
}

#[async_trait]
impl Lister for ImageApi {
    async fn list(&self, kind: ResourceKind, filter: &Filter) -> Result<Vec<ProviderObject>> {
        self.endpoint.list(kind, filter).await
    }
}

#[async_trait]
impl Getter for ImageApi {
    async fn get(&self, kind: ResourceKind, id: &str) -> Result<ProviderObject> {
        self.endpoint.get(kind, id).await
    }
}

#[async_trait]
impl Creator for ImageApi {
    async fn create(&self, kind: ResourceKind, payload: &Map<String, Value>) -> Result<ProviderObject> {
        self.endpoint.create(kind, payload).await
    }
}

#[async_trait]
impl Deleter for ImageApi {
    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<()> {
        self.endpoint.delete(kind, id).await
    }
}

#[async_trait]
impl QuotaProvider for ImageApi {
    async fn quota(&self, _kind: ResourceKind) -> Result<i64> {
        Ok(UNMETERED_QUOTA)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> Arc<RestClient> {
        Arc::new(RestClient::new("tok", 5, false).expect("client"))
    }

    #[tokio::test]
    async fn test_network_list_filters_server_side() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2.0/networks"))
            .and(query_param("name", "private"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "networks": [{"id": "n1", "name": "private", "admin_state_up": true}]
            })))
            .mount(&server)
            .await;

        let api = NetworkApi::new(client(), &server.uri(), "proj");
        let networks = api
            .list(ResourceKind::Network, &Filter::new().with("name", "private"))
            .await
            .expect("list");
        assert_eq!(networks.len(), 1);
        assert_eq!(networks[0].bool_attr("admin_state_up"), Some(true));
    }

    #[tokio::test]
    async fn test_router_interface_actions() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v2.0/routers/rt-1/add_router_interface"))
            .and(body_json(json!({"subnet_id": "sub-1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "rt-1", "subnet_id": "sub-1", "port_id": "p-1"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v2.0/routers/rt-1/remove_router_interface"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "NeutronError": {"message": "Router rt-1 has no interface on subnet sub-1"}
            })))
            .mount(&server)
            .await;

        let api = NetworkApi::new(client(), &server.uri(), "proj");
        api.add_router_interface("rt-1", "sub-1").await.expect("add");
        let err = api
            .remove_router_interface("rt-1", "sub-1")
            .await
            .expect_err("no interface");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_compute_list_rechecks_regex_name_filter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/servers/detail"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "servers": [
                    {"id": "s1", "name": "web", "status": "ACTIVE"},
                    {"id": "s2", "name": "web-2", "status": "ACTIVE"}
                ]
            })))
            .mount(&server)
            .await;

        let api = ComputeApi::new(client(), server.uri(), "proj");
        let servers = api
            .list(ResourceKind::Server, &Filter::new().with("name", "web"))
            .await
            .expect("list");
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].id, "s1");
    }

    #[tokio::test]
    async fn test_volume_quota() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/os-quota-sets/proj"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "quota_set": {"volumes": 10, "snapshots": -1}
            })))
            .mount(&server)
            .await;

        let api = BlockStorageApi::new(client(), server.uri(), "proj");
        assert_eq!(api.quota(ResourceKind::Volume).await.expect("quota"), 10);
        assert_eq!(api.quota(ResourceKind::VolumeSnapshot).await.expect("quota"), -1);
    }

    #[tokio::test]
    async fn test_image_service_is_unmetered() {
        let api = ImageApi::new(client(), "http://unused");
        assert_eq!(
            api.quota(ResourceKind::Image).await.expect("quota"),
            UNMETERED_QUOTA
        );
    }

    #[tokio::test]
    async fn test_server_security_group_action_by_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/servers/s1/action"))
            .and(body_json(json!({"addSecurityGroup": {"name": "web"}})))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let api = ComputeApi::new(client(), server.uri(), "proj");
        api.add_security_group("s1", "web").await.expect("action");
    }

    #[test]
    fn test_server_body_translation() {
        let payload = json!({
            "name": "web",
            "image": "img-1",
            "flavor": "fl-1",
            "nics": [{"net-id": "mgmt"}, {"port-id": "p1"}],
            "security_groups": ["default", "agents"],
            "meta": {"cloudify_management_network_id": "mgmt"},
            "block_device_mapping": {"vda": "vol-1:::0"},
            "scheduler_hints": {"group": "sg-1"},
            "userdata": "#!/bin/sh",
            "key_name": null,
        });
        let Value::Object(payload) = payload else {
            unreachable!("literal object")
        };

        let body = server_request_body(&payload).expect("translate");

        assert_eq!(
            body,
            json!({
                "server": {
                    "name": "web",
                    "imageRef": "img-1",
                    "flavorRef": "fl-1",
                    "networks": [{"uuid": "mgmt"}, {"port": "p1"}],
                    "security_groups": [{"name": "default"}, {"name": "agents"}],
                    "metadata": {"cloudify_management_network_id": "mgmt"},
                    "block_device_mapping": [{
                        "device_name": "vda",
                        "volume_id": "vol-1",
                        "delete_on_termination": false
                    }],
                    "user_data": "IyEvYmluL3No"
                },
                "os:scheduler_hints": {"group": "sg-1"}
            })
        );
    }

    #[tokio::test]
    async fn test_server_create_posts_translated_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/servers"))
            .and(body_json(json!({"server": {"name": "web", "flavorRef": "f1"}})))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "server": {"id": "s1", "adminPass": "secret"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = ComputeApi::new(client(), server.uri(), "proj");
        let mut payload = Map::new();
        payload.insert(String::from("name"), json!("web"));
        payload.insert(String::from("flavor"), json!("f1"));
        let created = api.create(ResourceKind::Server, &payload).await.expect("create");
        assert_eq!(created.id, "s1");
    }

    #[tokio::test]
    async fn test_create_wraps_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2.0/ports"))
            .and(body_json(json!({"port": {"network_id": "n1"}})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "port": {"id": "p1", "network_id": "n1", "mac_address": "fa:16:3e:00:00:01"}
            })))
            .mount(&server)
            .await;

        let api = NetworkApi::new(client(), &server.uri(), "proj");
        let mut payload = Map::new();
        payload.insert(String::from("network_id"), json!("n1"));
        let port = api.create(ResourceKind::Port, &payload).await.expect("create");
        assert_eq!(port.id, "p1");
        assert_eq!(port.str_attr("mac_address"), Some("fa:16:3e:00:00:01"));
    }
}
