//! Scriptable in-memory provider for multi-step operation tests.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{ProviderError, Result};

use super::{
    BlockStorageVerbs, Cloud, ComputeVerbs, Creator, Deleter, Filter, GroupRef, Getter,
    Interface, Lister, NetworkVerbs, ProviderObject, QuotaProvider, RebootKind, ResourceKind,
    UNLIMITED_QUOTA, VolumeAttachment,
};

#[derive(Debug, Default)]
struct FakeState {
    objects: BTreeMap<ResourceKind, Vec<ProviderObject>>,
    scripts: HashMap<(ResourceKind, String), VecDeque<String>>,
    quotas: HashMap<ResourceKind, i64>,
    create_status: HashMap<ResourceKind, String>,
    server_groups: HashMap<String, Vec<GroupRef>>,
    interfaces: HashMap<String, Vec<Interface>>,
    passwords: HashMap<String, String>,
    failures: HashMap<String, (u16, String)>,
    lagging: HashSet<String>,
    calls: Vec<String>,
    next_id: u32,
}

/// In-memory provider implementing every capability and verb trait.
#[derive(Debug, Default)]
pub struct FakeCloud {
    state: Mutex<FakeState>,
}

impl FakeCloud {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns a facade routing every sub-service to this fake.
    #[must_use]
    pub fn cloud(self: &Arc<Self>) -> Cloud {
        Cloud::new(
            Arc::clone(self) as _,
            Arc::clone(self) as _,
            Arc::clone(self) as _,
            Arc::clone(self) as _,
        )
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Stores an object.
    pub fn insert(&self, kind: ResourceKind, object: ProviderObject) {
        self.lock().objects.entry(kind).or_default().push(object);
    }

    /// Returns the stored object, ignoring scripts.
    #[must_use]
    pub fn object(&self, kind: ResourceKind, id: &str) -> Option<ProviderObject> {
        self.lock()
            .objects
            .get(&kind)
            .and_then(|objects| objects.iter().find(|o| o.id == id).cloned())
    }

    /// Makes successive `get` calls report `statuses`; the last one sticks.
    pub fn script(&self, kind: ResourceKind, id: &str, statuses: &[&str]) {
        self.lock().scripts.insert(
            (kind, id.to_string()),
            statuses.iter().map(|s| (*s).to_string()).collect(),
        );
    }

    /// Sets the quota reported for `kind`.
    pub fn set_quota(&self, kind: ResourceKind, quota: i64) {
        self.lock().quotas.insert(kind, quota);
    }

    /// Sets the status newly created objects of `kind` report.
    pub fn set_create_status(&self, kind: ResourceKind, status: &str) {
        self.lock().create_status.insert(kind, status.to_string());
    }

    /// Sets the encrypted password a server reports.
    pub fn set_password(&self, server_id: &str, password: &str) {
        self.lock()
            .passwords
            .insert(server_id.to_string(), password.to_string());
    }

    /// Makes the next call of `verb` fail with an API error.
    pub fn fail_next(&self, verb: &str, status: u16, message: &str) {
        self.lock()
            .failures
            .insert(verb.to_string(), (status, message.to_string()));
    }

    /// Makes `verb` succeed without taking effect (unconverged provider).
    pub fn lag(&self, verb: &str) {
        self.lock().lagging.insert(verb.to_string());
    }

    /// Returns the verbs called so far, as `"verb arg1 arg2"`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Returns how many calls of `verb` were made.
    #[must_use]
    pub fn call_count(&self, verb: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(verb))
            .count()
    }

    /// Records a call and returns whether it should take effect.
    fn record(&self, verb: &str, args: &[&str]) -> Result<bool> {
        let mut state = self.lock();
        let mut line = verb.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        state.calls.push(line);
        if let Some((status, message)) = state.failures.remove(verb) {
            return Err(ProviderError::api_error(status, message).into());
        }
        Ok(!state.lagging.contains(verb))
    }

    fn update_object<F>(&self, kind: ResourceKind, id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut ProviderObject),
    {
        let mut state = self.lock();
        let object = state
            .objects
            .get_mut(&kind)
            .and_then(|objects| objects.iter_mut().find(|o| o.id == id))
            .ok_or_else(|| ProviderError::not_found(kind, id))?;
        f(object);
        Ok(())
    }

    fn set_status(&self, kind: ResourceKind, id: &str, status: &str) -> Result<()> {
        self.update_object(kind, id, |o| o.status = Some(status.to_string()))
    }

    fn next_id(&self, kind: ResourceKind) -> String {
        let mut state = self.lock();
        state.next_id += 1;
        format!("{kind}-{}", state.next_id)
    }
}

#[async_trait]
impl Lister for FakeCloud {
    async fn list(&self, kind: ResourceKind, filter: &Filter) -> Result<Vec<ProviderObject>> {
        Ok(self
            .lock()
            .objects
            .get(&kind)
            .map(|objects| objects.iter().filter(|o| filter.matches(o)).cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl Getter for FakeCloud {
    async fn get(&self, kind: ResourceKind, id: &str) -> Result<ProviderObject> {
        let mut state = self.lock();
        let scripted = state.scripts.get_mut(&(kind, id.to_string())).and_then(|queue| {
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        });
        let object = state
            .objects
            .get_mut(&kind)
            .and_then(|objects| objects.iter_mut().find(|o| o.id == id))
            .ok_or_else(|| ProviderError::not_found(kind, id))?;
        if let Some(status) = scripted {
            object.status = Some(status);
        }
        Ok(object.clone())
    }
}

#[async_trait]
impl Creator for FakeCloud {
    async fn create(&self, kind: ResourceKind, payload: &Map<String, Value>) -> Result<ProviderObject> {
        self.record("create", &[kind.as_str()])?;
        let id = self.next_id(kind);
        let mut attributes = payload.clone();
        let name = attributes
            .remove("name")
            .and_then(|n| n.as_str().map(str::to_string));
        let status = self.lock().create_status.get(&kind).cloned();
        let object = ProviderObject {
            id,
            name,
            status,
            attributes,
        };
        self.insert(kind, object.clone());
        Ok(object)
    }
}

#[async_trait]
impl Deleter for FakeCloud {
    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<()> {
        self.record("delete", &[kind.as_str(), id])?;
        let mut state = self.lock();
        let objects = state.objects.entry(kind).or_default();
        let before = objects.len();
        objects.retain(|o| o.id != id);
        if objects.len() == before {
            return Err(ProviderError::not_found(kind, id).into());
        }
        Ok(())
    }
}

#[async_trait]
impl QuotaProvider for FakeCloud {
    async fn quota(&self, kind: ResourceKind) -> Result<i64> {
        Ok(self.lock().quotas.get(&kind).copied().unwrap_or(UNLIMITED_QUOTA))
    }
}

#[async_trait]
impl ComputeVerbs for FakeCloud {
    async fn start_server(&self, server_id: &str) -> Result<()> {
        if self.record("start_server", &[server_id])? {
            self.set_status(ResourceKind::Server, server_id, "ACTIVE")?;
        }
        Ok(())
    }

    async fn stop_server(&self, server_id: &str) -> Result<()> {
        if self.record("stop_server", &[server_id])? {
            self.set_status(ResourceKind::Server, server_id, "SHUTOFF")?;
        }
        Ok(())
    }

    async fn reboot_server(&self, server_id: &str, kind: RebootKind) -> Result<()> {
        if self.record("reboot_server", &[server_id, kind.as_str()])? {
            self.set_status(ResourceKind::Server, server_id, "REBOOT")?;
        }
        Ok(())
    }

    async fn suspend_server(&self, server_id: &str) -> Result<()> {
        if self.record("suspend_server", &[server_id])? {
            self.set_status(ResourceKind::Server, server_id, "SUSPENDED")?;
        }
        Ok(())
    }

    async fn resume_server(&self, server_id: &str) -> Result<()> {
        if self.record("resume_server", &[server_id])? {
            self.set_status(ResourceKind::Server, server_id, "ACTIVE")?;
        }
        Ok(())
    }

    async fn rebuild_server(&self, server_id: &str, image_id: &str) -> Result<()> {
        if self.record("rebuild_server", &[server_id, image_id])? {
            self.set_status(ResourceKind::Server, server_id, "SHUTOFF")?;
        }
        Ok(())
    }

    async fn backup_server(
        &self,
        server_id: &str,
        name: &str,
        backup_type: &str,
        _rotation: u32,
    ) -> Result<()> {
        if self.record("backup_server", &[server_id, name, backup_type])? {
            let id = self.next_id(ResourceKind::Image);
            self.insert(
                ResourceKind::Image,
                ProviderObject::new(id)
                    .with_name(name)
                    .with_status("active")
                    .with_attr("image_type", "backup"),
            );
        }
        Ok(())
    }

    async fn create_server_image(&self, server_id: &str, name: &str) -> Result<String> {
        self.record("create_server_image", &[server_id, name])?;
        let id = self.next_id(ResourceKind::Image);
        self.insert(
            ResourceKind::Image,
            ProviderObject::new(id.clone())
                .with_name(name)
                .with_status("active")
                .with_attr("image_type", "snapshot"),
        );
        Ok(id)
    }

    async fn attach_volume(
        &self,
        server_id: &str,
        volume_id: &str,
        device: Option<String>,
    ) -> Result<()> {
        let device = device.unwrap_or_else(|| String::from("/dev/vdb"));
        if self.record("attach_volume", &[server_id, volume_id, &device])? {
            let attachment = json!([{
                "id": volume_id,
                "server_id": server_id,
                "volume_id": volume_id,
                "device": device,
            }]);
            self.update_object(ResourceKind::Volume, volume_id, |v| {
                v.status = Some(String::from("in-use"));
                v.attributes.insert(String::from("attachments"), attachment);
            })?;
        }
        Ok(())
    }

    async fn detach_volume(&self, server_id: &str, attachment_id: &str) -> Result<()> {
        if self.record("detach_volume", &[server_id, attachment_id])? {
            self.update_object(ResourceKind::Volume, attachment_id, |v| {
                v.status = Some(String::from("available"));
                v.attributes.insert(String::from("attachments"), json!([]));
            })?;
        }
        Ok(())
    }

    async fn volume_attachments(&self, server_id: &str) -> Result<Vec<VolumeAttachment>> {
        Ok(self
            .lock()
            .objects
            .get(&ResourceKind::Volume)
            .map(|volumes| {
                volumes
                    .iter()
                    .flat_map(ProviderObject::attachments)
                    .filter(|a| a.server_id == server_id)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn attach_interface(
        &self,
        server_id: &str,
        port_id: Option<String>,
        net_id: Option<String>,
    ) -> Result<()> {
        let port = port_id.unwrap_or_default();
        let net = net_id.unwrap_or_default();
        if self.record("attach_interface", &[server_id, &port, &net])? {
            self.lock()
                .interfaces
                .entry(server_id.to_string())
                .or_default()
                .push(Interface {
                    port_id: port,
                    net_id: net,
                });
        }
        Ok(())
    }

    async fn interfaces(&self, server_id: &str) -> Result<Vec<Interface>> {
        Ok(self
            .lock()
            .interfaces
            .get(server_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_security_group(&self, server_id: &str, group_name: &str) -> Result<()> {
        if self.record("add_security_group", &[server_id, group_name])? {
            let group = self
                .list(ResourceKind::SecurityGroup, &Filter::new().with("name", group_name))
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::not_found(ResourceKind::SecurityGroup, group_name))?;
            self.lock()
                .server_groups
                .entry(server_id.to_string())
                .or_default()
                .push(GroupRef {
                    id: group.id,
                    name: group_name.to_string(),
                });
        }
        Ok(())
    }

    async fn remove_security_group(&self, server_id: &str, group_name: &str) -> Result<()> {
        if self.record("remove_security_group", &[server_id, group_name])? {
            let mut state = self.lock();
            let groups = state.server_groups.entry(server_id.to_string()).or_default();
            let before = groups.len();
            groups.retain(|g| g.name != group_name);
            if groups.len() == before {
                return Err(ProviderError::not_found(ResourceKind::SecurityGroup, group_name).into());
            }
        }
        Ok(())
    }

    async fn server_security_groups(&self, server_id: &str) -> Result<Vec<GroupRef>> {
        Ok(self
            .lock()
            .server_groups
            .get(server_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_floating_ip(
        &self,
        server_id: &str,
        address: &str,
        fixed_ip: Option<String>,
    ) -> Result<()> {
        let fixed = fixed_ip.unwrap_or_default();
        if self.record("add_floating_ip", &[server_id, address, &fixed])? {
            self.update_object(ResourceKind::Server, server_id, |s| {
                let networks = s
                    .attributes
                    .entry("networks")
                    .or_insert_with(|| json!({}));
                if let Some(networks) = networks.as_object_mut() {
                    let public = networks.entry("public").or_insert_with(|| json!([]));
                    if let Some(ips) = public.as_array_mut() {
                        ips.push(Value::from(address));
                    }
                }
            })?;
        }
        Ok(())
    }

    async fn remove_floating_ip(&self, server_id: &str, address: &str) -> Result<()> {
        if self.record("remove_floating_ip", &[server_id, address])? {
            self.update_object(ResourceKind::Server, server_id, |s| {
                if let Some(networks) = s
                    .attributes
                    .get_mut("networks")
                    .and_then(Value::as_object_mut)
                {
                    for ips in networks.values_mut() {
                        if let Some(ips) = ips.as_array_mut() {
                            ips.retain(|ip| ip.as_str() != Some(address));
                        }
                    }
                }
            })?;
        }
        Ok(())
    }

    async fn encrypted_password(&self, server_id: &str) -> Result<Option<String>> {
        Ok(self.lock().passwords.get(server_id).cloned())
    }
}

#[async_trait]
impl NetworkVerbs for FakeCloud {
    async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        patch: &Map<String, Value>,
    ) -> Result<ProviderObject> {
        if self.record("update", &[kind.as_str(), id])? {
            self.update_object(kind, id, |o| {
                for (key, value) in patch {
                    o.attributes.insert(key.clone(), value.clone());
                }
            })?;
        }
        self.object(kind, id)
            .ok_or_else(|| ProviderError::not_found(kind, id).into())
    }

    async fn add_router_interface(&self, router_id: &str, subnet_id: &str) -> Result<()> {
        if self.record("add_router_interface", &[router_id, subnet_id])? {
            let id = self.next_id(ResourceKind::Port);
            self.insert(
                ResourceKind::Port,
                ProviderObject::new(id)
                    .with_status("ACTIVE")
                    .with_attr("device_id", router_id)
                    .with_attr("device_owner", "network:router_interface")
                    .with_attr("fixed_ips", serde_json::json!([{ "subnet_id": subnet_id }])),
            );
        }
        Ok(())
    }

    async fn remove_router_interface(&self, router_id: &str, subnet_id: &str) -> Result<()> {
        if self.record("remove_router_interface", &[router_id, subnet_id])? {
            let mut state = self.lock();
            let ports = state.objects.entry(ResourceKind::Port).or_default();
            let before = ports.len();
            ports.retain(|p| {
                !(p.str_attr("device_id") == Some(router_id) && p.has_fixed_ip_on(subnet_id))
            });
            if ports.len() == before {
                return Err(ProviderError::not_found(ResourceKind::Router, router_id).into());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BlockStorageVerbs for FakeCloud {
    async fn create_backup(&self, volume_id: &str, name: &str) -> Result<String> {
        self.record("create_backup", &[volume_id, name])?;
        let id = self.next_id(ResourceKind::VolumeBackup);
        self.insert(
            ResourceKind::VolumeBackup,
            ProviderObject::new(id.clone())
                .with_name(name)
                .with_status("available")
                .with_attr("volume_id", volume_id),
        );
        Ok(id)
    }

    async fn restore_backup(&self, backup_id: &str, volume_id: &str) -> Result<()> {
        self.record("restore_backup", &[backup_id, volume_id])?;
        Ok(())
    }

    async fn create_snapshot(&self, volume_id: &str, name: &str, force: bool) -> Result<String> {
        self.record("create_snapshot", &[volume_id, name, if force { "force" } else { "" }])?;
        let id = self.next_id(ResourceKind::VolumeSnapshot);
        self.insert(
            ResourceKind::VolumeSnapshot,
            ProviderObject::new(id.clone())
                .with_name(name)
                .with_status("available")
                .with_attr("volume_id", volume_id),
        );
        Ok(id)
    }
}
