//! Server operations.
//!
//! Creation assembles the compute request from the node's `server` block,
//! its relationships and the provider-environment defaults. Power-state
//! operations are single steps: each invocation observes the server once,
//! issues at most one command and either finishes or asks to be retried.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value, json};
use std::net::IpAddr;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::context::{COMMON_KEYS, OperationContext, keys, prefixed};
use crate::error::{
    ConfigError, LifecycleError, OperationError, ProviderError, ResolveError, Result,
};
use crate::nics::{self, MANAGEMENT_NETWORK_ID_META, MANAGEMENT_NETWORK_NAME_META};
use crate::outcome::Outcome;
use crate::poller::{
    self, DELETE_POLL_INTERVAL, DELETE_TIMEOUT, Decision, RETRY_INTERVAL_SECS, SETTLE_DELAY,
    StartStep, StopStep, server as status,
};
use crate::proceed;
use crate::provider::{
    Cloud, ComputeVerbs, Deleter, Filter, Getter, Lister, ProviderObject, RebootKind,
    ResourceKind,
};
use crate::resolver::{Ownership, ensure_single_source};

use super::common;

/// Runtime properties owned by server nodes.
pub const SERVER_KEYS: [&str; 7] = [
    keys::NETWORKS,
    keys::IP,
    keys::IPV4_ADDRESS,
    keys::IPV6_ADDRESS,
    keys::IPV4_ADDRESSES,
    keys::IPV6_ADDRESSES,
    keys::PASSWORD,
];

const REQUIRED_PARAMETERS: [&str; 2] = ["name", "flavor"];

/// Creates the server, or attaches the declared NICs to an external one.
///
/// # Errors
///
/// Returns configuration errors for an incomplete request, and any provider
/// error other than a boot volume that is not ready yet (which retries).
pub async fn create(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    let identity = common::resolve(cloud, ctx).await?;
    if identity.ownership == Ownership::External {
        let server_id = common::current_id(ctx)?;
        adopt_external(cloud, ctx, &server_id).await?;
        let server = cloud.get(ResourceKind::Server, &server_id).await?;
        set_network_properties(ctx, &server)?;
        return Ok(Outcome::done());
    }
    if common::already_created(cloud, ctx).await?.is_some() {
        return Ok(Outcome::done());
    }

    let payload = build_payload(cloud, ctx).await?;
    match common::create_object(cloud, &mut ctx.props, ResourceKind::Server, &payload).await {
        Ok(_) => Ok(Outcome::done()),
        Err(e) if poller::is_bdm_not_ready(&e) => {
            warn!("Server creation rejected: {e}");
            Ok(Outcome::retry(
                "Block Device Mapping is not created yet",
                RETRY_INTERVAL_SECS,
            ))
        }
        Err(e) => Err(e),
    }
}

/// Assembles the compute create request.
async fn build_payload(cloud: &Cloud, ctx: &OperationContext) -> Result<Map<String, Value>> {
    let mut server = common::object_payload(ctx, Map::new());

    attach_boot_volume(ctx, &mut server)?;
    common::image_from_relationship(ctx, &mut server, "image");
    server.entry("meta").or_insert_with(|| json!({}));

    let boots_from_volume = server.contains_key("block_device_mapping")
        || server.contains_key("block_device_mapping_v2");
    if boots_from_volume && !server.contains_key("image") {
        // The compute API still expects an image field next to a mapping.
        if let Some(image) = ctx.node.property_str("image") {
            server.insert(String::from("image"), Value::from(image));
        }
    } else {
        resolve_reference(cloud, ctx, &mut server, ResourceKind::Image).await?;
    }
    resolve_reference(cloud, ctx, &mut server, ResourceKind::Flavor).await?;

    security_groups(ctx, &mut server);
    key_name(cloud, ctx, &mut server).await?;
    require_parameters(&server)?;
    network_interfaces(cloud, ctx, &mut server).await?;

    if let Some(group) = ctx.single_target(ResourceKind::ServerGroup)? {
        let group_id = common::target_id(group)?;
        server.insert(String::from("scheduler_hints"), json!({ "group": group_id }));
    }

    Ok(server)
}

fn attach_boot_volume(ctx: &OperationContext, server: &mut Map<String, Value>) -> Result<()> {
    let boot_volumes: Vec<_> = ctx
        .targets_of(ResourceKind::Volume)
        .filter(|volume| volume.props.flag(keys::BOOTABLE))
        .collect();
    if boot_volumes.len() > 1 {
        return Err(ResolveError::conflict(format!(
            "{} boot volumes not supported",
            boot_volumes.len()
        ))
        .into());
    }
    let Some(volume) = boot_volumes.first() else {
        return Ok(());
    };

    let volume_id = common::target_id(volume)?;
    info!("boot_volume_id: {volume_id}");
    let mapping = server
        .entry("block_device_mapping")
        .or_insert_with(|| json!({}));
    if let Some(mapping) = mapping.as_object_mut() {
        mapping.insert(String::from("vda"), Value::from(format!("{volume_id}:::0")));
    }

    let has_zone = server
        .get(keys::AVAILABILITY_ZONE)
        .and_then(Value::as_str)
        .is_some_and(|zone| !zone.is_empty());
    if !has_zone {
        if let Some(zone) = volume.props.get(keys::AVAILABILITY_ZONE) {
            server.insert(keys::AVAILABILITY_ZONE.to_string(), zone.clone());
        }
    }
    Ok(())
}

/// Turns an image or flavor reference into a provider id.
///
/// The deprecated `<kind>_name` field is looked up strictly. Otherwise an
/// explicit block value is kept as is, and the node property is looked up by
/// name, falling back to being used as an id.
async fn resolve_reference(
    cloud: &Cloud,
    ctx: &OperationContext,
    server: &mut Map<String, Value>,
    kind: ResourceKind,
) -> Result<()> {
    let field = kind.as_str();
    let name_field = format!("{field}_name");

    if let Some(name) = server.remove(&name_field) {
        let name = name.as_str().unwrap_or_default().to_string();
        let object = cloud.find_named(kind, &name).await?;
        debug!("Using {field} {} from name {name}", object.id);
        server.insert(field.to_string(), Value::from(object.id));
        return Ok(());
    }
    if server.get(field).is_some_and(|value| !value.is_null()) {
        return Ok(());
    }

    let reference = ctx.node.property_str(field).ok_or_else(|| {
        ConfigError::validation(
            format!(
                "must set {field} by either setting a \"{field}\" property or by setting a \
                 \"{field}\" or \"{name_field}\" (deprecated) field under the \"server\" property"
            ),
            field,
        )
    })?;
    let id = cloud
        .find_one(kind, &Filter::new().with("name", reference))
        .await?
        .map_or_else(|| reference.to_string(), |object| object.id);
    server.insert(field.to_string(), Value::from(id));
    Ok(())
}

fn security_groups(ctx: &OperationContext, server: &mut Map<String, Value>) {
    let mut groups: Vec<String> = server
        .get("security_groups")
        .and_then(Value::as_array)
        .map(|groups| {
            groups
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    if let Some(agents) = &ctx.provider.agents_security_group {
        if !groups.contains(&agents.name) {
            groups.push(agents.name.clone());
        }
    } else if groups.is_empty() {
        // A server is never started outside the groups it is related to.
        groups = ctx.target_names(ResourceKind::SecurityGroup);
    }

    if !groups.is_empty() {
        server.insert(String::from("security_groups"), Value::from(groups));
    }
}

async fn key_name(
    cloud: &Cloud,
    ctx: &OperationContext,
    server: &mut Map<String, Value>,
) -> Result<()> {
    let keypair = ctx.single_target(ResourceKind::Keypair)?;
    let inline = server
        .get("key_name")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .map(str::to_string);
    ensure_single_source(
        "key_name",
        inline.is_some(),
        ResourceKind::Keypair,
        keypair.is_some(),
    )?;

    let key_name = if let Some(name) = inline {
        Some(prefixed(ctx.deployment.resources_prefix.as_deref(), &name))
    } else if let Some(keypair) = keypair {
        let keypair_id = common::target_id(keypair)?;
        let found = cloud.find_named(ResourceKind::Keypair, keypair_id).await?;
        Some(found.name.unwrap_or(found.id))
    } else if let Some(agents) = &ctx.provider.agents_keypair {
        Some(agents.name.clone())
    } else {
        info!(
            "server must have a keypair, yet no keypair was connected to the server node, the \
             \"key_name\" nested property was not used, and there is no agent keypair in the \
             provider context. Agent installation can have issues."
        );
        None
    };

    server.insert(
        String::from("key_name"),
        key_name.map_or(Value::Null, Value::from),
    );
    Ok(())
}

fn require_parameters(server: &Map<String, Value>) -> Result<()> {
    for key in REQUIRED_PARAMETERS {
        let missing = server
            .get(key)
            .is_none_or(|value| value.is_null() || value.as_str() == Some(""));
        if missing {
            return Err(ConfigError::validation(
                format!(
                    "Required parameter '{key}' is missing (under host's properties.server). \
                     Required parameters are: {}",
                    REQUIRED_PARAMETERS.join(", ")
                ),
                key,
            )
            .into());
        }
    }
    Ok(())
}

async fn network_interfaces(
    cloud: &Cloud,
    ctx: &OperationContext,
    server: &mut Map<String, Value>,
) -> Result<()> {
    let inline = nics::inline_nics(server.get("nics"))?;
    let management = nics::resolve_management_network(cloud, ctx).await?;
    let composed = nics::compose(
        cloud,
        inline,
        &ctx.target_ids(ResourceKind::Network),
        &ctx.target_ids(ResourceKind::Port),
        management.as_ref(),
    )
    .await?;

    if let Some(management) = &management {
        if let Some(meta) = server.get_mut("meta").and_then(Value::as_object_mut) {
            meta.insert(
                MANAGEMENT_NETWORK_ID_META.to_string(),
                Value::from(management.id.as_str()),
            );
            meta.insert(
                MANAGEMENT_NETWORK_NAME_META.to_string(),
                Value::from(management.name.as_str()),
            );
        }
    }

    if composed.is_empty() {
        server.remove("nics");
    } else {
        let nics = serde_json::to_value(&composed)
            .map_err(|e| LifecycleError::internal(format!("Failed to encode NICs: {e}")))?;
        server.insert(String::from("nics"), nics);
    }
    Ok(())
}

/// Plugs the declared ports and networks into an external server.
///
/// Anything already plugged in is a conflict: the declaration would not own
/// the interface it claims.
async fn adopt_external(cloud: &Cloud, ctx: &OperationContext, server_id: &str) -> Result<()> {
    let network_ids = ctx.target_ids(ResourceKind::Network);
    let port_ids = ctx.target_ids(ResourceKind::Port);

    let interfaces = cloud.interfaces(server_id).await?;
    let attached_ports: Vec<&str> = interfaces
        .iter()
        .map(|i| i.port_id.as_str())
        .filter(|port| port_ids.iter().any(|id| id == port))
        .collect();
    let attached_nets: Vec<&str> = interfaces
        .iter()
        .map(|i| i.net_id.as_str())
        .filter(|net| network_ids.iter().any(|id| id == net))
        .collect();
    if !attached_ports.is_empty() || !attached_nets.is_empty() {
        return Err(ResolveError::conflict(format!(
            "Several ports/networks already connected to external server {server_id}: \
             Networks - {attached_nets:?}; Ports - {attached_ports:?}"
        ))
        .into());
    }

    for port_id in &port_ids {
        info!("Attaching port {port_id}...");
        cloud
            .attach_interface(server_id, Some(port_id.clone()), None)
            .await?;
        info!("Successfully attached port {port_id} to server {server_id}");
    }

    // Ports may have brought some of the networks along.
    let attached: Vec<String> = cloud
        .interfaces(server_id)
        .await?
        .into_iter()
        .map(|i| i.net_id)
        .collect();
    for net_id in &network_ids {
        if attached.contains(net_id) {
            info!(
                "Skipping network {net_id} attachment, because it is already attached to \
                 server {server_id}"
            );
        } else {
            info!("Attaching network {net_id}...");
            cloud
                .attach_interface(server_id, None, Some(net_id.clone()))
                .await?;
            info!("Successfully attached network {net_id} to server {server_id}");
        }
    }

    validate_external_keypair(cloud, ctx, server_id).await
}

async fn validate_external_keypair(
    cloud: &Cloud,
    ctx: &OperationContext,
    server_id: &str,
) -> Result<()> {
    let Some(keypair) = ctx.single_target(ResourceKind::Keypair)? else {
        return Ok(());
    };
    if !keypair.node.use_external {
        return Err(ResolveError::conflict(
            "Can't connect a new keypair node to a server node with 'use_external_resource'=True",
        )
        .into());
    }

    let keypair_id = common::target_id(keypair)?;
    let server = cloud.get(ResourceKind::Server, server_id).await?;
    let key_name = server.str_attr("key_name").unwrap_or_default();
    let connected = cloud
        .find_one(ResourceKind::Keypair, &Filter::new().with("name", key_name))
        .await?
        .is_some_and(|found| found.id == keypair_id);
    if connected {
        Ok(())
    } else {
        Err(OperationError::external_mismatch(format!(
            "Expected external resources server {server_id} and keypair {keypair_id} to be \
             connected"
        ))
        .into())
    }
}

/// Drives the server towards `ACTIVE`, then records its addresses and,
/// when `use_password` is set, its decrypted admin password.
///
/// # Errors
///
/// Returns [`OperationError::ExternalMismatch`] for an external server that
/// is not running, and [`OperationError::UnexpectedStatus`] for a state a
/// start cannot recover from.
pub async fn start(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    let interval = ctx
        .input_u64("start_retry_interval")
        .unwrap_or(RETRY_INTERVAL_SECS);
    let server_id = common::current_id(ctx)?;
    let server = cloud.get(ResourceKind::Server, &server_id).await?;

    if common::ownership(ctx) == Ownership::External {
        info!("Validating external server is started");
        if !poller::same_state(server.status(), status::ACTIVE) {
            return Err(OperationError::external_mismatch(format!(
                "Expected external resource server {server_id} to be in \"{}\" status",
                status::ACTIVE
            ))
            .into());
        }
        set_network_properties(ctx, &server)?;
        return Ok(Outcome::done());
    }

    match poller::start_step(server.status(), server.task_state(), server.fault_message()) {
        StartStep::Running => {
            info!("Server is {}", server.status());
            if ctx.node.property_flag("use_password") {
                let key_path = private_key_path(ctx)?;
                debug!("retrieving password for server");
                let Some(password) = server_password(cloud, &server_id, &key_path).await? else {
                    return Ok(Outcome::retry(
                        "Waiting for server to post generated password",
                        interval,
                    ));
                };
                ctx.props.set(keys::PASSWORD, password);
                info!("Server has been set with a password");
            }
            set_network_properties(ctx, &server)?;
            Ok(Outcome::done())
        }
        StartStep::IssueStartThenRetry => {
            info!("Server is in {} status - starting server...", status::SHUTOFF);
            cloud.start_server(&server_id).await?;
            Ok(Outcome::retry(
                format!(
                    "Waiting for server to be in {} state but is in {}:{} state. Retrying...",
                    status::ACTIVE,
                    server.status(),
                    status::POWERING_ON
                ),
                interval,
            ))
        }
        StartStep::Wait => Ok(Outcome::retry(
            format!(
                "Waiting for server to be in {} state but is in {}:{} state. Retrying...",
                status::ACTIVE,
                server.status(),
                server.task_state().unwrap_or_default()
            ),
            interval,
        )),
        StartStep::Fail(reason) => Err(OperationError::UnexpectedStatus {
            kind: ResourceKind::Server,
            status: server.status().to_string(),
            reason,
        }
        .into()),
    }
}

fn private_key_path(ctx: &OperationContext) -> Result<PathBuf> {
    let keypair = ctx.single_target(ResourceKind::Keypair)?;
    let configured = if let Some(path) = ctx.input_str("private_key_path") {
        if keypair.is_some() {
            return Err(ResolveError::conflict(
                "server can't both have a private_key_path input and be connected to a keypair \
                 via a relationship at the same time",
            )
            .into());
        }
        Some(path.to_string())
    } else {
        keypair
            .and_then(|k| k.node.property_str("private_key_path"))
            .map(str::to_string)
            .or_else(|| ctx.provider.agent_key_path.clone())
    };

    let mut message = String::from("Cannot find private key file");
    if let Some(path) = configured {
        let path = expand_home(&path);
        if path.is_file() {
            return Ok(path);
        }
        message = format!("{message}; expected file path was {}", path.display());
    }
    Err(ConfigError::validation(message, "private_key_path").into())
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

async fn server_password(
    compute: &dyn ComputeVerbs,
    server_id: &str,
    key_path: &Path,
) -> Result<Option<String>> {
    let Some(encrypted) = compute
        .encrypted_password(server_id)
        .await?
        .filter(|password| !password.trim().is_empty())
    else {
        return Ok(None);
    };
    let ciphertext = STANDARD.decode(encrypted.trim()).map_err(|e| {
        ProviderError::invalid_response(format!("Server password is not valid base64: {e}"))
    })?;
    decrypt(&ciphertext, key_path).await.map(Some)
}

/// Decrypts a PKCS#1 v1.5 ciphertext with a PEM RSA key (PKCS#1 or PKCS#8).
async fn decrypt(ciphertext: &[u8], key_path: &Path) -> Result<String> {
    let pem = tokio::fs::read_to_string(key_path).await?;
    let key = RsaPrivateKey::from_pkcs1_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(&pem))
        .map_err(|e| {
            ConfigError::validation(
                format!("{} is not a PEM RSA private key: {e}", key_path.display()),
                "private_key_path",
            )
        })?;
    let plaintext = key.decrypt(Pkcs1v15Encrypt, ciphertext).map_err(|e| {
        OperationError::invalid_state(format!("Failed to decrypt server password: {e}"))
    })?;
    Ok(String::from_utf8_lossy(&plaintext).into_owned())
}

/// Records the server's addresses.
///
/// The management IP is the first address of the management network named
/// in the server metadata, else of the first network.
fn set_network_properties(ctx: &mut OperationContext, server: &ProviderObject) -> Result<()> {
    let networks = server.networks();
    if networks.is_empty() {
        return Err(OperationError::invalid_state(
            "The server was created but not attached to a network. A server must be connected \
             to at least one network or port.",
        )
        .into());
    }

    let management_name = server.metadata(MANAGEMENT_NETWORK_NAME_META);
    let mut management_ip: Option<String> = None;
    let mut ipv4 = Vec::new();
    let mut ipv6 = Vec::new();
    let mut by_network = Map::new();

    for (network, ips) in networks {
        if management_ip.is_none() || management_name == Some(network.as_str()) {
            management_ip = ips.first().cloned();
        }
        for ip in &ips {
            match ip.parse::<IpAddr>() {
                Ok(IpAddr::V4(_)) => push_unique(&mut ipv4, ip),
                Ok(IpAddr::V6(_)) => push_unique(&mut ipv6, ip),
                Err(_) => debug!("Ignoring unparsable address {ip} on network {network}"),
            }
        }
        by_network.insert(network, Value::from(ips));
    }

    let ipv4_address = pick_address(server.str_attr("accessIPv4"), management_ip.as_deref(), &ipv4);
    let ipv6_address = pick_address(server.str_attr("accessIPv6"), management_ip.as_deref(), &ipv6);

    ctx.props.set(keys::NETWORKS, Value::Object(by_network));
    ctx.props
        .set(keys::IP, management_ip.map_or(Value::Null, Value::from));
    ctx.props.set(keys::IPV4_ADDRESS, ipv4_address);
    ctx.props.set(keys::IPV6_ADDRESS, ipv6_address);
    ctx.props.set(keys::IPV4_ADDRESSES, Value::from(ipv4));
    ctx.props.set(keys::IPV6_ADDRESSES, Value::from(ipv6));
    Ok(())
}

fn push_unique(addresses: &mut Vec<String>, ip: &str) {
    if !addresses.iter().any(|known| known == ip) {
        addresses.push(ip.to_string());
    }
}

/// Access address, else the management IP if it is of this family, else the
/// only address of this family.
fn pick_address(access: Option<&str>, management: Option<&str>, family: &[String]) -> Value {
    access
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| {
            management
                .filter(|ip| family.iter().any(|known| known == ip))
                .map(str::to_string)
        })
        .or_else(|| family.first().filter(|_| family.len() == 1).cloned())
        .map_or(Value::Null, Value::from)
}

/// Powers the server off.
///
/// # Errors
///
/// Returns any provider error from the lookup or stop call.
pub async fn stop(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    if common::ownership(ctx) == Ownership::External {
        info!("Not stopping server since an external server is being used");
        return Ok(Outcome::done());
    }
    let server_id = common::current_id(ctx)?;
    let server = cloud.get(ResourceKind::Server, &server_id).await?;
    stop_server_step(cloud, &server).await
}

/// One step towards `SHUTOFF`.
pub(super) async fn stop_server_step(
    cloud: &Cloud,
    server: &ProviderObject,
) -> Result<Outcome<()>> {
    match poller::stop_step(server.status(), server.task_state()) {
        StopStep::Wait => Ok(Outcome::retry("Server is stopping", RETRY_INTERVAL_SECS)),
        StopStep::Stopped => {
            info!("Server {} is already stopped", server.id);
            Ok(Outcome::done())
        }
        StopStep::IssueStop => {
            info!("Stopping server {}", server.id);
            cloud.stop_server(&server.id).await?;
            tokio::time::sleep(SETTLE_DELAY).await;
            let server = cloud.get(ResourceKind::Server, &server.id).await?;
            settle(
                poller::after_stop(server.status()),
                format!("Server has {} state.", server.status()),
            )
        }
    }
}

/// One step towards `ACTIVE`.
///
/// A start already in flight is waited on, never issued twice.
pub(super) async fn start_server_step(
    cloud: &Cloud,
    server: &ProviderObject,
) -> Result<Outcome<()>> {
    match poller::start_step(server.status(), server.task_state(), server.fault_message()) {
        StartStep::Running => Ok(Outcome::done()),
        StartStep::Wait => Ok(Outcome::retry(
            format!(
                "Waiting for server to be in {} state but is in {}:{} state. Retrying...",
                status::ACTIVE,
                server.status(),
                server.task_state().unwrap_or_default()
            ),
            RETRY_INTERVAL_SECS,
        )),
        StartStep::IssueStartThenRetry => {
            info!("Starting server {}", server.id);
            cloud.start_server(&server.id).await?;
            tokio::time::sleep(SETTLE_DELAY).await;
            let server = cloud.get(ResourceKind::Server, &server.id).await?;
            settle(
                poller::after_start(server.status()),
                format!("Server has {} state.", server.status()),
            )
        }
        StartStep::Fail(reason) => Err(OperationError::UnexpectedStatus {
            kind: ResourceKind::Server,
            status: server.status().to_string(),
            reason,
        }
        .into()),
    }
}

fn settle(decision: Decision, message: String) -> Result<Outcome<()>> {
    match decision {
        Decision::Success => Ok(Outcome::done()),
        Decision::RetryAfter(secs) => Ok(Outcome::retry(message, secs)),
        Decision::Fail(reason) => Err(OperationError::invalid_state(reason).into()),
    }
}

/// Reboots on the first attempt, then waits for `ACTIVE`.
///
/// # Errors
///
/// Returns a configuration error for an unknown `reboot_type`, and
/// [`OperationError::InvalidState`] if the reboot ends anywhere but `ACTIVE`.
pub async fn reboot(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    let server_id = common::current_id(ctx)?;
    if ctx.retry_number == 0 {
        let kind: RebootKind = ctx.input_str("reboot_type").unwrap_or("soft").parse()?;
        info!("Rebooting server {server_id} ({})", kind.as_str());
        cloud.reboot_server(&server_id, kind).await?;
    }

    let server = cloud.get(ResourceKind::Server, &server_id).await?;
    settle(
        poller::reboot_decision(server.status()),
        format!("Server has {} state.", server.status()),
    )
}

/// Suspends a running server.
///
/// # Errors
///
/// Returns any provider error from the lookup or suspend call.
pub async fn suspend(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    let server_id = common::current_id(ctx)?;
    let server = cloud.get(ResourceKind::Server, &server_id).await?;
    if poller::same_state(server.status(), status::SUSPENDED) {
        info!("Server {server_id} is already suspended");
    } else {
        info!("Suspending server {server_id}");
        cloud.suspend_server(&server_id).await?;
    }
    Ok(Outcome::done())
}

/// Resumes a suspended server.
///
/// # Errors
///
/// Returns any provider error from the lookup or resume call.
pub async fn resume(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    let server_id = common::current_id(ctx)?;
    let server = cloud.get(ResourceKind::Server, &server_id).await?;
    if poller::same_state(server.status(), status::SUSPENDED) {
        info!("Resuming server {server_id}");
        cloud.resume_server(&server_id).await?;
    } else {
        info!("Server {server_id} is {}; nothing to resume", server.status());
    }
    Ok(Outcome::done())
}

/// Deletes an owned server and waits until it is gone.
///
/// # Errors
///
/// Returns a recoverable [`OperationError::Timeout`] if the server lingers.
pub async fn delete(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    if !common::ownership(ctx).deletes_on_teardown() {
        info!("not deleting server since an external server is being used");
    } else if let Some(server_id) = ctx.props.external_id().map(str::to_string) {
        info!("deleting server {server_id}");
        match cloud.delete(ResourceKind::Server, &server_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => warn!("Server {server_id} is already gone"),
            Err(e) => return Err(e),
        }
        poller::wait_until_gone(
            cloud,
            ResourceKind::Server,
            &server_id,
            DELETE_TIMEOUT,
            DELETE_POLL_INTERVAL,
        )
        .await?;
    }

    ctx.props.clear_keys(&COMMON_KEYS);
    ctx.props.clear_keys(&SERVER_KEYS);
    Ok(Outcome::done())
}

/// Validates the server declaration and that its flavor exists.
///
/// # Errors
///
/// Returns [`ResolveError::ResourceNotFound`] for an unknown flavor.
pub async fn creation_validation(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    proceed!(common::validate(cloud, ctx).await?);

    let block = ctx.node.kind_block();
    let flavor = ctx
        .input("server")
        .and_then(|args| args.get("flavor"))
        .and_then(Value::as_str)
        .or_else(|| block.get("flavor").and_then(Value::as_str))
        .or_else(|| ctx.node.property_str("flavor"))
        .ok_or_else(|| ConfigError::missing("flavor"))?;

    let flavors = cloud.list(ResourceKind::Flavor, &Filter::new()).await?;
    if flavors
        .iter()
        .any(|f| f.id == flavor || f.name.as_deref() == Some(flavor))
    {
        debug!("OK: flavor {flavor} exists");
        return Ok(Outcome::done());
    }

    error!("VALIDATION ERROR: flavor {flavor} does not exist");
    info!("list of available flavors:");
    for f in &flavors {
        info!("    {:>10} - {}", f.id, f.name.as_deref().unwrap_or_default());
    }
    Err(ResolveError::ResourceNotFound {
        kind: ResourceKind::Flavor,
        identifier: flavor.to_string(),
    }
    .into())
}

/// Stores the servers matching the `filter` input.
///
/// # Errors
///
/// Returns any provider error from the list call.
pub async fn list(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    common::list_into(cloud, ctx, ResourceKind::Server).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DeclaredResource, NamedResource, RelationshipKind};
    use crate::operations::testing::{context, external_target, resolved_context, target};
    use crate::provider::testing::FakeCloud;

    fn server_node() -> DeclaredResource {
        DeclaredResource::new(ResourceKind::Server)
            .with_resource_id("web")
            .with_property("image", "img-1")
            .with_property("flavor", "m1.small")
    }

    fn fake_with_flavor() -> std::sync::Arc<FakeCloud> {
        let fake = FakeCloud::new();
        fake.insert(
            ResourceKind::Flavor,
            ProviderObject::new("flavor-1").with_name("m1.small"),
        );
        fake
    }

    fn running_server(id: &str) -> ProviderObject {
        ProviderObject::new(id)
            .with_name(id)
            .with_status("ACTIVE")
            .with_attr("networks", json!({"private": ["10.0.0.5", "fd00::5"]}))
    }

    #[tokio::test]
    async fn test_agents_security_group_added_exactly_once() {
        let fake = fake_with_flavor();
        let cloud = fake.cloud();
        let mut ctx = context(server_node()).with_relationship(
            RelationshipKind::ConnectedToSecurityGroup,
            target(ResourceKind::SecurityGroup, "sg-1", "agents"),
        );
        ctx.provider.agents_security_group = Some(NamedResource {
            id: String::from("sg-1"),
            name: String::from("agents"),
        });

        let payload = build_payload(&cloud, &ctx).await.expect("payload");
        assert_eq!(payload["security_groups"], json!(["agents"]));
    }

    #[tokio::test]
    async fn test_related_security_groups_used_without_agents_group() {
        let fake = fake_with_flavor();
        let cloud = fake.cloud();
        let ctx = context(server_node()).with_relationship(
            RelationshipKind::ConnectedToSecurityGroup,
            target(ResourceKind::SecurityGroup, "sg-1", "web-sg"),
        );

        let payload = build_payload(&cloud, &ctx).await.expect("payload");
        assert_eq!(payload["security_groups"], json!(["web-sg"]));
        assert_eq!(payload["flavor"], json!("flavor-1"));
        assert_eq!(payload["image"], json!("img-1"));
        assert_eq!(payload["key_name"], Value::Null);
    }

    #[tokio::test]
    async fn test_create_composes_nics_with_management_network() {
        let fake = fake_with_flavor();
        fake.insert(
            ResourceKind::Port,
            ProviderObject::new("port-1").with_attr("network_id", "net-b"),
        );
        let cloud = fake.cloud();
        let mut ctx = context(server_node())
            .with_relationship(
                RelationshipKind::ConnectedToNetwork,
                target(ResourceKind::Network, "net-a", "a"),
            )
            .with_relationship(
                RelationshipKind::ConnectedToPort,
                target(ResourceKind::Port, "port-1", "p"),
            );
        ctx.provider.int_network = Some(NamedResource {
            id: String::from("net-mgmt"),
            name: String::from("mgmt"),
        });

        let outcome = create(&cloud, &mut ctx).await.expect("create");
        assert!(outcome.is_done());

        let server_id = ctx.props.external_id().expect("id").to_string();
        let server = fake.object(ResourceKind::Server, &server_id).expect("server");
        assert_eq!(server.name.as_deref(), Some("web"));
        assert_eq!(
            server.attr("nics"),
            Some(&json!([{"net-id": "net-mgmt"}, {"net-id": "net-a"}, {"port-id": "port-1"}]))
        );
        assert_eq!(
            server.attr("meta").and_then(|meta| meta.get(MANAGEMENT_NETWORK_NAME_META)),
            Some(&json!("mgmt"))
        );
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let fake = fake_with_flavor();
        let cloud = fake.cloud();
        let mut ctx = context(server_node());

        create(&cloud, &mut ctx).await.expect("first");
        create(&cloud, &mut ctx).await.expect("second");
        assert_eq!(fake.call_count("create"), 1);
    }

    #[tokio::test]
    async fn test_server_created_on_demand_is_not_adopted_on_rerun() {
        let fake = fake_with_flavor();
        let cloud = fake.cloud();
        let mut ctx = context(server_node().external(true)).with_relationship(
            RelationshipKind::ConnectedToNetwork,
            target(ResourceKind::Network, "net-a", "a"),
        );

        create(&cloud, &mut ctx).await.expect("first");
        assert!(ctx.props.conditionally_created());
        create(&cloud, &mut ctx).await.expect("rerun");

        assert_eq!(fake.call_count("create"), 1);
        assert_eq!(fake.call_count("attach_interface"), 0);
        assert!(ctx.props.conditionally_created());
    }

    #[tokio::test]
    async fn test_boot_volume_mapping_and_zone() {
        let fake = fake_with_flavor();
        let cloud = fake.cloud();
        let mut volume = target(ResourceKind::Volume, "vol-1", "boot");
        volume.props.set(keys::BOOTABLE, true);
        volume.props.set(keys::AVAILABILITY_ZONE, "az-2");
        let ctx = context(server_node())
            .with_relationship(RelationshipKind::ConnectedToVolume, volume.clone());

        let payload = build_payload(&cloud, &ctx).await.expect("payload");
        assert_eq!(payload["block_device_mapping"], json!({"vda": "vol-1:::0"}));
        assert_eq!(payload[keys::AVAILABILITY_ZONE], json!("az-2"));
        assert_eq!(payload["image"], json!("img-1"));

        let ctx = ctx.with_relationship(RelationshipKind::ConnectedToVolume, volume);
        let err = build_payload(&cloud, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("boot volumes not supported"));
    }

    #[tokio::test]
    async fn test_missing_flavor_is_reported() {
        let fake = FakeCloud::new();
        let cloud = fake.cloud();
        let node = DeclaredResource::new(ResourceKind::Server).with_property("image", "img-1");
        let err = build_payload(&cloud, &context(node)).await.unwrap_err();
        assert!(err.to_string().contains("must set flavor"));
    }

    #[tokio::test]
    async fn test_inline_key_name_conflicts_with_keypair_relationship() {
        let fake = fake_with_flavor();
        let cloud = fake.cloud();
        let node = server_node().with_property("server", json!({"key_name": "mine"}));
        let ctx = context(node).with_relationship(
            RelationshipKind::ConnectedToKeypair,
            target(ResourceKind::Keypair, "kp", "kp"),
        );
        let err = build_payload(&cloud, &ctx).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Resolve(ResolveError::ConflictingConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn test_external_server_gets_ports_then_conflicts_on_rerun() {
        let fake = FakeCloud::new();
        fake.insert(ResourceKind::Server, running_server("ext"));
        let cloud = fake.cloud();
        let node = DeclaredResource::new(ResourceKind::Server)
            .with_resource_id("ext")
            .external(false);
        let mut ctx = context(node).with_relationship(
            RelationshipKind::ConnectedToPort,
            target(ResourceKind::Port, "port-1", "p"),
        );

        create(&cloud, &mut ctx).await.expect("adopt");
        assert_eq!(fake.call_count("attach_interface"), 1);
        assert_eq!(fake.call_count("create"), 0);

        let err = create(&cloud, &mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("already connected to external server"));
    }

    #[tokio::test]
    async fn test_start_issues_start_then_records_addresses() {
        let fake = FakeCloud::new();
        fake.insert(ResourceKind::Server, running_server("srv").with_status("SHUTOFF"));
        let cloud = fake.cloud();
        let mut ctx = resolved_context(server_node(), "srv");

        let outcome = start(&cloud, &mut ctx).await.expect("start");
        assert!(!outcome.is_done());
        assert_eq!(fake.call_count("start_server"), 1);

        let outcome = start(&cloud, &mut ctx).await.expect("start");
        assert!(outcome.is_done());
        assert_eq!(fake.call_count("start_server"), 1);
        assert_eq!(ctx.props.get_str(keys::IP), Some("10.0.0.5"));
        assert_eq!(ctx.props.get_str(keys::IPV4_ADDRESS), Some("10.0.0.5"));
        assert_eq!(ctx.props.get_str(keys::IPV6_ADDRESS), Some("fd00::5"));
        assert_eq!(ctx.props.get(keys::IPV4_ADDRESSES), Some(&json!(["10.0.0.5"])));
    }

    #[tokio::test]
    async fn test_management_network_from_metadata_picks_ip() {
        let fake = FakeCloud::new();
        fake.insert(
            ResourceKind::Server,
            ProviderObject::new("srv")
                .with_status("ACTIVE")
                .with_attr("networks", json!({"a": ["10.0.0.5"], "mgmt": ["10.1.0.7"]}))
                .with_attr("metadata", json!({"cloudify_management_network_name": "mgmt"})),
        );
        let cloud = fake.cloud();
        let mut ctx = resolved_context(server_node(), "srv");

        start(&cloud, &mut ctx).await.expect("start");
        assert_eq!(ctx.props.get_str(keys::IP), Some("10.1.0.7"));
        assert_eq!(ctx.props.get_str(keys::IPV4_ADDRESS), Some("10.1.0.7"));
        assert_eq!(ctx.props.get(keys::IPV6_ADDRESS), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_start_error_state_fails() {
        let fake = FakeCloud::new();
        fake.insert(ResourceKind::Server, running_server("srv").with_status("ERROR"));
        let cloud = fake.cloud();
        let mut ctx = resolved_context(server_node(), "srv");

        let err = start(&cloud, &mut ctx).await.unwrap_err();
        assert!(!err.is_recoverable());
        assert!(matches!(
            err,
            LifecycleError::Operation(OperationError::UnexpectedStatus { .. })
        ));
    }

    #[tokio::test]
    async fn test_external_server_must_be_active() {
        let fake = FakeCloud::new();
        fake.insert(ResourceKind::Server, running_server("ext").with_status("SHUTOFF"));
        let cloud = fake.cloud();
        let node = DeclaredResource::new(ResourceKind::Server)
            .with_resource_id("ext")
            .external(false);
        let mut ctx = resolved_context(node, "ext");

        let err = start(&cloud, &mut ctx).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Operation(OperationError::ExternalMismatch { .. })
        ));
        assert_eq!(fake.call_count("start_server"), 0);
    }

    #[tokio::test]
    async fn test_password_without_key_file_fails() {
        let fake = FakeCloud::new();
        fake.insert(ResourceKind::Server, running_server("srv"));
        let cloud = fake.cloud();
        let node = server_node().with_property("use_password", true);
        let mut ctx = resolved_context(node, "srv")
            .with_input("private_key_path", "/nonexistent/key.pem");

        let err = start(&cloud, &mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("Cannot find private key file"));
    }

    #[tokio::test]
    async fn test_password_waits_until_posted() {
        let fake = FakeCloud::new();
        fake.insert(ResourceKind::Server, running_server("srv"));
        let cloud = fake.cloud();
        let key = tempfile::NamedTempFile::new().expect("key file");
        let node = server_node().with_property("use_password", true);
        let mut ctx = resolved_context(node, "srv")
            .with_input("private_key_path", key.path().to_string_lossy().as_ref());

        let outcome = start(&cloud, &mut ctx).await.expect("start");
        assert!(!outcome.is_done());
        assert!(ctx.props.get(keys::IP).is_none());
    }

    const SERVER_KEY: &str = include_str!("../../testdata/server_key.pem");
    const SERVER_KEY_PKCS8: &str = include_str!("../../testdata/server_key_pkcs8.pem");
    const SERVER_PASSWORD: &str = include_str!("../../testdata/server_password.b64");

    fn key_file(pem: &str) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().expect("key file");
        std::fs::write(file.path(), pem).expect("write key");
        file
    }

    #[tokio::test]
    async fn test_password_is_decrypted_with_private_key() {
        let fake = FakeCloud::new();
        fake.insert(ResourceKind::Server, running_server("srv"));
        fake.set_password("srv", SERVER_PASSWORD);
        let cloud = fake.cloud();
        let key = key_file(SERVER_KEY);
        let node = server_node().with_property("use_password", true);
        let mut ctx = resolved_context(node, "srv")
            .with_input("private_key_path", key.path().to_string_lossy().as_ref());

        assert!(start(&cloud, &mut ctx).await.expect("start").is_done());
        assert_eq!(ctx.props.get_str(keys::PASSWORD), Some("Pa55-w0rd!"));
    }

    #[tokio::test]
    async fn test_decrypt_accepts_pkcs8_and_rejects_garbage() {
        let ciphertext = STANDARD.decode(SERVER_PASSWORD.trim()).expect("base64");

        let key = key_file(SERVER_KEY_PKCS8);
        assert_eq!(decrypt(&ciphertext, key.path()).await.expect("pkcs8"), "Pa55-w0rd!");

        let key = key_file("not a key");
        let err = decrypt(&ciphertext, key.path()).await.expect_err("garbage key");
        assert!(!err.is_recoverable());

        let key = key_file(SERVER_KEY);
        let err = decrypt(b"short", key.path()).await.expect_err("bad ciphertext");
        assert!(err.to_string().contains("Failed to decrypt server password"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_settles_then_verifies() {
        let fake = FakeCloud::new();
        fake.insert(ResourceKind::Server, running_server("srv"));
        let cloud = fake.cloud();
        let mut ctx = resolved_context(server_node(), "srv");

        assert!(stop(&cloud, &mut ctx).await.expect("stop").is_done());
        assert!(stop(&cloud, &mut ctx).await.expect("stop").is_done());
        assert_eq!(fake.call_count("stop_server"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_unconverged_retries() {
        let fake = FakeCloud::new();
        fake.insert(ResourceKind::Server, running_server("srv"));
        fake.lag("stop_server");
        let cloud = fake.cloud();
        let mut ctx = resolved_context(server_node(), "srv");

        let outcome = stop(&cloud, &mut ctx).await.expect("stop");
        assert_eq!(outcome, Outcome::retry("Server has ACTIVE state.", RETRY_INTERVAL_SECS));
    }

    #[tokio::test]
    async fn test_stop_skips_external_server() {
        let fake = FakeCloud::new();
        let cloud = fake.cloud();
        let node = server_node().external(false);
        let mut ctx = resolved_context(node, "ext");

        assert!(stop(&cloud, &mut ctx).await.expect("stop").is_done());
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reboot_issues_once_then_waits() {
        let fake = FakeCloud::new();
        fake.insert(ResourceKind::Server, running_server("srv"));
        let cloud = fake.cloud();
        let mut ctx = resolved_context(server_node(), "srv").with_input("reboot_type", "hard");

        let outcome = reboot(&cloud, &mut ctx).await.expect("reboot");
        assert!(!outcome.is_done());
        assert_eq!(fake.calls(), vec![String::from("reboot_server srv HARD")]);

        fake.script(ResourceKind::Server, "srv", &["ACTIVE"]);
        ctx.retry_number = 1;
        assert!(reboot(&cloud, &mut ctx).await.expect("reboot").is_done());
        assert_eq!(fake.call_count("reboot_server"), 1);

        fake.script(ResourceKind::Server, "srv", &["ERROR"]);
        let err = reboot(&cloud, &mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("finished in ERROR state"));
    }

    #[tokio::test]
    async fn test_reboot_rejects_unknown_type() {
        let fake = FakeCloud::new();
        fake.insert(ResourceKind::Server, running_server("srv"));
        let cloud = fake.cloud();
        let mut ctx = resolved_context(server_node(), "srv").with_input("reboot_type", "gentle");

        assert!(reboot(&cloud, &mut ctx).await.is_err());
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_suspend_and_resume_are_status_gated() {
        let fake = FakeCloud::new();
        fake.insert(ResourceKind::Server, running_server("srv"));
        let cloud = fake.cloud();
        let mut ctx = resolved_context(server_node(), "srv");

        resume(&cloud, &mut ctx).await.expect("resume");
        suspend(&cloud, &mut ctx).await.expect("suspend");
        suspend(&cloud, &mut ctx).await.expect("suspend");
        resume(&cloud, &mut ctx).await.expect("resume");
        assert_eq!(
            fake.calls(),
            vec![String::from("suspend_server srv"), String::from("resume_server srv")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_waits_and_clears_properties() {
        let fake = FakeCloud::new();
        fake.insert(ResourceKind::Server, running_server("srv"));
        let cloud = fake.cloud();
        let mut ctx = resolved_context(server_node(), "srv");
        ctx.props.set(keys::IP, "10.0.0.5");

        delete(&cloud, &mut ctx).await.expect("delete");
        assert!(fake.object(ResourceKind::Server, "srv").is_none());
        assert!(ctx.props.is_empty());

        // A second run has nothing left to delete.
        delete(&cloud, &mut ctx).await.expect("delete");
        assert_eq!(fake.call_count("delete"), 1);
    }

    #[tokio::test]
    async fn test_delete_keeps_external_server() {
        let fake = FakeCloud::new();
        fake.insert(ResourceKind::Server, running_server("ext"));
        let cloud = fake.cloud();
        let mut ctx = resolved_context(server_node().external(false), "ext");

        delete(&cloud, &mut ctx).await.expect("delete");
        assert!(fake.object(ResourceKind::Server, "ext").is_some());
        assert!(ctx.props.external_id().is_none());
    }

    #[tokio::test]
    async fn test_external_keypair_must_match() {
        let fake = FakeCloud::new();
        fake.insert(ResourceKind::Server, running_server("ext").with_attr("key_name", "other"));
        fake.insert(ResourceKind::Keypair, ProviderObject::new("other").with_name("other"));
        let cloud = fake.cloud();
        let node = DeclaredResource::new(ResourceKind::Server)
            .with_resource_id("ext")
            .external(false);
        let mut ctx = context(node).with_relationship(
            RelationshipKind::ConnectedToKeypair,
            external_target(ResourceKind::Keypair, "mine", "mine"),
        );

        let err = create(&cloud, &mut ctx).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Operation(OperationError::ExternalMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_validation_checks_flavor() {
        let fake = fake_with_flavor();
        let cloud = fake.cloud();

        let mut ctx = context(server_node());
        assert!(creation_validation(&cloud, &mut ctx).await.is_ok());

        let mut ctx = context(server_node().with_property("flavor", "m9.huge"));
        let err = creation_validation(&cloud, &mut ctx).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Resolve(ResolveError::ResourceNotFound {
                kind: ResourceKind::Flavor,
                ..
            })
        ));
    }
}
