//! Guest networks

use super::{ApplyError, ApplyResult, Resource, ResourceResult, ResourceState};
use crate::client::{ClientError, CloudStackClient, CreateNetworkRequest, Network, UpdateNetworkRequest};
use crate::schema::{AttributeType, Diagnostic, ResourceSchema, SchemaAttribute, SchemaBlock};
use crate::tags;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::Ipv4Addr;

const RESOURCE_TYPE: &str = "Network";

/// Derive the default gateway (first host address) and the netmask of an
/// IPv4 CIDR.
pub fn gateway_and_netmask(cidr: &str) -> Result<(Ipv4Addr, Ipv4Addr), String> {
    let (addr, prefix) = cidr
        .trim()
        .split_once('/')
        .ok_or_else(|| format!("{} is not in CIDR notation", cidr))?;
    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|e| format!("invalid address in {}: {}", cidr, e))?;
    let prefix: u32 = prefix
        .parse()
        .map_err(|e| format!("invalid prefix in {}: {}", cidr, e))?;
    if prefix > 30 {
        return Err(format!("prefix of {} leaves no room for hosts", cidr));
    }

    let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
    let network = u32::from(addr) & mask;

    Ok((Ipv4Addr::from(network + 1), Ipv4Addr::from(mask)))
}

/// Keep the configured spelling when it names the same object as the remote
/// id or name, so users may configure either.
fn name_or_id(configured: Option<String>, id: Option<&String>, name: Option<&String>) -> Option<String> {
    match configured {
        Some(value) if Some(&value) == id || Some(&value) == name => Some(value),
        _ => name.or(id).cloned(),
    }
}

fn network_state(network: &Network, current: &ResourceState) -> ResourceState {
    let mut state = ResourceState::new();
    state.set("id", serde_json::json!(network.id));
    state.set("name", serde_json::json!(network.name));
    state.set_opt("display_text", network.displaytext.as_ref());
    state.set_opt("cidr", network.cidr.as_ref());
    state.set_opt("gateway", network.gateway.as_ref());
    state.set_opt(
        "network_offering",
        name_or_id(
            current.get_string("network_offering"),
            network.networkofferingid.as_ref(),
            network.networkofferingname.as_ref(),
        ),
    );
    state.set_opt(
        "zone",
        name_or_id(
            current.get_string("zone"),
            network.zoneid.as_ref(),
            network.zonename.as_ref(),
        ),
    );
    state.set_opt("vpc_id", network.vpcid.as_ref());
    state.set_opt("acl_id", network.aclid.as_ref());

    // Absent and empty tag maps are equivalent
    let remote_tags = network.tag_map();
    if !remote_tags.is_empty() || current.get("tags").is_some() {
        state.set("tags", serde_json::json!(remote_tags));
    }

    state
}

fn required_id(state: &ResourceState) -> ResourceResult<String> {
    state
        .get_string("id")
        .ok_or_else(|| vec![Diagnostic::error("Network ID is required")])
}

fn client_error(action: &str, e: ClientError) -> Vec<Diagnostic> {
    vec![Diagnostic::error(&format!("Failed to {} network: {}", action, e))]
}

pub struct NetworkResource;

impl NetworkResource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NetworkResource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resource for NetworkResource {
    fn type_name(&self) -> &str {
        "cloudstack_network"
    }

    fn schema(&self) -> ResourceSchema {
        let block = SchemaBlock::new()
            .with_attribute(
                "id",
                SchemaAttribute::string()
                    .with_description("Network ID")
                    .computed(),
            )
            .with_attribute(
                "name",
                SchemaAttribute::string()
                    .with_description("Network name")
                    .required(),
            )
            .with_attribute(
                "display_text",
                SchemaAttribute::string()
                    .with_description("Display text, defaults to the name")
                    .optional()
                    .computed(),
            )
            .with_attribute(
                "cidr",
                SchemaAttribute::string()
                    .with_description("IPv4 CIDR of the network")
                    .required()
                    .force_new(),
            )
            .with_attribute(
                "gateway",
                SchemaAttribute::string()
                    .with_description("Gateway, defaults to the first address of the CIDR")
                    .optional()
                    .computed()
                    .force_new(),
            )
            .with_attribute(
                "network_offering",
                SchemaAttribute::string()
                    .with_description("Name or ID of the network offering")
                    .required(),
            )
            .with_attribute(
                "zone",
                SchemaAttribute::string()
                    .with_description("Name or ID of the zone")
                    .required()
                    .force_new(),
            )
            .with_attribute(
                "vpc_id",
                SchemaAttribute::string()
                    .with_description("VPC the network is a tier of")
                    .optional()
                    .force_new(),
            )
            .with_attribute(
                "acl_id",
                SchemaAttribute::string()
                    .with_description("Network ACL list of a VPC tier")
                    .optional()
                    .computed()
                    .force_new(),
            )
            .with_attribute(
                "tags",
                SchemaAttribute::map(AttributeType::String)
                    .with_description("Resource tags")
                    .optional(),
            )
            .with_description("Manages a CloudStack guest network");

        ResourceSchema::new(0, block)
    }

    fn validate(&self, config: &ResourceState) -> Vec<Diagnostic> {
        let mut diagnostics = super::validate_required(&self.schema(), config);

        if let Some(cidr) = config.get_string("cidr") {
            if let Err(e) = gateway_and_netmask(&cidr) {
                diagnostics.push(Diagnostic::error(&e).for_attribute("cidr"));
            }
        }
        if config.get("acl_id").is_some() && config.get("vpc_id").is_none() {
            diagnostics.push(
                Diagnostic::error("acl_id can only be set on VPC tiers")
                    .with_detail("Set vpc_id as well")
                    .for_attribute("acl_id"),
            );
        }

        diagnostics
    }

    async fn create(&self, client: &CloudStackClient, planned: &ResourceState) -> ApplyResult {
        let name = planned.get_string("name").unwrap_or_default();
        let cidr = planned.get_string("cidr").unwrap_or_default();
        let (default_gateway, netmask) = gateway_and_netmask(&cidr)
            .map_err(|e| vec![Diagnostic::error(&e).for_attribute("cidr")])?;

        let zone = planned.get_string("zone").unwrap_or_default();
        let zone_id = client
            .zone_id(&zone)
            .await
            .map_err(|e| client_error("resolve zone for", e))?;
        let offering = planned.get_string("network_offering").unwrap_or_default();
        let offering_id = client
            .network_offering_id(&offering)
            .await
            .map_err(|e| client_error("resolve network offering for", e))?;

        let request = CreateNetworkRequest {
            displaytext: planned.get_string("display_text").unwrap_or_else(|| name.clone()),
            name,
            networkofferingid: offering_id,
            zoneid: zone_id,
            gateway: Some(
                planned
                    .get_string("gateway")
                    .unwrap_or_else(|| default_gateway.to_string()),
            ),
            netmask: Some(netmask.to_string()),
            vpcid: planned.get_string("vpc_id"),
            aclid: planned.get_string("acl_id"),
        };

        let network = client
            .create_network(&request)
            .await
            .map_err(|e| client_error("create", e))?;
        tracing::info!(id = %network.id, name = %network.name, "Created network");

        // From here on the network exists, so failures still record it
        let created = network_state(&network, planned);
        let partial = |diagnostics: Vec<Diagnostic>| {
            ApplyError::from(diagnostics).with_state(created.clone())
        };

        if let Some(desired) = planned.get_string_map("tags") {
            tags::set_tags(client, &HashMap::new(), &desired, &network.id, RESOURCE_TYPE)
                .await
                .map_err(|e| partial(client_error("tag", e)))?;
        }

        let network = client
            .get_network(&network.id)
            .await
            .map_err(|e| partial(client_error("read", e)))?;
        Ok(network_state(&network, planned))
    }

    async fn read(
        &self,
        client: &CloudStackClient,
        current: &ResourceState,
    ) -> ResourceResult<ResourceState> {
        let id = required_id(current)?;

        match client.get_network(&id).await {
            Ok(network) => Ok(network_state(&network, current)),
            Err(ClientError::NotFound(_)) => Ok(ResourceState::new()),
            Err(e) => Err(client_error("read", e)),
        }
    }

    async fn update(
        &self,
        client: &CloudStackClient,
        current: &ResourceState,
        planned: &ResourceState,
    ) -> ApplyResult {
        let id = required_id(current)?;

        let mut request = UpdateNetworkRequest {
            id: id.clone(),
            ..Default::default()
        };
        if planned.get("name") != current.get("name") {
            request.name = planned.get_string("name");
        }
        if planned.get("display_text").is_some()
            && planned.get("display_text") != current.get("display_text")
        {
            request.displaytext = planned.get_string("display_text");
        }
        if planned.get("network_offering") != current.get("network_offering") {
            let offering = planned.get_string("network_offering").unwrap_or_default();
            request.networkofferingid = Some(
                client
                    .network_offering_id(&offering)
                    .await
                    .map_err(|e| client_error("resolve network offering for", e))?,
            );
        }

        if request.name.is_some() || request.displaytext.is_some() || request.networkofferingid.is_some() {
            client
                .update_network(&request)
                .await
                .map_err(|e| client_error("update", e))?;
        }

        let old_tags = current.get_string_map("tags").unwrap_or_default();
        let new_tags = planned.get_string_map("tags").unwrap_or_default();
        if old_tags != new_tags {
            tags::set_tags(client, &old_tags, &new_tags, &id, RESOURCE_TYPE)
                .await
                .map_err(|e| client_error("update tags of", e))?;
        }

        let network = client
            .get_network(&id)
            .await
            .map_err(|e| client_error("read", e))?;
        Ok(network_state(&network, planned))
    }

    async fn delete(&self, client: &CloudStackClient, current: &ResourceState) -> ResourceResult<()> {
        let id = required_id(current)?;

        match client.delete_network(&id).await {
            Ok(()) => Ok(()),
            Err(ClientError::NotFound(_)) => Ok(()),
            Err(e) => Err(client_error("delete", e)),
        }
    }
}
