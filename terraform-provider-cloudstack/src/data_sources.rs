//! Terraform Data Sources for CloudStack
//!
//! Read-only lookups that filter CloudStack list responses down to exactly
//! one object.

use crate::client::{CloudStackClient, Params};
use crate::resources::{validate_required, ResourceResult, ResourceState};
use crate::schema::{AttributeType, Diagnostic, ResourceSchema, SchemaAttribute, SchemaBlock};
use async_trait::async_trait;

/// Data source trait
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Data source type name
    fn type_name(&self) -> &str;

    /// Get the schema for this data source
    fn schema(&self) -> ResourceSchema;

    fn validate(&self, config: &ResourceState) -> Vec<Diagnostic> {
        validate_required(&self.schema(), config)
    }

    /// Look up the object described by `config`
    async fn read(
        &self,
        client: &CloudStackClient,
        config: &ResourceState,
    ) -> ResourceResult<ResourceState>;
}

/// Reduce a list of candidates to the single one named `name`
fn single_match<T>(kind: &str, name: &str, matches: Vec<T>) -> ResourceResult<T> {
    let count = matches.len();
    let mut matches = matches.into_iter();
    match (matches.next(), count) {
        (Some(item), 1) => Ok(item),
        (None, _) => Err(vec![Diagnostic::error(&format!(
            "No {} found matching \"{}\"",
            kind, name
        ))]),
        _ => Err(vec![Diagnostic::error(&format!(
            "Found {} {}s matching \"{}\"",
            count, kind, name
        ))
        .with_detail("Narrow the lookup so it matches exactly one")]),
    }
}

// ============================================================================
// Zone Data Source
// ============================================================================

pub struct ZoneDataSource;

#[async_trait]
impl DataSource for ZoneDataSource {
    fn type_name(&self) -> &str {
        "cloudstack_zone"
    }

    fn schema(&self) -> ResourceSchema {
        let block = SchemaBlock::new()
            .with_attribute(
                "name",
                SchemaAttribute::string()
                    .with_description("Zone name")
                    .required(),
            )
            .with_attribute("id", SchemaAttribute::string().computed())
            .with_attribute(
                "network_type",
                SchemaAttribute::string()
                    .with_description("Basic or Advanced")
                    .computed(),
            )
            .with_attribute(
                "allocation_state",
                SchemaAttribute::string()
                    .with_description("Enabled or Disabled")
                    .computed(),
            )
            .with_description("Looks up a CloudStack zone by name");

        ResourceSchema::new(0, block)
    }

    async fn read(
        &self,
        client: &CloudStackClient,
        config: &ResourceState,
    ) -> ResourceResult<ResourceState> {
        let name = config.get_string("name").unwrap_or_default();

        let mut params = Params::new();
        params.insert("name".to_string(), name.clone());
        let zones = client
            .list_zones(params)
            .await
            .map_err(|e| vec![Diagnostic::error(&format!("Failed to list zones: {}", e))])?;

        let zones: Vec<_> = zones.into_iter().filter(|z| z.name == name).collect();
        let zone = single_match("zone", &name, zones)?;

        let mut state = ResourceState::new();
        state.set("id", serde_json::json!(zone.id));
        state.set("name", serde_json::json!(zone.name));
        state.set_opt("network_type", zone.networktype);
        state.set_opt("allocation_state", zone.allocationstate);
        Ok(state)
    }
}

// ============================================================================
// Network Data Source
// ============================================================================

pub struct NetworkDataSource;

#[async_trait]
impl DataSource for NetworkDataSource {
    fn type_name(&self) -> &str {
        "cloudstack_network"
    }

    fn schema(&self) -> ResourceSchema {
        let block = SchemaBlock::new()
            .with_attribute(
                "name",
                SchemaAttribute::string()
                    .with_description("Network name")
                    .required(),
            )
            .with_attribute(
                "zone",
                SchemaAttribute::string()
                    .with_description("Name or ID of the zone to search in")
                    .optional(),
            )
            .with_attribute(
                "vpc_id",
                SchemaAttribute::string()
                    .with_description("Only consider tiers of this VPC")
                    .optional(),
            )
            .with_attribute("id", SchemaAttribute::string().computed())
            .with_attribute("cidr", SchemaAttribute::string().computed())
            .with_attribute("gateway", SchemaAttribute::string().computed())
            .with_attribute(
                "tags",
                SchemaAttribute::map(AttributeType::String).computed(),
            )
            .with_description("Looks up a CloudStack network by name");

        ResourceSchema::new(0, block)
    }

    async fn read(
        &self,
        client: &CloudStackClient,
        config: &ResourceState,
    ) -> ResourceResult<ResourceState> {
        let name = config.get_string("name").unwrap_or_default();

        let mut params = Params::new();
        params.insert("keyword".to_string(), name.clone());
        params.insert("listall".to_string(), "true".to_string());
        if let Some(zone) = config.get_string("zone") {
            let zone_id = client.zone_id(&zone).await.map_err(|e| {
                vec![Diagnostic::error(&format!("Failed to resolve zone {}: {}", zone, e))
                    .for_attribute("zone")]
            })?;
            params.insert("zoneid".to_string(), zone_id);
        }
        if let Some(vpc_id) = config.get_string("vpc_id") {
            params.insert("vpcid".to_string(), vpc_id);
        }

        let networks = client
            .list_networks(params)
            .await
            .map_err(|e| vec![Diagnostic::error(&format!("Failed to list networks: {}", e))])?;

        // keyword matching is a substring search
        let networks: Vec<_> = networks.into_iter().filter(|n| n.name == name).collect();
        let network = single_match("network", &name, networks)?;

        let mut state = config.clone();
        state.set("id", serde_json::json!(network.id));
        state.set_opt("cidr", network.cidr.as_ref());
        state.set_opt("gateway", network.gateway.as_ref());
        state.set("tags", serde_json::json!(network.tag_map()));
        Ok(state)
    }
}

/// Get all available data sources
pub fn get_all_data_sources() -> Vec<Box<dyn DataSource>> {
    vec![Box::new(ZoneDataSource), Box::new(NetworkDataSource)]
}
