//! Terraform Resources for CloudStack
//!
//! Defines the resources that can be managed via Terraform.

mod firewall;
mod network;
mod network_acl;

pub use firewall::FirewallRuleResource;
pub use network::NetworkResource;
pub use network_acl::NetworkAclRuleResource;

use crate::cidr;
use crate::client::CloudStackClient;
use crate::schema::{Diagnostic, ResourceSchema};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Result type for resource operations
pub type ResourceResult<T> = Result<T, Vec<Diagnostic>>;

/// Resource state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub values: HashMap<String, Value>,
}

impl ResourceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a state from a JSON object. Null or non-object values yield `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        value.as_object().map(|obj| Self {
            values: obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str()).map(String::from)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        self.get_i64(key).and_then(|v| i32::try_from(v).ok())
    }

    /// Read a set of strings. Returns `None` when the attribute is unset.
    pub fn get_string_set(&self, key: &str) -> Option<HashSet<String>> {
        self.get(key).and_then(|v| v.as_array()).map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
    }

    /// Read a map of strings. Returns `None` when the attribute is unset.
    pub fn get_string_map(&self, key: &str) -> Option<HashMap<String, String>> {
        self.get(key).and_then(|v| v.as_object()).map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    /// Set `key` only when `value` is present
    pub fn set_opt<T: Serialize>(&mut self, key: &str, value: Option<T>) {
        if let Some(value) = value {
            self.set(key, serde_json::json!(value));
        }
    }
}

/// Failure of a create or update
#[derive(Debug, Default)]
pub struct ApplyError {
    pub diagnostics: Vec<Diagnostic>,
    /// State to record despite the failure. `None` keeps the prior state,
    /// an empty state records that the remote object is gone.
    pub state: Option<ResourceState>,
}

impl ApplyError {
    pub fn with_state(mut self, state: ResourceState) -> Self {
        self.state = Some(state);
        self
    }
}

impl From<Vec<Diagnostic>> for ApplyError {
    fn from(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            diagnostics,
            state: None,
        }
    }
}

/// Result type for create and update
pub type ApplyResult = Result<ResourceState, ApplyError>;

/// Outcome of planning a resource change
#[derive(Debug, Clone, Default)]
pub struct PlannedChange {
    pub state: ResourceState,
    /// Attributes whose change forces the object to be replaced
    pub requires_replace: Vec<String>,
}

/// Resource trait
#[async_trait]
pub trait Resource: Send + Sync {
    /// Resource type name
    fn type_name(&self) -> &str;

    /// Get the schema for this resource
    fn schema(&self) -> ResourceSchema;

    /// Validate a configuration before planning
    fn validate(&self, config: &ResourceState) -> Vec<Diagnostic> {
        validate_required(&self.schema(), config)
    }

    /// Create a new resource
    async fn create(&self, client: &CloudStackClient, planned: &ResourceState) -> ApplyResult;

    /// Read an existing resource. An empty state means it no longer exists.
    async fn read(
        &self,
        client: &CloudStackClient,
        current: &ResourceState,
    ) -> ResourceResult<ResourceState>;

    /// Update an existing resource
    async fn update(
        &self,
        client: &CloudStackClient,
        current: &ResourceState,
        planned: &ResourceState,
    ) -> ApplyResult;

    /// Delete a resource
    async fn delete(&self, client: &CloudStackClient, current: &ResourceState) -> ResourceResult<()>;

    /// Plan changes
    fn plan_change(
        &self,
        prior: Option<&ResourceState>,
        proposed: &ResourceState,
    ) -> ResourceResult<PlannedChange> {
        Ok(plan_from_schema(&self.schema(), prior, proposed))
    }
}

/// Report every required attribute missing from `config`
pub fn validate_required(schema: &ResourceSchema, config: &ResourceState) -> Vec<Diagnostic> {
    schema
        .block
        .required_attributes()
        .into_iter()
        .filter(|name| config.get(name).is_none())
        .map(|name| {
            Diagnostic::error(&format!("Missing required argument \"{}\"", name))
                .for_attribute(name)
        })
        .collect()
}

/// Default planning: keep the proposed values, carry computed values over
/// from the prior state, fill schema defaults and mark changed `force_new`
/// attributes.
pub fn plan_from_schema(
    schema: &ResourceSchema,
    prior: Option<&ResourceState>,
    proposed: &ResourceState,
) -> PlannedChange {
    let mut state = proposed.clone();
    let mut requires_replace = Vec::new();

    if let Some(prior) = prior {
        for name in schema.block.computed_attributes() {
            if state.get(name).is_none() {
                if let Some(value) = prior.get(name) {
                    state.set(name, value.clone());
                }
            }
        }
    }

    for (name, attr) in &schema.block.attributes {
        if attr.optional && state.get(name).is_none() {
            if let Some(default) = &attr.default {
                state.set(name, default.clone());
            }
        }
    }

    if let Some(prior) = prior {
        // Compare against the planned value so carried-over computed
        // values do not count as a change
        for name in schema.block.force_new_attributes() {
            if prior.get(name) != state.get(name) {
                requires_replace.push(name.to_string());
            }
        }
        requires_replace.sort();
    }

    PlannedChange {
        state,
        requires_replace,
    }
}

/// Pick the `cidr_list` value to store after a refresh.
///
/// When the remote list holds the same CIDRs as the configured set, the
/// configured value is kept verbatim so Terraform sees no change. Otherwise
/// the normalized remote list is returned and shows up as drift.
pub fn reconcile_cidr_list(remote: &str, current: &ResourceState) -> Value {
    let configured = current.get_string_set("cidr_list");
    if cidr::sets_equal(remote, configured.as_ref()) {
        if let Some(value) = current.get("cidr_list") {
            return value.clone();
        }
    }
    serde_json::json!(cidr::normalize_remote(remote))
}

/// Keep the configured protocol spelling when it names the remote protocol
pub fn reconcile_protocol(remote: &str, current: &ResourceState) -> Value {
    match current.get_string("protocol") {
        Some(configured) if configured.eq_ignore_ascii_case(remote) => Value::String(configured),
        _ => Value::String(remote.to_string()),
    }
}

/// Protocols accepted by firewall and ACL rules
const RULE_PROTOCOLS: [&str; 4] = ["tcp", "udp", "icmp", "all"];

/// Checks shared by the rule resources
pub fn validate_rule(config: &ResourceState) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let cidrs = cidr::normalize_local(config.get_string_set("cidr_list").as_ref());
    if cidrs.is_empty() {
        diagnostics.push(
            Diagnostic::error("cidr_list must contain at least one CIDR").for_attribute("cidr_list"),
        );
    }

    let protocol = config.get_string("protocol").unwrap_or_default().to_lowercase();
    let numeric = protocol.parse::<u8>().is_ok();
    if !RULE_PROTOCOLS.contains(&protocol.as_str()) && !numeric {
        diagnostics.push(
            Diagnostic::error(&format!("Unsupported protocol \"{}\"", protocol))
                .with_detail("Valid protocols are tcp, udp, icmp, all or a protocol number")
                .for_attribute("protocol"),
        );
        return diagnostics;
    }

    match protocol.as_str() {
        "tcp" | "udp" => {
            let start = config.get_i64("start_port");
            let end = config.get_i64("end_port");
            match start {
                None => diagnostics.push(
                    Diagnostic::error(&format!("start_port is required for protocol {}", protocol))
                        .for_attribute("start_port"),
                ),
                Some(port) if !(1..=65535).contains(&port) => diagnostics.push(
                    Diagnostic::error(&format!("start_port {} is out of range", port))
                        .for_attribute("start_port"),
                ),
                Some(start) => {
                    if let Some(end) = end {
                        if end < start || end > 65535 {
                            diagnostics.push(
                                Diagnostic::error(&format!(
                                    "end_port {} must be between start_port {} and 65535",
                                    end, start
                                ))
                                .for_attribute("end_port"),
                            );
                        }
                    }
                }
            }
        }
        "icmp" => {
            for name in ["icmp_type", "icmp_code"] {
                if config.get_i64(name).is_none() {
                    diagnostics.push(
                        Diagnostic::error(&format!("{} is required for protocol icmp", name))
                            .for_attribute(name),
                    );
                }
            }
        }
        _ => {}
    }

    diagnostics
}

/// Get all available resources
pub fn get_all_resources() -> Vec<Box<dyn Resource>> {
    vec![
        Box::new(FirewallRuleResource::ingress()),
        Box::new(FirewallRuleResource::egress()),
        Box::new(NetworkAclRuleResource::new()),
        Box::new(NetworkResource::new()),
    ]
}
