//! Network ACL rules of a VPC

use super::{
    reconcile_cidr_list, reconcile_protocol, validate_required, validate_rule, ApplyResult,
    Resource, ResourceResult, ResourceState,
};
use crate::cidr;
use crate::client::{ClientError, CloudStackClient, NetworkAclItem, NetworkAclItemRequest};
use crate::schema::{AttributeType, Diagnostic, ResourceSchema, SchemaAttribute, SchemaBlock};
use async_trait::async_trait;

const ACTIONS: [&str; 2] = ["allow", "deny"];
const TRAFFIC_TYPES: [&str; 2] = ["ingress", "egress"];

pub struct NetworkAclRuleResource;

impl NetworkAclRuleResource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NetworkAclRuleResource {
    fn default() -> Self {
        Self::new()
    }
}

fn build_request(planned: &ResourceState) -> NetworkAclItemRequest {
    let protocol = planned.get_string("protocol").unwrap_or_default().to_lowercase();

    let mut request = NetworkAclItemRequest {
        action: planned.get_string("action").unwrap_or_else(|| "allow".to_string()),
        traffictype: planned
            .get_string("traffic_type")
            .unwrap_or_else(|| "ingress".to_string()),
        protocol: protocol.clone(),
        cidrlist: cidr::normalize_local(planned.get_string_set("cidr_list").as_ref()),
        number: planned.get_i64("rule_number"),
        reason: planned.get_string("description"),
        ..Default::default()
    };

    match protocol.as_str() {
        "tcp" | "udp" => {
            request.startport = planned.get_i32("start_port");
            request.endport = planned.get_i32("end_port").or(request.startport);
        }
        "icmp" => {
            request.icmptype = planned.get_i32("icmp_type");
            request.icmpcode = planned.get_i32("icmp_code");
        }
        _ => {}
    }

    request
}

fn item_state(item: &NetworkAclItem, current: &ResourceState) -> ResourceState {
    let mut state = ResourceState::new();
    state.set("id", serde_json::json!(item.id));
    state.set("acl_id", serde_json::json!(item.aclid));
    state.set("action", serde_json::json!(item.action.to_lowercase()));
    state.set("traffic_type", serde_json::json!(item.traffictype.to_lowercase()));
    state.set("protocol", reconcile_protocol(&item.protocol, current));
    state.set("cidr_list", reconcile_cidr_list(&item.cidrlist, current));
    state.set_opt("start_port", item.startport);
    state.set_opt("end_port", item.endport);
    state.set_opt("icmp_type", item.icmptype);
    state.set_opt("icmp_code", item.icmpcode);
    state.set_opt("rule_number", item.number);
    state.set_opt(
        "description",
        item.reason.as_ref().filter(|r| !r.is_empty()),
    );
    state
}

fn required_id(state: &ResourceState) -> ResourceResult<String> {
    state
        .get_string("id")
        .ok_or_else(|| vec![Diagnostic::error("Network ACL rule ID is required")])
}

#[async_trait]
impl Resource for NetworkAclRuleResource {
    fn type_name(&self) -> &str {
        "cloudstack_network_acl_rule"
    }

    fn schema(&self) -> ResourceSchema {
        let block = SchemaBlock::new()
            .with_attribute(
                "id",
                SchemaAttribute::string()
                    .with_description("ACL rule ID")
                    .computed(),
            )
            .with_attribute(
                "acl_id",
                SchemaAttribute::string()
                    .with_description("ID of the network ACL list")
                    .required()
                    .force_new(),
            )
            .with_attribute(
                "action",
                SchemaAttribute::string()
                    .with_description("Action (allow, deny)")
                    .optional()
                    .with_default(serde_json::json!("allow")),
            )
            .with_attribute(
                "traffic_type",
                SchemaAttribute::string()
                    .with_description("Traffic type (ingress, egress)")
                    .optional()
                    .with_default(serde_json::json!("ingress")),
            )
            .with_attribute(
                "protocol",
                SchemaAttribute::string()
                    .with_description("Protocol (tcp, udp, icmp, all or a protocol number)")
                    .required(),
            )
            .with_attribute(
                "cidr_list",
                SchemaAttribute::set(AttributeType::String)
                    .with_description("CIDRs the rule matches")
                    .required(),
            )
            .with_attribute(
                "start_port",
                SchemaAttribute::number()
                    .with_description("First port of the range (tcp/udp)")
                    .optional(),
            )
            .with_attribute(
                "end_port",
                SchemaAttribute::number()
                    .with_description("Last port of the range, defaults to start_port")
                    .optional()
                    .computed(),
            )
            .with_attribute(
                "icmp_type",
                SchemaAttribute::number()
                    .with_description("ICMP type (icmp only)")
                    .optional(),
            )
            .with_attribute(
                "icmp_code",
                SchemaAttribute::number()
                    .with_description("ICMP code (icmp only)")
                    .optional(),
            )
            .with_attribute(
                "rule_number",
                SchemaAttribute::number()
                    .with_description("Evaluation order of the rule within the list")
                    .optional()
                    .computed(),
            )
            .with_attribute(
                "description",
                SchemaAttribute::string()
                    .with_description("Rule description")
                    .optional(),
            )
            .with_description("Manages a rule in a CloudStack VPC network ACL list");

        ResourceSchema::new(0, block)
    }

    fn validate(&self, config: &ResourceState) -> Vec<Diagnostic> {
        let mut diagnostics = validate_required(&self.schema(), config);
        diagnostics.extend(validate_rule(config));

        if let Some(action) = config.get_string("action") {
            if !ACTIONS.contains(&action.to_lowercase().as_str()) {
                diagnostics.push(
                    Diagnostic::error(&format!("Unsupported action \"{}\"", action))
                        .for_attribute("action"),
                );
            }
        }
        if let Some(traffic_type) = config.get_string("traffic_type") {
            if !TRAFFIC_TYPES.contains(&traffic_type.to_lowercase().as_str()) {
                diagnostics.push(
                    Diagnostic::error(&format!("Unsupported traffic type \"{}\"", traffic_type))
                        .for_attribute("traffic_type"),
                );
            }
        }

        diagnostics
    }

    async fn create(&self, client: &CloudStackClient, planned: &ResourceState) -> ApplyResult {
        let mut request = build_request(planned);
        request.aclid = planned.get_string("acl_id");

        match client.create_network_acl_item(&request).await {
            Ok(item) => {
                tracing::info!(id = %item.id, acl_id = %item.aclid, "Created network ACL rule");
                Ok(item_state(&item, planned))
            }
            Err(e) => Err(vec![Diagnostic::error(&format!(
                "Failed to create network ACL rule: {}",
                e
            ))]
            .into()),
        }
    }

    async fn read(
        &self,
        client: &CloudStackClient,
        current: &ResourceState,
    ) -> ResourceResult<ResourceState> {
        let id = required_id(current)?;

        match client.get_network_acl_item(&id).await {
            Ok(item) => Ok(item_state(&item, current)),
            Err(ClientError::NotFound(_)) => Ok(ResourceState::new()),
            Err(e) => Err(vec![Diagnostic::error(&format!(
                "Failed to read network ACL rule: {}",
                e
            ))]),
        }
    }

    async fn update(
        &self,
        client: &CloudStackClient,
        current: &ResourceState,
        planned: &ResourceState,
    ) -> ApplyResult {
        let id = required_id(current)?;

        let mut request = build_request(planned);
        request.id = Some(id);

        match client.update_network_acl_item(&request).await {
            Ok(item) => Ok(item_state(&item, planned)),
            Err(e) => Err(vec![Diagnostic::error(&format!(
                "Failed to update network ACL rule: {}",
                e
            ))]
            .into()),
        }
    }

    async fn delete(&self, client: &CloudStackClient, current: &ResourceState) -> ResourceResult<()> {
        let id = required_id(current)?;

        match client.delete_network_acl_item(&id).await {
            Ok(()) => Ok(()),
            Err(ClientError::NotFound(_)) => Ok(()),
            Err(e) => Err(vec![Diagnostic::error(&format!(
                "Failed to delete network ACL rule: {}",
                e
            ))]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(value: serde_json::Value) -> ResourceState {
        ResourceState::from_json(&value).unwrap()
    }

    #[test]
    fn test_build_request_defaults() {
        let request = build_request(&state(json!({
            "acl_id": "acl-1",
            "protocol": "all",
            "cidr_list": ["10.1.0.0/16"]
        })));

        assert_eq!(request.action, "allow");
        assert_eq!(request.traffictype, "ingress");
        assert_eq!(request.cidrlist, vec!["10.1.0.0/16"]);
        assert!(request.startport.is_none());
        assert!(request.number.is_none());
        // acl id is set by create only
        assert!(request.aclid.is_none());
    }

    #[test]
    fn test_build_request_ports() {
        let request = build_request(&state(json!({
            "protocol": "udp",
            "action": "deny",
            "traffic_type": "egress",
            "cidr_list": ["10.1.0.0/16"],
            "start_port": 53,
            "end_port": 54,
            "rule_number": 10,
            "description": "dns"
        })));

        assert_eq!(request.action, "deny");
        assert_eq!(request.traffictype, "egress");
        assert_eq!(request.startport, Some(53));
        assert_eq!(request.endport, Some(54));
        assert_eq!(request.number, Some(10));
        assert_eq!(request.reason, Some("dns".to_string()));
    }

    #[test]
    fn test_item_state() {
        let item: NetworkAclItem = serde_json::from_value(json!({
            "id": "item-1",
            "aclid": "acl-1",
            "action": "Allow",
            "traffictype": "Ingress",
            "protocol": "tcp",
            "cidrlist": "10.0.0.0/8,192.168.0.0/16",
            "startport": 22,
            "endport": 22,
            "number": 5,
            "reason": ""
        }))
        .unwrap();
        let current = state(json!({"protocol": "TCP", "cidr_list": ["192.168.0.0/16", "10.0.0.0/8"]}));

        let result = item_state(&item, &current);
        assert_eq!(result.get_string("action"), Some("allow".to_string()));
        assert_eq!(result.get_string("traffic_type"), Some("ingress".to_string()));
        assert_eq!(result.get("cidr_list"), current.get("cidr_list"));
        assert_eq!(result.get_string("protocol"), Some("TCP".to_string()));
        assert_eq!(result.get_i64("rule_number"), Some(5));
        assert!(result.get("description").is_none());
    }

    #[test]
    fn test_plan_applies_action_defaults() {
        let resource = NetworkAclRuleResource::new();
        let prior = state(json!({
            "id": "item-1",
            "acl_id": "acl-1",
            "action": "allow",
            "traffic_type": "ingress",
            "protocol": "all",
            "cidr_list": ["10.0.0.0/8"]
        }));
        let proposed = state(json!({
            "id": null,
            "acl_id": "acl-1",
            "action": null,
            "traffic_type": null,
            "protocol": "all",
            "cidr_list": ["10.0.0.0/8"]
        }));

        let plan = resource.plan_change(Some(&prior), &proposed).unwrap();
        assert_eq!(plan.state.get_string("action"), Some("allow".to_string()));
        assert_eq!(plan.state.get_string("traffic_type"), Some("ingress".to_string()));
        assert!(plan.requires_replace.is_empty());
    }

    #[test]
    fn test_validate_action_and_traffic_type() {
        let resource = NetworkAclRuleResource::new();
        let diags = resource.validate(&state(json!({
            "acl_id": "acl-1",
            "protocol": "all",
            "cidr_list": ["10.0.0.0/8"],
            "action": "permit",
            "traffic_type": "sideways"
        })));

        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].attribute, Some(vec!["action".to_string()]));
        assert_eq!(diags[1].attribute, Some(vec!["traffic_type".to_string()]));

        let numeric = state(json!({"acl_id": "acl-1", "protocol": "47", "cidr_list": ["10.0.0.0/8"]}));
        assert!(resource.validate(&numeric).is_empty());
    }
}
