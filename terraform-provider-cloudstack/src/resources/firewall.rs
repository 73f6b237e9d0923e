//! Ingress and egress firewall rules
//!
//! Both rule kinds share the same attributes and lifecycle and only differ
//! in the object they hang off (a public IP or a guest network) and the API
//! commands used. CloudStack cannot modify a firewall rule in place, so an
//! update replaces the remote rule.

use super::{
    reconcile_cidr_list, reconcile_protocol, validate_required, validate_rule, ApplyError,
    ApplyResult, Resource, ResourceResult, ResourceState,
};
use crate::cidr;
use crate::client::{ClientError, CloudStackClient, CreateFirewallRuleRequest, FirewallRule};
use crate::schema::{AttributeType, Diagnostic, ResourceSchema, SchemaAttribute, SchemaBlock};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Ingress,
    Egress,
}

pub struct FirewallRuleResource {
    direction: Direction,
}

impl FirewallRuleResource {
    /// Rules on a public IP address
    pub fn ingress() -> Self {
        Self {
            direction: Direction::Ingress,
        }
    }

    /// Egress rules on a guest network
    pub fn egress() -> Self {
        Self {
            direction: Direction::Egress,
        }
    }

    /// Attribute naming the object the rule belongs to
    fn parent_attribute(&self) -> &'static str {
        match self.direction {
            Direction::Ingress => "ip_address_id",
            Direction::Egress => "network_id",
        }
    }

    fn label(&self) -> &'static str {
        match self.direction {
            Direction::Ingress => "firewall rule",
            Direction::Egress => "egress firewall rule",
        }
    }

    fn build_request(&self, planned: &ResourceState) -> CreateFirewallRuleRequest {
        let protocol = planned.get_string("protocol").unwrap_or_default().to_lowercase();
        let parent = planned.get_string(self.parent_attribute());

        let mut request = CreateFirewallRuleRequest {
            protocol: protocol.clone(),
            cidrlist: cidr::normalize_local(planned.get_string_set("cidr_list").as_ref()),
            ..Default::default()
        };
        match self.direction {
            Direction::Ingress => request.ipaddressid = parent,
            Direction::Egress => request.networkid = parent,
        }

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

    /// Build the Terraform state for a remote rule
    fn rule_state(&self, rule: &FirewallRule, current: &ResourceState) -> ResourceState {
        let mut state = ResourceState::new();
        state.set("id", serde_json::json!(rule.id));
        state.set("protocol", reconcile_protocol(&rule.protocol, current));
        state.set("cidr_list", reconcile_cidr_list(&rule.cidrlist, current));
        state.set_opt("start_port", rule.startport);
        state.set_opt("end_port", rule.endport);
        state.set_opt("icmp_type", rule.icmptype);
        state.set_opt("icmp_code", rule.icmpcode);

        let parent = match self.direction {
            Direction::Ingress => rule.ipaddressid.clone(),
            Direction::Egress => rule.networkid.clone(),
        }
        .or_else(|| current.get_string(self.parent_attribute()));
        state.set_opt(self.parent_attribute(), parent);

        state
    }

    async fn create_rule(
        &self,
        client: &CloudStackClient,
        request: &CreateFirewallRuleRequest,
    ) -> Result<FirewallRule, ClientError> {
        match self.direction {
            Direction::Ingress => client.create_firewall_rule(request).await,
            Direction::Egress => client.create_egress_firewall_rule(request).await,
        }
    }

    async fn get_rule(&self, client: &CloudStackClient, id: &str) -> Result<FirewallRule, ClientError> {
        match self.direction {
            Direction::Ingress => client.get_firewall_rule(id).await,
            Direction::Egress => client.get_egress_firewall_rule(id).await,
        }
    }

    async fn delete_rule(&self, client: &CloudStackClient, id: &str) -> Result<(), ClientError> {
        match self.direction {
            Direction::Ingress => client.delete_firewall_rule(id).await,
            Direction::Egress => client.delete_egress_firewall_rule(id).await,
        }
    }

    fn required_id(&self, state: &ResourceState) -> ResourceResult<String> {
        state.get_string("id").ok_or_else(|| {
            vec![Diagnostic::error(&format!("{} ID is required", self.label()))]
        })
    }
}

#[async_trait]
impl Resource for FirewallRuleResource {
    fn type_name(&self) -> &str {
        match self.direction {
            Direction::Ingress => "cloudstack_firewall_rule",
            Direction::Egress => "cloudstack_egress_firewall_rule",
        }
    }

    fn schema(&self) -> ResourceSchema {
        let (parent_description, description) = match self.direction {
            Direction::Ingress => (
                "ID of the public IP address the rule applies to",
                "Manages a firewall rule on a CloudStack public IP address",
            ),
            Direction::Egress => (
                "ID of the guest network the rule applies to",
                "Manages an egress firewall rule on a CloudStack guest network",
            ),
        };

        let block = SchemaBlock::new()
            .with_attribute(
                "id",
                SchemaAttribute::string()
                    .with_description("Rule ID")
                    .computed(),
            )
            .with_attribute(
                self.parent_attribute(),
                SchemaAttribute::string()
                    .with_description(parent_description)
                    .required()
                    .force_new(),
            )
            .with_attribute(
                "protocol",
                SchemaAttribute::string()
                    .with_description("Protocol (tcp, udp, icmp, all)")
                    .required(),
            )
            .with_attribute(
                "cidr_list",
                SchemaAttribute::set(AttributeType::String)
                    .with_description("Source CIDRs the rule allows")
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
            .with_description(description);

        ResourceSchema::new(0, block)
    }

    fn validate(&self, config: &ResourceState) -> Vec<Diagnostic> {
        let mut diagnostics = validate_required(&self.schema(), config);
        diagnostics.extend(validate_rule(config));
        diagnostics
    }

    async fn create(&self, client: &CloudStackClient, planned: &ResourceState) -> ApplyResult {
        let request = self.build_request(planned);

        match self.create_rule(client, &request).await {
            Ok(rule) => {
                tracing::info!(id = %rule.id, "Created {}", self.label());
                Ok(self.rule_state(&rule, planned))
            }
            Err(e) => Err(vec![Diagnostic::error(&format!(
                "Failed to create {}: {}",
                self.label(),
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
        let id = self.required_id(current)?;

        match self.get_rule(client, &id).await {
            Ok(rule) => Ok(self.rule_state(&rule, current)),
            Err(ClientError::NotFound(_)) => {
                tracing::debug!(%id, "{} no longer exists", self.label());
                Ok(ResourceState::new())
            }
            Err(e) => Err(vec![Diagnostic::error(&format!(
                "Failed to read {}: {}",
                self.label(),
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
        let id = self.required_id(current)?;

        // CloudStack rejects overlapping port ranges on the same parent, so
        // the old rule has to go before the replacement is created
        match self.delete_rule(client, &id).await {
            Ok(()) | Err(ClientError::NotFound(_)) => {}
            Err(e) => {
                return Err(vec![Diagnostic::error(&format!(
                    "Failed to replace {}: {}",
                    self.label(),
                    e
                ))]
                .into())
            }
        }

        // The old rule is gone either way, so a failed create leaves nothing
        // for the state to point at
        self.create(client, planned).await.map_err(|err| {
            ApplyError::from(
                err.diagnostics
                    .into_iter()
                    .map(|d| d.with_detail(&format!("Rule {} was already removed", id)))
                    .collect::<Vec<_>>(),
            )
            .with_state(ResourceState::new())
        })
    }

    async fn delete(&self, client: &CloudStackClient, current: &ResourceState) -> ResourceResult<()> {
        let id = self.required_id(current)?;

        match self.delete_rule(client, &id).await {
            Ok(()) => Ok(()),
            Err(ClientError::NotFound(_)) => Ok(()), // Already deleted
            Err(e) => Err(vec![Diagnostic::error(&format!(
                "Failed to delete {}: {}",
                self.label(),
                e
            ))]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub_api;
    use serde_json::json;

    fn planned(value: serde_json::Value) -> ResourceState {
        ResourceState::from_json(&value).unwrap()
    }

    fn remote_rule(cidrlist: &str) -> FirewallRule {
        serde_json::from_value(json!({
            "id": "rule-1",
            "protocol": "tcp",
            "cidrlist": cidrlist,
            "startport": 80,
            "endport": 80,
            "ipaddressid": "ip-1",
            "state": "Active"
        }))
        .unwrap()
    }

    #[test]
    fn test_schema_parent_attribute() {
        let ingress = FirewallRuleResource::ingress().schema();
        assert!(ingress.block.attributes["ip_address_id"].force_new);
        assert!(!ingress.block.attributes.contains_key("network_id"));

        let egress = FirewallRuleResource::egress().schema();
        assert!(egress.block.attributes["network_id"].required);
        assert!(egress.block.attributes.contains_key("cidr_list"));
    }

    #[test]
    fn test_build_request_tcp() {
        let resource = FirewallRuleResource::ingress();
        let request = resource.build_request(&planned(json!({
            "ip_address_id": "ip-1",
            "protocol": "TCP",
            "cidr_list": ["192.168.1.0/24 ", "10.0.0.0/8", ""],
            "start_port": 443,
            "icmp_type": 8
        })));

        assert_eq!(request.ipaddressid, Some("ip-1".to_string()));
        assert!(request.networkid.is_none());
        assert_eq!(request.protocol, "tcp");
        assert_eq!(request.cidrlist, vec!["10.0.0.0/8", "192.168.1.0/24"]);
        assert_eq!(request.startport, Some(443));
        assert_eq!(request.endport, Some(443));
        assert!(request.icmptype.is_none());
    }

    #[test]
    fn test_build_request_egress_icmp() {
        let resource = FirewallRuleResource::egress();
        let request = resource.build_request(&planned(json!({
            "network_id": "net-1",
            "protocol": "icmp",
            "cidr_list": ["0.0.0.0/0"],
            "icmp_type": -1,
            "icmp_code": -1
        })));

        assert_eq!(request.networkid, Some("net-1".to_string()));
        assert!(request.ipaddressid.is_none());
        assert_eq!(request.icmptype, Some(-1));
        assert_eq!(request.icmpcode, Some(-1));
        assert!(request.startport.is_none());
    }

    #[test]
    fn test_rule_state_without_drift() {
        let resource = FirewallRuleResource::ingress();
        let current = planned(json!({
            "id": "rule-1",
            "ip_address_id": "ip-1",
            "cidr_list": ["192.168.1.0/24", "10.0.0.0/8"]
        }));

        let state = resource.rule_state(&remote_rule("10.0.0.0/8, 192.168.1.0/24"), &current);
        assert_eq!(state.get("cidr_list"), current.get("cidr_list"));
        assert_eq!(state.get_string("ip_address_id"), Some("ip-1".to_string()));
        assert_eq!(state.get_i64("start_port"), Some(80));
        assert!(state.get("icmp_type").is_none());
    }

    #[test]
    fn test_rule_state_with_drift() {
        let resource = FirewallRuleResource::ingress();
        let current = planned(json!({"id": "rule-1", "cidr_list": ["10.0.0.0/8"]}));

        let state = resource.rule_state(&remote_rule("10.0.0.0/8,172.16.0.0/12"), &current);
        assert_eq!(state.get("cidr_list"), Some(&json!(["10.0.0.0/8", "172.16.0.0/12"])));
    }

    #[test]
    fn test_rule_state_keeps_protocol_spelling() {
        let resource = FirewallRuleResource::ingress();
        let current = planned(json!({"id": "rule-1", "protocol": "TCP", "cidr_list": ["10.0.0.0/8"]}));

        let state = resource.rule_state(&remote_rule("10.0.0.0/8"), &current);
        assert_eq!(state.get_string("protocol"), Some("TCP".to_string()));

        let state = resource.rule_state(&remote_rule("10.0.0.0/8"), &planned(json!({"protocol": "udp"})));
        assert_eq!(state.get_string("protocol"), Some("tcp".to_string()));
    }

    fn ssh_rule(port: i64) -> ResourceState {
        planned(json!({
            "id": "rule-1",
            "ip_address_id": "ip-1",
            "protocol": "tcp",
            "cidr_list": ["10.0.0.0/8"],
            "start_port": port
        }))
    }

    #[tokio::test]
    async fn test_update_records_removed_rule_when_recreate_fails() {
        let (client, calls) = stub_api::serve(|command| {
            stub_api::job_done(command).unwrap_or_else(|| match command {
                "deleteFirewallRule" => json!({"deletefirewallruleresponse": {"jobid": "job-1"}}),
                _ => stub_api::api_failure(command, "port range conflicts"),
            })
        })
        .await;

        let resource = FirewallRuleResource::ingress();
        let err = resource
            .update(&client, &ssh_rule(22), &ssh_rule(2222))
            .await
            .unwrap_err();

        assert!(err.state.unwrap().is_empty());
        assert!(err.diagnostics[0].summary.contains("port range conflicts"));
        assert_eq!(
            err.diagnostics[0].detail.as_deref(),
            Some("Rule rule-1 was already removed")
        );
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["deleteFirewallRule", "queryAsyncJobResult", "createFirewallRule"]
        );
    }

    #[tokio::test]
    async fn test_update_keeps_rule_when_delete_fails() {
        let (client, calls) =
            stub_api::serve(|command| stub_api::api_failure(command, "rule is busy")).await;

        let resource = FirewallRuleResource::ingress();
        let err = resource
            .update(&client, &ssh_rule(22), &ssh_rule(2222))
            .await
            .unwrap_err();

        assert!(err.state.is_none());
        assert!(err.diagnostics[0].summary.contains("Failed to replace"));
        assert_eq!(*calls.lock().unwrap(), vec!["deleteFirewallRule"]);
    }

    #[test]
    fn test_validate_combines_required_and_rule_checks() {
        let resource = FirewallRuleResource::egress();
        let diags = resource.validate(&planned(json!({"protocol": "tcp", "cidr_list": ["10.0.0.0/8"]})));
        let attributes: Vec<_> = diags.iter().filter_map(|d| d.attribute.clone()).collect();
        assert!(attributes.contains(&vec!["network_id".to_string()]));
        assert!(attributes.contains(&vec!["start_port".to_string()]));
    }
}
