//! Terraform Provider Implementation
//!
//! Implements the JSON-RPC plugin protocol for CloudStack.

use crate::client::{CloudStackClient, DEFAULT_TIMEOUT};
use crate::data_sources::{get_all_data_sources, DataSource};
use crate::resources::{get_all_resources, ApplyError, Resource, ResourceState};
use crate::schema::{
    Diagnostic, ProviderSchema, RpcRequest, RpcResponse, SchemaAttribute, SchemaBlock,
    INTERNAL_ERROR, METHOD_NOT_FOUND, PARSE_ERROR,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::runtime::Runtime;

/// Provider configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
    pub http_get_only: Option<bool>,
    /// Async job timeout in seconds
    pub timeout: Option<u64>,
    pub insecure: Option<bool>,
}

impl ProviderConfig {
    /// Fill unset fields from `CLOUDSTACK_*` environment variables
    pub fn with_env_defaults(self) -> Self {
        self.with_defaults_from(|key| std::env::var(key).ok())
    }

    fn with_defaults_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let flag = |key: &str| non_empty(key).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true"));

        if self.api_url.is_none() {
            self.api_url = non_empty("CLOUDSTACK_API_URL");
        }
        if self.api_key.is_none() {
            self.api_key = non_empty("CLOUDSTACK_API_KEY");
        }
        if self.secret_key.is_none() {
            self.secret_key = non_empty("CLOUDSTACK_SECRET_KEY");
        }
        if self.http_get_only.is_none() {
            self.http_get_only = flag("CLOUDSTACK_HTTP_GET_ONLY");
        }
        if self.timeout.is_none() {
            self.timeout = non_empty("CLOUDSTACK_TIMEOUT").and_then(|v| v.parse().ok());
        }
        if self.insecure.is_none() {
            self.insecure = flag("CLOUDSTACK_INSECURE");
        }
        self
    }

    /// Fill fields still unset from the schema defaults of `block`
    pub fn with_schema_defaults(mut self, block: &SchemaBlock) -> Self {
        let default = |name: &str| block.attributes.get(name).and_then(|a| a.default.clone());

        if self.http_get_only.is_none() {
            self.http_get_only = default("http_get_only").and_then(|v| v.as_bool());
        }
        if self.timeout.is_none() {
            self.timeout = default("timeout").and_then(|v| v.as_u64());
        }
        if self.insecure.is_none() {
            self.insecure = default("insecure").and_then(|v| v.as_bool());
        }
        self
    }
}

/// Schema of the provider block
fn provider_block() -> SchemaBlock {
    SchemaBlock::new()
        .with_attribute(
            "api_url",
            SchemaAttribute::string()
                .with_description("CloudStack API URL (e.g., https://cloud.example.com/client/api). Falls back to CLOUDSTACK_API_URL")
                .optional(),
        )
        .with_attribute(
            "api_key",
            SchemaAttribute::string()
                .with_description("API key. Falls back to CLOUDSTACK_API_KEY")
                .optional()
                .sensitive(),
        )
        .with_attribute(
            "secret_key",
            SchemaAttribute::string()
                .with_description("Secret key used to sign requests. Falls back to CLOUDSTACK_SECRET_KEY")
                .optional()
                .sensitive(),
        )
        .with_attribute(
            "http_get_only",
            SchemaAttribute::bool()
                .with_description("Send every command as a GET request")
                .optional()
                .with_default(json!(false)),
        )
        .with_attribute(
            "timeout",
            SchemaAttribute::number()
                .with_description("Seconds to wait for async jobs")
                .optional()
                .with_default(json!(DEFAULT_TIMEOUT.as_secs())),
        )
        .with_attribute(
            "insecure",
            SchemaAttribute::bool()
                .with_description("Skip TLS verification")
                .optional()
                .with_default(json!(false)),
        )
        .with_description("Apache CloudStack provider")
}

/// CloudStack Terraform Provider
pub struct CloudStackProvider {
    client: Arc<RwLock<Option<CloudStackClient>>>,
    resources: HashMap<String, Box<dyn Resource>>,
    data_sources: HashMap<String, Box<dyn DataSource>>,
    runtime: Runtime,
}

/// Read a state object out of the request parameters
fn state_param(params: &Value, key: &str) -> Option<ResourceState> {
    params.get(key).and_then(ResourceState::from_json)
}

/// State to report after a failed apply
fn recorded_state(failed: Option<ResourceState>, prior: Option<&ResourceState>) -> Value {
    match failed.as_ref().or(prior) {
        Some(state) if !state.is_empty() => json!(state.values),
        _ => Value::Null,
    }
}

fn type_name_param(params: &Value) -> &str {
    params
        .get("type_name")
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

impl CloudStackProvider {
    /// Create a new provider
    pub fn new() -> std::io::Result<Self> {
        let resources = get_all_resources()
            .into_iter()
            .map(|r| (r.type_name().to_string(), r))
            .collect();
        let data_sources = get_all_data_sources()
            .into_iter()
            .map(|d| (d.type_name().to_string(), d))
            .collect();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            client: Arc::new(RwLock::new(None)),
            resources,
            data_sources,
            runtime,
        })
    }

    /// Get provider schema
    fn get_schema(&self) -> ProviderSchema {
        let mut schema = ProviderSchema::new(provider_block());

        for (name, resource) in &self.resources {
            schema = schema.with_resource(name, resource.schema());
        }
        for (name, data_source) in &self.data_sources {
            schema = schema.with_data_source(name, data_source.schema());
        }

        schema
    }

    /// Configure the provider from a fully resolved configuration
    fn configure(&self, config: ProviderConfig) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for (name, value) in [
            ("api_url", &config.api_url),
            ("api_key", &config.api_key),
            ("secret_key", &config.secret_key),
        ] {
            if value.is_none() {
                diagnostics.push(
                    Diagnostic::error(&format!("{} is required", name))
                        .with_detail(&format!(
                            "Set it in the provider block or via CLOUDSTACK_{}",
                            name.to_uppercase()
                        ))
                        .for_attribute(name),
                );
            }
        }
        if diagnostics.iter().any(Diagnostic::is_error) {
            return diagnostics;
        }

        let timeout = config
            .timeout
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        let client = CloudStackClient::builder(
            config.api_url.as_deref().unwrap_or_default(),
            config.api_key.as_deref().unwrap_or_default(),
            config.secret_key.as_deref().unwrap_or_default(),
        )
        .http_get_only(config.http_get_only.unwrap_or(false))
        .insecure(config.insecure.unwrap_or(false))
        .timeout(timeout)
        .build();

        let client = match client {
            Ok(client) => client,
            Err(e) => {
                diagnostics.push(Diagnostic::error(&format!("Failed to create client: {}", e)));
                return diagnostics;
            }
        };

        if config.insecure.unwrap_or(false) {
            diagnostics.push(
                Diagnostic::warning("TLS certificate verification is disabled").for_attribute("insecure"),
            );
        }

        tracing::info!(api_url = client.api_url(), "Provider configured");

        match self.client.write() {
            Ok(mut slot) => *slot = Some(client),
            Err(_) => diagnostics.push(Diagnostic::error("Provider state lock poisoned")),
        }

        diagnostics
    }

    /// Get the configured client
    fn get_client(&self) -> Result<CloudStackClient, Diagnostic> {
        self.client
            .read()
            .map_err(|_| Diagnostic::error("Provider state lock poisoned"))?
            .clone()
            .ok_or_else(|| Diagnostic::error("Provider not configured"))
    }

    fn get_resource(&self, type_name: &str) -> Result<&dyn Resource, Diagnostic> {
        self.resources
            .get(type_name)
            .map(|r| r.as_ref())
            .ok_or_else(|| Diagnostic::error(&format!("Unknown resource type: {}", type_name)))
    }

    fn get_data_source(&self, type_name: &str) -> Result<&dyn DataSource, Diagnostic> {
        self.data_sources
            .get(type_name)
            .map(|d| d.as_ref())
            .ok_or_else(|| Diagnostic::error(&format!("Unknown data source type: {}", type_name)))
    }

    /// Handle an RPC request
    pub fn handle_request(&self, input: &str) -> String {
        let request: RpcRequest = match serde_json::from_str(input) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Unparseable request: {}", e);
                return serde_json::to_string(&RpcResponse::error(
                    0,
                    PARSE_ERROR,
                    &format!("Parse error: {}", e),
                ))
                .unwrap_or_default();
            }
        };

        tracing::debug!(id = request.id, method = %request.method, "Handling request");

        let id = request.id;
        let params = &request.params;
        let response = match request.method.as_str() {
            "GetProviderSchema" => self.handle_get_schema(id),
            "ConfigureProvider" => self.handle_configure(id, params),
            "ValidateResourceConfig" => self.handle_validate_resource(id, params),
            "ValidateDataSourceConfig" => self.handle_validate_data_source(id, params),
            "PlanResourceChange" => self.handle_plan_resource(id, params),
            "ApplyResourceChange" => self.handle_apply_resource(id, params),
            "ReadResource" => self.handle_read_resource(id, params),
            "ImportResourceState" => self.handle_import_resource(id, params),
            "ReadDataSource" => self.handle_read_data_source(id, params),
            "StopProvider" => RpcResponse::success(id, json!({})),
            _ => RpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                &format!("Method not found: {}", request.method),
            ),
        };

        serde_json::to_string(&response).unwrap_or_else(|e| {
            serde_json::to_string(&RpcResponse::error(
                id,
                INTERNAL_ERROR,
                &format!("Serialization error: {}", e),
            ))
            .unwrap_or_default()
        })
    }

    /// Handle GetProviderSchema
    fn handle_get_schema(&self, id: i64) -> RpcResponse {
        match serde_json::to_value(self.get_schema()) {
            Ok(schema) => RpcResponse::success(id, schema),
            Err(e) => RpcResponse::error(id, INTERNAL_ERROR, &format!("Serialization error: {}", e)),
        }
    }

    /// Handle ConfigureProvider
    fn handle_configure(&self, id: i64, params: &Value) -> RpcResponse {
        let config: ProviderConfig = match params.get("config").filter(|c| !c.is_null()) {
            Some(c) => match serde_json::from_value(c.clone()) {
                Ok(config) => config,
                Err(e) => {
                    return RpcResponse::diagnostics(
                        id,
                        &[Diagnostic::error(&format!("Invalid provider configuration: {}", e))],
                    )
                }
            },
            None => ProviderConfig::default(),
        };

        let config = config
            .with_env_defaults()
            .with_schema_defaults(&provider_block());
        RpcResponse::diagnostics(id, &self.configure(config))
    }

    /// Handle ValidateResourceConfig
    fn handle_validate_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let resource = match self.get_resource(type_name_param(params)) {
            Ok(r) => r,
            Err(diag) => return RpcResponse::diagnostics(id, &[diag]),
        };

        let config = state_param(params, "config").unwrap_or_default();
        RpcResponse::diagnostics(id, &resource.validate(&config))
    }

    /// Handle ValidateDataSourceConfig
    fn handle_validate_data_source(&self, id: i64, params: &Value) -> RpcResponse {
        let data_source = match self.get_data_source(type_name_param(params)) {
            Ok(d) => d,
            Err(diag) => return RpcResponse::diagnostics(id, &[diag]),
        };

        let config = state_param(params, "config").unwrap_or_default();
        RpcResponse::diagnostics(id, &data_source.validate(&config))
    }

    /// Handle PlanResourceChange
    fn handle_plan_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let resource = match self.get_resource(type_name_param(params)) {
            Ok(r) => r,
            Err(diag) => return RpcResponse::diagnostics(id, &[diag]),
        };

        // Destroy plans carry a null proposed state
        let proposed_state = match state_param(params, "proposed_new_state") {
            Some(state) => state,
            None => {
                return RpcResponse::success(
                    id,
                    json!({
                        "planned_state": null,
                        "diagnostics": []
                    }),
                )
            }
        };
        let prior_state = state_param(params, "prior_state");

        match resource.plan_change(prior_state.as_ref(), &proposed_state) {
            Ok(plan) => RpcResponse::success(
                id,
                json!({
                    "planned_state": plan.state.values,
                    "requires_replace": plan.requires_replace,
                    "diagnostics": []
                }),
            ),
            Err(diagnostics) => RpcResponse::diagnostics(id, &diagnostics),
        }
    }

    /// Handle ApplyResourceChange
    fn handle_apply_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let resource = match self.get_resource(type_name_param(params)) {
            Ok(r) => r,
            Err(diag) => return RpcResponse::diagnostics(id, &[diag]),
        };

        let client = match self.get_client() {
            Ok(c) => c,
            Err(diag) => return RpcResponse::diagnostics(id, &[diag]),
        };

        let planned_state = state_param(params, "planned_state");
        let prior_state = state_param(params, "prior_state");

        let result = self.runtime.block_on(async {
            match (prior_state.as_ref(), planned_state.as_ref()) {
                (Some(prior), None) => resource
                    .delete(&client, prior)
                    .await
                    .map(|_| None)
                    .map_err(ApplyError::from),
                (None, None) => Ok(None),
                (None, Some(planned)) => resource.create(&client, planned).await.map(Some),
                (Some(prior), Some(planned)) => {
                    resource.update(&client, prior, planned).await.map(Some)
                }
            }
        });

        match result {
            Ok(new_state) => RpcResponse::success(
                id,
                json!({
                    "new_state": new_state.map(|s| s.values),
                    "diagnostics": []
                }),
            ),
            Err(err) => RpcResponse::success(
                id,
                json!({
                    "new_state": recorded_state(err.state, prior_state.as_ref()),
                    "diagnostics": err.diagnostics
                }),
            ),
        }
    }

    /// Handle ReadResource
    fn handle_read_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let resource = match self.get_resource(type_name_param(params)) {
            Ok(r) => r,
            Err(diag) => return RpcResponse::diagnostics(id, &[diag]),
        };

        let client = match self.get_client() {
            Ok(c) => c,
            Err(diag) => return RpcResponse::diagnostics(id, &[diag]),
        };

        let current_state = state_param(params, "current_state").unwrap_or_default();

        let result = self
            .runtime
            .block_on(async { resource.read(&client, &current_state).await });

        match result {
            // Resource no longer exists
            Ok(state) if state.is_empty() => RpcResponse::success(
                id,
                json!({
                    "new_state": null,
                    "diagnostics": []
                }),
            ),
            Ok(state) => RpcResponse::success(
                id,
                json!({
                    "new_state": state.values,
                    "diagnostics": []
                }),
            ),
            Err(diagnostics) => RpcResponse::diagnostics(id, &diagnostics),
        }
    }

    /// Handle ImportResourceState
    fn handle_import_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let type_name = type_name_param(params);
        let resource_id = params.get("id").and_then(|v| v.as_str()).unwrap_or("");

        let resource = match self.get_resource(type_name) {
            Ok(r) => r,
            Err(diag) => return RpcResponse::diagnostics(id, &[diag]),
        };

        let client = match self.get_client() {
            Ok(c) => c,
            Err(diag) => return RpcResponse::diagnostics(id, &[diag]),
        };

        // Create a minimal state with just the ID for reading
        let mut import_state = ResourceState::new();
        import_state.set("id", json!(resource_id));

        let result = self
            .runtime
            .block_on(async { resource.read(&client, &import_state).await });

        match result {
            Ok(state) if state.is_empty() => RpcResponse::diagnostics(
                id,
                &[Diagnostic::error(&format!("Resource {} not found", resource_id))],
            ),
            Ok(state) => RpcResponse::success(
                id,
                json!({
                    "imported_resources": [{
                        "type_name": type_name,
                        "state": state.values
                    }],
                    "diagnostics": []
                }),
            ),
            Err(diagnostics) => RpcResponse::diagnostics(id, &diagnostics),
        }
    }

    /// Handle ReadDataSource
    fn handle_read_data_source(&self, id: i64, params: &Value) -> RpcResponse {
        let data_source = match self.get_data_source(type_name_param(params)) {
            Ok(d) => d,
            Err(diag) => return RpcResponse::diagnostics(id, &[diag]),
        };

        let client = match self.get_client() {
            Ok(c) => c,
            Err(diag) => return RpcResponse::diagnostics(id, &[diag]),
        };

        let config = state_param(params, "config").unwrap_or_default();

        let result = self
            .runtime
            .block_on(async { data_source.read(&client, &config).await });

        match result {
            Ok(state) => RpcResponse::success(
                id,
                json!({
                    "state": state.values,
                    "diagnostics": []
                }),
            ),
            Err(diagnostics) => RpcResponse::diagnostics(id, &diagnostics),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> CloudStackProvider {
        CloudStackProvider::new().unwrap()
    }

    fn call(provider: &CloudStackProvider, method: &str, params: Value) -> Value {
        let request = json!({"jsonrpc": "2.0", "id": 7, "method": method, "params": params});
        serde_json::from_str(&provider.handle_request(&request.to_string())).unwrap()
    }

    #[test]
    fn test_provider_creation() {
        let provider = provider();
        assert_eq!(provider.resources.len(), 4);
        assert_eq!(provider.data_sources.len(), 2);
    }

    #[test]
    fn test_provider_schema() {
        let schema = provider().get_schema();

        assert!(schema.provider.attributes.contains_key("api_url"));
        assert!(schema.provider.attributes["secret_key"].sensitive);
        assert!(schema.resource_schemas.contains_key("cloudstack_firewall_rule"));
        assert!(schema.resource_schemas.contains_key("cloudstack_network_acl_rule"));
        assert!(schema.data_source_schemas.contains_key("cloudstack_zone"));
    }

    #[test]
    fn test_handle_get_schema() {
        let response = call(&provider(), "GetProviderSchema", json!({}));
        assert_eq!(response["id"], 7);
        assert!(response["result"]["resource_schemas"].is_object());
        assert!(response["result"]["data_source_schemas"]["cloudstack_network"].is_object());
    }

    #[test]
    fn test_handle_unknown_method() {
        let response = call(&provider(), "UnknownMethod", json!({}));
        assert_eq!(response["error"]["code"], METHOD_NOT_FOUND);
        assert!(response["error"]["message"]
            .as_str()
            .unwrap()
            .contains("Method not found"));
    }

    #[test]
    fn test_handle_parse_error() {
        let response: Value = serde_json::from_str(&provider().handle_request("{not json")).unwrap();
        assert_eq!(response["error"]["code"], PARSE_ERROR);
    }

    #[test]
    fn test_env_defaults_fill_missing_fields() {
        let env: HashMap<&str, &str> = [
            ("CLOUDSTACK_API_URL", "https://cloud.example.com/client/api"),
            ("CLOUDSTACK_API_KEY", "env-key"),
            ("CLOUDSTACK_SECRET_KEY", "env-secret"),
            ("CLOUDSTACK_HTTP_GET_ONLY", "TRUE"),
            ("CLOUDSTACK_TIMEOUT", "120"),
        ]
        .into_iter()
        .collect();

        let config = ProviderConfig {
            api_key: Some("configured-key".to_string()),
            ..Default::default()
        }
        .with_defaults_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.api_url.as_deref(), Some("https://cloud.example.com/client/api"));
        assert_eq!(config.api_key.as_deref(), Some("configured-key"));
        assert_eq!(config.secret_key.as_deref(), Some("env-secret"));
        assert_eq!(config.http_get_only, Some(true));
        assert_eq!(config.timeout, Some(120));
        assert_eq!(config.insecure, None);
    }

    #[test]
    fn test_schema_defaults_fill_after_environment() {
        let config = ProviderConfig {
            insecure: Some(true),
            ..Default::default()
        }
        .with_defaults_from(|key| (key == "CLOUDSTACK_TIMEOUT").then(|| "60".to_string()))
        .with_schema_defaults(&provider_block());

        assert_eq!(config.timeout, Some(60));
        assert_eq!(config.http_get_only, Some(false));
        assert_eq!(config.insecure, Some(true));

        let config = ProviderConfig::default().with_schema_defaults(&provider_block());
        assert_eq!(config.timeout, Some(DEFAULT_TIMEOUT.as_secs()));
    }

    #[test]
    fn test_recorded_state_after_failed_apply() {
        let prior = ResourceState::from_json(&json!({"id": "rule-1"})).unwrap();
        let partial = ResourceState::from_json(&json!({"id": "net-1"})).unwrap();

        assert_eq!(recorded_state(None, Some(&prior)), json!({"id": "rule-1"}));
        assert_eq!(recorded_state(Some(partial), None), json!({"id": "net-1"}));
        assert!(recorded_state(Some(ResourceState::new()), Some(&prior)).is_null());
        assert!(recorded_state(None, None).is_null());
    }

    #[test]
    fn test_plan_network_without_gateway_is_in_place() {
        let response = call(
            &provider(),
            "PlanResourceChange",
            json!({
                "type_name": "cloudstack_network",
                "prior_state": {
                    "id": "net-1", "name": "web", "cidr": "10.1.1.0/24", "gateway": "10.1.1.1",
                    "network_offering": "off-1", "zone": "zone1", "acl_id": null
                },
                "proposed_new_state": {
                    "id": null, "name": "web-renamed", "cidr": "10.1.1.0/24", "gateway": null,
                    "network_offering": "off-1", "zone": "zone1", "acl_id": null
                }
            }),
        );

        assert_eq!(response["result"]["planned_state"]["gateway"], "10.1.1.1");
        assert_eq!(response["result"]["requires_replace"], json!([]));
    }

    #[test]
    fn test_configure_with_credentials() {
        let provider = provider();
        let response = call(
            &provider,
            "ConfigureProvider",
            json!({"config": {
                "api_url": "http://localhost:8080/client/api",
                "api_key": "key",
                "secret_key": "secret",
                "timeout": 60
            }}),
        );

        assert_eq!(response["result"]["diagnostics"], json!([]));
        assert!(provider.get_client().is_ok());
    }

    #[test]
    fn test_configure_without_credentials() {
        let provider = provider();
        let diagnostics = provider.configure(ProviderConfig::default());

        assert_eq!(diagnostics.len(), 3);
        assert!(diagnostics.iter().all(Diagnostic::is_error));
        assert_eq!(diagnostics[0].attribute, Some(vec!["api_url".to_string()]));
        assert!(provider.get_client().is_err());
    }

    #[test]
    fn test_configure_insecure_warns() {
        let provider = provider();
        let response = call(
            &provider,
            "ConfigureProvider",
            json!({"config": {
                "api_url": "https://localhost:8443/client/api",
                "api_key": "key",
                "secret_key": "secret",
                "insecure": true
            }}),
        );

        let diagnostics = response["result"]["diagnostics"].as_array().unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0]["severity"], "WARNING");
        assert!(provider.get_client().is_ok());
    }

    #[test]
    fn test_read_requires_configuration() {
        let response = call(
            &provider(),
            "ReadResource",
            json!({"type_name": "cloudstack_network", "current_state": {"id": "net-1"}}),
        );
        assert_eq!(
            response["result"]["diagnostics"][0]["summary"],
            "Provider not configured"
        );
    }

    #[test]
    fn test_validate_resource_config() {
        let response = call(
            &provider(),
            "ValidateResourceConfig",
            json!({
                "type_name": "cloudstack_firewall_rule",
                "config": {"ip_address_id": "ip-1", "protocol": "tcp", "cidr_list": [" "]}
            }),
        );

        let diagnostics = response["result"]["diagnostics"].as_array().unwrap();
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics.iter().all(|d| d["severity"] == "ERROR"));
    }

    #[test]
    fn test_unknown_resource_type() {
        let response = call(
            &provider(),
            "ValidateResourceConfig",
            json!({"type_name": "cloudstack_nope", "config": {}}),
        );
        assert!(response["result"]["diagnostics"][0]["summary"]
            .as_str()
            .unwrap()
            .contains("Unknown resource type"));
    }

    #[test]
    fn test_plan_marks_replacement() {
        let response = call(
            &provider(),
            "PlanResourceChange",
            json!({
                "type_name": "cloudstack_network_acl_rule",
                "prior_state": {"id": "item-1", "acl_id": "acl-1", "protocol": "all", "cidr_list": ["10.0.0.0/8"]},
                "proposed_new_state": {"id": null, "acl_id": "acl-2", "protocol": "all", "cidr_list": ["10.0.0.0/8"]}
            }),
        );

        assert_eq!(response["result"]["planned_state"]["id"], "item-1");
        assert_eq!(response["result"]["requires_replace"], json!(["acl_id"]));
    }

    #[test]
    fn test_plan_destroy() {
        let response = call(
            &provider(),
            "PlanResourceChange",
            json!({
                "type_name": "cloudstack_network",
                "prior_state": {"id": "net-1"},
                "proposed_new_state": null
            }),
        );
        assert!(response["result"]["planned_state"].is_null());
    }
}
