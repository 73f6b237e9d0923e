//! CloudStack API Client for Terraform Provider

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use sha1::Sha1;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use thiserror::Error;

type HmacSha1 = Hmac<Sha1>;

/// Query parameters of a single API command, kept sorted by name.
pub type Params = BTreeMap<String, String>;

/// Default time to wait for an async job to finish.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(900);

const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// CloudStack reports a missing entity with this code.
const PARAM_ERROR: u16 = 431;

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {code} - {message}")]
    Api { code: u16, message: String },
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Async job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },
    #[error("Timed out after {seconds}s waiting for async job {job_id}")]
    Timeout { job_id: String, seconds: u64 },
    #[error("Unexpected response for {command}: {detail}")]
    UnexpectedResponse { command: String, detail: String },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid client configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Builder for [`CloudStackClient`]
pub struct ClientBuilder {
    api_url: String,
    api_key: String,
    secret_key: String,
    http_get_only: bool,
    insecure: bool,
    timeout: Duration,
}

impl ClientBuilder {
    /// Only issue GET requests, even for mutating commands
    pub fn http_get_only(mut self, enabled: bool) -> Self {
        self.http_get_only = enabled;
        self
    }

    /// Skip TLS certificate verification
    pub fn insecure(mut self, enabled: bool) -> Self {
        self.insecure = enabled;
        self
    }

    /// Maximum time to wait for an async job
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<CloudStackClient> {
        if self.api_url.is_empty() {
            return Err(ClientError::Config("api_url must not be empty".to_string()));
        }
        if self.api_key.is_empty() || self.secret_key.is_empty() {
            return Err(ClientError::Config(
                "api_key and secret_key must not be empty".to_string(),
            ));
        }

        let builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .danger_accept_invalid_certs(self.insecure);
        // Tests talk to a local stub
        #[cfg(test)]
        let builder = builder.no_proxy();
        let client = builder.build()?;

        Ok(CloudStackClient {
            client,
            api_url: self.api_url.trim_end_matches('/').to_string(),
            api_key: self.api_key,
            secret_key: self.secret_key,
            http_get_only: self.http_get_only,
            timeout: self.timeout,
        })
    }
}

/// CloudStack API Client
#[derive(Clone)]
pub struct CloudStackClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    secret_key: String,
    http_get_only: bool,
    timeout: Duration,
}

impl std::fmt::Debug for CloudStackClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudStackClient")
            .field("api_url", &self.api_url)
            .field("http_get_only", &self.http_get_only)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl CloudStackClient {
    /// Start building a client for the given endpoint and key pair
    pub fn builder(api_url: &str, api_key: &str, secret_key: &str) -> ClientBuilder {
        ClientBuilder {
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            secret_key: secret_key.to_string(),
            http_get_only: false,
            insecure: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Execute a command and return the unwrapped `<command>response` object
    pub async fn execute(&self, command: &str, mut params: Params) -> Result<Value> {
        params.insert("command".to_string(), command.to_string());
        params.insert("apikey".to_string(), self.api_key.clone());
        params.insert("response".to_string(), "json".to_string());

        let query = canonical_query(&params);
        let signature = sign(&self.secret_key, &query)?;

        tracing::debug!(command, "Calling CloudStack API");

        let response = if self.http_get_only || is_read_command(command) {
            let url = format!(
                "{}?{}&signature={}",
                self.api_url,
                query,
                urlencoding::encode(&signature)
            );
            self.client.get(&url).send().await?
        } else {
            params.insert("signature".to_string(), signature);
            self.client.post(&self.api_url).form(&params).send().await?
        };

        let status = response.status();
        let text = response.text().await?;

        match serde_json::from_str::<Value>(&text) {
            Ok(body) => unwrap_response(command, body),
            Err(_) if !status.is_success() => Err(ClientError::Api {
                code: status.as_u16(),
                message: text,
            }),
            Err(e) => Err(ClientError::Serialization(e)),
        }
    }

    /// Execute an async command and wait for its job to complete
    pub async fn execute_async(&self, command: &str, params: Params) -> Result<Value> {
        let response = self.execute(command, params).await?;
        let job_id = response
            .get("jobid")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ClientError::UnexpectedResponse {
                command: command.to_string(),
                detail: "missing jobid".to_string(),
            })?
            .to_string();

        self.wait_for_job(&job_id).await
    }

    /// Poll `queryAsyncJobResult` until the job finishes or the timeout elapses
    pub async fn wait_for_job(&self, job_id: &str) -> Result<Value> {
        let started = Instant::now();

        loop {
            let mut params = Params::new();
            params.insert("jobid".to_string(), job_id.to_string());
            let result = self.execute("queryAsyncJobResult", params).await?;

            match result.get("jobstatus").and_then(|v| v.as_i64()) {
                Some(1) => {
                    tracing::debug!(job_id, "Async job completed");
                    return Ok(result.get("jobresult").cloned().unwrap_or(Value::Null));
                }
                Some(2) => {
                    let message = result
                        .get("jobresult")
                        .and_then(|r| r.get("errortext"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown error")
                        .to_string();
                    return Err(ClientError::JobFailed {
                        job_id: job_id.to_string(),
                        message,
                    });
                }
                _ => {}
            }

            if started.elapsed() >= self.timeout {
                return Err(ClientError::Timeout {
                    job_id: job_id.to_string(),
                    seconds: self.timeout.as_secs(),
                });
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Run a list command and return the items found under `key`
    async fn list<T: DeserializeOwned>(
        &self,
        command: &str,
        key: &str,
        params: Params,
    ) -> Result<Vec<T>> {
        let response = self.execute(command, params).await?;

        match response.get(key) {
            Some(items) => Ok(serde_json::from_value(items.clone())?),
            None => Ok(Vec::new()),
        }
    }

    /// Fetch a single item by id through a list command
    async fn get_by_id<T: DeserializeOwned>(
        &self,
        command: &str,
        key: &str,
        id: &str,
        mut params: Params,
    ) -> Result<T> {
        params.insert("id".to_string(), id.to_string());
        params.insert("listall".to_string(), "true".to_string());
        let mut items: Vec<T> = self.list(command, key, params).await?;
        if items.is_empty() {
            return Err(ClientError::NotFound(id.to_string()));
        }
        Ok(items.swap_remove(0))
    }
}

/// Render parameters as `key=value` pairs in sorted order, URL-encoded
pub fn canonical_query(params: &Params) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Compute the request signature over a canonical query string
pub fn sign(secret_key: &str, query: &str) -> Result<String> {
    let mut mac = HmacSha1::new_from_slice(secret_key.as_bytes())
        .map_err(|e| ClientError::Config(format!("invalid secret key: {}", e)))?;
    mac.update(query.to_lowercase().as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

fn is_read_command(command: &str) -> bool {
    command.starts_with("list") || command.starts_with("query") || command.starts_with("get")
}

/// Extract the `<command>response` object, turning error payloads into errors
pub fn unwrap_response(command: &str, mut body: Value) -> Result<Value> {
    if let Some(err) = body.get("errorresponse") {
        return Err(api_error(err));
    }

    let key = format!("{}response", command.to_lowercase());
    let inner = body
        .get_mut(&key)
        .map(Value::take)
        .ok_or_else(|| ClientError::UnexpectedResponse {
            command: command.to_string(),
            detail: format!("missing {}", key),
        })?;

    if inner.get("errorcode").is_some() {
        return Err(api_error(&inner));
    }

    Ok(inner)
}

fn api_error(err: &Value) -> ClientError {
    let code = err
        .get("errorcode")
        .and_then(|v| v.as_u64())
        .unwrap_or_default() as u16;
    let message = err
        .get("errortext")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    if code == PARAM_ERROR && message.contains("does not exist") {
        ClientError::NotFound(message)
    } else {
        ClientError::Api { code, message }
    }
}

/// Flatten a request struct into API parameters.
///
/// Lists are joined with commas, nulls are skipped.
pub fn to_params<T: Serialize>(request: &T) -> Result<Params> {
    let value = serde_json::to_value(request)?;
    let mut params = Params::new();

    if let Value::Object(map) = value {
        for (key, value) in map {
            let rendered = match value {
                Value::Null => continue,
                Value::String(s) => s,
                Value::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(","),
                other => other.to_string(),
            };
            params.insert(key, rendered);
        }
    }

    Ok(params)
}

fn tag_params(
    resource_id: &str,
    resource_type: &str,
    tags: &HashMap<String, String>,
) -> Params {
    let mut params = Params::new();
    params.insert("resourceids".to_string(), resource_id.to_string());
    params.insert("resourcetype".to_string(), resource_type.to_string());

    let mut keys: Vec<&String> = tags.keys().collect();
    keys.sort();
    for (i, key) in keys.into_iter().enumerate() {
        params.insert(format!("tags[{}].key", i), key.clone());
        params.insert(format!("tags[{}].value", i), tags[key].clone());
    }

    params
}

// ============================================================================
// API Data Types
// ============================================================================

/// Firewall rule, used for both ingress and egress rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallRule {
    pub id: String,
    pub protocol: String,
    #[serde(default)]
    pub cidrlist: String,
    #[serde(default)]
    pub startport: Option<i32>,
    #[serde(default)]
    pub endport: Option<i32>,
    #[serde(default)]
    pub icmptype: Option<i32>,
    #[serde(default)]
    pub icmpcode: Option<i32>,
    #[serde(default)]
    pub ipaddressid: Option<String>,
    #[serde(default)]
    pub networkid: Option<String>,
}

/// Create firewall rule request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateFirewallRuleRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipaddressid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub networkid: Option<String>,
    pub protocol: String,
    pub cidrlist: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startport: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endport: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icmptype: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icmpcode: Option<i32>,
}

/// Network ACL item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkAclItem {
    pub id: String,
    pub aclid: String,
    pub action: String,
    pub traffictype: String,
    pub protocol: String,
    #[serde(default)]
    pub cidrlist: String,
    #[serde(default)]
    pub startport: Option<i32>,
    #[serde(default)]
    pub endport: Option<i32>,
    #[serde(default)]
    pub icmptype: Option<i32>,
    #[serde(default)]
    pub icmpcode: Option<i32>,
    #[serde(default)]
    pub number: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Create or update network ACL item request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkAclItemRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aclid: Option<String>,
    pub action: String,
    pub traffictype: String,
    pub protocol: String,
    pub cidrlist: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startport: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endport: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icmptype: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icmpcode: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Resource tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

/// Network data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub displaytext: Option<String>,
    #[serde(default)]
    pub cidr: Option<String>,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub networkofferingid: Option<String>,
    #[serde(default)]
    pub networkofferingname: Option<String>,
    #[serde(default)]
    pub zoneid: Option<String>,
    #[serde(default)]
    pub zonename: Option<String>,
    #[serde(default)]
    pub vpcid: Option<String>,
    #[serde(default)]
    pub aclid: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Network {
    pub fn tag_map(&self) -> HashMap<String, String> {
        self.tags
            .iter()
            .map(|t| (t.key.clone(), t.value.clone()))
            .collect()
    }
}

/// Create network request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateNetworkRequest {
    pub name: String,
    pub displaytext: String,
    pub networkofferingid: String,
    pub zoneid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub netmask: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpcid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aclid: Option<String>,
}

/// Update network request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateNetworkRequest {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub displaytext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub networkofferingid: Option<String>,
}

/// Zone data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub networktype: Option<String>,
    #[serde(default)]
    pub allocationstate: Option<String>,
}

// ============================================================================
// API Methods
// ============================================================================

fn id_param(id: &str) -> Params {
    let mut params = Params::new();
    params.insert("id".to_string(), id.to_string());
    params
}

fn created_id(command: &str, result: &Value, key: &str) -> Result<String> {
    result
        .get(key)
        .and_then(|obj| obj.get("id"))
        .or_else(|| result.get("id"))
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| ClientError::UnexpectedResponse {
            command: command.to_string(),
            detail: "missing id of created object".to_string(),
        })
}

impl CloudStackClient {
    // Firewall operations
    pub async fn create_firewall_rule(&self, request: &CreateFirewallRuleRequest) -> Result<FirewallRule> {
        let result = self
            .execute_async("createFirewallRule", to_params(request)?)
            .await?;
        let id = created_id("createFirewallRule", &result, "firewallrule")?;
        self.get_firewall_rule(&id).await
    }

    pub async fn get_firewall_rule(&self, id: &str) -> Result<FirewallRule> {
        self.get_by_id("listFirewallRules", "firewallrule", id, Params::new())
            .await
    }

    pub async fn delete_firewall_rule(&self, id: &str) -> Result<()> {
        self.execute_async("deleteFirewallRule", id_param(id))
            .await
            .map(|_| ())
    }

    // Egress firewall operations
    pub async fn create_egress_firewall_rule(
        &self,
        request: &CreateFirewallRuleRequest,
    ) -> Result<FirewallRule> {
        let result = self
            .execute_async("createEgressFirewallRule", to_params(request)?)
            .await?;
        let id = created_id("createEgressFirewallRule", &result, "firewallrule")?;
        self.get_egress_firewall_rule(&id).await
    }

    pub async fn get_egress_firewall_rule(&self, id: &str) -> Result<FirewallRule> {
        self.get_by_id("listEgressFirewallRules", "firewallrule", id, Params::new())
            .await
    }

    pub async fn delete_egress_firewall_rule(&self, id: &str) -> Result<()> {
        self.execute_async("deleteEgressFirewallRule", id_param(id))
            .await
            .map(|_| ())
    }

    // Network ACL operations
    pub async fn create_network_acl_item(&self, request: &NetworkAclItemRequest) -> Result<NetworkAclItem> {
        let result = self
            .execute_async("createNetworkACL", to_params(request)?)
            .await?;
        let id = created_id("createNetworkACL", &result, "networkacl")?;
        self.get_network_acl_item(&id).await
    }

    pub async fn get_network_acl_item(&self, id: &str) -> Result<NetworkAclItem> {
        self.get_by_id("listNetworkACLs", "networkacl", id, Params::new())
            .await
    }

    pub async fn update_network_acl_item(&self, request: &NetworkAclItemRequest) -> Result<NetworkAclItem> {
        let id = request
            .id
            .clone()
            .ok_or_else(|| ClientError::Config("ACL item id is required for update".to_string()))?;
        self.execute_async("updateNetworkACLItem", to_params(request)?)
            .await?;
        self.get_network_acl_item(&id).await
    }

    pub async fn delete_network_acl_item(&self, id: &str) -> Result<()> {
        self.execute_async("deleteNetworkACL", id_param(id))
            .await
            .map(|_| ())
    }

    // Network operations
    pub async fn list_networks(&self, filters: Params) -> Result<Vec<Network>> {
        self.list("listNetworks", "network", filters).await
    }

    pub async fn get_network(&self, id: &str) -> Result<Network> {
        self.get_by_id("listNetworks", "network", id, Params::new())
            .await
    }

    pub async fn create_network(&self, request: &CreateNetworkRequest) -> Result<Network> {
        let result = self.execute("createNetwork", to_params(request)?).await?;
        match result.get("network") {
            Some(network) => Ok(serde_json::from_value(network.clone())?),
            None => Err(ClientError::UnexpectedResponse {
                command: "createNetwork".to_string(),
                detail: "missing network".to_string(),
            }),
        }
    }

    pub async fn update_network(&self, request: &UpdateNetworkRequest) -> Result<Network> {
        self.execute_async("updateNetwork", to_params(request)?)
            .await?;
        self.get_network(&request.id).await
    }

    pub async fn delete_network(&self, id: &str) -> Result<()> {
        self.execute_async("deleteNetwork", id_param(id))
            .await
            .map(|_| ())
    }

    // Zone operations
    pub async fn list_zones(&self, filters: Params) -> Result<Vec<Zone>> {
        self.list("listZones", "zone", filters).await
    }

    /// Resolve a zone name or id to its id
    pub async fn zone_id(&self, name_or_id: &str) -> Result<String> {
        let mut params = Params::new();
        params.insert("name".to_string(), name_or_id.to_string());
        let zones = self.list_zones(params).await?;
        if let Some(zone) = zones.into_iter().next() {
            return Ok(zone.id);
        }

        // Not a name, try it as an id
        let zones = self.list_zones(id_param(name_or_id)).await?;
        zones
            .into_iter()
            .next()
            .map(|z| z.id)
            .ok_or_else(|| ClientError::NotFound(format!("zone {}", name_or_id)))
    }

    /// Resolve a network offering name or id to its id
    pub async fn network_offering_id(&self, name_or_id: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct Offering {
            id: String,
        }

        let mut params = Params::new();
        params.insert("name".to_string(), name_or_id.to_string());
        let offerings: Vec<Offering> = self
            .list("listNetworkOfferings", "networkoffering", params)
            .await?;
        if let Some(offering) = offerings.into_iter().next() {
            return Ok(offering.id);
        }

        let offerings: Vec<Offering> = self
            .list("listNetworkOfferings", "networkoffering", id_param(name_or_id))
            .await?;
        offerings
            .into_iter()
            .next()
            .map(|o| o.id)
            .ok_or_else(|| ClientError::NotFound(format!("network offering {}", name_or_id)))
    }

    // Tag operations
    pub async fn create_tags(
        &self,
        resource_id: &str,
        resource_type: &str,
        tags: &HashMap<String, String>,
    ) -> Result<()> {
        self.execute_async("createTags", tag_params(resource_id, resource_type, tags))
            .await
            .map(|_| ())
    }

    pub async fn delete_tags(
        &self,
        resource_id: &str,
        resource_type: &str,
        tags: &HashMap<String, String>,
    ) -> Result<()> {
        self.execute_async("deleteTags", tag_params(resource_id, resource_type, tags))
            .await
            .map(|_| ())
    }
}
