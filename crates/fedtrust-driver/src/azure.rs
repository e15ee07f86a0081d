use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use fedtrust_domain::{
    AppId, FederatedTrust, ObjectId, SubscriptionId, TenantId, MICROSOFT_GRAPH_APP_ID,
};
use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::driver::{
    Application, AssignOutcome, Driver, GraphPermission, IssuedSecret, RoleAssignment,
    RoleDefinition, SecretMetadata, SecretValue, ServicePrincipal, Subscription,
};
use crate::error::DriverError;

// ── Configuration ─────────────────────────────────────────────────────────────

/// Operator-level settings for the Azure driver. Every field is optional:
/// with nothing set the driver rides on the operator's `az login` session.
#[derive(Clone, Default)]
pub struct AzureDriverConfig {
    /// Tenant to authenticate against. Required for service-principal auth.
    pub tenant_id: Option<String>,
    /// Service principal client ID (optional; falls back to env, then Azure CLI).
    pub client_id: Option<String>,
    /// Service principal client secret (optional; falls back to env, then Azure CLI).
    pub client_secret: Option<String>,
}

// ── Base URLs (overridden in tests) ───────────────────────────────────────────

#[derive(Clone)]
pub(crate) struct BaseUrls {
    management: String,
    login:      String,
    graph:      String,
}

impl Default for BaseUrls {
    fn default() -> Self {
        Self {
            management: "https://management.azure.com".into(),
            login:      "https://login.microsoftonline.com".into(),
            graph:      "https://graph.microsoft.com".into(),
        }
    }
}

const AUTHORIZATION_API_VERSION: &str = "2022-04-01";
const SUBSCRIPTIONS_API_VERSION: &str = "2022-12-01";

/// Seconds to wait between attempts while a new object replicates from
/// Graph to the rest of the directory.
const REPLICATION_DELAYS: [u64; 4] = [2, 4, 8, 16];

// ── Token provider ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Resource {
    Management,
    Graph,
}

impl Resource {
    fn audience(&self) -> &'static str {
        match self {
            Resource::Management => "https://management.azure.com",
            Resource::Graph      => "https://graph.microsoft.com",
        }
    }
}

/// Source of bearer tokens for ARM and Graph.
#[async_trait]
trait TokenProvider: Send + Sync {
    async fn token(&self, resource: Resource) -> Result<String, DriverError>;
}

#[derive(Default)]
struct TokenCache(Mutex<HashMap<Resource, (String, Instant)>>);

impl TokenCache {
    async fn get(&self, resource: Resource) -> Option<String> {
        let guard = self.0.lock().await;
        guard
            .get(&resource)
            .filter(|(_, expiry)| Instant::now() < *expiry)
            .map(|(tok, _)| tok.clone())
    }

    async fn put(&self, resource: Resource, tok: &str, expires_in: u64) {
        let expiry = Instant::now() + Duration::from_secs(expires_in.saturating_sub(60));
        self.0.lock().await.insert(resource, (tok.to_string(), expiry));
    }
}

// ── Service Principal ─────────────────────────────────────────────────────────

struct ServicePrincipalTokenProvider {
    tenant_id:     String,
    client_id:     String,
    client_secret: String,
    login_base:    String,
    client:        reqwest::Client,
    cache:         TokenCache,
}

#[async_trait]
impl TokenProvider for ServicePrincipalTokenProvider {
    async fn token(&self, resource: Resource) -> Result<String, DriverError> {
        if let Some(tok) = self.cache.get(resource).await {
            return Ok(tok);
        }

        let url = format!("{}/{}/oauth2/v2.0/token", self.login_base, self.tenant_id);
        let scope = format!("{}/.default", resource.audience());
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope.as_str()),
        ];
        let resp: Value = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| DriverError::Request(format!("SP token request: {}", e)))?
            .json()
            .await
            .map_err(|e| DriverError::Internal(format!("SP token decode: {}", e)))?;

        let tok = resp["access_token"]
            .as_str()
            .ok_or_else(|| {
                DriverError::Unauthenticated(format!(
                    "service principal sign-in rejected: {}",
                    resp["error_description"].as_str().unwrap_or("no access_token in response")
                ))
            })?
            .to_string();
        let expires_in = resp["expires_in"].as_u64().unwrap_or(3600);

        self.cache.put(resource, &tok, expires_in).await;
        Ok(tok)
    }
}

// ── Azure CLI ─────────────────────────────────────────────────────────────────

struct AzureCliTokenProvider {
    tenant_id: Option<String>,
    cache:     TokenCache,
}

#[async_trait]
impl TokenProvider for AzureCliTokenProvider {
    async fn token(&self, resource: Resource) -> Result<String, DriverError> {
        if let Some(tok) = self.cache.get(resource).await {
            return Ok(tok);
        }

        let mut cmd = tokio::process::Command::new("az");
        cmd.args([
            "account",
            "get-access-token",
            "--resource",
            resource.audience(),
            "--output",
            "json",
        ]);
        if let Some(tenant) = &self.tenant_id {
            cmd.args(["--tenant", tenant]);
        }

        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DriverError::ToolingMissing(
                    "Azure CLI ('az') not found on PATH. Install Azure CLI or configure service principal credentials.".into(),
                )
            } else {
                DriverError::Internal(format!("running az CLI: {}", e))
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DriverError::Unauthenticated(format!(
                "az account get-access-token failed: {}. Run 'az login' first.",
                stderr.trim()
            )));
        }

        let resp: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| DriverError::Internal(format!("az CLI output parse: {}", e)))?;
        let tok = resp["accessToken"]
            .as_str()
            .ok_or_else(|| DriverError::Internal("az CLI: no accessToken in output".into()))?
            .to_string();
        let expires_in = resp["expires_on"]
            .as_i64()
            .map(|at| (at - Utc::now().timestamp()).max(0) as u64)
            .unwrap_or(300);

        self.cache.put(resource, &tok, expires_in).await;
        Ok(tok)
    }
}

// ── Static (tests) ────────────────────────────────────────────────────────────

pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self, _resource: Resource) -> Result<String, DriverError> {
        Ok(self.0.clone())
    }
}

// ── AzureDriver ───────────────────────────────────────────────────────────────

pub struct AzureDriver {
    client:   reqwest::Client,
    token:    Box<dyn TokenProvider>,
    base:     BaseUrls,
    /// Microsoft Graph's own service principal (`id` + `appRoles`), fetched once.
    graph_sp: OnceCell<Value>,
    /// Waits between attempts while a new object replicates.
    replication_delays: Vec<Duration>,
}

fn default_replication_delays() -> Vec<Duration> {
    REPLICATION_DELAYS.iter().map(|s| Duration::from_secs(*s)).collect()
}

impl AzureDriver {
    /// Create an `AzureDriver`, auto-selecting the token provider:
    /// 1. `client_id` + `client_secret` in config → Service Principal
    /// 2. `AZURE_CLIENT_ID` + `AZURE_CLIENT_SECRET` env vars → Service Principal
    /// 3. Otherwise → Azure CLI (`az account get-access-token`)
    pub fn new(config: AzureDriverConfig) -> Result<Self, DriverError> {
        let client = reqwest::Client::new();
        let base   = BaseUrls::default();
        let tenant = config
            .tenant_id
            .clone()
            .or_else(|| std::env::var("AZURE_TENANT_ID").ok());

        let credentials = match (config.client_id, config.client_secret) {
            (Some(cid), Some(cs)) => Some((cid, cs)),
            _ => match (std::env::var("AZURE_CLIENT_ID"), std::env::var("AZURE_CLIENT_SECRET")) {
                (Ok(cid), Ok(cs)) => Some((cid, cs)),
                _ => None,
            },
        };

        let token: Box<dyn TokenProvider> = match credentials {
            Some((client_id, client_secret)) => {
                let tenant_id = tenant.ok_or_else(|| {
                    DriverError::Internal(
                        "service principal credentials need a tenant id (AZURE_TENANT_ID)".into(),
                    )
                })?;
                debug!(client_id, "Using service principal credentials");
                Box::new(ServicePrincipalTokenProvider {
                    tenant_id,
                    client_id,
                    client_secret,
                    login_base: base.login.clone(),
                    client: client.clone(),
                    cache: TokenCache::default(),
                })
            }
            None => {
                debug!("Using Azure CLI credentials");
                Box::new(AzureCliTokenProvider { tenant_id: tenant, cache: TokenCache::default() })
            }
        };

        Ok(Self {
            client,
            token,
            base,
            graph_sp: OnceCell::new(),
            replication_delays: default_replication_delays(),
        })
    }

    /// Create an `AzureDriver` with a static bearer token and custom base URLs.
    /// Used exclusively in tests.
    #[cfg(test)]
    pub(crate) fn with_static_token(token: &str, base: BaseUrls) -> Self {
        Self {
            client:   reqwest::Client::new(),
            token:    Box::new(StaticToken(token.to_string())),
            base,
            graph_sp: OnceCell::new(),
            replication_delays: default_replication_delays(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_replication_delays(mut self, delays: Vec<Duration>) -> Self {
        self.replication_delays = delays;
        self
    }

    // ── Error parsing ─────────────────────────────────────────────────────────

    /// ARM and Graph share the `{"error": {"code", "message"}}` envelope.
    fn parse_api_error(body: &Value) -> String {
        let err = body
            .get("error")
            .or_else(|| body.get("Error"))
            .unwrap_or(body);
        let code    = err["code"].as_str().unwrap_or("Unknown");
        let message = err["message"].as_str().unwrap_or("unknown error");
        format!("{}: {}", code, message)
    }

    fn error_code(body: &Value) -> &str {
        body["error"]["code"].as_str().unwrap_or("")
    }

    fn ensure_success(what: &str, status: u16, body: Value) -> Result<Value, DriverError> {
        if (200..300).contains(&status) {
            return Ok(body);
        }
        Err(DriverError::Api {
            what: what.to_string(),
            status,
            message: Self::parse_api_error(&body),
        })
    }

    // ── HTTP ──────────────────────────────────────────────────────────────────

    async fn call(
        &self,
        resource: Resource,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<(u16, Value), DriverError> {
        let token = self.token.token(resource).await?;
        debug!(%method, url, "Azure request");
        let mut req = self.client.request(method.clone(), url).bearer_auth(&token);
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(b) = body {
            req = req.json(b);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| DriverError::Request(format!("{} {}: {}", method, url, e)))?;

        let status = resp.status().as_u16();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        Ok((status, body))
    }

    async fn arm_get(&self, url: &str, filter: Option<String>) -> Result<(u16, Value), DriverError> {
        let mut query = vec![("api-version", AUTHORIZATION_API_VERSION.to_string())];
        if let Some(f) = filter {
            query.push(("$filter", f));
        }
        self.call(Resource::Management, Method::GET, url, &query, None).await
    }

    async fn graph_get(&self, url: &str, query: &[(&str, String)]) -> Result<Value, DriverError> {
        let (status, body) = self.call(Resource::Graph, Method::GET, url, query, None).await?;
        Self::ensure_success(&format!("GET {}", url), status, body)
    }

    async fn graph_post(&self, url: &str, body: &Value) -> Result<(u16, Value), DriverError> {
        self.call(Resource::Graph, Method::POST, url, &[], Some(body)).await
    }

    fn application_url(&self, app: &Application) -> String {
        format!("{}/v1.0/applications/{}", self.base.graph, app.object_id)
    }

    /// Look up Microsoft Graph's service principal in this tenant (cached).
    async fn graph_service_principal(&self) -> Result<&Value, DriverError> {
        self.graph_sp
            .get_or_try_init(|| async {
                let url = format!("{}/v1.0/servicePrincipals", self.base.graph);
                let body = self
                    .graph_get(
                        &url,
                        &[
                            ("$filter", format!("appId eq '{}'", MICROSOFT_GRAPH_APP_ID)),
                            ("$select", "id,appRoles".to_string()),
                        ],
                    )
                    .await?;
                first_value(&body).cloned().ok_or_else(|| {
                    DriverError::Internal("Microsoft Graph service principal not found in tenant".into())
                })
            })
            .await
    }

    async fn application_property(&self, app: &Application, property: &str) -> Result<Value, DriverError> {
        let body = self
            .graph_get(&self.application_url(app), &[("$select", property.to_string())])
            .await?;
        Ok(body[property].clone())
    }

    async fn role_name(&self, role_definition_id: &str) -> Option<String> {
        let url = format!("{}{}", self.base.management, role_definition_id);
        match self.arm_get(&url, None).await {
            Ok((200, body)) => body["properties"]["roleName"].as_str().map(String::from),
            Ok((status, body)) => {
                debug!(role_definition_id, status, error = %Self::parse_api_error(&body), "role definition lookup failed");
                None
            }
            Err(e) => {
                debug!(role_definition_id, error = %e, "role definition lookup failed");
                None
            }
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Escape a literal for use inside an OData `'...'` string.
fn odata_quote(s: &str) -> String {
    s.replace('\'', "''")
}

fn text(v: &Value) -> String {
    v.as_str().unwrap_or("").to_string()
}

fn first_value(body: &Value) -> Option<&Value> {
    body["value"].as_array().and_then(|a| a.first())
}

fn parse_application(v: &Value) -> Result<Application, DriverError> {
    let object_id = text(&v["id"]);
    let app_id = text(&v["appId"]);
    if object_id.is_empty() || app_id.is_empty() {
        return Err(DriverError::Internal(format!("application without id/appId: {}", v)));
    }
    Ok(Application {
        object_id: ObjectId::new(object_id),
        app_id: AppId::new(app_id),
        display_name: text(&v["displayName"]),
    })
}

fn parse_service_principal(v: &Value) -> Result<ServicePrincipal, DriverError> {
    let object_id = text(&v["id"]);
    if object_id.is_empty() {
        return Err(DriverError::Internal(format!("service principal without id: {}", v)));
    }
    Ok(ServicePrincipal {
        object_id: ObjectId::new(object_id),
        app_id: AppId::new(text(&v["appId"])),
    })
}

fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    v.as_str().and_then(|s| s.parse::<DateTime<Utc>>().ok())
}

/// Add a Graph application permission to an app's `requiredResourceAccess`
/// list, leaving every other entry untouched.
fn merge_required_access(existing: &Value, permission_id: &str) -> Value {
    let mut entries: Vec<Value> = existing.as_array().cloned().unwrap_or_default();
    let wanted = json!({ "id": permission_id, "type": "Role" });

    match entries
        .iter_mut()
        .find(|e| e["resourceAppId"].as_str() == Some(MICROSOFT_GRAPH_APP_ID))
    {
        Some(graph) => {
            let access = graph["resourceAccess"].as_array().cloned().unwrap_or_default();
            if !access.iter().any(|a| a["id"].as_str() == Some(permission_id)) {
                let mut access = access;
                access.push(wanted);
                graph["resourceAccess"] = Value::Array(access);
            }
        }
        None => entries.push(json!({
            "resourceAppId": MICROSOFT_GRAPH_APP_ID,
            "resourceAccess": [wanted],
        })),
    }
    Value::Array(entries)
}

// ── Driver impl ───────────────────────────────────────────────────────────────

#[async_trait]
impl Driver for AzureDriver {
    fn name(&self) -> &'static str {
        "azure"
    }

    async fn check_session(&self) -> Result<(), DriverError> {
        self.token.token(Resource::Management).await?;
        self.token.token(Resource::Graph).await?;
        Ok(())
    }

    async fn get_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<Subscription>, DriverError> {
        let url = format!("{}/subscriptions/{}", self.base.management, id);
        let query = [("api-version", SUBSCRIPTIONS_API_VERSION.to_string())];
        let (status, body) = self
            .call(Resource::Management, Method::GET, &url, &query, None)
            .await?;
        if status == 404 {
            return Ok(None);
        }
        let body = Self::ensure_success("get subscription", status, body)?;
        let tenant_id = text(&body["tenantId"]);
        if tenant_id.is_empty() {
            return Err(DriverError::Internal(format!("subscription {} has no tenantId", id)));
        }
        Ok(Some(Subscription {
            id: id.clone(),
            tenant_id: TenantId::new(tenant_id),
            display_name: text(&body["displayName"]),
            state: text(&body["state"]),
        }))
    }

    // ── Applications ──────────────────────────────────────────────────────────

    async fn find_application(&self, display_name: &str) -> Result<Option<Application>, DriverError> {
        let url = format!("{}/v1.0/applications", self.base.graph);
        let body = self
            .graph_get(
                &url,
                &[
                    ("$filter", format!("displayName eq '{}'", odata_quote(display_name))),
                    ("$select", "id,appId,displayName".to_string()),
                ],
            )
            .await?;
        let matches = body["value"].as_array().cloned().unwrap_or_default();
        if matches.len() > 1 {
            warn!(display_name, count = matches.len(), "Several applications share this display name, using the first");
        }
        matches.first().map(parse_application).transpose()
    }

    async fn create_application(&self, display_name: &str) -> Result<Application, DriverError> {
        let url = format!("{}/v1.0/applications", self.base.graph);
        let body = json!({
            "displayName": display_name,
            "signInAudience": "AzureADMyOrg",
        });
        let (status, resp) = self.graph_post(&url, &body).await?;
        let resp = Self::ensure_success("create application", status, resp)?;
        let app = parse_application(&resp)?;
        info!(display_name, app_id = %app.app_id, "Application registration created");
        Ok(app)
    }

    async fn find_service_principal(
        &self,
        app_id: &AppId,
    ) -> Result<Option<ServicePrincipal>, DriverError> {
        let url = format!("{}/v1.0/servicePrincipals", self.base.graph);
        let body = self
            .graph_get(
                &url,
                &[
                    ("$filter", format!("appId eq '{}'", odata_quote(app_id.as_str()))),
                    ("$select", "id,appId".to_string()),
                ],
            )
            .await?;
        first_value(&body).map(parse_service_principal).transpose()
    }

    async fn create_service_principal(&self, app_id: &AppId) -> Result<ServicePrincipal, DriverError> {
        let url = format!("{}/v1.0/servicePrincipals", self.base.graph);
        let body = json!({ "appId": app_id.as_str() });
        let mut delays = self.replication_delays.iter();
        loop {
            let (status, resp) = self.graph_post(&url, &body).await?;
            if (200..300).contains(&status) {
                return parse_service_principal(&resp);
            }
            match delays.next() {
                // A just-created application is not always visible yet.
                Some(&delay) if status == 400 || status == 404 => {
                    debug!(%app_id, status, ?delay, "Application not replicated yet, retrying service principal creation");
                    tokio::time::sleep(delay).await;
                }
                _ => return Err(DriverError::Api {
                    what: "create service principal".into(),
                    status,
                    message: Self::parse_api_error(&resp),
                }),
            }
        }
    }

    // ── RBAC ──────────────────────────────────────────────────────────────────

    async fn find_role_definition(
        &self,
        scope: &str,
        role_name: &str,
    ) -> Result<Option<RoleDefinition>, DriverError> {
        let url = format!(
            "{}{}/providers/Microsoft.Authorization/roleDefinitions",
            self.base.management, scope,
        );
        let (status, body) = self
            .arm_get(&url, Some(format!("roleName eq '{}'", odata_quote(role_name))))
            .await?;
        let body = Self::ensure_success("list role definitions", status, body)?;
        Ok(first_value(&body).map(|v| RoleDefinition {
            id: text(&v["id"]),
            name: v["properties"]["roleName"].as_str().unwrap_or(role_name).to_string(),
        }))
    }

    async fn list_role_assignments(
        &self,
        scope: &str,
        principal_id: &ObjectId,
    ) -> Result<Vec<RoleAssignment>, DriverError> {
        let url = format!(
            "{}{}/providers/Microsoft.Authorization/roleAssignments",
            self.base.management, scope,
        );
        let (status, body) = self
            .arm_get(&url, Some(format!("principalId eq '{}'", principal_id)))
            .await?;
        let body = Self::ensure_success("list role assignments", status, body)?;

        let mut names: HashMap<String, Option<String>> = HashMap::new();
        let mut out = Vec::new();
        for v in body["value"].as_array().cloned().unwrap_or_default() {
            let props = &v["properties"];
            let assignment_scope = text(&props["scope"]);
            // The filter also returns inherited and child-scope assignments.
            if !assignment_scope.eq_ignore_ascii_case(scope) {
                continue;
            }
            let role_definition_id = text(&props["roleDefinitionId"]);
            let role_name = match names.get(&role_definition_id) {
                Some(n) => n.clone(),
                None => {
                    let n = self.role_name(&role_definition_id).await;
                    names.insert(role_definition_id.clone(), n.clone());
                    n
                }
            };
            out.push(RoleAssignment {
                id: text(&v["id"]),
                role_definition_id,
                role_name,
                scope: assignment_scope,
                principal_id: text(&props["principalId"]),
            });
        }
        Ok(out)
    }

    /// Grant a role to a service principal on a scope.
    /// A 409 (`RoleAssignmentExists`) maps to `AlreadyExists`.
    async fn create_role_assignment(
        &self,
        scope: &str,
        role: &RoleDefinition,
        principal_id: &ObjectId,
    ) -> Result<AssignOutcome, DriverError> {
        let assignment_id = Uuid::new_v4();
        let url = format!(
            "{}{}/providers/Microsoft.Authorization/roleAssignments/{}",
            self.base.management, scope, assignment_id,
        );
        let query = [("api-version", AUTHORIZATION_API_VERSION.to_string())];
        let body = json!({
            "properties": {
                "roleDefinitionId": role.id,
                "principalId": principal_id.as_str(),
                "principalType": "ServicePrincipal",
            }
        });

        let mut delays = self.replication_delays.iter();
        loop {
            let (status, resp) = self
                .call(Resource::Management, Method::PUT, &url, &query, Some(&body))
                .await?;
            if (200..300).contains(&status) {
                return Ok(AssignOutcome::Created);
            }
            if status == 409 {
                debug!(scope, role = %role.name, %principal_id, "RBAC role assignment already exists");
                return Ok(AssignOutcome::AlreadyExists);
            }
            match delays.next() {
                // New service principals take a while to reach ARM.
                Some(&delay) if status == 400 && Self::error_code(&resp) == "PrincipalNotFound" => {
                    debug!(%principal_id, ?delay, "Principal not visible to ARM yet, retrying role assignment");
                    tokio::time::sleep(delay).await;
                }
                _ => return Err(DriverError::Api {
                    what: format!("assign role '{}' on {}", role.name, scope),
                    status,
                    message: Self::parse_api_error(&resp),
                }),
            }
        }
    }

    // ── Graph permissions ─────────────────────────────────────────────────────

    async fn find_graph_permission(&self, value: &str) -> Result<Option<GraphPermission>, DriverError> {
        let sp = self.graph_service_principal().await?;
        let resource_id = ObjectId::new(text(&sp["id"]));
        Ok(sp["appRoles"]
            .as_array()
            .and_then(|roles| roles.iter().find(|r| r["value"].as_str() == Some(value)))
            .map(|r| GraphPermission {
                id: text(&r["id"]),
                value: value.to_string(),
                resource_id,
            }))
    }

    async fn requested_permissions(&self, app: &Application) -> Result<Vec<String>, DriverError> {
        let access = self.application_property(app, "requiredResourceAccess").await?;
        Ok(access
            .as_array()
            .into_iter()
            .flatten()
            .filter(|e| e["resourceAppId"].as_str() == Some(MICROSOFT_GRAPH_APP_ID))
            .flat_map(|e| e["resourceAccess"].as_array().cloned().unwrap_or_default())
            .filter(|a| a["type"].as_str() == Some("Role"))
            .map(|a| text(&a["id"]))
            .collect())
    }

    async fn request_permission(
        &self,
        app: &Application,
        permission: &GraphPermission,
    ) -> Result<(), DriverError> {
        let existing = self.application_property(app, "requiredResourceAccess").await?;
        let body = json!({ "requiredResourceAccess": merge_required_access(&existing, &permission.id) });
        let url = self.application_url(app);
        let (status, resp) = self
            .call(Resource::Graph, Method::PATCH, &url, &[], Some(&body))
            .await?;
        Self::ensure_success(&format!("request permission {}", permission.value), status, resp)?;
        Ok(())
    }

    async fn granted_permissions(&self, sp: &ServicePrincipal) -> Result<Vec<String>, DriverError> {
        let url = format!(
            "{}/v1.0/servicePrincipals/{}/appRoleAssignments",
            self.base.graph, sp.object_id,
        );
        let body = self.graph_get(&url, &[]).await?;
        Ok(body["value"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|v| text(&v["appRoleId"]))
            .collect())
    }

    async fn grant_admin_consent(
        &self,
        sp: &ServicePrincipal,
        permission: &GraphPermission,
    ) -> Result<(), DriverError> {
        let url = format!(
            "{}/v1.0/servicePrincipals/{}/appRoleAssignments",
            self.base.graph, sp.object_id,
        );
        let body = json!({
            "principalId": sp.object_id.as_str(),
            "resourceId": permission.resource_id.as_str(),
            "appRoleId": permission.id,
        });
        let (status, resp) = self.graph_post(&url, &body).await?;
        if status == 400 && Self::parse_api_error(&resp).contains("already exists") {
            debug!(permission = %permission.value, "Admin consent already granted");
            return Ok(());
        }
        Self::ensure_success(&format!("grant admin consent for {}", permission.value), status, resp)?;
        Ok(())
    }

    // ── Credentials ───────────────────────────────────────────────────────────

    async fn list_federated_credentials(
        &self,
        app: &Application,
    ) -> Result<Vec<FederatedTrust>, DriverError> {
        let url = format!("{}/federatedIdentityCredentials", self.application_url(app));
        let body = self.graph_get(&url, &[]).await?;
        Ok(body["value"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|v| FederatedTrust {
                name: text(&v["name"]),
                issuer: text(&v["issuer"]),
                subject: text(&v["subject"]),
                audience: v["audiences"]
                    .as_array()
                    .and_then(|a| a.first())
                    .map(text)
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn create_federated_credential(
        &self,
        app: &Application,
        trust: &FederatedTrust,
    ) -> Result<(), DriverError> {
        let url = format!("{}/federatedIdentityCredentials", self.application_url(app));
        let body = json!({
            "name": trust.name,
            "issuer": trust.issuer,
            "subject": trust.subject,
            "audiences": [trust.audience],
            "description": "Read-only compliance evidence collection",
        });
        let (status, resp) = self.graph_post(&url, &body).await?;
        if status == 409 {
            info!(name = %trust.name, "Federated credential already exists");
            return Ok(());
        }
        Self::ensure_success("create federated credential", status, resp)?;
        Ok(())
    }

    async fn list_secrets(&self, app: &Application) -> Result<Vec<SecretMetadata>, DriverError> {
        let creds = self.application_property(app, "passwordCredentials").await?;
        Ok(creds
            .as_array()
            .into_iter()
            .flatten()
            .map(|v| SecretMetadata {
                key_id: text(&v["keyId"]),
                display_name: v["displayName"].as_str().map(String::from),
                expires_at: parse_timestamp(&v["endDateTime"]),
            })
            .collect())
    }

    async fn add_secret(
        &self,
        app: &Application,
        display_name: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<IssuedSecret, DriverError> {
        let url = format!("{}/addPassword", self.application_url(app));
        let body = json!({
            "passwordCredential": {
                "displayName": display_name,
                "endDateTime": expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            }
        });
        let (status, resp) = self.graph_post(&url, &body).await?;
        let resp = Self::ensure_success("add client secret", status, resp)?;
        let value = resp["secretText"]
            .as_str()
            .ok_or_else(|| DriverError::Internal("addPassword: no secretText in response".into()))?;
        Ok(IssuedSecret {
            key_id: text(&resp["keyId"]),
            value: SecretValue::new(value),
            expires_at: parse_timestamp(&resp["endDateTime"]).unwrap_or(expires_at),
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
