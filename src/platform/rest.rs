//! HTTP client for the cluster management API

use super::types::*;
use super::Platform;
use crate::error::{Result, StretchError};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Header carrying the session token after login
pub const SESSION_HEADER: &str = "vmware-api-session-id";

/// Managed object type used for host tag associations
const HOST_OBJECT_TYPE: &str = "HostSystem";

/// Connection settings for [`RestPlatform`]
#[derive(Clone)]
pub struct RestSettings {
    /// Base URL, e.g. `https://vcenter.example.com`
    pub endpoint: String,
    pub username: String,
    pub password: String,
    /// Skip TLS certificate verification
    pub insecure: bool,
    /// Timeout applied to every request
    pub timeout: Duration,
}

impl fmt::Debug for RestSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestSettings")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"***")
            .field("insecure", &self.insecure)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct CategoryInfo {
    id: CategoryId,
    name: String,
    cardinality: Cardinality,
}

impl From<CategoryInfo> for TagCategory {
    fn from(info: CategoryInfo) -> Self {
        TagCategory {
            id: info.id,
            name: info.name,
            cardinality: info.cardinality,
        }
    }
}

#[derive(Debug, Serialize)]
struct TagCreate<'a> {
    category_id: &'a CategoryId,
    name: &'a str,
    description: String,
}

#[derive(Debug, Serialize)]
struct ObjectId<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Debug, Serialize)]
struct Association<'a> {
    object_id: ObjectId<'a>,
}

impl<'a> Association<'a> {
    fn host(host: &'a HostId) -> Self {
        Self {
            object_id: ObjectId {
                id: host.as_str(),
                kind: HOST_OBJECT_TYPE,
            },
        }
    }
}

/// Compute policy as returned by a get; the id is not part of the body
#[derive(Debug, Deserialize)]
struct ComputePolicyInfo {
    name: String,
    #[serde(default)]
    description: String,
    vm_tag: TagId,
    host_tag: TagId,
}

#[derive(Debug, Deserialize)]
struct StoragePolicyInfo {
    #[serde(rename = "policy")]
    id: StoragePolicyId,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    rule_sets: Vec<RuleSet>,
}

impl From<StoragePolicyInfo> for StoragePolicy {
    fn from(info: StoragePolicyInfo) -> Self {
        StoragePolicy {
            id: info.id,
            name: info.name,
            description: info.description,
            rule_sets: info.rule_sets,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CapabilityInfo {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PreferredDomain {
    name: String,
}

/// [`Platform`] backed by the management API over HTTPS
pub struct RestPlatform {
    base: String,
    client: reqwest::Client,
    session: String,
}

impl RestPlatform {
    /// Log in and keep the session token for later calls
    pub async fn connect(settings: &RestSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(settings.insecure)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| StretchError::Connection(e.to_string()))?;
        let base = settings.endpoint.trim_end_matches('/').to_string();

        let response = client
            .post(join(&base, "/api/session"))
            .basic_auth(&settings.username, Some(&settings.password))
            .send()
            .await
            .map_err(|e| StretchError::Connection(format!("{}: {}", base, e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(StretchError::Connection(format!(
                "{} rejected the credentials of {}",
                base, settings.username
            )));
        }
        if !status.is_success() {
            return Err(StretchError::Connection(format!(
                "login to {} failed with HTTP {}",
                base, status
            )));
        }

        let session: String = response
            .json()
            .await
            .map_err(|e| StretchError::Connection(format!("unreadable session token: {}", e)))?;
        tracing::info!("Connected to {} as {}", base, settings.username);

        Ok(Self {
            base,
            client,
            session,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, join(&self.base, path))
            .header(SESSION_HEADER, &self.session)
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<Response> {
        tracing::debug!("Platform call {}", operation);
        let response = request
            .send()
            .await
            .map_err(|e| StretchError::platform(operation, e))?;
        check(operation, response).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<T> {
        self.send(operation, request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| StretchError::platform(operation, e))
    }

    /// Like `send_json`, but a 404 is `None`
    async fn send_optional<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<Option<T>> {
        let response = request
            .send()
            .await
            .map_err(|e| StretchError::platform(operation, e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let value = check(operation, response)
            .await?
            .json::<T>()
            .await
            .map_err(|e| StretchError::platform(operation, e))?;
        Ok(Some(value))
    }

    async fn get_tag(&self, id: &TagId) -> Result<Tag> {
        let path = format!("/api/cis/tagging/tag/{}", id);
        self.send_json("get_tag", self.request(Method::GET, &path))
            .await
    }
}

async fn check(operation: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::CONFLICT {
        return Err(StretchError::AlreadyExists(format!("{}: {}", operation, body)));
    }
    Err(StretchError::platform(
        operation,
        format!("HTTP {}: {}", status, body),
    ))
}

fn join(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[async_trait]
impl Platform for RestPlatform {
    async fn list_clusters(&self, name: Option<&str>) -> Result<Vec<Cluster>> {
        let mut request = self.request(Method::GET, "/api/vcenter/cluster");
        if let Some(name) = name {
            request = request.query(&[("names", name)]);
        }
        self.send_json("list_clusters", request).await
    }

    async fn list_hosts(&self, cluster: &ClusterId) -> Result<Vec<Host>> {
        let request = self
            .request(Method::GET, "/api/vcenter/host")
            .query(&[("clusters", cluster.as_str())]);
        self.send_json("list_hosts", request).await
    }

    async fn list_fault_domains(&self, cluster: &ClusterId) -> Result<Vec<FaultDomain>> {
        let path = format!("/api/vcenter/cluster/{}/fault-domains", cluster);
        self.send_json("list_fault_domains", self.request(Method::GET, &path))
            .await
    }

    async fn preferred_fault_domain(&self, cluster: &ClusterId) -> Result<Option<String>> {
        let path = format!("/api/vcenter/cluster/{}/fault-domains/preferred", cluster);
        let preferred: Option<PreferredDomain> = self
            .send_optional("preferred_fault_domain", self.request(Method::GET, &path))
            .await?;
        Ok(preferred.map(|p| p.name))
    }

    async fn find_category(&self, name: &str) -> Result<Option<TagCategory>> {
        let ids: Vec<CategoryId> = self
            .send_json(
                "find_category",
                self.request(Method::GET, "/api/cis/tagging/category"),
            )
            .await?;

        for id in ids {
            let path = format!("/api/cis/tagging/category/{}", id);
            let info: CategoryInfo = self
                .send_json("find_category", self.request(Method::GET, &path))
                .await?;
            if info.name == name {
                return Ok(Some(info.into()));
            }
        }
        Ok(None)
    }

    async fn create_category(&self, spec: &CategorySpec) -> Result<TagCategory> {
        let request = self
            .request(Method::POST, "/api/cis/tagging/category")
            .json(spec);
        let id: CategoryId = self.send_json("create_category", request).await?;

        Ok(TagCategory {
            id,
            name: spec.name.clone(),
            cardinality: spec.cardinality,
        })
    }

    async fn find_tag(&self, category: &CategoryId, name: &str) -> Result<Option<Tag>> {
        let request = self
            .request(Method::GET, "/api/cis/tagging/tag")
            .query(&[("category_id", category.as_str())]);
        let ids: Vec<TagId> = self.send_json("find_tag", request).await?;

        for id in ids {
            let tag = self.get_tag(&id).await?;
            if tag.name == name {
                return Ok(Some(tag));
            }
        }
        Ok(None)
    }

    async fn create_tag(&self, category: &CategoryId, name: &str) -> Result<Tag> {
        let body = TagCreate {
            category_id: category,
            name,
            description: format!("Fault domain {}", name),
        };
        let request = self
            .request(Method::POST, "/api/cis/tagging/tag")
            .json(&body);
        let id: TagId = self.send_json("create_tag", request).await?;

        Ok(Tag {
            id,
            category_id: category.clone(),
            name: name.to_string(),
        })
    }

    async fn list_attached_tags(
        &self,
        host: &HostId,
        category: &CategoryId,
    ) -> Result<Vec<TagId>> {
        let request = self
            .request(Method::POST, "/api/cis/tagging/tag-association")
            .query(&[("action", "list-attached-tags")])
            .json(&Association::host(host));
        let ids: Vec<TagId> = self.send_json("list_attached_tags", request).await?;

        let mut in_category = Vec::new();
        for id in ids {
            if &self.get_tag(&id).await?.category_id == category {
                in_category.push(id);
            }
        }
        Ok(in_category)
    }

    async fn attach_tag(&self, tag: &TagId, host: &HostId) -> Result<()> {
        let path = format!("/api/cis/tagging/tag-association/{}", tag);
        let request = self
            .request(Method::POST, &path)
            .query(&[("action", "attach")])
            .json(&Association::host(host));
        self.send("attach_tag", request).await?;
        Ok(())
    }

    async fn list_compute_policies(&self) -> Result<Vec<PolicySummary>> {
        self.send_json(
            "list_compute_policies",
            self.request(Method::GET, "/api/vcenter/compute/policies"),
        )
        .await
    }

    async fn get_compute_policy(&self, id: &PolicyId) -> Result<ComputePolicy> {
        let path = format!("/api/vcenter/compute/policies/{}", id);
        let info: ComputePolicyInfo = self
            .send_json("get_compute_policy", self.request(Method::GET, &path))
            .await?;

        Ok(ComputePolicy {
            id: id.clone(),
            name: info.name,
            description: info.description,
            vm_tag: info.vm_tag,
            host_tag: info.host_tag,
        })
    }

    async fn create_compute_policy(&self, spec: &ComputePolicySpec) -> Result<PolicyId> {
        let request = self
            .request(Method::POST, "/api/vcenter/compute/policies")
            .json(spec);
        self.send_json("create_compute_policy", request).await
    }

    async fn find_storage_policy(&self, name: &str) -> Result<Option<StoragePolicy>> {
        let request = self
            .request(Method::GET, "/api/vcenter/storage/policies")
            .query(&[("names", name)]);
        let policies: Vec<StoragePolicyInfo> =
            self.send_json("find_storage_policy", request).await?;

        Ok(policies
            .into_iter()
            .find(|p| p.name == name)
            .map(StoragePolicy::from))
    }

    async fn create_storage_policy(&self, spec: &StoragePolicySpec) -> Result<StoragePolicy> {
        let request = self
            .request(Method::POST, "/api/vcenter/storage/policies")
            .json(spec);
        let id: StoragePolicyId = self.send_json("create_storage_policy", request).await?;

        Ok(StoragePolicy {
            id,
            name: spec.name.clone(),
            description: spec.description.clone(),
            rule_sets: spec.rule_sets.clone(),
        })
    }

    async fn storage_capabilities(&self) -> Result<Vec<String>> {
        let capabilities: Vec<CapabilityInfo> = self
            .send_json(
                "storage_capabilities",
                self.request(Method::GET, "/api/vcenter/storage/policies/capabilities"),
            )
            .await?;
        Ok(capabilities.into_iter().map(|c| c.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join() {
        assert_eq!(
            join("https://vc.example.com/", "/api/session"),
            "https://vc.example.com/api/session"
        );
        assert_eq!(
            join("https://vc.example.com", "api/vcenter/cluster"),
            "https://vc.example.com/api/vcenter/cluster"
        );
    }

    #[test]
    fn test_cluster_and_host_listings() {
        let clusters: Vec<Cluster> =
            serde_json::from_str(r#"[{"cluster": "domain-c8", "name": "stretch-01", "ha_enabled": true}]"#)
                .unwrap();
        assert_eq!(clusters[0].id, ClusterId::new("domain-c8"));
        assert_eq!(clusters[0].name, "stretch-01");

        let hosts: Vec<Host> =
            serde_json::from_str(r#"[{"host": "host-12", "name": "esx-a1", "connection_state": "CONNECTED"}]"#)
                .unwrap();
        assert_eq!(hosts[0].id, HostId::new("host-12"));
    }

    #[test]
    fn test_category_info() {
        let info: CategoryInfo = serde_json::from_str(
            r#"{"id": "urn:cat:1", "name": "AZ", "cardinality": "MULTIPLE", "associable_types": []}"#,
        )
        .unwrap();
        let category = TagCategory::from(info);
        assert_eq!(category.name, "AZ");
        assert_eq!(category.cardinality, Cardinality::Multiple);
    }

    #[test]
    fn test_compute_policy_info() {
        let info: ComputePolicyInfo = serde_json::from_str(
            r#"{
                "name": "DomainA",
                "capability": "com.vmware.vcenter.compute.policies.capabilities.vm_host_affinity",
                "vm_tag": "urn:tag:a",
                "host_tag": "urn:tag:a"
            }"#,
        )
        .unwrap();
        assert_eq!(info.description, "");
        assert_eq!(info.vm_tag, info.host_tag);
    }

    #[test]
    fn test_storage_policy_info() {
        let policies: Vec<StoragePolicyInfo> = serde_json::from_str(
            r#"[{
                "policy": "sp-1",
                "name": "DomainA",
                "rule_sets": [{"rules": [{"capability": "VSAN.locality", "value": "Preferred"}]}]
            }]"#,
        )
        .unwrap();
        let policy = StoragePolicy::from(policies.into_iter().next().unwrap());
        assert_eq!(policy.id, StoragePolicyId::new("sp-1"));
        assert_eq!(policy.rule_sets[0].rules[0].value, "Preferred");
    }

    #[test]
    fn test_association_body() {
        let host = HostId::new("host-12");
        let body = serde_json::to_value(Association::host(&host)).unwrap();
        assert_eq!(body["object_id"]["id"], "host-12");
        assert_eq!(body["object_id"]["type"], "HostSystem");
    }

    #[test]
    fn test_settings_debug_hides_password() {
        let settings = RestSettings {
            endpoint: "https://vc".to_string(),
            username: "admin".to_string(),
            password: "hunter2".to_string(),
            insecure: false,
            timeout: Duration::from_secs(5),
        };
        assert!(!format!("{:?}", settings).contains("hunter2"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_a_connection_error() {
        let settings = RestSettings {
            endpoint: "http://127.0.0.1:1".to_string(),
            username: "admin".to_string(),
            password: "secret".to_string(),
            insecure: false,
            timeout: Duration::from_secs(2),
        };

        let err = RestPlatform::connect(&settings).await.err().unwrap();
        assert!(err.is_connection());
    }
}
