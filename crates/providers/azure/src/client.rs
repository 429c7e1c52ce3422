//! The thin interface the lifecycle manager drives, plus a concrete
//! `reqwest`-backed implementation and an in-memory test double. Neither
//! implementation embeds the full Azure SDK; the trait captures exactly
//! the handful of ARM/Storage operations the backend lifecycle needs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{AzureBackendError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageAccountProperties {
    pub sku: String,
    pub kind: String,
    pub location: String,
    pub allow_blob_public_access: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageAccountSpec {
    pub location: String,
    pub sku: String,
    pub kind: String,
    pub allow_blob_public_access: bool,
    pub tags: std::collections::BTreeMap<String, String>,
}

/// The operations the backend lifecycle needs against Azure Resource
/// Manager and the Storage data plane. Implemented by [`HttpAzureClient`]
/// for real use and by [`FakeAzureClient`] in tests.
#[async_trait]
pub trait AzureClient: Send + Sync {
    async fn resource_group_exists(&self, name: &str) -> Result<bool>;
    async fn create_resource_group(&self, name: &str, location: &str) -> Result<()>;

    async fn get_storage_account(&self, name: &str) -> Result<Option<StorageAccountProperties>>;
    async fn create_storage_account(&self, name: &str, spec: &StorageAccountSpec) -> Result<()>;
    async fn enable_blob_versioning(&self, account_name: &str) -> Result<()>;

    async fn container_exists(&self, account_name: &str, container_name: &str) -> Result<bool>;
    async fn create_container(&self, account_name: &str, container_name: &str) -> Result<()>;

    /// Creates a role assignment, retrying on a GUID collision with a
    /// freshly generated id. Returns the id that was ultimately used.
    async fn create_role_assignment(
        &self,
        scope: &str,
        principal_id: &str,
        role_definition_id: &str,
        assignment_id: &str,
    ) -> Result<()>;

    /// Reads an object directly out of blob storage, for the config
    /// engine's dependency fast-path. `Ok(None)` means the blob does not
    /// exist (not an error).
    async fn read_blob(&self, account_name: &str, container_name: &str, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Real Azure Resource Manager / Storage client over `reqwest`.
pub struct HttpAzureClient {
    http: reqwest::Client,
    subscription_id: String,
    resource_group: String,
    bearer_token: String,
}

const ARM_BASE: &str = "https://management.azure.com";
const ARM_API_VERSION: &str = "2023-01-01";

impl HttpAzureClient {
    pub fn new(subscription_id: impl Into<String>, resource_group: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            bearer_token: bearer_token.into(),
        }
    }

    fn resource_group_url(&self, name: &str) -> String {
        format!(
            "{ARM_BASE}/subscriptions/{}/resourcegroups/{name}?api-version={ARM_API_VERSION}",
            self.subscription_id
        )
    }

    fn storage_account_url(&self, name: &str) -> String {
        format!(
            "{ARM_BASE}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Storage/storageAccounts/{name}?api-version=2023-01-01",
            self.subscription_id, self.resource_group
        )
    }

    fn blob_service_url(&self, account_name: &str) -> String {
        format!(
            "{ARM_BASE}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Storage/storageAccounts/{account_name}/blobServices/default?api-version=2023-01-01",
            self.subscription_id, self.resource_group
        )
    }

    fn role_assignment_url(&self, scope: &str, assignment_id: &str) -> String {
        format!("{ARM_BASE}{scope}/providers/Microsoft.Authorization/roleAssignments/{assignment_id}?api-version=2022-04-01")
    }

    fn container_data_plane_url(&self, account_name: &str, container_name: &str) -> String {
        format!("https://{account_name}.blob.core.windows.net/{container_name}?restype=container")
    }

    fn blob_data_plane_url(&self, account_name: &str, container_name: &str, key: &str) -> String {
        format!("https://{account_name}.blob.core.windows.net/{container_name}/{key}")
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        builder
            .bearer_auth(&self.bearer_token)
            .send()
            .await
            .map_err(|err| {
                if err.is_connect() || err.is_timeout() {
                    AzureBackendError::NetworkUnreachable(err.to_string())
                } else {
                    AzureBackendError::Other(anyhow::anyhow!(err))
                }
            })
    }
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> AzureBackendError {
    match status.as_u16() {
        401 => AzureBackendError::AuthFailed(body.to_string()),
        403 => AzureBackendError::Forbidden(body.to_string()),
        404 => AzureBackendError::NotFound(body.to_string()),
        500..=599 => AzureBackendError::ServiceError { status: status.as_u16(), message: body.to_string() },
        other => AzureBackendError::UnexpectedApiError {
            status: other,
            code: status.canonical_reason().unwrap_or("unknown").to_string(),
            message: body.to_string(),
        },
    }
}

#[async_trait]
impl AzureClient for HttpAzureClient {
    async fn resource_group_exists(&self, name: &str) -> Result<bool> {
        let response = self.send(self.http.get(self.resource_group_url(name))).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            status => Err(classify_status(status, &response.text().await.unwrap_or_default())),
        }
    }

    async fn create_resource_group(&self, name: &str, location: &str) -> Result<()> {
        let body = serde_json::json!({ "location": location });
        let response = self
            .send(self.http.put(self.resource_group_url(name)).json(&body))
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(classify_status(response.status(), &response.text().await.unwrap_or_default()))
        }
    }

    async fn get_storage_account(&self, name: &str) -> Result<Option<StorageAccountProperties>> {
        let response = self.send(self.http.get(self.storage_account_url(name))).await?;
        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|err| AzureBackendError::Other(anyhow::anyhow!(err)))?;
                let sku = body["sku"]["name"].as_str().unwrap_or_default().to_string();
                let kind = body["kind"].as_str().unwrap_or_default().to_string();
                let location = body["location"].as_str().unwrap_or_default().to_string();
                let allow_blob_public_access = body["properties"]["allowBlobPublicAccess"]
                    .as_bool()
                    .unwrap_or(true);
                Ok(Some(StorageAccountProperties { sku, kind, location, allow_blob_public_access }))
            }
            status => Err(classify_status(status, &response.text().await.unwrap_or_default())),
        }
    }

    async fn create_storage_account(&self, name: &str, spec: &StorageAccountSpec) -> Result<()> {
        let body = serde_json::json!({
            "location": spec.location,
            "sku": { "name": spec.sku },
            "kind": spec.kind,
            "tags": spec.tags,
            "properties": {
                "allowBlobPublicAccess": spec.allow_blob_public_access,
            }
        });
        let response = self
            .send(self.http.put(self.storage_account_url(name)).json(&body))
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(classify_status(response.status(), &response.text().await.unwrap_or_default()))
        }
    }

    async fn enable_blob_versioning(&self, account_name: &str) -> Result<()> {
        let body = serde_json::json!({ "properties": { "isVersioningEnabled": true } });
        let response = self
            .send(self.http.put(self.blob_service_url(account_name)).json(&body))
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(classify_status(response.status(), &response.text().await.unwrap_or_default()))
        }
    }

    async fn container_exists(&self, account_name: &str, container_name: &str) -> Result<bool> {
        let response = self
            .send(self.http.head(self.container_data_plane_url(account_name, container_name)))
            .await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            status => Err(classify_status(status, &response.text().await.unwrap_or_default())),
        }
    }

    async fn create_container(&self, account_name: &str, container_name: &str) -> Result<()> {
        let response = self
            .send(self.http.put(self.container_data_plane_url(account_name, container_name)))
            .await?;
        if response.status().is_success() || response.status() == reqwest::StatusCode::CONFLICT {
            Ok(())
        } else {
            Err(classify_status(response.status(), &response.text().await.unwrap_or_default()))
        }
    }

    async fn create_role_assignment(
        &self,
        scope: &str,
        principal_id: &str,
        role_definition_id: &str,
        assignment_id: &str,
    ) -> Result<()> {
        let body = serde_json::json!({
            "properties": {
                "roleDefinitionId": role_definition_id,
                "principalId": principal_id,
            }
        });
        let response = self
            .send(self.http.put(self.role_assignment_url(scope, assignment_id)).json(&body))
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(classify_status(response.status(), &response.text().await.unwrap_or_default()))
        }
    }

    async fn read_blob(&self, account_name: &str, container_name: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let response = self
            .send(self.http.get(self.blob_data_plane_url(account_name, container_name, key)))
            .await?;
        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(
                response
                    .bytes()
                    .await
                    .map_err(|err| AzureBackendError::Other(anyhow::anyhow!(err)))?
                    .to_vec(),
            )),
            status => Err(classify_status(status, &response.text().await.unwrap_or_default())),
        }
    }
}

#[cfg(test)]
pub use fake::FakeAzureClient;

#[cfg(test)]
mod fake {
    use std::collections::{BTreeMap, HashMap, HashSet};
    use std::sync::Mutex;

    use super::*;

    /// In-memory stand-in for [`AzureClient`], mirroring the teacher's
    /// null-provider pattern: enough state to exercise idempotent
    /// ensure-logic without a network call.
    #[derive(Default)]
    pub struct FakeAzureClient {
        resource_groups: Mutex<HashSet<String>>,
        storage_accounts: Mutex<HashMap<String, StorageAccountProperties>>,
        versioned_accounts: Mutex<HashSet<String>>,
        containers: Mutex<HashSet<(String, String)>>,
        role_assignments: Mutex<HashSet<String>>,
        blobs: Mutex<HashMap<(String, String, String), Vec<u8>>>,
        pub fail_role_assignment_ids: Mutex<HashSet<String>>,
        pub deny_role_assignments: Mutex<bool>,
    }

    impl FakeAzureClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed_blob(&self, account: &str, container: &str, key: &str, bytes: Vec<u8>) {
            self.blobs
                .lock()
                .unwrap()
                .insert((account.to_string(), container.to_string(), key.to_string()), bytes);
        }

        pub fn has_versioning(&self, account: &str) -> bool {
            self.versioned_accounts.lock().unwrap().contains(account)
        }

        pub fn role_assignment_count(&self) -> usize {
            self.role_assignments.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl AzureClient for FakeAzureClient {
        async fn resource_group_exists(&self, name: &str) -> Result<bool> {
            Ok(self.resource_groups.lock().unwrap().contains(name))
        }

        async fn create_resource_group(&self, name: &str, _location: &str) -> Result<()> {
            self.resource_groups.lock().unwrap().insert(name.to_string());
            Ok(())
        }

        async fn get_storage_account(&self, name: &str) -> Result<Option<StorageAccountProperties>> {
            Ok(self.storage_accounts.lock().unwrap().get(name).cloned())
        }

        async fn create_storage_account(&self, name: &str, spec: &StorageAccountSpec) -> Result<()> {
            let _ = BTreeMap::<String, String>::new();
            self.storage_accounts.lock().unwrap().insert(
                name.to_string(),
                StorageAccountProperties {
                    sku: spec.sku.clone(),
                    kind: spec.kind.clone(),
                    location: spec.location.clone(),
                    allow_blob_public_access: spec.allow_blob_public_access,
                },
            );
            Ok(())
        }

        async fn enable_blob_versioning(&self, account_name: &str) -> Result<()> {
            self.versioned_accounts.lock().unwrap().insert(account_name.to_string());
            Ok(())
        }

        async fn container_exists(&self, account_name: &str, container_name: &str) -> Result<bool> {
            Ok(self
                .containers
                .lock()
                .unwrap()
                .contains(&(account_name.to_string(), container_name.to_string())))
        }

        async fn create_container(&self, account_name: &str, container_name: &str) -> Result<()> {
            self.containers
                .lock()
                .unwrap()
                .insert((account_name.to_string(), container_name.to_string()));
            Ok(())
        }

        async fn create_role_assignment(
            &self,
            _scope: &str,
            _principal_id: &str,
            _role_definition_id: &str,
            assignment_id: &str,
        ) -> Result<()> {
            if *self.deny_role_assignments.lock().unwrap() {
                return Err(AzureBackendError::Forbidden("caller lacks Microsoft.Authorization/roleAssignments/write".to_string()));
            }
            if self.fail_role_assignment_ids.lock().unwrap().contains(assignment_id) {
                return Err(AzureBackendError::UnexpectedApiError {
                    status: 409,
                    code: "RoleAssignmentExists".to_string(),
                    message: format!("{assignment_id} already exists"),
                });
            }
            self.role_assignments.lock().unwrap().insert(assignment_id.to_string());
            Ok(())
        }

        async fn read_blob(&self, account_name: &str, container_name: &str, key: &str) -> Result<Option<Vec<u8>>> {
            Ok(self
                .blobs
                .lock()
                .unwrap()
                .get(&(account_name.to_string(), container_name.to_string(), key.to_string()))
                .cloned())
        }
    }
}
