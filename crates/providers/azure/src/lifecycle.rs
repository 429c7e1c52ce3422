//! Idempotent provisioning of an Azure remote-state backend: resource
//! group, storage account, container, blob versioning and the role
//! assignment a unit's identity needs to read/write state. Mirrors the
//! teacher's ensure-then-create provider pattern (inspect first, create
//! only on "not found", warn rather than fail on drift that can't be
//! reconciled in place).

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{AzureClient, StorageAccountSpec};
use crate::errors::{AzureBackendError, Result};

const ROLE_ASSIGNMENT_RETRY_DELAY: Duration = Duration::from_secs(3);
const ROLE_ASSIGNMENT_MAX_RETRIES: u32 = 5;

/// The role assignment a unit's identity needs over its backend's scope,
/// granted as the last step of `ensure_backend` (spec.md §4.5).
#[derive(Debug, Clone)]
pub struct RoleAssignmentConfig {
    pub scope: String,
    pub principal_id: String,
    pub role_definition_id: String,
}

#[derive(Debug, Clone)]
pub struct RemoteBackendConfig {
    pub storage_account_name: String,
    pub resource_group_name: Option<String>,
    pub subscription_id: Option<String>,
    pub location: Option<String>,
    pub container_name: Option<String>,
    pub key: Option<String>,
    pub sku: Option<String>,
    pub kind: Option<String>,
    pub access_tier: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub allow_blob_public_access: bool,
    pub enable_versioning: bool,
    pub use_azuread_auth: bool,
    pub role_assignment: Option<RoleAssignmentConfig>,
}

impl RemoteBackendConfig {
    pub fn new(storage_account_name: impl Into<String>) -> Self {
        Self {
            storage_account_name: storage_account_name.into(),
            resource_group_name: None,
            subscription_id: None,
            location: None,
            container_name: None,
            key: None,
            sku: None,
            kind: None,
            access_tier: None,
            tags: BTreeMap::new(),
            allow_blob_public_access: false,
            enable_versioning: true,
            use_azuread_auth: true,
            role_assignment: None,
        }
    }

    fn container(&self) -> &str {
        self.container_name.as_deref().unwrap_or("tfstate")
    }

    fn sku(&self) -> &str {
        self.sku.as_deref().unwrap_or("Standard_LRS")
    }

    fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or("StorageV2")
    }

    fn location(&self) -> &str {
        self.location.as_deref().unwrap_or("eastus")
    }
}

/// Drives a [`AzureClient`] through the sequence of idempotent
/// provisioning steps a unit's backend block requires.
pub struct BackendManager<C: AzureClient> {
    client: C,
}

impl<C: AzureClient> BackendManager<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub async fn ensure_backend(&self, config: &RemoteBackendConfig) -> Result<()> {
        self.ensure_resource_group(config).await?;
        self.ensure_storage_account(config).await?;
        if config.enable_versioning {
            self.ensure_versioning(config).await?;
        }
        self.ensure_container(config).await?;
        if let Some(role_assignment) = &config.role_assignment {
            self.ensure_role_assignment(
                &role_assignment.scope,
                &role_assignment.principal_id,
                &role_assignment.role_definition_id,
            )
            .await?;
        }
        Ok(())
    }

    async fn ensure_resource_group(&self, config: &RemoteBackendConfig) -> Result<()> {
        let Some(name) = &config.resource_group_name else {
            debug!("no resource group configured, assuming storage account already exists");
            return Ok(());
        };

        if self.client.resource_group_exists(name).await? {
            debug!(resource_group = %name, "resource group already exists");
            return Ok(());
        }

        info!(resource_group = %name, "creating resource group");
        self.client.create_resource_group(name, config.location()).await
    }

    async fn ensure_storage_account(&self, config: &RemoteBackendConfig) -> Result<()> {
        match self.client.get_storage_account(&config.storage_account_name).await? {
            Some(existing) => {
                // SKU, kind and location are immutable after creation;
                // a mismatch is surfaced as a warning, not a failure.
                if existing.sku != config.sku() {
                    warn!(
                        storage_account = %config.storage_account_name,
                        configured = config.sku(),
                        actual = %existing.sku,
                        "storage account SKU does not match configuration and cannot be changed in place"
                    );
                }
                if existing.kind != config.kind() {
                    warn!(
                        storage_account = %config.storage_account_name,
                        configured = config.kind(),
                        actual = %existing.kind,
                        "storage account kind does not match configuration and cannot be changed in place"
                    );
                }
                if existing.location != config.location() {
                    warn!(
                        storage_account = %config.storage_account_name,
                        configured = config.location(),
                        actual = %existing.location,
                        "storage account location does not match configuration and cannot be changed in place"
                    );
                }
                Ok(())
            }
            None => {
                info!(storage_account = %config.storage_account_name, "creating storage account");
                let spec = StorageAccountSpec {
                    location: config.location().to_string(),
                    sku: config.sku().to_string(),
                    kind: config.kind().to_string(),
                    allow_blob_public_access: config.allow_blob_public_access,
                    tags: config.tags.clone(),
                };
                self.client.create_storage_account(&config.storage_account_name, &spec).await
            }
        }
    }

    async fn ensure_versioning(&self, config: &RemoteBackendConfig) -> Result<()> {
        // Versioning is an account-scoped setting; enabling it is
        // idempotent on Azure's side, so there is no inspect step.
        match self.client.enable_blob_versioning(&config.storage_account_name).await {
            Ok(()) => Ok(()),
            Err(err) if err.looks_like_permission_issue() => {
                warn!(
                    storage_account = %config.storage_account_name,
                    error = %err,
                    "could not enable blob versioning; grant Storage Account Contributor to continue"
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn ensure_container(&self, config: &RemoteBackendConfig) -> Result<()> {
        let container = config.container();
        if self
            .client
            .container_exists(&config.storage_account_name, container)
            .await?
        {
            debug!(container = %container, "container already exists");
            return Ok(());
        }

        info!(container = %container, "creating container");
        self.client.create_container(&config.storage_account_name, container).await
    }

    /// Grants `principal_id` the given role over `scope`, generating a
    /// fresh assignment id on each attempt. Azure role assignment ids are
    /// GUIDs scoped to `(scope, roleDefinitionId, principalId)`; a
    /// collision means a matching assignment already exists under a
    /// different id, so we simply try again with a new one.
    pub async fn ensure_role_assignment(&self, scope: &str, principal_id: &str, role_definition_id: &str) -> Result<()> {
        let mut attempt = 0u32;
        let mut last_err = None;

        while attempt < ROLE_ASSIGNMENT_MAX_RETRIES + 1 {
            let assignment_id = if attempt == 0 {
                Uuid::new_v4().to_string()
            } else {
                alternate_shape_uuid()
            };

            match self
                .client
                .create_role_assignment(scope, principal_id, role_definition_id, &assignment_id)
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) if err.is_conflict() => {
                    // A 409 means a matching assignment already exists
                    // under some id — that's the desired end state.
                    debug!(assignment_id = %assignment_id, "role assignment already exists");
                    return Ok(());
                }
                Err(err) if err.looks_like_permission_issue() => {
                    warn!(
                        principal_id,
                        error = %err,
                        "could not create role assignment; grant the caller Role Based Access Control Administrator to continue"
                    );
                    return Ok(());
                }
                Err(err) => {
                    attempt += 1;
                    if attempt > ROLE_ASSIGNMENT_MAX_RETRIES {
                        last_err = Some(err);
                        break;
                    }
                    warn!(
                        attempt,
                        assignment_id = %assignment_id,
                        error = %err,
                        "role assignment attempt failed, retrying with a new id"
                    );
                    tokio::time::sleep(ROLE_ASSIGNMENT_RETRY_DELAY).await;
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| AzureBackendError::Other(anyhow::anyhow!("role assignment failed with no recorded error"))))
    }
}

/// Builds an "alternate shape" id out of hex fragments of three fresh
/// UUIDs, used on retry so a transient id collision can't repeat twice in
/// a row even if the underlying RNG were ever predictable.
fn alternate_shape_uuid() -> String {
    let a = Uuid::new_v4().simple().to_string();
    let b = Uuid::new_v4().simple().to_string();
    let c = Uuid::new_v4().simple().to_string();

    format!("{}-{}-4000-8000-{}", &a[0..8], &b[0..4], &c[0..12])
}
