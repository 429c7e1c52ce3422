//! Azure remote-state backend lifecycle: storage account, container,
//! blob versioning and role-assignment provisioning.

mod client;
mod errors;
mod lifecycle;

pub use client::{AzureClient, HttpAzureClient, StorageAccountProperties, StorageAccountSpec};
#[cfg(test)]
pub use client::FakeAzureClient;
pub use errors::{AzureBackendError, Result};
pub use lifecycle::{BackendManager, RemoteBackendConfig, RoleAssignmentConfig};
