//! Resolves the `AZURE_*` / `ARM_*` environment-variable pairs the
//! framework recognizes for backend authentication. `AZURE_*` wins when
//! both are set (spec.md §6).

const PAIRED_SUFFIXES: &[&str] = &[
    "SUBSCRIPTION_ID",
    "TENANT_ID",
    "CLIENT_ID",
    "CLIENT_SECRET",
    "MANAGED_IDENTITY_CLIENT_ID",
];

pub fn lookup(suffix: &str) -> Option<String> {
    debug_assert!(PAIRED_SUFFIXES.contains(&suffix), "unrecognized azure env pair suffix: {suffix}");
    std::env::var(format!("AZURE_{suffix}"))
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| std::env::var(format!("ARM_{suffix}")).ok().filter(|v| !v.is_empty()))
}

pub fn subscription_id() -> Option<String> {
    lookup("SUBSCRIPTION_ID")
}

pub fn tenant_id() -> Option<String> {
    lookup("TENANT_ID")
}

pub fn client_id() -> Option<String> {
    lookup("CLIENT_ID")
}

pub fn client_secret() -> Option<String> {
    lookup("CLIENT_SECRET")
}

pub fn managed_identity_client_id() -> Option<String> {
    lookup("MANAGED_IDENTITY_CLIENT_ID")
}

const ARM_SCOPE: &str = "https://management.azure.com/.default";

/// Acquires a bearer token for Azure Resource Manager, following whichever
/// credential the environment actually supplies: a user-assigned managed
/// identity first (no secret to leak), falling back to an AAD app's client
/// credentials flow.
pub async fn acquire_bearer_token(http: &reqwest::Client) -> anyhow::Result<String> {
    if let Some(client_id) = managed_identity_client_id() {
        return acquire_via_managed_identity(http, &client_id).await;
    }

    let tenant = tenant_id().ok_or_else(|| anyhow::anyhow!("AZURE_TENANT_ID or ARM_TENANT_ID must be set"))?;
    let client = client_id().ok_or_else(|| anyhow::anyhow!("AZURE_CLIENT_ID or ARM_CLIENT_ID must be set"))?;
    let secret = client_secret().ok_or_else(|| anyhow::anyhow!("AZURE_CLIENT_SECRET or ARM_CLIENT_SECRET must be set"))?;
    acquire_via_client_credentials(http, &tenant, &client, &secret).await
}

async fn acquire_via_managed_identity(http: &reqwest::Client, client_id: &str) -> anyhow::Result<String> {
    let response = http
        .get("http://169.254.169.254/metadata/identity/oauth2/token")
        .header("Metadata", "true")
        .query(&[("api-version", "2018-02-01"), ("resource", "https://management.azure.com/"), ("client_id", client_id)])
        .send()
        .await?
        .error_for_status()?;
    let body: serde_json::Value = response.json().await?;
    body["access_token"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("managed identity endpoint response had no access_token"))
}

async fn acquire_via_client_credentials(http: &reqwest::Client, tenant: &str, client_id: &str, client_secret: &str) -> anyhow::Result<String> {
    let url = format!("https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token");
    let response = http
        .post(url)
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("scope", ARM_SCOPE),
        ])
        .send()
        .await?
        .error_for_status()?;
    let body: serde_json::Value = response.json().await?;
    body["access_token"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("token endpoint response had no access_token"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_GUARD: Mutex<()> = Mutex::new(());

    #[test]
    fn azure_prefixed_variable_wins_over_arm_prefixed() {
        let _guard = ENV_GUARD.lock().unwrap();
        std::env::set_var("AZURE_SUBSCRIPTION_ID", "from-azure");
        std::env::set_var("ARM_SUBSCRIPTION_ID", "from-arm");

        assert_eq!(subscription_id().as_deref(), Some("from-azure"));

        std::env::remove_var("AZURE_SUBSCRIPTION_ID");
        std::env::remove_var("ARM_SUBSCRIPTION_ID");
    }

    #[test]
    fn falls_back_to_arm_prefixed_variable_when_azure_unset() {
        let _guard = ENV_GUARD.lock().unwrap();
        std::env::remove_var("AZURE_TENANT_ID");
        std::env::set_var("ARM_TENANT_ID", "from-arm");

        assert_eq!(tenant_id().as_deref(), Some("from-arm"));

        std::env::remove_var("ARM_TENANT_ID");
    }
}
