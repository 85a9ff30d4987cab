//! Storage declarations: account, key lookup, connection-string synthesis,
//! blob container/blob, and the signed read-only blob URL.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use indexmap::IndexMap;

use crate::core::config::SasWindow;
use crate::core::context::{DeploymentContext, ResourceRef};
use crate::core::graph::{GraphError, ResourceKind};
use crate::core::output::{Output, OutputError};

use super::group::ResourceGroupRef;

/// Service version stamped into signed URLs.
const SAS_VERSION: &str = "2022-11-02";

/// Reference to a declared storage account.
#[derive(Debug, Clone)]
pub struct StorageAccountRef {
    pub(crate) inner: ResourceRef,
}

impl StorageAccountRef {
    pub fn logical_name(&self) -> &str {
        self.inner.logical_name()
    }

    /// Physical (engine-assigned) account name.
    pub fn name(&self) -> Output<String> {
        self.inner.attr("name")
    }
}

/// Declare a storage account: locally-redundant, general-purpose v2.
pub fn storage_account(
    ctx: &mut DeploymentContext,
    name: &str,
    group: &ResourceGroupRef,
) -> Result<StorageAccountRef, GraphError> {
    let mut config = IndexMap::new();
    config.insert("resource_group".to_string(), group.name().into());
    config.insert("replication".to_string(), "Standard_LRS".into());
    config.insert("kind".to_string(), "StorageV2".into());
    let inner = ctx.register(
        ResourceKind::StorageAccount,
        name,
        config,
        vec![group.logical_name().to_string()],
    )?;
    Ok(StorageAccountRef { inner })
}

/// One access key of a storage account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageAccountKey {
    pub key_name: String,
    pub value: String,
}

/// Deferred key lookup. The first key is primary; no other ordering is
/// guaranteed.
pub fn account_keys(account: &StorageAccountRef) -> Output<Vec<StorageAccountKey>> {
    let resource = account.logical_name().to_string();
    account.inner.state().try_map(move |attrs| {
        let mut keys = Vec::new();
        for key_name in ["key1", "key2"] {
            if let Some(value) = attrs.get(key_name) {
                keys.push(StorageAccountKey {
                    key_name: key_name.to_string(),
                    value: value.clone(),
                });
            }
        }
        if keys.is_empty() {
            return Err(OutputError::Empty(format!(
                "storage account '{}' returned no keys",
                resource
            )));
        }
        Ok(keys)
    })
}

/// Compose the account name and primary key into a connection string. Both
/// inputs stay deferred; the dependency edge on each is preserved.
pub fn connection_string(
    account_name: Output<String>,
    keys: Output<Vec<StorageAccountKey>>,
) -> Output<String> {
    account_name.zip(keys).try_map(|(name, keys)| {
        let first = keys
            .first()
            .ok_or_else(|| OutputError::Empty(format!("account '{}' has no keys", name)))?;
        Ok(format!(
            "DefaultEndpointsProtocol=https;AccountName={};AccountKey={};EndpointSuffix=core.windows.net",
            name, first.value
        ))
    })
}

/// Public access level of a blob container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicAccess {
    None,
    Blob,
    Container,
}

impl PublicAccess {
    fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Blob => "blob",
            Self::Container => "container",
        }
    }
}

/// Reference to a declared blob container.
#[derive(Debug, Clone)]
pub struct BlobContainerRef {
    pub(crate) inner: ResourceRef,
}

impl BlobContainerRef {
    pub fn logical_name(&self) -> &str {
        self.inner.logical_name()
    }

    pub fn name(&self) -> Output<String> {
        self.inner.attr("name")
    }
}

/// Declare a blob container inside a storage account.
pub fn blob_container(
    ctx: &mut DeploymentContext,
    name: &str,
    group: &ResourceGroupRef,
    account: &StorageAccountRef,
    access: PublicAccess,
) -> Result<BlobContainerRef, GraphError> {
    let mut config = IndexMap::new();
    config.insert("resource_group".to_string(), group.name().into());
    config.insert("account".to_string(), account.name().into());
    config.insert("public_access".to_string(), access.as_str().into());
    let inner = ctx.register(
        ResourceKind::BlobContainer,
        name,
        config,
        vec![
            group.logical_name().to_string(),
            account.logical_name().to_string(),
        ],
    )?;
    Ok(BlobContainerRef { inner })
}

/// Reference to a declared blob.
#[derive(Debug, Clone)]
pub struct BlobRef {
    pub(crate) inner: ResourceRef,
}

impl BlobRef {
    pub fn logical_name(&self) -> &str {
        self.inner.logical_name()
    }

    /// Name of the blob within its container.
    pub fn name(&self) -> Output<String> {
        self.inner.attr("name")
    }

    /// Hash of the uploaded archive, assigned by the engine.
    pub fn content_hash(&self) -> Output<String> {
        self.inner.attr("content_hash")
    }
}

/// Declare a block blob sourced from a local archive.
pub fn blob(
    ctx: &mut DeploymentContext,
    name: &str,
    blob_name: &str,
    group: &ResourceGroupRef,
    account: &StorageAccountRef,
    container: &BlobContainerRef,
    source: &str,
) -> Result<BlobRef, GraphError> {
    let mut config = IndexMap::new();
    config.insert("resource_group".to_string(), group.name().into());
    config.insert("account".to_string(), account.name().into());
    config.insert("container".to_string(), container.name().into());
    config.insert("name".to_string(), blob_name.into());
    config.insert("source".to_string(), source.into());
    let inner = ctx.register(
        ResourceKind::Blob,
        name,
        config,
        vec![
            group.logical_name().to_string(),
            account.logical_name().to_string(),
            container.logical_name().to_string(),
        ],
    )?;
    Ok(BlobRef { inner })
}

/// Request a read-only, HTTPS-only access signature for one blob and compose
/// it into a full URL. The signature is scoped to exactly the target path and
/// carries no write permission; composition fires only after the account,
/// container, and blob have all resolved.
pub fn sign_blob_read_url(
    account: &StorageAccountRef,
    container: &BlobContainerRef,
    blob: &BlobRef,
    window: &SasWindow,
) -> Output<String> {
    let resource = account.logical_name().to_string();
    let window = window.clone();
    account
        .inner
        .state()
        .zip(container.name())
        .zip(blob.name())
        .try_map(move |((attrs, container_name), blob_name)| {
            let account_name =
                attrs
                    .get("name")
                    .cloned()
                    .ok_or_else(|| OutputError::MissingAttribute {
                        resource: resource.clone(),
                        attribute: "name".to_string(),
                    })?;
            let account_key =
                attrs
                    .get("key1")
                    .cloned()
                    .ok_or_else(|| OutputError::MissingAttribute {
                        resource: resource.clone(),
                        attribute: "key1".to_string(),
                    })?;
            let token = read_only_sas_token(
                &account_key,
                &account_name,
                &container_name,
                &blob_name,
                &window,
            );
            Ok(format!(
                "https://{}.blob.core.windows.net/{}/{}?{}",
                account_name, container_name, blob_name, token
            ))
        })
}

/// Build a read-only service SAS token for one blob.
///
/// Permissions are fixed to `r`, protocol to HTTPS, and the canonical resource
/// path to exactly `/blob/{account}/{container}/{blob}`. Response headers pin
/// cache behavior and content handling to what the package fetcher expects.
pub fn read_only_sas_token(
    account_key: &str,
    account_name: &str,
    container_name: &str,
    blob_name: &str,
    window: &SasWindow,
) -> String {
    let permissions = "r";
    let protocol = "https";
    let canonical = format!("/blob/{}/{}/{}", account_name, container_name, blob_name);
    let cache_control = "no-cache";
    let content_disposition = format!("attachment; filename={}", blob_name);
    let content_encoding = "identity";

    let string_to_sign = [
        permissions,
        window.start.as_str(),
        window.expiry.as_str(),
        canonical.as_str(),
        SAS_VERSION,
        protocol,
        cache_control,
        content_disposition.as_str(),
        content_encoding,
    ]
    .join("\n");

    // The account key is opaque text; fold it to a fixed-width signing key.
    let signing_key = *blake3::hash(account_key.as_bytes()).as_bytes();
    let signature = blake3::keyed_hash(&signing_key, string_to_sign.as_bytes());
    let sig = URL_SAFE_NO_PAD.encode(signature.as_bytes());

    format!(
        "sv={}&st={}&se={}&sr=b&sp={}&spr={}&rscc={}&rscd={}&rsce={}&sig={}",
        percent_encode(SAS_VERSION),
        percent_encode(&window.start),
        percent_encode(&window.expiry),
        permissions,
        protocol,
        percent_encode(cache_control),
        percent_encode(&content_disposition),
        percent_encode(content_encoding),
        sig
    )
}

/// Percent-encode a query parameter value.
fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::ResourceAttrs;
    use crate::resources::group::resource_group;

    #[tokio::test]
    async fn test_connection_string_template() {
        let name = Output::resolved("sa1".to_string());
        let keys = Output::resolved(vec![
            StorageAccountKey {
                key_name: "key1".to_string(),
                value: "KEYVALUE".to_string(),
            },
            StorageAccountKey {
                key_name: "key2".to_string(),
                value: "OTHER".to_string(),
            },
        ]);
        let conn = connection_string(name, keys).resolve().await.unwrap();
        assert_eq!(
            conn,
            "DefaultEndpointsProtocol=https;AccountName=sa1;AccountKey=KEYVALUE;EndpointSuffix=core.windows.net"
        );
    }

    #[tokio::test]
    async fn test_connection_string_no_keys_poisons() {
        let name = Output::resolved("sa1".to_string());
        let keys = Output::resolved(Vec::<StorageAccountKey>::new());
        let err = connection_string(name, keys).resolve().await.unwrap_err();
        assert!(matches!(err, OutputError::Empty(_)));
    }

    #[test]
    fn test_sas_token_is_read_only() {
        let window = SasWindow::default();
        let token = read_only_sas_token("secretkey", "acct1", "deployments", "api.zip", &window);
        assert!(token.contains("&sp=r&"));
        assert!(!token.contains("sp=rw"));
        assert!(token.contains("&spr=https&"));
        assert!(token.contains("&sr=b&"));
        let sig = token.split("sig=").nth(1).unwrap();
        assert!(!sig.is_empty());
    }

    #[test]
    fn test_sas_token_scoped_to_resource() {
        let window = SasWindow::default();
        let a = read_only_sas_token("k", "acct1", "deployments", "api.zip", &window);
        let b = read_only_sas_token("k", "acct1", "deployments", "other.zip", &window);
        let sig_a = a.split("sig=").nth(1).unwrap();
        let sig_b = b.split("sig=").nth(1).unwrap();
        assert_ne!(sig_a, sig_b);
    }

    #[test]
    fn test_sas_token_deterministic() {
        let window = SasWindow::default();
        let a = read_only_sas_token("k", "acct1", "c", "b", &window);
        let b = read_only_sas_token("k", "acct1", "c", "b", &window);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_signed_url_shape() {
        let mut ctx = DeploymentContext::new();
        let rg = resource_group(&mut ctx, "rg", "westeurope").unwrap();
        let sa = storage_account(&mut ctx, "sa", &rg).unwrap();
        let container = blob_container(&mut ctx, "deployments", &rg, &sa, PublicAccess::None).unwrap();
        let package = blob(
            &mut ctx,
            "api-package",
            "api.zip",
            &rg,
            &sa,
            &container,
            "deploy/api.zip",
        )
        .unwrap();

        let url = sign_blob_read_url(&sa, &container, &package, &SasWindow::default());

        // Resolve by hand, standing in for the engine.
        let mut deployment = ctx.into_deployment().unwrap();
        let resolve = |slots: &mut rustc_hash::FxHashMap<String, crate::core::context::ResolutionSlot>,
                       name: &str,
                       pairs: &[(&str, &str)]| {
            let mut attrs = ResourceAttrs::new();
            for (k, v) in pairs {
                attrs.insert(k.to_string(), v.to_string());
            }
            slots.remove(name).unwrap().send(Ok(attrs)).unwrap();
        };
        resolve(&mut deployment.slots, "rg", &[("name", "rg-x1")]);
        resolve(
            &mut deployment.slots,
            "sa",
            &[("name", "acct1"), ("key1", "K1"), ("key2", "K2")],
        );
        resolve(&mut deployment.slots, "deployments", &[("name", "deployments")]);
        resolve(&mut deployment.slots, "api-package", &[("name", "api.zip")]);

        let url = url.resolve().await.unwrap();
        assert!(url.starts_with("https://acct1.blob.core.windows.net/deployments/api.zip?"));
        let token = url.split('?').nth(1).unwrap();
        assert!(!token.is_empty());
        assert!(token.contains("&sp=r&"));
    }

    #[tokio::test]
    async fn test_account_keys_first_is_primary() {
        let mut ctx = DeploymentContext::new();
        let rg = resource_group(&mut ctx, "rg", "westeurope").unwrap();
        let sa = storage_account(&mut ctx, "sa", &rg).unwrap();
        let keys = account_keys(&sa);

        let mut deployment = ctx.into_deployment().unwrap();
        deployment
            .slots
            .remove("rg")
            .unwrap()
            .send(Ok(ResourceAttrs::new()))
            .unwrap();
        let mut attrs = ResourceAttrs::new();
        attrs.insert("name".to_string(), "acct1".to_string());
        attrs.insert("key1".to_string(), "PRIMARY".to_string());
        attrs.insert("key2".to_string(), "SECONDARY".to_string());
        deployment.slots.remove("sa").unwrap().send(Ok(attrs)).unwrap();

        let keys = keys.resolve().await.unwrap();
        assert_eq!(keys[0].value, "PRIMARY");
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_percent_encode() {
        assert_eq!(percent_encode("no-cache"), "no-cache");
        assert_eq!(
            percent_encode("attachment; filename=a.zip"),
            "attachment%3B%20filename%3Da.zip"
        );
        assert_eq!(percent_encode("2024-01-01T00:00:00Z"), "2024-01-01T00%3A00%3A00Z");
    }
}
