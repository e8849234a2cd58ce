//! Extra claims merged into token issuance and refresh responses.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;

use crate::config::ExtensionFailurePolicy;
use crate::directory::MembershipDirectory;
use crate::errors::{ExtensionError, StorageError};

/// Computes additional response fields for a user at issuance time.
#[async_trait]
pub trait TokenExtensionSupplier: Send + Sync {
    async fn extension_fields(&self, user_id: &str) -> Result<Map<String, Value>, ExtensionError>;
}

/// Adds `primary_org` and `organizations` from the membership directory.
pub struct OrganizationExtensionSupplier {
    directory: Arc<dyn MembershipDirectory>,
    failure_policy: ExtensionFailurePolicy,
}

impl OrganizationExtensionSupplier {
    pub fn new(
        directory: Arc<dyn MembershipDirectory>,
        failure_policy: ExtensionFailurePolicy,
    ) -> Self {
        Self {
            directory,
            failure_policy,
        }
    }

    async fn lookup(&self, user_id: &str) -> Result<Map<String, Value>, ExtensionError> {
        let lookup_failed = |e: StorageError| {
            ExtensionError::MembershipLookupFailed(user_id.to_string(), e.to_string())
        };

        let primary_org = self
            .directory
            .primary_organization(user_id)
            .await
            .map_err(lookup_failed)?;
        let organizations = self
            .directory
            .organizations(user_id)
            .await
            .map_err(lookup_failed)?;

        let mut fields = Map::new();
        fields.insert("primary_org".to_string(), json!(primary_org));
        fields.insert("organizations".to_string(), json!(organizations));
        Ok(fields)
    }
}

#[async_trait]
impl TokenExtensionSupplier for OrganizationExtensionSupplier {
    async fn extension_fields(&self, user_id: &str) -> Result<Map<String, Value>, ExtensionError> {
        match self.lookup(user_id).await {
            Ok(fields) => Ok(fields),
            Err(err) if self.failure_policy == ExtensionFailurePolicy::Degraded => {
                tracing::warn!(error = %err, user_id, "issuing token without organization claims");
                Ok(Map::new())
            }
            Err(err) => Err(err),
        }
    }
}

/// Supplier that adds nothing, for deployments without a membership directory.
pub struct NoExtension;

#[async_trait]
impl TokenExtensionSupplier for NoExtension {
    async fn extension_fields(&self, _user_id: &str) -> Result<Map<String, Value>, ExtensionError> {
        Ok(Map::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDirectory {
        primary: Option<String>,
        organizations: Vec<String>,
        fail: bool,
    }

    #[async_trait]
    impl MembershipDirectory for FixedDirectory {
        async fn organizations(&self, _user_id: &str) -> Result<Vec<String>, StorageError> {
            if self.fail {
                return Err(StorageError::ConnectionFailed("down".to_string()));
            }
            Ok(self.organizations.clone())
        }

        async fn primary_organization(
            &self,
            _user_id: &str,
        ) -> Result<Option<String>, StorageError> {
            if self.fail {
                return Err(StorageError::ConnectionFailed("down".to_string()));
            }
            Ok(self.primary.clone())
        }
    }

    fn supplier(fail: bool, policy: ExtensionFailurePolicy) -> OrganizationExtensionSupplier {
        OrganizationExtensionSupplier::new(
            Arc::new(FixedDirectory {
                primary: Some("org-1".to_string()),
                organizations: vec!["org-1".to_string(), "org-2".to_string()],
                fail,
            }),
            policy,
        )
    }

    #[tokio::test]
    async fn test_organization_fields() {
        let fields = supplier(false, ExtensionFailurePolicy::FailClosed)
            .extension_fields("u1")
            .await
            .unwrap();
        assert_eq!(fields["primary_org"], json!("org-1"));
        assert_eq!(fields["organizations"], json!(["org-1", "org-2"]));
    }

    #[tokio::test]
    async fn test_fail_closed_propagates() {
        let result = supplier(true, ExtensionFailurePolicy::FailClosed)
            .extension_fields("u1")
            .await;
        assert!(matches!(
            result,
            Err(ExtensionError::MembershipLookupFailed(_, _))
        ));
    }

    #[tokio::test]
    async fn test_degraded_omits_fields() {
        let fields = supplier(true, ExtensionFailurePolicy::Degraded)
            .extension_fields("u1")
            .await
            .unwrap();
        assert!(fields.is_empty());
    }

    #[tokio::test]
    async fn test_user_without_primary_org() {
        let supplier = OrganizationExtensionSupplier::new(
            Arc::new(FixedDirectory {
                primary: None,
                organizations: vec![],
                fail: false,
            }),
            ExtensionFailurePolicy::FailClosed,
        );
        let fields = supplier.extension_fields("u1").await.unwrap();
        assert_eq!(fields["primary_org"], Value::Null);
        assert_eq!(fields["organizations"], json!([]));
    }
}
