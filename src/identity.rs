//! Operator identity resolution.
//!
//! The engine addresses operators by numeric id. Delivering a push or naming
//! an operator in a message needs more (display name, device token), which is
//! owned by the account system. This seam keeps the engine decoupled from it.

use std::collections::HashMap;

use async_trait::async_trait;

/// What the notifier needs to know about an operator.
#[derive(Debug, Clone)]
pub struct OperatorIdentity {
    pub operator_id: i64,
    pub display_name: String,
    /// Mobile push device token, when the operator registered a device.
    pub device_token: Option<String>,
}

/// Read-only access to operator identities.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, operator_id: i64) -> Option<OperatorIdentity>;
}

/// Table-backed [`IdentityResolver`] for embedders and tests.
#[derive(Debug, Default)]
pub struct IdentityTable {
    operators: HashMap<i64, OperatorIdentity>,
}

impl IdentityTable {
    pub fn new(operators: Vec<OperatorIdentity>) -> Self {
        Self {
            operators: operators.into_iter().map(|o| (o.operator_id, o)).collect(),
        }
    }
}

#[async_trait]
impl IdentityResolver for IdentityTable {
    async fn resolve(&self, operator_id: i64) -> Option<OperatorIdentity> {
        self.operators.get(&operator_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_known_operator() {
        let table = IdentityTable::new(vec![OperatorIdentity {
            operator_id: 5,
            display_name: "R. Operator".into(),
            device_token: Some("tok-1".into()),
        }]);
        let identity = table.resolve(5).await.unwrap();
        assert_eq!(identity.display_name, "R. Operator");
        assert!(table.resolve(6).await.is_none());
    }
}
