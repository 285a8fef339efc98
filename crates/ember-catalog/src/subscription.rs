//! Validation of rule subscriptions against the catalog.

use std::sync::Arc;

use ember_common::error::{EmberError, EmberResult};
use ember_common::types::{FieldPosition, ObjectType};

use crate::catalog::Catalog;

/// Checks that a subscription refers to an existing type and to existing,
/// active fields of that type.
#[derive(Debug, Clone)]
pub struct SubscriptionChecker {
    catalog: Arc<Catalog>,
}

impl SubscriptionChecker {
    /// Creates a checker over `catalog`.
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    /// Validates `object_type` and `fields`.
    pub fn check(&self, object_type: ObjectType, fields: &[FieldPosition]) -> EmberResult<()> {
        let table = self.catalog.table_by_type(object_type).ok_or_else(|| {
            EmberError::invalid_subscription(format!("type {object_type} is not in the catalog"))
        })?;

        for position in fields {
            match table.field(*position) {
                Some(field) if field.active => {}
                Some(field) => {
                    return Err(EmberError::invalid_subscription(format!(
                        "field '{}' of table '{}' is not active",
                        field.name, table.name
                    )));
                }
                None => {
                    return Err(EmberError::invalid_subscription(format!(
                        "table '{}' has no field at position {}",
                        table.name, position
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_common::error::ErrorCode;

    fn checker() -> SubscriptionChecker {
        let catalog = Arc::new(Catalog::new());
        catalog
            .create_table("sensor", ObjectType::new(7), &["value", "unit"])
            .unwrap();
        catalog.deactivate_field("sensor", FieldPosition::new(1)).unwrap();
        SubscriptionChecker::new(catalog)
    }

    #[test]
    fn test_valid_subscription() {
        let checker = checker();
        assert!(checker.check(ObjectType::new(7), &[]).is_ok());
        assert!(checker.check(ObjectType::new(7), &[FieldPosition::new(0)]).is_ok());
    }

    #[test]
    fn test_invalid_subscriptions() {
        let checker = checker();
        let err = checker.check(ObjectType::new(8), &[]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidSubscription);

        let err = checker.check(ObjectType::new(7), &[FieldPosition::new(1)]).unwrap_err();
        assert!(err.to_string().contains("not active"));

        let err = checker.check(ObjectType::new(7), &[FieldPosition::new(9)]).unwrap_err();
        assert!(err.to_string().contains("no field at position 9"));
    }
}
