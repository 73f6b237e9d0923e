//! Resource tag reconciliation
//!
//! CloudStack has no "update tag" call, so changing a tag value means
//! deleting the old pair and creating the new one.

use crate::client::{CloudStackClient, Result};
use std::collections::HashMap;

/// Compute which tags must be deleted and which must be created to move
/// from `old` to `new`.
///
/// Returns `(remove, create)`. A key whose value changed shows up in both.
pub fn diff_tags(
    old: &HashMap<String, String>,
    new: &HashMap<String, String>,
) -> (HashMap<String, String>, HashMap<String, String>) {
    let mut remove = old.clone();
    let mut create = HashMap::new();

    for (key, value) in new {
        match remove.get(key) {
            Some(existing) if existing == value => {
                remove.remove(key);
            }
            _ => {
                create.insert(key.clone(), value.clone());
            }
        }
    }

    (remove, create)
}

/// Apply the tag changes between `old` and `new` to a CloudStack resource.
pub async fn set_tags(
    client: &CloudStackClient,
    old: &HashMap<String, String>,
    new: &HashMap<String, String>,
    resource_id: &str,
    resource_type: &str,
) -> Result<()> {
    let (remove, create) = diff_tags(old, new);

    if !remove.is_empty() {
        tracing::debug!(
            resource_id,
            resource_type,
            count = remove.len(),
            "Removing tags"
        );
        client.delete_tags(resource_id, resource_type, &remove).await?;
    }

    if !create.is_empty() {
        tracing::debug!(
            resource_id,
            resource_type,
            count = create.len(),
            "Creating tags"
        );
        client.create_tags(resource_id, resource_type, &create).await?;
    }

    Ok(())
}
