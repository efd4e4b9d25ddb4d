//! Owner references for NodeTask resources
//!
//! Tasks are owned by the v1 Node they target so that deleting a node
//! cascades to its tasks.

use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

/// Builds an owner reference pointing at `node`.
///
/// Returns `None` when the node object lacks a name or uid (a node read
/// straight from the API server always has both).
#[must_use]
pub fn node_owner_reference(node: &Node) -> Option<OwnerReference> {
    let name = node.metadata.name.clone()?;
    let uid = node.metadata.uid.clone()?;
    Some(OwnerReference {
        api_version: "v1".to_string(),
        kind: "Node".to_string(),
        name,
        uid,
        controller: Some(true),
        block_owner_deletion: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn test_node_owner_reference() {
        let node = Node {
            metadata: ObjectMeta {
                name: Some("node-0".to_string()),
                uid: Some("8e3b".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let owner = node_owner_reference(&node).unwrap();
        assert_eq!(owner.kind, "Node");
        assert_eq!(owner.name, "node-0");
        assert_eq!(owner.uid, "8e3b");
    }

    #[test]
    fn test_node_owner_reference_requires_uid() {
        let node = Node {
            metadata: ObjectMeta {
                name: Some("node-0".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(node_owner_reference(&node).is_none());
    }
}
