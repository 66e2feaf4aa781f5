//! content identity of a filter tree
//!
//! SHA-256 over the recursive content of a node. Every string field is length-prefixed so
//! `("ab", "c")` and `("a", "bc")` hash differently. Children contribute their full digest in order.
//!
//! The digest covers the normalized tree, so a node and its decoded wire form share an identity.
use super::{FilterKind, FilterNode};
use sha2::{Digest, Sha256};

/// Number of hex characters in an identity
pub const IDENTITY_LEN: usize = 16;

/// Deterministic identity of a filter tree, [IDENTITY_LEN] lower-case hex characters
pub fn identity(node: &FilterNode) -> String {
    let digest = digest(node);
    hex::encode(&digest[..IDENTITY_LEN / 2])
}

fn digest(node: &FilterNode) -> [u8; 32] {
    let mut hasher = Sha256::new();
    write_field(&mut hasher, node.kind.as_str());
    write_field(&mut hasher, &node.operator);
    write_field(&mut hasher, &node.key);
    let value = match node.kind {
        FilterKind::Comparison if !node.children.is_empty() => "",
        _ => node.value.as_str(),
    };
    write_field(&mut hasher, value);
    hasher.update([u8::from(node.negate)]);

    hasher.update((node.children.len() as u64).to_le_bytes());
    for child in &node.children {
        hasher.update(digest(child));
    }

    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

fn write_field(hasher: &mut Sha256, field: &str) {
    hasher.update((field.len() as u64).to_le_bytes());
    hasher.update(field.as_bytes());
}
