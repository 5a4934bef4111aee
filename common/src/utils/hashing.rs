use uuid::Uuid;

/// Namespace for deterministic vector point ids. Changing this value
/// orphans every existing point in the collection.
pub const VECTOR_ID_NAMESPACE: Uuid = uuid::uuid!("8c9d3bd2-2f0f-4d1e-9e9a-6a0f3f5c8a11");

/// BLAKE3 hash of the document bytes, lowercase hex (64 chars). This is the
/// identity of a document's content everywhere in the system.
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Deterministic vector point id: UUIDv5 over `{project}:{content_hash}`.
/// Re-enriching unchanged content always lands on the same point.
pub fn deterministic_point_id(project: &str, content_hash: &str) -> Uuid {
    Uuid::new_v5(
        &VECTOR_ID_NAMESPACE,
        format!("{project}:{content_hash}").as_bytes(),
    )
}

/// Stable rollout bucket in `[0, 100)` for percentage rollouts.
pub fn rollout_bucket(project: &str) -> u8 {
    let digest = blake3::hash(project.as_bytes());
    let bytes = digest.as_bytes();
    let mut head = [0_u8; 8];
    head.copy_from_slice(&bytes[..8]);
    (u64::from_le_bytes(head) % 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_hex_64() {
        let hash = content_hash(b"def hello(): pass");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, content_hash(b"def hello(): pass"));
        assert_ne!(hash, content_hash(b"def hello(): return 1"));
    }

    #[test]
    fn point_id_is_deterministic_per_project_and_hash() {
        let hash = content_hash(b"content");
        let a = deterministic_point_id("demo", &hash);
        let b = deterministic_point_id("demo", &hash);
        let c = deterministic_point_id("other", &hash);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn rollout_bucket_is_stable_and_bounded() {
        let bucket = rollout_bucket("demo");
        assert!(bucket < 100);
        assert_eq!(bucket, rollout_bucket("demo"));
    }
}
