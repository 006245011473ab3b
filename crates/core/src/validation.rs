//! Validation predicates for prospective deployments.
//!
//! Each predicate is a pure function of the deployment plus whatever
//! external facts the orchestrator already gathered (stored hashes,
//! overlapping audit records). Predicates return zero or more human-readable
//! errors; the service collects everything before deciding, so a client sees
//! all problems at once.
//!
//! Cheap, local predicates run before those whose inputs required external
//! calls; the ordering lives in the service, not here.

use std::collections::BTreeSet;

use depot_types::{AuditInfo, Entity, Timestamp, UploadLimits};

/// RECENT: the entity timestamp must be close to the node's clock.
pub fn recent(
    entity: &Entity,
    now: Timestamp,
    ttl_backwards_ms: u64,
    ttl_forwards_ms: u64,
) -> Vec<String> {
    if entity.timestamp.saturating_add(ttl_backwards_ms) < now {
        vec![
            "The request is not recent enough, please submit it again with a new timestamp."
                .to_string(),
        ]
    } else if entity.timestamp > now.saturating_add(ttl_forwards_ms) {
        vec![
            "The request is too far in the future, please submit it again with a new timestamp."
                .to_string(),
        ]
    } else {
        Vec::new()
    }
}

/// IPFS_HASHING: the entity id and every referenced hash must be CIDv1.
pub fn ipfs_hashing(entity: &Entity) -> Vec<String> {
    let mut errors = Vec::new();
    if !depot_types::is_valid_cid(&entity.id) {
        errors.push(format!("This hash is not valid: {}", entity.id));
    }
    for hash in entity.referenced_hashes() {
        if !depot_types::is_valid_cid(hash) {
            errors.push(format!("This hash is not valid: {hash}"));
        }
    }
    errors
}

/// CONTENT: every referenced hash must be uploaded or already stored, and
/// every uploaded hash must be referenced. The entity file's own hash is
/// always legitimate.
pub fn content(
    entity: &Entity,
    uploaded: &BTreeSet<String>,
    already_stored: &BTreeSet<String>,
) -> Vec<String> {
    let mut errors = Vec::new();

    let referenced: BTreeSet<&str> = entity.referenced_hashes().into_iter().collect();
    for hash in &referenced {
        if !uploaded.contains(*hash) && !already_stored.contains(*hash) {
            errors.push(format!(
                "This hash is referenced in the entity but was not uploaded or previously \
                 available: {hash}"
            ));
        }
    }

    for hash in uploaded {
        if hash != &entity.id && !referenced.contains(hash.as_str()) {
            errors.push(format!(
                "This hash was uploaded but is not referenced in the entity: {hash}"
            ));
        }
    }

    errors
}

/// REQUEST_SIZE: total uploaded bytes divided by pointer count must not
/// exceed the per-type cap.
pub fn request_size(entity: &Entity, uploaded_bytes: u64, limits: &UploadLimits) -> Vec<String> {
    let max_per_pointer_mb = limits.for_type(entity.entity_type);
    let allowed = max_per_pointer_mb
        .saturating_mul(1024 * 1024)
        .saturating_mul(entity.pointers.len() as u64);
    if uploaded_bytes > allowed {
        vec![format!(
            "The deployment is too big. The maximum allowed size per pointer is \
             {max_per_pointer_mb} MB for {}. You can upload up to {allowed} bytes but you tried \
             to upload {uploaded_bytes}.",
            entity.entity_type
        )]
    } else {
        Vec::new()
    }
}

/// LEGACY_ENTITY: a legacy migration must not clobber newer-protocol content.
///
/// Runs only for deployments whose audit info carries migration data. The
/// incoming deployment is rejected when any overlapping current deployment
/// has a strictly greater protocol version, or the same version but no
/// original version lower-or-equal to the incoming one.
pub fn legacy_entity(incoming: &AuditInfo, overlapping: &[AuditInfo]) -> Vec<String> {
    let rejected = overlapping.iter().any(|current| {
        if current.version.as_str() > incoming.version.as_str() {
            return true;
        }
        if current.version == incoming.version {
            match (current.original_version(), incoming.original_version()) {
                (Some(current_original), Some(incoming_original)) => {
                    current_original > incoming_original
                },
                // An overlapping non-migrated deployment at the same version
                // always wins over a migration.
                (None, _) => true,
                (Some(_), None) => false,
            }
        } else {
            false
        }
    });

    if rejected {
        vec!["This entity can't be redeployed".to_string()]
    } else {
        Vec::new()
    }
}

/// Hashes the uploaded files and splits out the set view the content
/// predicate needs.
pub fn uploaded_hash_set(hashed: &[(String, Vec<u8>)]) -> BTreeSet<String> {
    hashed.iter().map(|(hash, _)| hash.clone()).collect()
}

/// Hashes every uploaded file by content, pairing each hash with its bytes.
pub fn hash_files(files: Vec<crate::deployment::DeploymentFile>) -> Vec<(String, Vec<u8>)> {
    files.into_iter().map(|f| (depot_types::content_cid(&f.content), f.content)).collect()
}
