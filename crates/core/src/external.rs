//! Seams to external collaborators.
//!
//! Signature cryptography, access control, and analytics live outside the
//! engine; the service only calls through these traits. Defaults cover
//! structural checks and tracing so a node runs without any backing
//! infrastructure; production deployments plug in real implementations.

use async_trait::async_trait;

use depot_types::{audit, AuthChain, AuthLinkKind, Entity, EntityId, EntityType, ServerName};

/// The error every failed signature verification surfaces.
pub const INVALID_SIGNATURE_ERROR: &str = "The signature is invalid.";

// ============================================================================
// Signature verification
// ============================================================================

/// Verifies an auth chain over an entity id.
#[async_trait]
pub trait SignatureValidator: Send + Sync {
    /// Returns `true` when `chain` proves authority over `entity_id`.
    async fn is_valid(&self, entity_id: &EntityId, chain: &AuthChain) -> bool;
}

/// Structural auth-chain checks: non-empty, rooted at a signer link, and the
/// final link signs the entity id. The actual ECDSA verification happens in
/// the cryptography adapter wired in by the server.
pub struct StructuralSignatureValidator;

#[async_trait]
impl SignatureValidator for StructuralSignatureValidator {
    async fn is_valid(&self, entity_id: &EntityId, chain: &AuthChain) -> bool {
        if audit::owner_address(chain).is_none() {
            return false;
        }
        let Some(last) = chain.last() else {
            return false;
        };
        last.kind == AuthLinkKind::EcdsaSignedEntity
            && last.payload == *entity_id
            && !last.signature.is_empty()
    }
}

// ============================================================================
// Access control
// ============================================================================

/// Decides whether an address may publish to a set of pointers.
#[async_trait]
pub trait AccessChecker: Send + Sync {
    /// Returns domain-specific errors; empty means access is granted.
    async fn check_access(&self, entity: &Entity, address: &str) -> Vec<String>;
}

/// Pointer-shape access rules:
/// - scene pointers must be `x,y` integer coordinates within world bounds
/// - profile pointers must equal the signing address
///
/// Ownership lookups against the land registry are delegated to the external
/// chain adapters configured on the server; this checker enforces the rules
/// that need no network.
pub struct StandardAccessChecker {
    /// Absolute bound on scene coordinates (`|x| <= bound`, `|y| <= bound`).
    pub world_bound: i64,
}

impl StandardAccessChecker {
    /// Checker with the default 150x150-parcel world radius.
    pub fn new() -> Self {
        Self { world_bound: 150 }
    }

    fn check_scene_pointer(&self, pointer: &str) -> Option<String> {
        let in_bounds = pointer.split_once(',').and_then(|(x, y)| {
            let x: i64 = x.trim().parse().ok()?;
            let y: i64 = y.trim().parse().ok()?;
            Some(x.abs() <= self.world_bound && y.abs() <= self.world_bound)
        });
        match in_bounds {
            Some(true) => None,
            _ => Some(format!(
                "Scene pointers should be a valid coordinate inside the world: {pointer}"
            )),
        }
    }
}

impl Default for StandardAccessChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccessChecker for StandardAccessChecker {
    async fn check_access(&self, entity: &Entity, address: &str) -> Vec<String> {
        let mut errors = Vec::new();
        match entity.entity_type {
            EntityType::Scene => {
                for pointer in &entity.pointers {
                    if let Some(error) = self.check_scene_pointer(pointer) {
                        errors.push(error);
                    }
                }
            },
            EntityType::Profile => {
                let address = address.to_ascii_lowercase();
                for pointer in &entity.pointers {
                    if *pointer != address {
                        errors.push(format!(
                            "You can only alter your own profile. The pointer address and the \
                             signer address are different (pointer: {pointer}, signer: {address})."
                        ));
                    }
                }
            },
            EntityType::Wearable => {},
        }
        errors
    }
}

// ============================================================================
// Analytics
// ============================================================================

/// Fire-and-forget deployment analytics.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    /// Records one accepted deployment. Failures must not affect the deploy.
    async fn record_deployment(&self, server_name: &ServerName, entity: &Entity);
}

/// Analytics sink that emits a structured log line.
pub struct TracingAnalytics;

#[async_trait]
impl AnalyticsSink for TracingAnalytics {
    async fn record_deployment(&self, server_name: &ServerName, entity: &Entity) {
        tracing::info!(
            server = %server_name,
            entity_type = %entity.entity_type,
            entity_id = %entity.id,
            pointers = entity.pointers.len(),
            "deployment recorded"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use depot_types::audit::simple_chain;

    use super::*;

    fn entity(entity_type: EntityType, pointers: &[&str]) -> Entity {
        Entity {
            id: "bafyid".to_string(),
            entity_type,
            pointers: pointers.iter().map(|p| p.to_string()).collect(),
            timestamp: 1,
            content: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn structural_validator_accepts_simple_chain() {
        let chain = simple_chain("0xabcd", "bafyid", "0xsig");
        assert!(StructuralSignatureValidator.is_valid(&"bafyid".to_string(), &chain).await);
    }

    #[tokio::test]
    async fn structural_validator_rejects_empty_chain() {
        assert!(!StructuralSignatureValidator.is_valid(&"bafyid".to_string(), &vec![]).await);
    }

    #[tokio::test]
    async fn structural_validator_rejects_wrong_entity_id() {
        let chain = simple_chain("0xabcd", "bafyother", "0xsig");
        assert!(!StructuralSignatureValidator.is_valid(&"bafyid".to_string(), &chain).await);
    }

    #[tokio::test]
    async fn structural_validator_rejects_missing_signature() {
        let chain = simple_chain("0xabcd", "bafyid", "");
        assert!(!StructuralSignatureValidator.is_valid(&"bafyid".to_string(), &chain).await);
    }

    #[tokio::test]
    async fn scene_pointers_must_be_coordinates() {
        let checker = StandardAccessChecker::new();
        let ok_entity = entity(EntityType::Scene, &["0,0", "-150,150"]);
        let ok = checker.check_access(&ok_entity, "0xa");
        assert!(ok.await.is_empty());

        let bad = checker
            .check_access(&entity(EntityType::Scene, &["somewhere", "151,0"]), "0xa")
            .await;
        assert_eq!(bad.len(), 2);
        assert!(bad[0].contains("valid coordinate"));
    }

    #[tokio::test]
    async fn profile_pointer_must_match_signer() {
        let checker = StandardAccessChecker::new();
        let ok = checker.check_access(&entity(EntityType::Profile, &["0xabcd"]), "0xABCD").await;
        assert!(ok.is_empty());

        let bad = checker.check_access(&entity(EntityType::Profile, &["0xother"]), "0xabcd").await;
        assert_eq!(bad.len(), 1);
        assert!(bad[0].contains("your own profile"));
    }

    #[tokio::test]
    async fn wearables_have_no_pointer_rules() {
        let checker = StandardAccessChecker::new();
        let errors =
            checker.check_access(&entity(EntityType::Wearable, &["urn:wearable:hat"]), "0xa").await;
        assert!(errors.is_empty());
    }
}
