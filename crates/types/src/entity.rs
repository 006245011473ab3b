//! The entity descriptor and its factory.
//!
//! An entity is an immutable, signed payload addressed by the content hash
//! of its canonical JSON serialization. The JSON file itself carries no id;
//! the id is assigned from the file hash when the descriptor is parsed.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt, Snafu};

use crate::{EntityId, HashId, Pointer, Timestamp};

/// The kinds of entity the repository can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// A scene occupying one or more land coordinates.
    Scene,
    /// A user profile, pointed at by the owner address.
    Profile,
    /// A wearable item.
    Wearable,
}

impl EntityType {
    /// All variants, for iteration in tests and the HTTP layer.
    pub const ALL: &'static [EntityType] =
        &[EntityType::Scene, EntityType::Profile, EntityType::Wearable];

    /// Returns the lower-case wire name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityType::Scene => "scene",
            EntityType::Profile => "profile",
            EntityType::Wearable => "wearable",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = EntityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scene" => Ok(EntityType::Scene),
            "profile" => Ok(EntityType::Profile),
            "wearable" => Ok(EntityType::Wearable),
            other => UnknownEntityTypeSnafu { value: other.to_string() }.fail(),
        }
    }
}

/// One `logical file name → content hash` pair in an entity descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMapping {
    /// Logical file name (e.g. `scene.json`, `model.glb`).
    pub file: String,
    /// CIDv1 of the file bytes.
    pub hash: HashId,
}

/// Error raised while parsing or validating an entity descriptor.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EntityError {
    /// The descriptor bytes are not valid JSON for the expected shape.
    #[snafu(display("Failed to parse entity file: {source}"))]
    InvalidJson {
        /// Underlying serde error.
        source: serde_json::Error,
    },

    /// The `type` field is not a known entity type.
    #[snafu(display("Unknown entity type: {value}"))]
    UnknownEntityType {
        /// The offending value.
        value: String,
    },

    /// Entities must name at least one pointer.
    #[snafu(display("The entity needs at least one pointer."))]
    NoPointers,
}

/// Wire shape of the entity descriptor file. The id is not part of the file.
#[derive(Debug, Deserialize)]
struct EntityFile {
    #[serde(rename = "type")]
    entity_type: EntityType,
    pointers: Vec<Pointer>,
    timestamp: Timestamp,
    #[serde(default)]
    content: Option<Vec<ContentMapping>>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

/// An immutable, content-addressed entity.
///
/// The `id` is the CIDv1 of the descriptor file the entity was parsed from,
/// which also keys the descriptor in blob storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entity {
    /// Content hash of the canonical descriptor file.
    pub id: EntityId,
    /// Kind of entity.
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    /// Names this entity is published against. Never empty, lower-cased.
    pub pointers: Vec<Pointer>,
    /// Client-supplied creation time (ms since epoch).
    pub timestamp: Timestamp,
    /// Referenced content files, absent when the entity carries none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentMapping>>,
    /// Opaque application metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Entity {
    /// Parses an entity descriptor from its file bytes, assigning `id`.
    ///
    /// Pointers are lower-cased so that lookups are case-insensitive across
    /// nodes. The caller is responsible for checking that `id` matches the
    /// hash of `bytes`; the factory only validates shape.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::InvalidJson`] for malformed bytes and
    /// [`EntityError::NoPointers`] when the pointer list is empty.
    pub fn from_json_bytes(id: EntityId, bytes: &[u8]) -> Result<Self, EntityError> {
        let file: EntityFile = serde_json::from_slice(bytes).context(InvalidJsonSnafu)?;
        ensure!(!file.pointers.is_empty(), NoPointersSnafu);

        let pointers = file.pointers.iter().map(|p| p.to_ascii_lowercase()).collect();
        Ok(Entity {
            id,
            entity_type: file.entity_type,
            pointers,
            timestamp: file.timestamp,
            content: file.content,
            metadata: file.metadata,
        })
    }

    /// Returns the referenced content as a `file → hash` map.
    pub fn content_map(&self) -> BTreeMap<&str, &str> {
        self.content
            .iter()
            .flatten()
            .map(|m| (m.file.as_str(), m.hash.as_str()))
            .collect()
    }

    /// Returns the distinct content hashes this entity references.
    pub fn referenced_hashes(&self) -> Vec<&str> {
        let mut hashes: Vec<&str> =
            self.content.iter().flatten().map(|m| m.hash.as_str()).collect();
        hashes.sort_unstable();
        hashes.dedup();
        hashes
    }
}
