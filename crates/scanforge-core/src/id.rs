//! Pipeline and finding identifiers.
//!
//! Ids cross two serialization boundaries: the launch-data blob stored with
//! each pipeline and the JSON stdout contract of the external runner. Both
//! carry plain UUID strings, so the newtype stays transparent to serde.
//! UUIDv7 makes ids sortable by creation time, which keeps finding lists in
//! upload order without a separate sequence column.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[serde(transparent)]
#[display("{_0}")]
pub struct ResourceId(Uuid);

impl ResourceId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap a row id coming from the database layer, which works in raw
    /// `Uuid`s.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ResourceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<ResourceId> for Uuid {
    fn from(id: ResourceId) -> Self {
        id.0
    }
}

impl std::str::FromStr for ResourceId {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidInput(format!("invalid resource id '{s}': {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_a_bare_uuid_string() {
        let id = ResourceId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: ResourceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn parses_its_own_display_form_and_rejects_garbage() {
        let id = ResourceId::new();
        let parsed: ResourceId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!(matches!(
            "not-a-uuid".parse::<ResourceId>(),
            Err(crate::Error::InvalidInput(_))
        ));
    }

    #[test]
    fn ids_sort_by_creation_time() {
        let earlier = ResourceId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let later = ResourceId::new();
        assert!(earlier < later);
    }
}
