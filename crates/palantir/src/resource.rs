//! Palantir identities.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Unique identifier for a palantir.
///
/// UUID v4 so a handle from one model can never collide with a palantir of
/// a rebuilt model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PalantirId(uuid::Uuid);

impl PalantirId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        let uuid = uuid::Uuid::parse_str(s)?;
        Ok(Self(uuid))
    }
}

impl Default for PalantirId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PalantirId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to one pooled palantir. Identity is the id; the name is for display.
#[derive(Debug, Clone, Serialize)]
pub struct Palantir {
    id: PalantirId,
    name: Arc<str>,
}

impl Palantir {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            id: PalantirId::new(),
            name: name.into(),
        }
    }

    pub fn with_id(id: PalantirId, name: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Default naming used by [`crate::PalantirManager::build_model`].
    pub fn numbered(index: usize) -> Self {
        Self::new(format!("Palantir-{}", index + 1))
    }

    pub fn id(&self) -> PalantirId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for Palantir {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Palantir {}

impl Hash for Palantir {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Palantir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
