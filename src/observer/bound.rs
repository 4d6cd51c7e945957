//! Bound Instruments
//!
//! Identity tokens handed out by an [`ObserverRegistry`](super::ObserverRegistry).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use super::labels::LabelSet;

/// Identifier of one registry instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RegistryId(Uuid);

impl RegistryId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RegistryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a bound instrument.
///
/// Sequence numbers are never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BoundId {
    pub registry: RegistryId,
    pub sequence: u64,
}

impl fmt::Display for BoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.registry, self.sequence)
    }
}

struct BoundRecord {
    id: BoundId,
    /// Snapshot taken at bind time; outlives the association so retired
    /// handles still resolve.
    labels: LabelSet,
}

/// Handle for one label set inside one observer registry.
///
/// Cheap to clone and safe to move into callbacks. Equality and hashing
/// use identity only.
#[derive(Clone)]
pub struct BoundInstrument {
    record: Arc<BoundRecord>,
}

impl BoundInstrument {
    pub(crate) fn new(registry: RegistryId, sequence: u64, labels: LabelSet) -> Self {
        Self {
            record: Arc::new(BoundRecord {
                id: BoundId { registry, sequence },
                labels,
            }),
        }
    }

    pub fn id(&self) -> BoundId {
        self.record.id
    }

    pub(crate) fn registry(&self) -> RegistryId {
        self.record.id.registry
    }

    pub(crate) fn labels(&self) -> &LabelSet {
        &self.record.labels
    }
}

impl PartialEq for BoundInstrument {
    fn eq(&self, other: &Self) -> bool {
        self.record.id == other.record.id
    }
}

impl Eq for BoundInstrument {}

impl Hash for BoundInstrument {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.record.id.hash(state);
    }
}

impl fmt::Debug for BoundInstrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundInstrument")
            .field("id", &self.record.id.to_string())
            .field("labels", &self.record.labels)
            .finish()
    }
}
