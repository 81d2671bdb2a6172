//! Change detection between a fresh observation and the last committed state.
//!
//! The decision is a pure function of the two inputs. Persisting the result
//! (state row + queued notification in one transaction) is the store's job.

use crate::model::{EntityState, EntityStatus, Observation};

/// What a fresh observation means relative to the committed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diff {
    /// No prior state. Persist, never notify.
    FirstObservation { version: i64 },
    /// Fingerprint matches the committed state.
    Unchanged,
    /// Fingerprint differs. Persist and queue a notification.
    Changed {
        from: EntityStatus,
        to: EntityStatus,
        version: i64,
    },
}

impl Diff {
    pub fn should_notify(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

/// Classify `observation` against `previous` using exact equality on the
/// normalized fingerprint.
pub fn classify(previous: Option<&EntityState>, observation: &Observation) -> Diff {
    let Some(prev) = previous else {
        return Diff::FirstObservation { version: 1 };
    };

    if prev.fingerprint == observation.fingerprint() {
        return Diff::Unchanged;
    }

    Diff::Changed {
        from: prev.status,
        to: observation.status(),
        version: prev.version + 1,
    }
}
