//! Decides whether an incoming mod is new or replaces one with the same UUID.

use crate::{
    error::ModResult,
    library::{ModRecord, RecordStore},
    order,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Insert { order: i64 },
    Replace { order: i64, previous: ModRecord },
}

impl Resolution {
    pub fn order(&self) -> i64 {
        match self {
            Resolution::Insert { order } | Resolution::Replace { order, .. } => *order,
        }
    }

    pub fn previous(&self) -> Option<&ModRecord> {
        match self {
            Resolution::Insert { .. } => None,
            Resolution::Replace { previous, .. } => Some(previous),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Added,
    Updated,
}

impl ImportOutcome {
    pub fn label(self) -> &'static str {
        match self {
            ImportOutcome::Added => "added",
            ImportOutcome::Updated => "updated",
        }
    }
}

pub fn resolve(records: &[ModRecord], uuid: &str) -> Resolution {
    match records.iter().find(|record| record.uuid == uuid) {
        Some(previous) => Resolution::Replace {
            order: previous.order,
            previous: previous.clone(),
        },
        None => Resolution::Insert {
            order: order::next_order(records),
        },
    }
}

/// Writes `record` in a single normalize-and-save step.
///
/// A replacement takes over the previous record's slot in place, so no other record
/// moves and there is never a moment where neither version is stored.
pub fn upsert<S: RecordStore + ?Sized>(
    store: &mut S,
    mut record: ModRecord,
    resolution: &Resolution,
) -> ModResult<ImportOutcome> {
    if let Resolution::Replace { previous, .. } = resolution {
        if let Some(slot) = store.find_mut(&previous.uuid) {
            record.order = slot.order;
            *slot = record;
            order::normalize(store)?;
            return Ok(ImportOutcome::Updated);
        }
        tracing::warn!(
            "{} vanished before it could be replaced; adding instead",
            previous.uuid
        );
        record.order = order::next_order(store.records());
        order::insert(store, record)?;
        return Ok(ImportOutcome::Added);
    }

    record.order = resolution.order();
    order::insert(store, record)?;
    Ok(ImportOutcome::Added)
}
