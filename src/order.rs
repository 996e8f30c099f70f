//! Load-order bookkeeping.
//!
//! Every structural change to the record set ends in [`normalize`], which sorts the
//! records by their current `order`, rewrites the values as `0..N` and persists the
//! store. Nothing else in the crate assigns `order` directly, apart from the identity
//! resolver copying an existing slot onto its replacement.

use crate::{
    error::{ModError, ModResult},
    library::{ModRecord, RecordStore},
};

/// Side effects a deletion needs on the payload before the record can go.
pub trait PayloadHandler {
    /// Take a deployed archive back out of the game folder.
    fn reverse(&mut self, record: &ModRecord) -> ModResult<()>;
    /// Move the payload directory out of the managed store.
    fn discard(&mut self, record: &ModRecord) -> ModResult<()>;
}

/// Sorts by `order` (stable) and rewrites the values as `0..N`.
/// Returns whether anything moved or was renumbered.
pub fn renumber(records: &mut Vec<ModRecord>) -> bool {
    let before: Vec<(String, i64)> = records
        .iter()
        .map(|record| (record.uuid.clone(), record.order))
        .collect();
    records.sort_by_key(|record| record.order);
    for (index, record) in records.iter_mut().enumerate() {
        record.order = index as i64;
    }
    records
        .iter()
        .zip(before.iter())
        .any(|(record, (uuid, order))| record.uuid != *uuid || record.order != *order)
}

pub fn normalize<S: RecordStore + ?Sized>(store: &mut S) -> ModResult<()> {
    renumber(store.records_mut());
    if let Err(err) = store.save() {
        tracing::error!("persist after normalization failed: {err}");
        return Err(err);
    }
    Ok(())
}

pub fn next_order(records: &[ModRecord]) -> i64 {
    records
        .iter()
        .map(|record| record.order)
        .max()
        .map(|max| max + 1)
        .unwrap_or(0)
}

pub fn insert<S: RecordStore + ?Sized>(store: &mut S, record: ModRecord) -> ModResult<()> {
    tracing::debug!(uuid = %record.uuid, order = record.order, "insert record");
    store.insert(record);
    normalize(store)
}

/// Snapshot of all records in load order.
pub fn ordered<S: RecordStore + ?Sized>(store: &S) -> Vec<ModRecord> {
    store.fetch(&|_| true).into_iter().cloned().collect()
}

/// Snapshot of the enabled records in load order; the synthesizer's input.
pub fn enabled_in_order<S: RecordStore + ?Sized>(store: &S) -> Vec<ModRecord> {
    store
        .fetch(&|record| record.enabled)
        .into_iter()
        .cloned()
        .collect()
}

pub fn uuid_at<S: RecordStore + ?Sized>(store: &S, index: usize) -> ModResult<String> {
    let ordered = store.fetch(&|_| true);
    ordered
        .get(index)
        .map(|record| record.uuid.clone())
        .ok_or(ModError::InvalidPosition {
            index,
            len: ordered.len(),
        })
}

/// Drag-reorder: the record at position `from` ends up at position `to`.
pub fn move_record<S: RecordStore + ?Sized>(
    store: &mut S,
    from: usize,
    to: usize,
) -> ModResult<()> {
    let len = store.records().len();
    for index in [from, to] {
        if index >= len {
            return Err(ModError::InvalidPosition { index, len });
        }
    }
    if from == to {
        return Ok(());
    }

    let records = store.records_mut();
    renumber(records);
    let record = records.remove(from);
    records.insert(to, record);
    for (index, record) in records.iter_mut().enumerate() {
        record.order = index as i64;
    }
    normalize(store)
}

pub fn move_up<S: RecordStore + ?Sized>(store: &mut S, index: usize) -> ModResult<()> {
    if index == 0 {
        return Ok(());
    }
    move_record(store, index, index - 1)
}

pub fn move_down<S: RecordStore + ?Sized>(store: &mut S, index: usize) -> ModResult<()> {
    if index + 1 >= store.records().len() {
        return Ok(());
    }
    move_record(store, index, index + 1)
}

/// Flips the flag only; deploying the archive is the caller's job.
pub fn set_enabled<S: RecordStore + ?Sized>(
    store: &mut S,
    uuid: &str,
    enabled: bool,
) -> ModResult<bool> {
    let record = store
        .find_mut(uuid)
        .ok_or_else(|| ModError::RecordNotFound(uuid.to_string()))?;
    if record.enabled == enabled {
        return Ok(false);
    }
    record.enabled = enabled;
    store.save()?;
    Ok(true)
}

/// Removes a record. An enabled record is reversed first and stays put if that fails.
pub fn remove<S, H>(store: &mut S, uuid: &str, payload: &mut H) -> ModResult<ModRecord>
where
    S: RecordStore + ?Sized,
    H: PayloadHandler + ?Sized,
{
    let record = store
        .find(uuid)
        .cloned()
        .ok_or_else(|| ModError::RecordNotFound(uuid.to_string()))?;

    if record.enabled {
        payload.reverse(&record)?;
    }

    let removed = store
        .delete(uuid)
        .ok_or_else(|| ModError::RecordNotFound(uuid.to_string()))?;
    if let Err(err) = payload.discard(&removed) {
        tracing::warn!("payload for {} left in place: {err}", removed.display_name());
    }
    normalize(store)?;
    tracing::info!(uuid = %removed.uuid, "removed {}", removed.display_name());
    Ok(removed)
}

/// Deletes by list position and returns the position to select next.
pub fn delete_at<S, H>(
    store: &mut S,
    index: usize,
    payload: &mut H,
) -> ModResult<(ModRecord, Option<usize>)>
where
    S: RecordStore + ?Sized,
    H: PayloadHandler + ?Sized,
{
    let uuid = uuid_at(store, index)?;
    let removed = remove(store, &uuid, payload)?;
    let remaining = store.records().len();
    let selection = if remaining == 0 {
        None
    } else {
        Some(index.saturating_sub(1).min(remaining - 1))
    };
    Ok((removed, selection))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{test_record, MemoryStore};
    use proptest::prelude::*;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        fail_reverse: bool,
    }

    impl PayloadHandler for Recorder {
        fn reverse(&mut self, record: &ModRecord) -> ModResult<()> {
            self.calls.push(format!("reverse:{}", record.uuid));
            if self.fail_reverse {
                return Err(ModError::ReversalFailed {
                    archive: record.archive.clone(),
                    reason: "disk gone".into(),
                });
            }
            Ok(())
        }

        fn discard(&mut self, record: &ModRecord) -> ModResult<()> {
            self.calls.push(format!("discard:{}", record.uuid));
            Ok(())
        }
    }

    fn orders(store: &MemoryStore) -> Vec<(String, i64)> {
        ordered(store)
            .into_iter()
            .map(|record| (record.uuid, record.order))
            .collect()
    }

    fn abc() -> MemoryStore {
        MemoryStore::new(vec![
            test_record("A", 0, true),
            test_record("B", 1, true),
            test_record("C", 2, false),
        ])
    }

    #[test]
    fn next_order_starts_at_zero() {
        assert_eq!(next_order(&[]), 0);
        assert_eq!(next_order(&abc().mods), 3);
    }

    #[test]
    fn deleting_middle_record_closes_the_gap() {
        let mut store = abc();
        let mut payload = Recorder::default();
        remove(&mut store, "B", &mut payload).unwrap();
        assert_eq!(
            orders(&store),
            vec![("A".to_string(), 0), ("C".to_string(), 1)]
        );
    }

    #[test]
    fn enabled_delete_reverses_before_removal() {
        let mut store = abc();
        let mut payload = Recorder::default();
        remove(&mut store, "A", &mut payload).unwrap();
        assert_eq!(payload.calls, vec!["reverse:A", "discard:A"]);

        let mut payload = Recorder::default();
        remove(&mut store, "C", &mut payload).unwrap();
        assert_eq!(payload.calls, vec!["discard:C"]);
    }

    #[test]
    fn failed_reversal_keeps_the_record() {
        let mut store = abc();
        let mut payload = Recorder {
            fail_reverse: true,
            ..Recorder::default()
        };
        let err = remove(&mut store, "B", &mut payload).unwrap_err();
        assert!(matches!(err, ModError::ReversalFailed { .. }));
        assert!(store.find("B").is_some());
        assert_eq!(store.saves, 0);
    }

    #[test]
    fn delete_at_selects_previous_item() {
        let mut store = abc();
        let mut payload = Recorder::default();
        let (removed, selection) = delete_at(&mut store, 2, &mut payload).unwrap();
        assert_eq!(removed.uuid, "C");
        assert_eq!(selection, Some(1));

        let (_, selection) = delete_at(&mut store, 0, &mut payload).unwrap();
        assert_eq!(selection, Some(0));
        let (_, selection) = delete_at(&mut store, 0, &mut payload).unwrap();
        assert_eq!(selection, None);
    }

    #[test]
    fn move_and_move_back_restores_orders() {
        let mut store = abc();
        let original = orders(&store);
        move_record(&mut store, 0, 2).unwrap();
        assert_eq!(
            orders(&store),
            vec![
                ("B".to_string(), 0),
                ("C".to_string(), 1),
                ("A".to_string(), 2)
            ]
        );
        move_record(&mut store, 2, 0).unwrap();
        assert_eq!(orders(&store), original);
    }

    #[test]
    fn move_rejects_out_of_range() {
        let mut store = abc();
        let err = move_record(&mut store, 0, 3).unwrap_err();
        assert!(matches!(err, ModError::InvalidPosition { index: 3, len: 3 }));
    }

    #[test]
    fn move_up_at_top_is_a_no_op() {
        let mut store = abc();
        move_up(&mut store, 0).unwrap();
        move_down(&mut store, 2).unwrap();
        assert_eq!(orders(&store), orders(&abc()));
    }

    #[test]
    fn enabled_in_order_skips_disabled() {
        let store = abc();
        let uuids: Vec<String> = enabled_in_order(&store)
            .into_iter()
            .map(|record| record.uuid)
            .collect();
        assert_eq!(uuids, vec!["A", "B"]);
    }

    #[test]
    fn set_enabled_reports_change() {
        let mut store = abc();
        assert!(set_enabled(&mut store, "C", true).unwrap());
        assert!(!set_enabled(&mut store, "C", true).unwrap());
        assert!(matches!(
            set_enabled(&mut store, "Z", true),
            Err(ModError::RecordNotFound(_))
        ));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert,
        Delete(usize),
        Move(usize, usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Insert),
            (0usize..12).prop_map(Op::Delete),
            (0usize..12, 0usize..12).prop_map(|(from, to)| Op::Move(from, to)),
        ]
    }

    proptest! {
        #[test]
        fn orders_stay_contiguous(ops in proptest::collection::vec(op_strategy(), 1..40)) {
            let mut store = MemoryStore::default();
            let mut payload = Recorder::default();
            let mut counter = 0;
            for op in ops {
                let len = store.records().len();
                match op {
                    Op::Insert => {
                        counter += 1;
                        let order = next_order(store.records());
                        insert(&mut store, test_record(&format!("m{counter}"), order, counter % 2 == 0)).unwrap();
                    }
                    Op::Delete(index) if index < len => {
                        delete_at(&mut store, index, &mut payload).unwrap();
                    }
                    Op::Move(from, to) if from < len && to < len => {
                        move_record(&mut store, from, to).unwrap();
                    }
                    _ => {}
                }
                let mut seen: Vec<i64> = store.records().iter().map(|record| record.order).collect();
                seen.sort_unstable();
                let expected: Vec<i64> = (0..store.records().len() as i64).collect();
                prop_assert_eq!(seen, expected);
            }
        }
    }
}
