use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide source for fresh sequence identifiers.
static NEXT_SEQ_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// SeqMark
// ---------------------------------------------------------------------------

/// Start / end bracket flags of one sequence on one item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeqMark {
    pub start: bool,
    pub end: bool,
}

// ---------------------------------------------------------------------------
// DataAttribute
// ---------------------------------------------------------------------------

/// Metadata travelling with every data item: the set of sequences the item
/// belongs to (with start / end bracket flags per sequence) and a monotone
/// index within those sequences.
///
/// At fan-in, the attribute of the produced item is the element-wise merge
/// of the consumed items' attributes; see [`DataAttribute::combine`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataAttribute {
    seqs: BTreeMap<u64, SeqMark>,
    index: u64,
}

impl DataAttribute {
    /// Attribute of an item that belongs to no sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute of the item at `index` inside sequence `seq_id`.
    pub fn with_sequence(seq_id: u64, index: u64, start: bool, end: bool) -> Self {
        let mut seqs = BTreeMap::new();
        seqs.insert(seq_id, SeqMark { start, end });
        Self { seqs, index }
    }

    /// Reserve a fresh, process-unique sequence identifier.
    pub fn next_sequence_id() -> u64 {
        NEXT_SEQ_ID.fetch_add(1, Ordering::Relaxed)
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn sequence_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.seqs.keys().copied()
    }

    pub fn in_sequence(&self, seq_id: u64) -> bool {
        self.seqs.contains_key(&seq_id)
    }

    pub fn is_start_of(&self, seq_id: u64) -> bool {
        self.seqs.get(&seq_id).is_some_and(|m| m.start)
    }

    pub fn is_end_of(&self, seq_id: u64) -> bool {
        self.seqs.get(&seq_id).is_some_and(|m| m.end)
    }

    /// True when the item closes every sequence it belongs to.
    pub fn ends_all_sequences(&self) -> bool {
        !self.seqs.is_empty() && self.seqs.values().all(|m| m.end)
    }

    /// Element-wise fan-in merge over the attributes of a task's inputs:
    ///
    /// - sequence ids: union;
    /// - start flag of a sequence: AND over the inputs that carry it;
    /// - end flag: AND over the inputs that carry it;
    /// - index: max.
    ///
    /// Inputs that do not carry a given sequence are neutral for its flags,
    /// so a side input outside the sequence does not strip the brackets.
    pub fn combine<'a>(parts: impl IntoIterator<Item = &'a DataAttribute>) -> DataAttribute {
        let mut seqs: BTreeMap<u64, SeqMark> = BTreeMap::new();
        let mut index = 0u64;
        for part in parts {
            index = index.max(part.index);
            for (id, mark) in &part.seqs {
                seqs.entry(*id)
                    .and_modify(|acc| {
                        acc.start &= mark.start;
                        acc.end &= mark.end;
                    })
                    .or_insert(*mark);
            }
        }
        DataAttribute { seqs, index }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_unique() {
        let a = DataAttribute::next_sequence_id();
        let b = DataAttribute::next_sequence_id();
        assert_ne!(a, b);
    }

    #[test]
    fn sequence_brackets() {
        let first = DataAttribute::with_sequence(7, 0, true, false);
        let last = DataAttribute::with_sequence(7, 2, false, true);
        assert!(first.is_start_of(7));
        assert!(!first.is_end_of(7));
        assert!(last.is_end_of(7));
        assert!(!last.is_start_of(9));
        assert_eq!(last.index(), 2);
    }

    #[test]
    fn combine_unions_ids_and_ands_flags() {
        let a = DataAttribute::with_sequence(7, 0, true, false);
        let b = DataAttribute::with_sequence(7, 0, true, false);
        let merged = DataAttribute::combine([&a, &b]);
        assert!(merged.is_start_of(7));
        assert!(!merged.is_end_of(7));

        // One branch already past the start: the merged item is not a start.
        let c = DataAttribute::with_sequence(7, 1, false, false);
        let merged = DataAttribute::combine([&a, &c]);
        assert!(!merged.is_start_of(7));
        assert_eq!(merged.index(), 1);
    }

    #[test]
    fn combine_keeps_disjoint_sequences() {
        let a = DataAttribute::with_sequence(1, 4, false, true);
        let b = DataAttribute::with_sequence(2, 9, true, false);
        let merged = DataAttribute::combine([&a, &b]);
        assert!(merged.in_sequence(1));
        assert!(merged.in_sequence(2));
        assert!(merged.is_end_of(1));
        assert!(merged.is_start_of(2));
        assert_eq!(merged.index(), 9);
    }

    #[test]
    fn combine_with_plain_input_is_neutral() {
        let seq = DataAttribute::with_sequence(5, 2, false, true);
        let plain = DataAttribute::new();
        let merged = DataAttribute::combine([&seq, &plain]);
        assert!(merged.is_end_of(5));
        assert_eq!(merged.index(), 2);
    }

    #[test]
    fn ends_all_sequences() {
        let open = DataAttribute::with_sequence(3, 1, false, false);
        let done = DataAttribute::with_sequence(3, 2, false, true);
        assert!(!open.ends_all_sequences());
        assert!(done.ends_all_sequences());
        assert!(!DataAttribute::new().ends_all_sequences());
    }
}
