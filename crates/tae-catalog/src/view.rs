use tae_primitives::{Timestamp, TxnId};

/// What a catalog lookup needs to know about its caller: the snapshot
/// timestamp to read at, and (if the caller is itself inside a transaction)
/// its own transaction id, so it can see its own uncommitted writes.
pub trait ReadView {
    fn reader_ts(&self) -> Timestamp;
    fn txn_id(&self) -> Option<TxnId>;
}

/// A plain snapshot read with no owning transaction — used by replay and by
/// read-only callers.
pub struct Snapshot(pub Timestamp);

impl ReadView for Snapshot {
    fn reader_ts(&self) -> Timestamp {
        self.0
    }
    fn txn_id(&self) -> Option<TxnId> {
        None
    }
}

/// Visibility rule: a reader at `ts` sees an entry E iff `create-TS ≤ ts ∧
/// (drop-TS unset ∨ ts < drop-TS) ∧ (create-txn visible to reader ∨ create-TS
/// committed before ts)`. The final disjunct collapses to "the reader is the
/// entry's own creating transaction" — any other reader only ever observes a
/// committed `create-TS`.
pub fn is_visible(
    create_ts: Timestamp,
    create_txn: Option<TxnId>,
    drop_ts: Option<Timestamp>,
    reader: &dyn ReadView,
) -> bool {
    let ts = reader.reader_ts();
    let own_write = create_txn.is_some() && create_txn == reader.txn_id();
    if !own_write && create_ts > ts {
        return false;
    }
    match drop_ts {
        Some(d) => ts < d,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Timestamp, Option<TxnId>);
    impl ReadView for Fixed {
        fn reader_ts(&self) -> Timestamp {
            self.0
        }
        fn txn_id(&self) -> Option<TxnId> {
            self.1
        }
    }

    #[test]
    fn not_yet_created_is_invisible() {
        let reader = Fixed(Timestamp::new(5, 0), None);
        assert!(!is_visible(Timestamp::new(10, 0), None, None, &reader));
    }

    #[test]
    fn dropped_before_reader_ts_is_invisible() {
        let reader = Fixed(Timestamp::new(10, 0), None);
        assert!(!is_visible(
            Timestamp::new(1, 0),
            None,
            Some(Timestamp::new(5, 0)),
            &reader
        ));
    }

    #[test]
    fn own_uncommitted_write_is_visible_to_its_own_txn() {
        let txn = TxnId(7);
        let reader = Fixed(Timestamp::new(1, 0), Some(txn));
        assert!(is_visible(Timestamp::UNCOMMITTED, Some(txn), None, &reader));
    }

    #[test]
    fn other_txns_uncommitted_write_is_invisible() {
        let reader = Fixed(Timestamp::new(1, 0), Some(TxnId(8)));
        assert!(!is_visible(Timestamp::UNCOMMITTED, Some(TxnId(7)), None, &reader));
    }
}
