//! Past receivers per giver, and the provider contract that supplies them
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, error};

use super::error::DataIntegrityError;
use super::participant::{HistoryRecord, ParticipantId, Year};

/// Snapshot of past receivers keyed by giver, ordered oldest to newest.
///
/// Taken once per draw and never refreshed mid-search, so validation inside a
/// single `generate` call always sees the same data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    receivers: BTreeMap<ParticipantId, Vec<ParticipantId>>,
}

/// Supplies the history a draw is validated against.
pub trait HistoryProvider {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Receivers for every giver in `pool`, oldest first, from years strictly before `as_of_year`.
    fn receivers_by_giver(
        &self,
        pool: &BTreeSet<ParticipantId>,
        as_of_year: Year,
    ) -> Result<History, Self::Error>;
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `receiver` as the newest entry for `giver`.
    pub fn push(&mut self, giver: ParticipantId, receiver: ParticipantId) {
        self.receivers.entry(giver).or_default().push(receiver);
    }

    pub fn with_receivers(mut self, giver: ParticipantId, receivers: Vec<ParticipantId>) -> Self {
        self.receivers.insert(giver, receivers);
        self
    }

    /// Empty for givers with no recorded rounds.
    pub fn receivers(&self, giver: &ParticipantId) -> &[ParticipantId] {
        self.receivers.get(giver).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.receivers.values().all(Vec::is_empty)
    }

    pub fn givers(&self) -> impl Iterator<Item = &ParticipantId> {
        self.receivers.keys()
    }

    /// Builds the snapshot for `pool` out of raw records.
    ///
    /// Only years before `as_of_year` are kept. A record naming the giver as
    /// their own receiver means an earlier round broke its invariants, so it
    /// is reported instead of being silently used.
    pub fn from_records<'a, I>(
        records: I,
        pool: &BTreeSet<ParticipantId>,
        as_of_year: Year,
    ) -> Result<Self, DataIntegrityError>
    where
        I: IntoIterator<Item = &'a HistoryRecord>,
    {
        let mut relevant: Vec<&HistoryRecord> = records
            .into_iter()
            .filter(|r| r.year < as_of_year && pool.contains(&r.giver))
            .collect();

        if let Some(bad) = relevant.iter().find(|r| r.giver == r.receiver) {
            error!(giver = %bad.giver, year = bad.year, "participant recorded as their own receiver");
            return Err(DataIntegrityError::SelfInHistory {
                giver: bad.giver,
                year: bad.year,
            });
        }

        // stable, so records sharing a year keep their insertion order
        relevant.sort_by_key(|r| r.year);

        let mut history = History::new();
        for record in relevant {
            history.push(record.giver, record.receiver);
        }

        debug!(
            givers = history.receivers.len(),
            as_of_year, "history snapshot built"
        );
        Ok(history)
    }
}

/// In-memory provider over a fixed list of records.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    records: Vec<HistoryRecord>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn insert(&mut self, record: HistoryRecord) {
        self.records.push(record);
    }
    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }
}

impl From<Vec<HistoryRecord>> for RecordSet {
    fn from(records: Vec<HistoryRecord>) -> Self {
        Self { records }
    }
}

impl HistoryProvider for RecordSet {
    type Error = DataIntegrityError;

    fn receivers_by_giver(
        &self,
        pool: &BTreeSet<ParticipantId>,
        as_of_year: Year,
    ) -> Result<History, Self::Error> {
        History::from_records(&self.records, pool, as_of_year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (ParticipantId, ParticipantId, ParticipantId) {
        (ParticipantId::new(), ParticipantId::new(), ParticipantId::new())
    }

    #[test]
    fn orders_oldest_to_newest() {
        let (a, b, c) = ids();
        let set = RecordSet::from(vec![
            HistoryRecord::new(a, c, 2023),
            HistoryRecord::new(a, b, 2021),
            HistoryRecord::new(a, c, 2022),
        ]);

        let pool = [a, b, c].into_iter().collect();
        let history = set.receivers_by_giver(&pool, 2024).unwrap();

        assert_eq!(history.receivers(&a), &[b, c, c]);
    }

    #[test]
    fn excludes_target_year_and_later() {
        let (a, b, c) = ids();
        let set = RecordSet::from(vec![
            HistoryRecord::new(a, b, 2023),
            HistoryRecord::new(a, c, 2024),
            HistoryRecord::new(a, c, 2025),
        ]);

        let pool = [a, b, c].into_iter().collect();
        let history = set.receivers_by_giver(&pool, 2024).unwrap();

        assert_eq!(history.receivers(&a), &[b]);
    }

    #[test]
    fn skips_givers_outside_pool() {
        let (a, b, c) = ids();
        let set = RecordSet::from(vec![
            HistoryRecord::new(a, b, 2023),
            HistoryRecord::new(c, a, 2023),
        ]);

        let pool = [a, b].into_iter().collect();
        let history = set.receivers_by_giver(&pool, 2024).unwrap();

        assert_eq!(history.receivers(&a), &[b]);
        assert!(history.receivers(&c).is_empty());
    }

    #[test]
    fn self_in_history_is_an_integrity_fault() {
        let (a, b, _) = ids();
        let set = RecordSet::from(vec![
            HistoryRecord::new(a, b, 2022),
            HistoryRecord::new(b, b, 2023),
        ]);

        let pool = [a, b].into_iter().collect();
        let err = set.receivers_by_giver(&pool, 2024).unwrap_err();

        assert_eq!(
            err,
            DataIntegrityError::SelfInHistory {
                giver: b,
                year: 2023
            }
        );
    }

    #[test]
    fn unknown_giver_has_no_receivers() {
        let history = History::new();

        assert!(history.receivers(&ParticipantId::new()).is_empty());
        assert!(history.is_empty());
    }
}
