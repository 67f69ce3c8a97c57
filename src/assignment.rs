//! Giver -> receiver mappings for a single round
use std::collections::{BTreeMap, BTreeSet};

use super::participant::{HistoryRecord, ParticipantId, Year};

/// A mapping from every giver in a pool to one receiver.
///
/// Candidates are built fresh per search attempt and thrown away unless they
/// validate; the one that passes is persisted as the round's history.
#[derive(Debug, Clone, Default, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Assignment {
    #[n(0)]
    pairs: BTreeMap<ParticipantId, ParticipantId>,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn insert(&mut self, giver: ParticipantId, receiver: ParticipantId) -> Option<ParticipantId> {
        self.pairs.insert(giver, receiver)
    }
    pub fn get(&self, giver: &ParticipantId) -> Option<ParticipantId> {
        self.pairs.get(giver).copied()
    }
    pub fn iter(&self) -> impl Iterator<Item = (ParticipantId, ParticipantId)> + '_ {
        self.pairs.iter().map(|(g, r)| (*g, *r))
    }
    pub fn len(&self) -> usize {
        self.pairs.len()
    }
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
    pub fn givers(&self) -> BTreeSet<ParticipantId> {
        self.pairs.keys().copied().collect()
    }
    pub fn receivers(&self) -> BTreeSet<ParticipantId> {
        self.pairs.values().copied().collect()
    }
    /// Every giver appears exactly once as a receiver and nobody outside the givers receives.
    pub fn is_bijection(&self) -> bool {
        let receivers = self.receivers();
        receivers.len() == self.pairs.len() && receivers.iter().all(|r| self.pairs.contains_key(r))
    }
    /// Same as [`Assignment::is_bijection`], restricted to exactly `pool`.
    pub fn is_bijection_over(&self, pool: &BTreeSet<ParticipantId>) -> bool {
        self.is_bijection() && self.givers() == *pool
    }
    pub fn to_records(&self, year: Year) -> Vec<HistoryRecord> {
        self.iter()
            .map(|(giver, receiver)| HistoryRecord::new(giver, receiver, year))
            .collect()
    }
}

impl FromIterator<(ParticipantId, ParticipantId)> for Assignment {
    fn from_iter<T: IntoIterator<Item = (ParticipantId, ParticipantId)>>(iter: T) -> Self {
        Self {
            pairs: iter.into_iter().collect(),
        }
    }
}
