//! sled-backed storage for participants, rounds and gift messages
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sled::transaction::{ConflictableTransactionError, TransactionError, abort};
use sled::{Db, IVec, Transactional, Tree};
use tracing::{debug, info};

use super::assignment::Assignment;
use super::error::{DataIntegrityError, StoreError};
use super::history::{History, HistoryProvider};
use super::participant::{HistoryRecord, Participant, ParticipantId, Role, Year};

const PARTICIPANTS: &str = "participants";
const ASSIGNMENTS: &str = "assignments";
const RECEIVERS: &str = "receivers";
const ROUNDS: &str = "rounds";
const MESSAGES: &str = "messages";

/// Free-text note a giver attaches to their assignment for a year.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct GiftMessage {
    #[n(0)]
    pub giver: ParticipantId,
    #[n(1)]
    pub year: Year,
    #[n(2)]
    pub text: String,
    #[n(3)]
    written_at: i64, // unix seconds
}

// hashed on commit so a round can be audited later
#[derive(minicbor::Encode)]
struct RoundRecord<'a> {
    #[n(0)]
    year: Year,
    #[n(1)]
    assignment: &'a Assignment,
}

/// One pair of a stored round with the names it had at lookup time. A name
/// is `None` once that participant has been removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedPair {
    pub giver: ParticipantId,
    pub receiver: ParticipantId,
    pub giver_name: Option<String>,
    pub receiver_name: Option<String>,
}

// keys stored for one year
#[derive(Default)]
struct YearEntries {
    assignments: Vec<IVec>,
    receivers: Vec<IVec>,
    messages: Vec<IVec>,
    digest: bool,
}

/// Persists rounds under their year.
///
/// Keys in the assignment trees are the sign-flipped big-endian year followed
/// by the participant id, so a prefix scan over a year yields its round.
/// A second tree indexes the same pairs by receiver, which is what lets a
/// commit refuse a receiver that is already taken for the year.
#[derive(Clone)]
pub struct RoundStore {
    instance: Arc<Db>,
    participants: Tree,
    assignments: Tree, // year ++ giver -> receiver
    receivers: Tree,   // year ++ receiver -> giver
    rounds: Tree,      // year -> digest
    messages: Tree,    // year ++ giver -> message
}

impl GiftMessage {
    pub fn written_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.written_at, 0)
    }
}

impl RoundStore {
    pub fn new(instance: Arc<Db>) -> Result<Self, StoreError> {
        Ok(Self {
            participants: instance.open_tree(PARTICIPANTS)?,
            assignments: instance.open_tree(ASSIGNMENTS)?,
            receivers: instance.open_tree(RECEIVERS)?,
            rounds: instance.open_tree(ROUNDS)?,
            messages: instance.open_tree(MESSAGES)?,
            instance,
        })
    }

    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        Self::new(Arc::new(sled::open(path)?))
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.instance.flush()?;
        Ok(())
    }

    /// Registers a participant. Names are compared after trimming and must be unique.
    pub fn add_participant(&self, name: &str, role: Role) -> Result<Participant, StoreError> {
        let name = name.trim();
        if self.participants()?.iter().any(|p| p.name == name) {
            return Err(StoreError::DuplicateName(name.to_string()));
        }

        let participant = Participant::new(name, role);
        self.participants
            .insert(participant.id.as_bytes(), minicbor::to_vec(&participant)?)?;

        debug!(id = %participant.id, ?role, "participant added");
        Ok(participant)
    }

    /// Past rounds stay in place; only the participant entry goes. Their pairs
    /// show up without a name in [`RoundStore::named_round`] afterwards.
    pub fn remove_participant(&self, id: &ParticipantId) -> Result<Option<Participant>, StoreError> {
        match self.participants.remove(id.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Gives a participant a new name, under the same uniqueness rule as
    /// [`RoundStore::add_participant`].
    pub fn rename_participant(&self, id: &ParticipantId, name: &str) -> Result<Participant, StoreError> {
        let name = name.trim();
        if self.participants()?.iter().any(|p| p.name == name && p.id != *id) {
            return Err(StoreError::DuplicateName(name.to_string()));
        }

        let mut participant = self
            .participant(id)?
            .ok_or(StoreError::UnknownParticipant(*id))?;
        participant.name = name.to_string();
        self.participants
            .insert(id.as_bytes(), minicbor::to_vec(&participant)?)?;

        debug!(%id, "participant renamed");
        Ok(participant)
    }

    pub fn participant(&self, id: &ParticipantId) -> Result<Option<Participant>, StoreError> {
        match self.participants.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All participants sorted by name.
    pub fn participants(&self) -> Result<Vec<Participant>, StoreError> {
        let mut participants = self
            .participants
            .iter()
            .values()
            .map(|bytes| Ok::<_, StoreError>(minicbor::decode::<Participant>(&bytes?)?))
            .collect::<Result<Vec<_>, _>>()?;
        participants.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(participants)
    }

    /// Writes a drawn round and returns its sha256 digest.
    ///
    /// The whole round goes in one transaction: if any giver already has a
    /// receiver for `year`, or any receiver is already taken, nothing is written.
    pub fn commit_round(&self, year: Year, assignment: &Assignment) -> Result<String, StoreError> {
        let digest = digest_of(year, assignment)?;

        let pairs: Vec<_> = assignment.iter().collect();
        self.insert_pairs(year, &pairs, Some(digest.as_str()), &YearEntries::default())?;

        info!(year, pairs = pairs.len(), %digest, "round committed");
        Ok(digest)
    }

    /// Swaps whatever is stored for `year` (pairs, messages and digest) for
    /// `assignment` in a single transaction. On failure the old round is untouched.
    pub fn replace_round(&self, year: Year, assignment: &Assignment) -> Result<String, StoreError> {
        let digest = digest_of(year, assignment)?;
        let previous = self.year_entries(year)?;

        let pairs: Vec<_> = assignment.iter().collect();
        self.insert_pairs(year, &pairs, Some(digest.as_str()), &previous)?;

        info!(
            year,
            pairs = pairs.len(),
            replaced = previous.assignments.len(),
            %digest,
            "round replaced"
        );
        Ok(digest)
    }

    /// Records a single historical pairing, e.g. rounds drawn before this store existed.
    pub fn record_past(
        &self,
        giver: ParticipantId,
        receiver: ParticipantId,
        year: Year,
    ) -> Result<(), StoreError> {
        if giver == receiver {
            return Err(DataIntegrityError::SelfInHistory { giver, year }.into());
        }
        self.insert_pairs(year, &[(giver, receiver)], None, &YearEntries::default())
    }

    /// Administrative deletion of one history record, together with the
    /// giver's message for that year. Returns the receiver that was removed.
    ///
    /// The year's digest is dropped as well since it no longer describes
    /// what is stored.
    pub fn remove_record(
        &self,
        giver: &ParticipantId,
        year: Year,
    ) -> Result<Option<ParticipantId>, StoreError> {
        let giver_key = pair_key(year, giver);

        let removed = (&self.assignments, &self.receivers, &self.messages, &self.rounds)
            .transaction(|(assignments, receivers, messages, rounds)| {
                let Some(bytes) = assignments.remove(giver_key.as_slice())? else {
                    return Ok(None);
                };
                let receiver = match decode_id(&bytes, ASSIGNMENTS) {
                    Ok(receiver) => receiver,
                    Err(err) => return abort(err),
                };

                let receiver_key = pair_key(year, &receiver);
                match receivers.remove(receiver_key)? {
                    Some(back) if back[..] == giver.as_bytes()[..] => {}
                    _ => return abort(StoreError::Corrupt { tree: RECEIVERS }),
                }
                messages.remove(giver_key.as_slice())?;
                rounds.remove(year_key(year).to_vec())?;

                Ok(Some(receiver))
            })
            .map_err(transaction_error)?;

        if let Some(receiver) = removed {
            info!(%giver, %receiver, year, "history record removed");
        }
        Ok(removed)
    }

    // Checks and writes `pairs` for `year`, first clearing `previous` in the
    // same transaction. Transactional trees cannot scan, so the caller
    // gathers those keys up front.
    fn insert_pairs(
        &self,
        year: Year,
        pairs: &[(ParticipantId, ParticipantId)],
        digest: Option<&str>,
        previous: &YearEntries,
    ) -> Result<(), StoreError> {
        (
            &self.participants,
            &self.assignments,
            &self.receivers,
            &self.messages,
            &self.rounds,
        )
            .transaction(|(participants, assignments, receivers, messages, rounds)| {
                for key in &previous.assignments {
                    assignments.remove(key.clone())?;
                }
                for key in &previous.receivers {
                    receivers.remove(key.clone())?;
                }
                for key in &previous.messages {
                    messages.remove(key.clone())?;
                }
                if previous.digest {
                    rounds.remove(year_key(year).to_vec())?;
                }

                for (giver, receiver) in pairs {
                    for id in [giver, receiver] {
                        if participants.get(id.as_bytes())?.is_none() {
                            return abort(StoreError::UnknownParticipant(*id));
                        }
                    }

                    let giver_key = pair_key(year, giver);
                    if assignments.get(&giver_key)?.is_some() {
                        return abort(StoreError::GiverAlreadyAssigned {
                            giver: *giver,
                            year,
                        });
                    }
                    let receiver_key = pair_key(year, receiver);
                    if receivers.get(&receiver_key)?.is_some() {
                        return abort(StoreError::DuplicateReceiver {
                            receiver: *receiver,
                            year,
                        });
                    }

                    assignments.insert(giver_key, receiver.as_bytes().to_vec())?;
                    receivers.insert(receiver_key, giver.as_bytes().to_vec())?;
                }
                if let Some(digest) = digest {
                    rounds.insert(year_key(year).to_vec(), digest.as_bytes())?;
                }
                Ok(())
            })
            .map_err(transaction_error)
    }

    fn year_entries(&self, year: Year) -> Result<YearEntries, StoreError> {
        let prefix = year_key(year);
        let keys = |tree: &Tree| {
            tree.scan_prefix(prefix)
                .keys()
                .collect::<Result<Vec<_>, _>>()
        };

        Ok(YearEntries {
            assignments: keys(&self.assignments)?,
            receivers: keys(&self.receivers)?,
            messages: keys(&self.messages)?,
            digest: self.rounds.contains_key(prefix)?,
        })
    }

    pub fn assignment_for(
        &self,
        giver: &ParticipantId,
        year: Year,
    ) -> Result<Option<ParticipantId>, StoreError> {
        self.assignments
            .get(pair_key(year, giver))?
            .map(|bytes| decode_id(&bytes, ASSIGNMENTS))
            .transpose()
    }

    /// Everything recorded for `year`, empty if no round exists.
    pub fn round(&self, year: Year) -> Result<Assignment, StoreError> {
        self.assignments
            .scan_prefix(year_key(year))
            .map(|entry| {
                let (key, value) = entry?;
                let (_, giver) = split_pair_key(&key, ASSIGNMENTS)?;
                Ok::<_, StoreError>((giver, decode_id(&value, ASSIGNMENTS)?))
            })
            .collect()
    }

    /// Digest of a round committed through [`RoundStore::commit_round`].
    pub fn round_digest(&self, year: Year) -> Result<Option<String>, StoreError> {
        self.rounds
            .get(year_key(year))?
            .map(|bytes| {
                String::from_utf8(bytes.to_vec()).map_err(|_| StoreError::Corrupt { tree: ROUNDS })
            })
            .transpose()
    }

    pub fn years(&self) -> Result<BTreeSet<Year>, StoreError> {
        self.assignments
            .iter()
            .keys()
            .map(|key| Ok::<_, StoreError>(split_pair_key(&key?, ASSIGNMENTS)?.0))
            .collect()
    }

    pub fn records(&self) -> Result<Vec<HistoryRecord>, StoreError> {
        self.assignments
            .iter()
            .map(|entry| {
                let (key, value) = entry?;
                let (year, giver) = split_pair_key(&key, ASSIGNMENTS)?;
                Ok::<_, StoreError>(HistoryRecord::new(
                    giver,
                    decode_id(&value, ASSIGNMENTS)?,
                    year,
                ))
            })
            .collect()
    }

    /// Administrative deletion of a whole round, including its messages.
    /// Returns the number of pairs removed.
    pub fn remove_round(&self, year: Year) -> Result<usize, StoreError> {
        let entries = self.year_entries(year)?;

        (&self.assignments, &self.receivers, &self.messages, &self.rounds)
            .transaction(|(assignments, receivers, messages, rounds)| {
                for key in &entries.assignments {
                    assignments.remove(key.clone())?;
                }
                for key in &entries.receivers {
                    receivers.remove(key.clone())?;
                }
                for key in &entries.messages {
                    messages.remove(key.clone())?;
                }
                rounds.remove(year_key(year).to_vec())?;
                Ok::<_, ConflictableTransactionError<StoreError>>(())
            })
            .map_err(transaction_error)?;

        let removed = entries.assignments.len();
        info!(year, removed, "round removed");
        Ok(removed)
    }

    /// Every year `giver` was drawn, oldest first.
    pub fn history_for(&self, giver: &ParticipantId) -> Result<Vec<HistoryRecord>, StoreError> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|record| record.giver == *giver)
            .collect())
    }

    /// Attaches or replaces the giver's message for `year`. The giver must have been drawn that year.
    pub fn set_message(
        &self,
        giver: ParticipantId,
        year: Year,
        text: impl Into<String>,
    ) -> Result<GiftMessage, StoreError> {
        if self.assignment_for(&giver, year)?.is_none() {
            return Err(StoreError::NoAssignment { giver, year });
        }

        let message = GiftMessage {
            giver,
            year,
            text: text.into(),
            written_at: Utc::now().timestamp(),
        };
        self.messages
            .insert(pair_key(year, &giver), minicbor::to_vec(&message)?)?;

        Ok(message)
    }

    pub fn message_from(
        &self,
        giver: &ParticipantId,
        year: Year,
    ) -> Result<Option<GiftMessage>, StoreError> {
        match self.messages.get(pair_key(year, giver))? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn delete_message(
        &self,
        giver: &ParticipantId,
        year: Year,
    ) -> Result<Option<GiftMessage>, StoreError> {
        match self.messages.remove(pair_key(year, giver))? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The message left by whoever drew `receiver` in `year`.
    pub fn message_to(
        &self,
        receiver: &ParticipantId,
        year: Year,
    ) -> Result<Option<GiftMessage>, StoreError> {
        match self.receivers.get(pair_key(year, receiver))? {
            Some(bytes) => self.message_from(&decode_id(&bytes, RECEIVERS)?, year),
            None => Ok(None),
        }
    }

    /// Names for each pair of a round, givers in name order. Pairs whose
    /// giver has since been removed come last.
    pub fn named_round(&self, year: Year) -> Result<Vec<NamedPair>, StoreError> {
        let names: BTreeMap<ParticipantId, String> = self
            .participants()?
            .into_iter()
            .map(|p| (p.id, p.name))
            .collect();

        let mut named: Vec<NamedPair> = self
            .round(year)?
            .iter()
            .map(|(giver, receiver)| NamedPair {
                giver,
                receiver,
                giver_name: names.get(&giver).cloned(),
                receiver_name: names.get(&receiver).cloned(),
            })
            .collect();
        named.sort_by(|a, b| {
            (a.giver_name.is_none(), &a.giver_name, a.giver)
                .cmp(&(b.giver_name.is_none(), &b.giver_name, b.giver))
        });

        for pair in named.iter().filter(|p| p.giver_name.is_none() || p.receiver_name.is_none()) {
            debug!(year, giver = %pair.giver, receiver = %pair.receiver, "pair refers to a removed participant");
        }
        Ok(named)
    }
}

impl HistoryProvider for RoundStore {
    type Error = StoreError;

    fn receivers_by_giver(
        &self,
        pool: &BTreeSet<ParticipantId>,
        as_of_year: Year,
    ) -> Result<History, Self::Error> {
        let records = self.records()?;
        Ok(History::from_records(&records, pool, as_of_year)?)
    }
}

// flip the sign bit so negative years still sort first
fn year_key(year: Year) -> [u8; 4] {
    ((year as u32) ^ 0x8000_0000).to_be_bytes()
}

fn pair_key(year: Year, id: &ParticipantId) -> Vec<u8> {
    let mut key = year_key(year).to_vec();
    key.extend_from_slice(id.as_bytes());
    key
}

fn split_pair_key(key: &[u8], tree: &'static str) -> Result<(Year, ParticipantId), StoreError> {
    if key.len() != 20 {
        return Err(StoreError::Corrupt { tree });
    }
    let (year, id) = key.split_at(4);
    let year: [u8; 4] = year.try_into().map_err(|_| StoreError::Corrupt { tree })?;

    Ok((
        (u32::from_be_bytes(year) ^ 0x8000_0000) as Year,
        decode_id(id, tree)?,
    ))
}

fn digest_of(year: Year, assignment: &Assignment) -> Result<String, StoreError> {
    let contents = minicbor::to_vec(RoundRecord { year, assignment })?;
    Ok(sha256::digest(&contents))
}

fn transaction_error(err: TransactionError<StoreError>) -> StoreError {
    match err {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => StoreError::Sled(err),
    }
}

fn decode_id(bytes: &[u8], tree: &'static str) -> Result<ParticipantId, StoreError> {
    let bytes: [u8; 16] = bytes.try_into().map_err(|_| StoreError::Corrupt { tree })?;
    Ok(ParticipantId::from_bytes(bytes))
}
