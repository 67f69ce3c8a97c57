//! Randomised search for a valid round
//!
//! Two strategies satisfy the same contract. [`Strategy::Rejection`] shuffles
//! the pool into a candidate permutation and keeps the first one the
//! validator accepts, giving up after a bounded number of attempts.
//! [`Strategy::Matching`] builds the giver -> allowed receiver graph and finds
//! a perfect matching with augmenting paths, which either succeeds or proves
//! that no valid round exists.
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use super::assignment::Assignment;
use super::config::DrawPolicy;
use super::error::GenerationError;
use super::history::History;
use super::participant::ParticipantId;
use super::validator::{self, Lookback};

pub const DEFAULT_MAX_ATTEMPTS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Rejection,
    Matching,
}

/// A successful draw along with how many candidates it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draw {
    pub assignment: Assignment,
    pub attempts: usize,
}

/// Draws a round by rejection sampling.
///
/// Returns [`GenerationError::InvalidPool`] for pools smaller than two before
/// touching `rng`, and [`GenerationError::Exhausted`] when no candidate passes
/// within `max_attempts`.
pub fn generate<R: Rng + ?Sized>(
    pool: &BTreeSet<ParticipantId>,
    history: &History,
    lookback: Lookback,
    max_attempts: usize,
    rng: &mut R,
) -> Result<Assignment, GenerationError> {
    sample(pool, history, lookback, max_attempts, rng, None).map(|draw| draw.assignment)
}

/// Like [`generate`], but stops with [`GenerationError::Cancelled`] once `cancel` is set.
/// The flag is only read between attempts.
pub fn generate_with_cancel<R: Rng + ?Sized>(
    pool: &BTreeSet<ParticipantId>,
    history: &History,
    lookback: Lookback,
    max_attempts: usize,
    rng: &mut R,
    cancel: &AtomicBool,
) -> Result<Draw, GenerationError> {
    sample(pool, history, lookback, max_attempts, rng, Some(cancel))
}

/// Draws a round the way `policy` asks for.
pub fn draw<R: Rng + ?Sized>(
    pool: &BTreeSet<ParticipantId>,
    history: &History,
    policy: &DrawPolicy,
    rng: &mut R,
    cancel: Option<&AtomicBool>,
) -> Result<Draw, GenerationError> {
    match policy.strategy {
        Strategy::Rejection => {
            if policy.precheck_feasibility {
                check_pool(pool)?;
                if !is_feasible(pool, history, policy.lookback) {
                    warn!(pool_size = pool.len(), lookback = %policy.lookback, "no valid round exists");
                    return Err(GenerationError::Infeasible {
                        pool_size: pool.len(),
                        lookback: policy.lookback,
                    });
                }
            }
            sample(pool, history, policy.lookback, policy.max_attempts, rng, cancel)
        }
        Strategy::Matching => {
            let assignment = match_constructively(pool, history, policy.lookback, rng)?;
            Ok(Draw {
                assignment,
                attempts: 1,
            })
        }
    }
}

/// Builds a valid round directly from the compatibility graph.
///
/// Adjacency lists and giver order are shuffled so repeated calls spread over
/// the valid rounds, though not uniformly.
pub fn match_constructively<R: Rng + ?Sized>(
    pool: &BTreeSet<ParticipantId>,
    history: &History,
    lookback: Lookback,
    rng: &mut R,
) -> Result<Assignment, GenerationError> {
    check_pool(pool)?;

    let members: Vec<ParticipantId> = pool.iter().copied().collect();
    let mut graph = compatibility(&members, history, lookback);
    for edges in graph.iter_mut() {
        edges.shuffle(rng);
    }
    let mut order: Vec<usize> = (0..members.len()).collect();
    order.shuffle(rng);

    let owner = max_matching(&graph, &order);
    let mut assignment = Assignment::new();
    for (receiver, giver) in owner.iter().enumerate() {
        match giver {
            Some(giver) => {
                assignment.insert(members[*giver], members[receiver]);
            }
            None => {
                warn!(pool_size = members.len(), %lookback, "no perfect matching exists");
                return Err(GenerationError::Infeasible {
                    pool_size: members.len(),
                    lookback,
                });
            }
        }
    }

    debug_assert!(validator::is_valid(&assignment, history, lookback));
    info!(pool_size = members.len(), "round built from matching");
    Ok(assignment)
}

/// Whether any valid round exists for `pool`, by Hall's condition on the
/// compatibility graph (checked as a maximum matching).
pub fn is_feasible(pool: &BTreeSet<ParticipantId>, history: &History, lookback: Lookback) -> bool {
    if pool.len() < 2 {
        return false;
    }
    let members: Vec<ParticipantId> = pool.iter().copied().collect();
    let graph = compatibility(&members, history, lookback);
    let order: Vec<usize> = (0..members.len()).collect();

    max_matching(&graph, &order).iter().all(Option::is_some)
}

fn check_pool(pool: &BTreeSet<ParticipantId>) -> Result<(), GenerationError> {
    if pool.len() < 2 {
        warn!(pool_size = pool.len(), "pool too small to draw");
        return Err(GenerationError::InvalidPool { size: pool.len() });
    }
    Ok(())
}

fn sample<R: Rng + ?Sized>(
    pool: &BTreeSet<ParticipantId>,
    history: &History,
    lookback: Lookback,
    max_attempts: usize,
    rng: &mut R,
    cancel: Option<&AtomicBool>,
) -> Result<Draw, GenerationError> {
    check_pool(pool)?;

    // givers stay in pool order, only the receivers are permuted
    let givers: Vec<ParticipantId> = pool.iter().copied().collect();
    let mut receivers = givers.clone();

    for attempt in 1..=max_attempts {
        if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            debug!(attempts = attempt - 1, "draw cancelled");
            return Err(GenerationError::Cancelled {
                attempts: attempt - 1,
            });
        }

        receivers.shuffle(rng);
        let candidate: Assignment = givers
            .iter()
            .copied()
            .zip(receivers.iter().copied())
            .collect();

        match validator::first_violation(&candidate, history, lookback) {
            None => {
                info!(pool_size = givers.len(), attempts = attempt, "valid round found");
                return Ok(Draw {
                    assignment: candidate,
                    attempts: attempt,
                });
            }
            Some(violation) => trace!(attempt, %violation, "candidate rejected"),
        }
    }

    warn!(
        pool_size = givers.len(),
        %lookback,
        attempts = max_attempts,
        "no valid round within the attempt limit"
    );
    Err(GenerationError::Exhausted {
        pool_size: givers.len(),
        lookback,
        attempts: max_attempts,
    })
}

// graph[g] lists the receiver indices giver g may draw
fn compatibility(members: &[ParticipantId], history: &History, lookback: Lookback) -> Vec<Vec<usize>> {
    members
        .iter()
        .map(|giver| {
            members
                .iter()
                .enumerate()
                .filter(|(_, receiver)| lookback.allows(history, giver, receiver))
                .map(|(index, _)| index)
                .collect()
        })
        .collect()
}

// Kuhn's algorithm, returns the giver matched to each receiver
fn max_matching(graph: &[Vec<usize>], order: &[usize]) -> Vec<Option<usize>> {
    let mut owner = vec![None; graph.len()];
    for &giver in order {
        let mut seen = vec![false; graph.len()];
        augment(giver, graph, &mut seen, &mut owner);
    }
    owner
}

fn augment(giver: usize, graph: &[Vec<usize>], seen: &mut [bool], owner: &mut [Option<usize>]) -> bool {
    for &receiver in &graph[giver] {
        if seen[receiver] {
            continue;
        }
        seen[receiver] = true;

        let free = match owner[receiver] {
            None => true,
            Some(current) => augment(current, graph, seen, owner),
        };
        if free {
            owner[receiver] = Some(giver);
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn pool(n: usize) -> (Vec<ParticipantId>, BTreeSet<ParticipantId>) {
        let ids: Vec<ParticipantId> = (0..n).map(|_| ParticipantId::new()).collect();
        let set = ids.iter().copied().collect();
        (ids, set)
    }

    #[test]
    fn empty_pool_fails_fast() {
        let mut rng = StdRng::seed_from_u64(1);
        let err = generate(&BTreeSet::new(), &History::new(), Lookback::Years(2), 100, &mut rng)
            .unwrap_err();

        assert_eq!(err, GenerationError::InvalidPool { size: 0 });
    }

    #[test]
    fn zero_attempts_is_exhausted() {
        let (_, set) = pool(4);
        let mut rng = StdRng::seed_from_u64(1);

        let err = generate(&set, &History::new(), Lookback::Years(2), 0, &mut rng).unwrap_err();
        assert!(matches!(err, GenerationError::Exhausted { attempts: 0, .. }));
    }

    #[test]
    fn same_seed_same_round() {
        let (_, set) = pool(6);

        let first = generate(&set, &History::new(), Lookback::Years(2), 100, &mut StdRng::seed_from_u64(42));
        let second = generate(&set, &History::new(), Lookback::Years(2), 100, &mut StdRng::seed_from_u64(42));

        assert_eq!(first.unwrap(), second.unwrap());
    }

    #[test]
    fn cancel_is_checked_before_the_first_attempt() {
        let (_, set) = pool(4);
        let cancel = AtomicBool::new(true);
        let mut rng = StdRng::seed_from_u64(3);

        let err = generate_with_cancel(&set, &History::new(), Lookback::Years(2), 100, &mut rng, &cancel)
            .unwrap_err();
        assert_eq!(err, GenerationError::Cancelled { attempts: 0 });
    }

    #[test]
    fn matching_finds_the_only_valid_round() {
        // every giver has already had everyone but their successor in the cycle
        let (ids, set) = pool(4);
        let mut history = History::new();
        for (i, giver) in ids.iter().enumerate() {
            for (j, receiver) in ids.iter().enumerate() {
                if i != j && j != (i + 1) % ids.len() {
                    history.push(*giver, *receiver);
                }
            }
        }

        let mut rng = StdRng::seed_from_u64(9);
        let assignment = match_constructively(&set, &history, Lookback::All, &mut rng).unwrap();

        for (i, giver) in ids.iter().enumerate() {
            assert_eq!(assignment.get(giver), Some(ids[(i + 1) % ids.len()]));
        }
    }

    #[test]
    fn feasibility_detects_blocked_receiver() {
        // nobody may give to c any more
        let (ids, set) = pool(3);
        let (a, b, c) = (ids[0], ids[1], ids[2]);
        let history = History::new()
            .with_receivers(a, vec![c])
            .with_receivers(b, vec![c]);

        assert!(!is_feasible(&set, &history, Lookback::All));
        assert!(is_feasible(&set, &History::new(), Lookback::All));

        let mut rng = StdRng::seed_from_u64(5);
        let err = match_constructively(&set, &history, Lookback::All, &mut rng).unwrap_err();
        assert!(err.is_constraint_failure());
    }

    #[test]
    fn precheck_reports_infeasible_before_sampling() {
        let (ids, set) = pool(2);
        let history = History::new()
            .with_receivers(ids[0], vec![ids[1]])
            .with_receivers(ids[1], vec![ids[0]]);
        let policy = DrawPolicy {
            precheck_feasibility: true,
            ..DrawPolicy::default()
        };

        let mut rng = StdRng::seed_from_u64(5);
        let err = draw(&set, &history, &policy, &mut rng, None).unwrap_err();
        assert!(matches!(err, GenerationError::Infeasible { pool_size: 2, .. }));
    }
}
