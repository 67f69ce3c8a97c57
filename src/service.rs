//! Service layer API for drawing and reading rounds
use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;

use anyhow::Context;
use rand::Rng;
use tracing::{info, warn};

use super::assignment::Assignment;
use super::config::DrawPolicy;
use super::error::GenerationError;
use super::generator;
use super::history::HistoryProvider;
use super::participant::{Participant, ParticipantId, Year, current_year};
use super::store::{GiftMessage, RoundStore};

pub struct DrawService {
    store: RoundStore,
    policy: DrawPolicy,
}

/// What a committed draw produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundSummary {
    pub year: Year,
    pub assignment: Assignment,
    pub attempts: usize,
    pub digest: String,
}

impl DrawService {
    pub fn new(store: RoundStore, policy: DrawPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &RoundStore {
        &self.store
    }

    pub fn policy(&self) -> &DrawPolicy {
        &self.policy
    }

    /// Participants taking part in a draw, administrators left out if the policy says so
    pub fn pool(&self) -> anyhow::Result<BTreeSet<ParticipantId>> {
        Ok(self
            .store
            .participants()?
            .into_iter()
            .filter(|p| !(self.policy.exclude_admins && p.is_admin()))
            .map(|p| p.id)
            .collect())
    }

    /// Draw and commit the round for `year`
    pub fn draw_round<R: Rng + ?Sized>(&self, year: Year, rng: &mut R) -> anyhow::Result<RoundSummary> {
        self.draw(year, rng, None)
    }

    /// Draw and commit the round for the current calendar year
    pub fn draw_current_round<R: Rng + ?Sized>(&self, rng: &mut R) -> anyhow::Result<RoundSummary> {
        self.draw(current_year(), rng, None)
    }

    /// Same as [`DrawService::draw_round`], giving up once `cancel` is set
    pub fn draw_round_with_cancel<R: Rng + ?Sized>(
        &self,
        year: Year,
        rng: &mut R,
        cancel: &AtomicBool,
    ) -> anyhow::Result<RoundSummary> {
        self.draw(year, rng, Some(cancel))
    }

    /// Draw `year` again and replace the committed round, messages included.
    /// The new round is drawn first, so a failed redraw leaves the old one in place.
    pub fn redraw_round<R: Rng + ?Sized>(&self, year: Year, rng: &mut R) -> anyhow::Result<RoundSummary> {
        let (pool_size, draw) = self.plan(year, rng, None)?;

        let digest = self
            .store
            .replace_round(year, &draw.assignment)
            .with_context(|| format!("Failed to store the {} round", year))?;

        warn!(year, pool_size, attempts = draw.attempts, "round redrawn, previous pairs discarded");

        Ok(RoundSummary {
            year,
            assignment: draw.assignment,
            attempts: draw.attempts,
            digest,
        })
    }

    fn draw<R: Rng + ?Sized>(
        &self,
        year: Year,
        rng: &mut R,
        cancel: Option<&AtomicBool>,
    ) -> anyhow::Result<RoundSummary> {
        if !self.store.round(year)?.is_empty() {
            return Err(anyhow::anyhow!("A round for {} has already been drawn", year));
        }

        let (pool_size, draw) = self.plan(year, rng, cancel)?;

        let digest = self
            .store
            .commit_round(year, &draw.assignment)
            .with_context(|| format!("Failed to store the {} round", year))?;

        info!(year, pool_size, attempts = draw.attempts, "round drawn");

        Ok(RoundSummary {
            year,
            assignment: draw.assignment,
            attempts: draw.attempts,
            digest,
        })
    }

    // Picks the pool and draws against a history snapshot, nothing is written
    fn plan<R: Rng + ?Sized>(
        &self,
        year: Year,
        rng: &mut R,
        cancel: Option<&AtomicBool>,
    ) -> anyhow::Result<(usize, generator::Draw)> {
        let pool = self.pool()?;

        // read once, the search never goes back to the store
        let history = self
            .store
            .receivers_by_giver(&pool, year)
            .context("Failed to load past rounds")?;

        let draw = generator::draw(&pool, &history, &self.policy, rng, cancel)
            .with_context(|| format!("Failed to draw the {} round", year))?;

        Ok((pool.len(), draw))
    }

    /// Who `giver` has to buy for in `year`. `None` if `giver` was not drawn
    /// that year or the receiver has since been removed.
    pub fn receiver_for(&self, giver: &ParticipantId, year: Year) -> anyhow::Result<Option<Participant>> {
        match self.store.assignment_for(giver, year)? {
            Some(receiver) => Ok(self.store.participant(&receiver)?),
            None => Ok(None),
        }
    }

    pub fn leave_message(
        &self,
        giver: ParticipantId,
        year: Year,
        text: &str,
    ) -> anyhow::Result<GiftMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(anyhow::Error::msg("Message is empty"));
        }
        Ok(self.store.set_message(giver, year, text)?)
    }

    /// The message from whoever drew `receiver` in `year`
    pub fn message_for(&self, receiver: &ParticipantId, year: Year) -> anyhow::Result<Option<GiftMessage>> {
        Ok(self.store.message_to(receiver, year)?)
    }
}

/// Text to show a user for a failed draw. Constraint failures are told apart
/// from bad input and from internal errors.
pub fn user_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<GenerationError>() {
        Some(err) if err.is_constraint_failure() => {
            "The round could not be completed with the current constraints. \
             Try a shorter lookback or allow more attempts."
                .to_string()
        }
        Some(GenerationError::InvalidPool { size }) => {
            format!("At least two participants are needed for a draw, found {}", size)
        }
        Some(GenerationError::Cancelled { .. }) => "The draw was cancelled.".to_string(),
        _ => "Something went wrong while drawing the round.".to_string(),
    }
}
