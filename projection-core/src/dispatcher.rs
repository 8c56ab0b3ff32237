//! Event dispatcher and handler registry
//!
//! One [`Dispatcher::apply`] call processes one envelope: look up the
//! handler for the payload kind, let it stage entity mutations against a
//! [`WriteSet`], then commit the mutations and the checkpoint advance as
//! a single atomic write. Replays, unknown kinds, referential gaps and
//! invalid state transitions are consumed as skips (logged, counted,
//! checkpoint advanced); only storage failures abort the event, leaving
//! the checkpoint untouched so the same event is retried on the next run.
//!
//! Handlers are idempotent by construction: entity identities derive
//! deterministically from payload fields, and every transition is
//! guarded by an explicit source-state precondition.

use crate::{
    aggregates,
    entities::{Dispute, DisputeStatus, Listing, ListingStatus, Proposal, Purchase, Review, User, Vote},
    error::Result,
    escrow::PurchaseStatus,
    metrics::Metrics,
    storage::{Storage, WriteSet},
    types::{
        Address, DisputeOpened, DisputeResolved, EventEnvelope, EventPayload, ListingCreated,
        ListingUpdated, ProposalCreated, PurchaseCompleted, PurchaseInitiated, ReviewId,
        ReviewSubmitted, VoteCast,
    },
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;

/// What happened to an applied envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Entity state changed; checkpoint advanced
    Applied,
    /// Ordering key at or below the checkpoint; nothing changed
    SkippedDuplicate,
    /// Unrecognized event kind; consumed without state changes
    SkippedUnknownKind,
    /// Referenced entity does not exist; consumed without state changes
    SkippedMissingEntity,
    /// Entity not in the required source state; consumed without state changes
    SkippedInvalidTransition,
}

impl ApplyOutcome {
    /// Stable name, used as a metrics label
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyOutcome::Applied => "applied",
            ApplyOutcome::SkippedDuplicate => "duplicate",
            ApplyOutcome::SkippedUnknownKind => "unknown_kind",
            ApplyOutcome::SkippedMissingEntity => "missing_entity",
            ApplyOutcome::SkippedInvalidTransition => "invalid_transition",
        }
    }

    /// Whether entity state changed
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied)
    }
}

/// Applies envelopes to the entity store, one at a time
pub struct Dispatcher {
    storage: Arc<Storage>,
    metrics: Metrics,
}

impl Dispatcher {
    /// Create a dispatcher over the given store
    pub fn new(storage: Arc<Storage>, metrics: Metrics) -> Self {
        Self { storage, metrics }
    }

    /// Apply one envelope
    ///
    /// The precondition check, handler execution and atomic commit happen
    /// strictly sequentially; callers must not interleave apply calls for
    /// the same source (see [`crate::actor`]).
    pub fn apply(&self, envelope: &EventEnvelope) -> Result<ApplyOutcome> {
        let started = Instant::now();

        // The checkpoint is read fresh per event and threaded through the
        // commit explicitly; there is no ambient "current position" state.
        if let Some(checkpoint) = self.storage.checkpoint()? {
            if envelope.ordering_key <= checkpoint {
                tracing::debug!(
                    key = %envelope.ordering_key,
                    checkpoint = %checkpoint,
                    kind = %envelope.kind(),
                    "Replay of committed event, skipping"
                );
                self.metrics.record_skipped(ApplyOutcome::SkippedDuplicate.as_str());
                return Ok(ApplyOutcome::SkippedDuplicate);
            }
        }

        let mut write_set = WriteSet::default();
        let outcome = self.dispatch(envelope, &mut write_set)?;

        // A skip consumes the event but must not leave half-staged
        // mutations behind.
        let write_set = if outcome.is_applied() {
            write_set
        } else {
            WriteSet::default()
        };
        self.storage.commit(write_set, envelope.ordering_key)?;

        if outcome.is_applied() {
            self.metrics.record_applied();
        } else {
            self.metrics.record_skipped(outcome.as_str());
        }
        self.metrics
            .update_checkpoint_block(envelope.ordering_key.block as i64);
        self.metrics
            .record_apply_duration(started.elapsed().as_secs_f64());

        Ok(outcome)
    }

    /// Handler registry: route the payload to its handler
    fn dispatch(&self, envelope: &EventEnvelope, ws: &mut WriteSet) -> Result<ApplyOutcome> {
        let at = envelope.timestamp;
        match &envelope.payload {
            EventPayload::ListingCreated(p) => self.on_listing_created(ws, at, p),
            EventPayload::ListingUpdated(p) => self.on_listing_updated(ws, at, p),
            EventPayload::PurchaseInitiated(p) => self.on_purchase_initiated(ws, at, p),
            EventPayload::PurchaseCompleted(p) => self.on_purchase_completed(ws, at, p),
            EventPayload::DisputeOpened(p) => self.on_dispute_opened(ws, at, p),
            EventPayload::DisputeResolved(p) => self.on_dispute_resolved(ws, at, p),
            EventPayload::ReviewSubmitted(p) => self.on_review_submitted(ws, envelope, p),
            EventPayload::ProposalCreated(p) => self.on_proposal_created(ws, at, p),
            EventPayload::VoteCast(p) => self.on_vote_cast(ws, at, p),
            EventPayload::Unknown { kind } => {
                tracing::warn!(
                    key = %envelope.ordering_key,
                    kind = %kind,
                    "Unknown event kind, ignoring"
                );
                Ok(ApplyOutcome::SkippedUnknownKind)
            }
        }
    }

    /// Load a user, or start a fresh record first seen at `at`
    fn user_or_new(&self, address: &Address, at: DateTime<Utc>) -> Result<User> {
        Ok(self
            .storage
            .user(address)?
            .unwrap_or_else(|| User::new(address.clone(), at)))
    }

    /// Stage a user record if the address has never been seen
    fn touch_user(&self, ws: &mut WriteSet, address: &Address, at: DateTime<Utc>) -> Result<()> {
        if self.storage.user(address)?.is_none() {
            ws.put_user(User::new(address.clone(), at));
        }
        Ok(())
    }

    fn on_listing_created(
        &self,
        ws: &mut WriteSet,
        at: DateTime<Utc>,
        p: &ListingCreated,
    ) -> Result<ApplyOutcome> {
        if self.storage.listing(p.listing_id)?.is_some() {
            tracing::debug!(listing = %p.listing_id, "Listing already exists, skipping");
            return Ok(ApplyOutcome::SkippedInvalidTransition);
        }
        if p.price <= Decimal::ZERO {
            tracing::warn!(listing = %p.listing_id, price = %p.price, "Non-positive price, ignoring");
            return Ok(ApplyOutcome::SkippedInvalidTransition);
        }

        self.touch_user(ws, &p.seller, at)?;
        ws.put_listing(Listing {
            id: p.listing_id,
            seller: p.seller.clone(),
            token: p.token.clone(),
            price: p.price,
            quantity: p.quantity,
            currency: p.currency.clone(),
            ipfs_cid: p.ipfs_cid.clone(),
            status: ListingStatus::Active,
            created_at: at,
            updated_at: at,
            buyer: None,
            active_escrow: None,
        });

        Ok(ApplyOutcome::Applied)
    }

    fn on_listing_updated(
        &self,
        ws: &mut WriteSet,
        at: DateTime<Utc>,
        p: &ListingUpdated,
    ) -> Result<ApplyOutcome> {
        let Some(mut listing) = self.storage.listing(p.listing_id)? else {
            tracing::warn!(listing = %p.listing_id, "Update for unknown listing, ignoring");
            return Ok(ApplyOutcome::SkippedMissingEntity);
        };
        if p.price <= Decimal::ZERO {
            tracing::warn!(listing = %p.listing_id, price = %p.price, "Non-positive price, ignoring");
            return Ok(ApplyOutcome::SkippedInvalidTransition);
        }

        // Price and quantity only; seller, cid and status never change here
        listing.price = p.price;
        listing.quantity = p.quantity;
        listing.updated_at = at;
        ws.put_listing(listing);

        Ok(ApplyOutcome::Applied)
    }

    fn on_purchase_initiated(
        &self,
        ws: &mut WriteSet,
        at: DateTime<Utc>,
        p: &PurchaseInitiated,
    ) -> Result<ApplyOutcome> {
        let Some(mut listing) = self.storage.listing(p.listing_id)? else {
            tracing::warn!(listing = %p.listing_id, escrow = %p.escrow_id, "Purchase for unknown listing, ignoring");
            return Ok(ApplyOutcome::SkippedMissingEntity);
        };
        if self.storage.purchase(p.escrow_id)?.is_some() {
            tracing::debug!(escrow = %p.escrow_id, "Purchase already exists, skipping");
            return Ok(ApplyOutcome::SkippedInvalidTransition);
        }

        // At most one non-terminal purchase per listing. The ledger is
        // expected to enforce this; the projection must not corrupt state
        // if it does not.
        if let Some(active) = listing.active_escrow {
            if let Some(existing) = self.storage.purchase(active)? {
                if !existing.status.is_terminal() {
                    tracing::warn!(
                        listing = %p.listing_id,
                        escrow = %p.escrow_id,
                        active = %active,
                        "Listing already has an unresolved purchase, ignoring"
                    );
                    return Ok(ApplyOutcome::SkippedInvalidTransition);
                }
            }
        }
        if matches!(listing.status, ListingStatus::Sold | ListingStatus::Archived) {
            tracing::warn!(listing = %p.listing_id, status = ?listing.status, "Purchase for closed listing, ignoring");
            return Ok(ApplyOutcome::SkippedInvalidTransition);
        }

        let mut buyer = self.user_or_new(&p.buyer, at)?;
        buyer.mark_first_deal(at);

        let purchase = Purchase {
            id: p.escrow_id,
            listing: p.listing_id,
            buyer: p.buyer.clone(),
            seller: listing.seller.clone(),
            amount: p.amount,
            token: p.token.clone(),
            status: PurchaseStatus::Funded,
            created_at: at,
            completed_at: None,
        };

        listing.status = ListingStatus::InEscrow;
        listing.buyer = Some(p.buyer.clone());
        listing.active_escrow = Some(p.escrow_id);
        listing.updated_at = at;

        ws.put_user(buyer);
        ws.put_listing(listing);
        ws.put_purchase(purchase, None);

        Ok(ApplyOutcome::Applied)
    }

    fn on_purchase_completed(
        &self,
        ws: &mut WriteSet,
        at: DateTime<Utc>,
        p: &PurchaseCompleted,
    ) -> Result<ApplyOutcome> {
        let Some(mut purchase) = self.storage.purchase(p.escrow_id)? else {
            tracing::warn!(escrow = %p.escrow_id, "Completion for unknown purchase, ignoring");
            return Ok(ApplyOutcome::SkippedMissingEntity);
        };
        if !purchase.status.can_transition(PurchaseStatus::Completed) {
            tracing::debug!(escrow = %p.escrow_id, status = ?purchase.status, "Purchase not Funded, skipping");
            return Ok(ApplyOutcome::SkippedInvalidTransition);
        }
        let Some(mut listing) = self.storage.listing(purchase.listing)? else {
            tracing::warn!(escrow = %p.escrow_id, listing = %purchase.listing, "Purchase references unknown listing, ignoring");
            return Ok(ApplyOutcome::SkippedMissingEntity);
        };

        let prior = purchase.status;
        purchase.status = PurchaseStatus::Completed;
        purchase.completed_at = Some(at);

        listing.status = ListingStatus::Sold;
        listing.updated_at = at;

        if purchase.seller == purchase.buyer {
            let mut party = self.user_or_new(&purchase.seller, at)?;
            aggregates::record_sale(&mut party, purchase.amount, at);
            aggregates::record_purchase(&mut party);
            ws.put_user(party);
        } else {
            let mut seller = self.user_or_new(&purchase.seller, at)?;
            aggregates::record_sale(&mut seller, purchase.amount, at);
            let mut buyer = self.user_or_new(&purchase.buyer, at)?;
            aggregates::record_purchase(&mut buyer);
            ws.put_user(seller);
            ws.put_user(buyer);
        }

        ws.put_purchase(purchase, Some(prior));
        ws.put_listing(listing);

        Ok(ApplyOutcome::Applied)
    }

    fn on_dispute_opened(
        &self,
        ws: &mut WriteSet,
        at: DateTime<Utc>,
        p: &DisputeOpened,
    ) -> Result<ApplyOutcome> {
        let Some(mut purchase) = self.storage.purchase(p.escrow_id)? else {
            tracing::warn!(dispute = %p.dispute_id, escrow = %p.escrow_id, "Dispute for unknown purchase, ignoring");
            return Ok(ApplyOutcome::SkippedMissingEntity);
        };
        if self.storage.dispute(p.dispute_id)?.is_some() {
            tracing::debug!(dispute = %p.dispute_id, "Dispute already exists, skipping");
            return Ok(ApplyOutcome::SkippedInvalidTransition);
        }
        if !purchase.status.can_transition(PurchaseStatus::Disputed) {
            tracing::debug!(escrow = %p.escrow_id, status = ?purchase.status, "Purchase not Funded, skipping");
            return Ok(ApplyOutcome::SkippedInvalidTransition);
        }

        let prior = purchase.status;
        purchase.status = PurchaseStatus::Disputed;

        self.touch_user(ws, &p.initiator, at)?;
        ws.put_dispute(Dispute {
            id: p.dispute_id,
            purchase: p.escrow_id,
            initiator: p.initiator.clone(),
            reason_cid: p.reason_cid.clone(),
            status: DisputeStatus::Recruiting,
            created_at: at,
        });
        ws.put_purchase(purchase, Some(prior));

        Ok(ApplyOutcome::Applied)
    }

    fn on_dispute_resolved(
        &self,
        ws: &mut WriteSet,
        at: DateTime<Utc>,
        p: &DisputeResolved,
    ) -> Result<ApplyOutcome> {
        let Some(mut dispute) = self.storage.dispute(p.dispute_id)? else {
            tracing::warn!(dispute = %p.dispute_id, "Resolution for unknown dispute, ignoring");
            return Ok(ApplyOutcome::SkippedMissingEntity);
        };
        if dispute.status != DisputeStatus::Recruiting {
            tracing::debug!(dispute = %p.dispute_id, "Dispute already resolved, skipping");
            return Ok(ApplyOutcome::SkippedInvalidTransition);
        }
        let Some(mut purchase) = self.storage.purchase(dispute.purchase)? else {
            tracing::warn!(dispute = %p.dispute_id, escrow = %dispute.purchase, "Dispute references unknown purchase, ignoring");
            return Ok(ApplyOutcome::SkippedMissingEntity);
        };
        if !purchase.status.can_transition(PurchaseStatus::Resolved) {
            tracing::debug!(escrow = %purchase.id, status = ?purchase.status, "Purchase not Disputed, skipping");
            return Ok(ApplyOutcome::SkippedInvalidTransition);
        }

        let prior = purchase.status;
        purchase.status = PurchaseStatus::Resolved;
        dispute.status = DisputeStatus::Resolved;

        // The payload carries no outcome, so the listing status is left
        // unchanged; only the active-escrow binding is released.
        if let Some(mut listing) = self.storage.listing(purchase.listing)? {
            if listing.active_escrow == Some(purchase.id) {
                listing.active_escrow = None;
                listing.updated_at = at;
                ws.put_listing(listing);
            }
        }

        ws.put_purchase(purchase, Some(prior));
        ws.put_dispute(dispute);

        Ok(ApplyOutcome::Applied)
    }

    fn on_review_submitted(
        &self,
        ws: &mut WriteSet,
        envelope: &EventEnvelope,
        p: &ReviewSubmitted,
    ) -> Result<ApplyOutcome> {
        let at = envelope.timestamp;

        if p.rating > 100 {
            tracing::warn!(escrow = %p.escrow_id, rating = p.rating, "Rating out of range, ignoring");
            return Ok(ApplyOutcome::SkippedInvalidTransition);
        }
        if self.storage.purchase(p.escrow_id)?.is_none() {
            tracing::warn!(escrow = %p.escrow_id, "Review for unknown purchase, ignoring");
            return Ok(ApplyOutcome::SkippedMissingEntity);
        }

        let id = ReviewId::derive(&envelope.tx_hash, envelope.ordering_key.log_index);
        if self.storage.review(&id)?.is_some() {
            tracing::debug!(review = %id, "Review already exists, skipping");
            return Ok(ApplyOutcome::SkippedInvalidTransition);
        }

        let mut subject = self.user_or_new(&p.subject, at)?;
        aggregates::record_review(&mut subject, p.rating);

        if p.reviewer != p.subject {
            self.touch_user(ws, &p.reviewer, at)?;
        }
        ws.put_user(subject);
        ws.put_review(Review {
            id,
            purchase: p.escrow_id,
            reviewer: p.reviewer.clone(),
            subject: p.subject.clone(),
            rating: p.rating,
            comment_cid: p.comment_cid.clone(),
            created_at: at,
        });

        Ok(ApplyOutcome::Applied)
    }

    fn on_proposal_created(
        &self,
        ws: &mut WriteSet,
        at: DateTime<Utc>,
        p: &ProposalCreated,
    ) -> Result<ApplyOutcome> {
        if self.storage.proposal(p.proposal_id)?.is_some() {
            tracing::debug!(proposal = %p.proposal_id, "Proposal already exists, skipping");
            return Ok(ApplyOutcome::SkippedInvalidTransition);
        }

        self.touch_user(ws, &p.proposer, at)?;
        ws.put_proposal(Proposal {
            id: p.proposal_id,
            proposer: p.proposer.clone(),
            description_cid: p.description_cid.clone(),
            votes_for: Decimal::ZERO,
            votes_against: Decimal::ZERO,
            created_at: at,
        });

        Ok(ApplyOutcome::Applied)
    }

    fn on_vote_cast(
        &self,
        ws: &mut WriteSet,
        at: DateTime<Utc>,
        p: &VoteCast,
    ) -> Result<ApplyOutcome> {
        if p.weight < Decimal::ZERO {
            tracing::warn!(proposal = %p.proposal_id, weight = %p.weight, "Negative vote weight, ignoring");
            return Ok(ApplyOutcome::SkippedInvalidTransition);
        }
        let Some(mut proposal) = self.storage.proposal(p.proposal_id)? else {
            tracing::warn!(proposal = %p.proposal_id, "Vote for unknown proposal, ignoring");
            return Ok(ApplyOutcome::SkippedMissingEntity);
        };

        let prior = self.storage.vote(p.proposal_id, &p.voter)?;
        aggregates::apply_vote(&mut proposal, prior.as_ref(), p.support, p.weight);

        self.touch_user(ws, &p.voter, at)?;
        ws.put_proposal(proposal);
        ws.put_vote(Vote {
            proposal: p.proposal_id,
            voter: p.voter.clone(),
            support: p.support,
            weight: p.weight,
            cast_at: at,
        });

        Ok(ApplyOutcome::Applied)
    }
}
