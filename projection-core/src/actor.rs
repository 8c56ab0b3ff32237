//! Actor-based concurrency for the projection
//!
//! Single-writer pattern on Tokio actors: one logical writer task applies
//! events strictly sequentially, so event N+1 never starts before event
//! N's entity mutations and checkpoint advance have committed as one
//! unit. This is the core correctness invariant — the aggregate
//! calculators are not commutative. Queries go through the same mailbox
//! and therefore observe only fully-committed state.
//!
//! Independent event sources may each run their own actor against a
//! shared [`Storage`]; the store's commit lock keeps per-entity
//! read-modify-write atomic across them.

use crate::dispatcher::{ApplyOutcome, Dispatcher};
use crate::entities::{Dispute, Listing, Proposal, Purchase, Review, User, Vote};
use crate::escrow::PurchaseStatus;
use crate::metrics::Metrics;
use crate::storage::Storage;
use crate::types::{
    Address, DisputeId, EscrowId, EventEnvelope, ListingId, OrderingKey, ProposalId, ReviewId,
};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Message sent to the projection actor
pub enum ProjectionMessage {
    /// Apply one event envelope
    Apply {
        /// The envelope to apply
        envelope: EventEnvelope,
        /// Outcome channel
        response: oneshot::Sender<Result<ApplyOutcome>>,
    },

    /// Get user by address
    GetUser {
        /// User address
        address: Address,
        /// Response channel
        response: oneshot::Sender<Result<Option<User>>>,
    },

    /// Get listing by id
    GetListing {
        /// Listing id
        id: ListingId,
        /// Response channel
        response: oneshot::Sender<Result<Option<Listing>>>,
    },

    /// Get purchase by escrow id
    GetPurchase {
        /// Escrow id
        id: EscrowId,
        /// Response channel
        response: oneshot::Sender<Result<Option<Purchase>>>,
    },

    /// Get dispute by id
    GetDispute {
        /// Dispute id
        id: DisputeId,
        /// Response channel
        response: oneshot::Sender<Result<Option<Dispute>>>,
    },

    /// Get review by synthetic id
    GetReview {
        /// Review id
        id: ReviewId,
        /// Response channel
        response: oneshot::Sender<Result<Option<Review>>>,
    },

    /// Get proposal by id
    GetProposal {
        /// Proposal id
        id: ProposalId,
        /// Response channel
        response: oneshot::Sender<Result<Option<Proposal>>>,
    },

    /// Get a voter's current vote
    GetVote {
        /// Proposal id
        proposal: ProposalId,
        /// Voter address
        voter: Address,
        /// Response channel
        response: oneshot::Sender<Result<Option<Vote>>>,
    },

    /// List listings by seller
    ListingsBySeller {
        /// Seller address
        seller: Address,
        /// Response channel
        response: oneshot::Sender<Result<Vec<Listing>>>,
    },

    /// List purchases by state
    PurchasesByStatus {
        /// Purchase state
        status: PurchaseStatus,
        /// Response channel
        response: oneshot::Sender<Result<Vec<Purchase>>>,
    },

    /// Get the last committed ordering key
    Checkpoint {
        /// Response channel
        response: oneshot::Sender<Result<Option<OrderingKey>>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that processes projection messages
pub struct ProjectionActor {
    /// Event dispatcher over the shared store
    dispatcher: Dispatcher,

    /// Direct storage access for reads
    storage: Arc<Storage>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<ProjectionMessage>,
}

impl ProjectionActor {
    /// Create new actor
    pub fn new(
        storage: Arc<Storage>,
        metrics: Metrics,
        mailbox: mpsc::Receiver<ProjectionMessage>,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(storage.clone(), metrics),
            storage,
            mailbox,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                ProjectionMessage::Shutdown => break,
                other => self.handle_message(other),
            }
        }
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: ProjectionMessage) {
        match msg {
            ProjectionMessage::Apply { envelope, response } => {
                let result = self.dispatcher.apply(&envelope);
                if let Err(err) = &result {
                    tracing::error!(key = %envelope.ordering_key, "Failed to apply event: {}", err);
                }
                let _ = response.send(result);
            }

            ProjectionMessage::GetUser { address, response } => {
                let _ = response.send(self.storage.user(&address));
            }

            ProjectionMessage::GetListing { id, response } => {
                let _ = response.send(self.storage.listing(id));
            }

            ProjectionMessage::GetPurchase { id, response } => {
                let _ = response.send(self.storage.purchase(id));
            }

            ProjectionMessage::GetDispute { id, response } => {
                let _ = response.send(self.storage.dispute(id));
            }

            ProjectionMessage::GetReview { id, response } => {
                let _ = response.send(self.storage.review(&id));
            }

            ProjectionMessage::GetProposal { id, response } => {
                let _ = response.send(self.storage.proposal(id));
            }

            ProjectionMessage::GetVote {
                proposal,
                voter,
                response,
            } => {
                let _ = response.send(self.storage.vote(proposal, &voter));
            }

            ProjectionMessage::ListingsBySeller { seller, response } => {
                let _ = response.send(self.storage.listings_by_seller(&seller));
            }

            ProjectionMessage::PurchasesByStatus { status, response } => {
                let _ = response.send(self.storage.purchases_by_status(status));
            }

            ProjectionMessage::Checkpoint { response } => {
                let _ = response.send(self.storage.checkpoint());
            }

            ProjectionMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }
}

/// Handle for sending messages to the actor
#[derive(Clone)]
pub struct ProjectionHandle {
    sender: mpsc::Sender<ProjectionMessage>,
}

impl ProjectionHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<ProjectionMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> ProjectionMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(make(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Apply one event envelope
    pub async fn apply_event(&self, envelope: EventEnvelope) -> Result<ApplyOutcome> {
        self.request(|response| ProjectionMessage::Apply { envelope, response })
            .await
    }

    /// Get user by address
    pub async fn user(&self, address: Address) -> Result<Option<User>> {
        self.request(|response| ProjectionMessage::GetUser { address, response })
            .await
    }

    /// Get listing by id
    pub async fn listing(&self, id: ListingId) -> Result<Option<Listing>> {
        self.request(|response| ProjectionMessage::GetListing { id, response })
            .await
    }

    /// Get purchase by escrow id
    pub async fn purchase(&self, id: EscrowId) -> Result<Option<Purchase>> {
        self.request(|response| ProjectionMessage::GetPurchase { id, response })
            .await
    }

    /// Get dispute by id
    pub async fn dispute(&self, id: DisputeId) -> Result<Option<Dispute>> {
        self.request(|response| ProjectionMessage::GetDispute { id, response })
            .await
    }

    /// Get review by synthetic id
    pub async fn review(&self, id: ReviewId) -> Result<Option<Review>> {
        self.request(|response| ProjectionMessage::GetReview { id, response })
            .await
    }

    /// Get proposal by id
    pub async fn proposal(&self, id: ProposalId) -> Result<Option<Proposal>> {
        self.request(|response| ProjectionMessage::GetProposal { id, response })
            .await
    }

    /// Get a voter's current vote
    pub async fn vote(&self, proposal: ProposalId, voter: Address) -> Result<Option<Vote>> {
        self.request(|response| ProjectionMessage::GetVote {
            proposal,
            voter,
            response,
        })
        .await
    }

    /// List listings by seller
    pub async fn listings_by_seller(&self, seller: Address) -> Result<Vec<Listing>> {
        self.request(|response| ProjectionMessage::ListingsBySeller { seller, response })
            .await
    }

    /// List purchases by state
    pub async fn purchases_by_status(&self, status: PurchaseStatus) -> Result<Vec<Purchase>> {
        self.request(|response| ProjectionMessage::PurchasesByStatus { status, response })
            .await
    }

    /// Get the last committed ordering key
    pub async fn checkpoint(&self) -> Result<Option<OrderingKey>> {
        self.request(|response| ProjectionMessage::Checkpoint { response })
            .await
    }

    /// Shutdown actor and wait until it has released its storage handle
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(ProjectionMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        // The mailbox closes when the actor task drops, which also drops
        // its storage reference; waiting here makes reopen safe.
        self.sender.closed().await;
        Ok(())
    }
}

/// Spawn the projection actor
pub fn spawn_projection_actor(
    storage: Arc<Storage>,
    metrics: Metrics,
    mailbox_capacity: usize,
) -> ProjectionHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity);
    let actor = ProjectionActor::new(storage, metrics, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    ProjectionHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventPayload, ListingCreated, TxHash};
    use crate::Config;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    fn test_storage() -> (Arc<Storage>, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Arc::new(Storage::open(&config).unwrap()), temp_dir)
    }

    fn listing_event(block: u64, listing: u64) -> EventEnvelope {
        EventEnvelope {
            ordering_key: OrderingKey::new(block, 0, 0),
            tx_hash: TxHash::new(format!("0xtx{}", block)),
            timestamp: Utc.timestamp_opt(block as i64, 0).unwrap(),
            payload: EventPayload::ListingCreated(ListingCreated {
                listing_id: ListingId::new(listing),
                seller: Address::new("0xseller"),
                token: Address::new("0xt0ken"),
                price: Decimal::from(500),
                quantity: 2,
                currency: "USDC".into(),
                ipfs_cid: "bafy".into(),
            }),
        }
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let (storage, _temp) = test_storage();
        let handle = spawn_projection_actor(storage, Metrics::new().unwrap(), 100);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_apply_and_query() {
        let (storage, _temp) = test_storage();
        let handle = spawn_projection_actor(storage, Metrics::new().unwrap(), 100);

        let outcome = handle.apply_event(listing_event(1, 7)).await.unwrap();
        assert!(outcome.is_applied());

        let listing = handle.listing(ListingId::new(7)).await.unwrap().unwrap();
        assert_eq!(listing.quantity, 2);

        let listings = handle
            .listings_by_seller(Address::new("0xSELLER"))
            .await
            .unwrap();
        assert_eq!(listings.len(), 1);

        let checkpoint = handle.checkpoint().await.unwrap();
        assert_eq!(checkpoint, Some(OrderingKey::new(1, 0, 0)));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_sequential_apply() {
        let (storage, _temp) = test_storage();
        let handle = spawn_projection_actor(storage.clone(), Metrics::new().unwrap(), 100);

        for block in 1..=10u64 {
            handle.apply_event(listing_event(block, block)).await.unwrap();
        }

        assert_eq!(
            storage.checkpoint().unwrap(),
            Some(OrderingKey::new(10, 0, 0))
        );
        for listing in 1..=10u64 {
            assert!(storage.listing(ListingId::new(listing)).unwrap().is_some());
        }

        handle.shutdown().await.unwrap();
    }
}
