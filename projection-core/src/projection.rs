//! Main projection orchestration layer
//!
//! This module ties together storage, dispatcher and actor components
//! into a high-level API for event ingestion and entity queries.
//!
//! # Example
//!
//! ```no_run
//! use projection_core::{Config, Projection};
//!
//! #[tokio::main]
//! async fn main() -> projection_core::Result<()> {
//!     let config = Config::default();
//!     let projection = Projection::open(config).await?;
//!
//!     // Apply events
//!     // let envelope = ...;
//!     // let outcome = projection.apply_event(envelope).await?;
//!
//!     Ok(())
//! }
//! ```

use crate::{
    actor::{spawn_projection_actor, ProjectionHandle},
    dispatcher::ApplyOutcome,
    entities::{Dispute, Listing, Proposal, Purchase, Review, User, Vote},
    escrow::PurchaseStatus,
    feed::EventSource,
    metrics::Metrics,
    storage::StorageStats,
    types::{
        Address, DisputeId, EscrowId, EventEnvelope, ListingId, OrderingKey, ProposalId, ReviewId,
    },
    Config, Result, Storage,
};
use std::sync::Arc;
use tokio::time::Duration;
use tokio_stream::{Stream, StreamExt};

/// Main projection interface
pub struct Projection {
    /// Actor handle for sequenced writes and queries
    handle: ProjectionHandle,

    /// Direct storage access (for reads outside the write path)
    storage: Arc<Storage>,

    /// Metrics collector
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Projection {
    /// Open projection with configuration
    pub async fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Metrics::default();

        let handle = spawn_projection_actor(
            storage.clone(),
            metrics.clone(),
            config.ingest.mailbox_capacity,
        );

        Ok(Self {
            handle,
            storage,
            metrics,
            config,
        })
    }

    /// Metrics collector (for scrape endpoints)
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Apply a single event envelope
    pub async fn apply_event(&self, envelope: EventEnvelope) -> Result<ApplyOutcome> {
        self.handle.apply_event(envelope).await
    }

    /// Apply every envelope from a push-mode stream, in stream order
    ///
    /// Returns the number of envelopes that changed entity state.
    pub async fn apply_stream(
        &self,
        mut stream: impl Stream<Item = EventEnvelope> + Unpin,
    ) -> Result<u64> {
        let mut applied = 0u64;
        while let Some(envelope) = stream.next().await {
            if self.apply_event(envelope).await?.is_applied() {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Drain a pull-mode source from the current checkpoint
    ///
    /// Fetches batches strictly after the last committed ordering key
    /// until the source reports no more events. Returns the number of
    /// envelopes consumed (applied or skipped).
    pub async fn catch_up(&self, source: &mut impl EventSource) -> Result<u64> {
        let batch_size = self.config.ingest.fetch_batch_size;
        let mut consumed = 0u64;

        loop {
            let after = self.handle.checkpoint().await?;
            let batch = source.fetch_after(after, batch_size).await?;
            if batch.is_empty() {
                return Ok(consumed);
            }
            for envelope in batch {
                self.apply_event(envelope).await?;
                consumed += 1;
            }
        }
    }

    /// Continuously ingest from a pull-mode source
    ///
    /// Drains the source, then polls at the configured interval. Runs
    /// until the surrounding task is cancelled; shutdown simply stops
    /// pulling after the in-flight event commits.
    pub async fn run(&self, source: &mut impl EventSource) -> Result<()> {
        let poll_interval = Duration::from_millis(self.config.ingest.poll_interval_ms);

        loop {
            let consumed = self.catch_up(source).await?;
            if consumed > 0 {
                tracing::debug!(consumed, "Ingested feed batch");
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    // Entity queries

    /// Get user by address
    pub async fn user(&self, address: Address) -> Result<Option<User>> {
        self.handle.user(address).await
    }

    /// Get listing by id
    pub async fn listing(&self, id: ListingId) -> Result<Option<Listing>> {
        self.handle.listing(id).await
    }

    /// Get purchase by escrow id
    pub async fn purchase(&self, id: EscrowId) -> Result<Option<Purchase>> {
        self.handle.purchase(id).await
    }

    /// Get dispute by id
    pub async fn dispute(&self, id: DisputeId) -> Result<Option<Dispute>> {
        self.handle.dispute(id).await
    }

    /// Get review by synthetic id
    pub async fn review(&self, id: ReviewId) -> Result<Option<Review>> {
        self.handle.review(id).await
    }

    /// Get proposal by id
    pub async fn proposal(&self, id: ProposalId) -> Result<Option<Proposal>> {
        self.handle.proposal(id).await
    }

    /// Get a voter's current vote on a proposal
    pub async fn vote(&self, proposal: ProposalId, voter: Address) -> Result<Option<Vote>> {
        self.handle.vote(proposal, voter).await
    }

    /// List listings by seller
    pub async fn listings_by_seller(&self, seller: Address) -> Result<Vec<Listing>> {
        self.handle.listings_by_seller(seller).await
    }

    /// List purchases by state
    pub async fn purchases_by_status(&self, status: PurchaseStatus) -> Result<Vec<Purchase>> {
        self.handle.purchases_by_status(status).await
    }

    /// Ordering key of the last committed event
    pub async fn checkpoint(&self) -> Result<Option<OrderingKey>> {
        self.handle.checkpoint().await
    }

    /// Approximate storage statistics
    pub fn stats(&self) -> Result<StorageStats> {
        self.storage.stats()
    }

    /// Shutdown projection
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::ListingStatus;
    use crate::feed::VecSource;
    use crate::types::{
        EventPayload, ListingCreated, PurchaseCompleted, PurchaseInitiated, TxHash,
    };
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    async fn create_test_projection() -> (Projection, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Projection::open(config).await.unwrap(), temp_dir)
    }

    fn envelope(block: u64, payload: EventPayload) -> EventEnvelope {
        EventEnvelope {
            ordering_key: OrderingKey::new(block, 0, 0),
            tx_hash: TxHash::new(format!("0xtx{}", block)),
            timestamp: Utc.timestamp_opt(block as i64, 0).unwrap(),
            payload,
        }
    }

    fn lifecycle_events() -> Vec<EventEnvelope> {
        vec![
            envelope(
                1,
                EventPayload::ListingCreated(ListingCreated {
                    listing_id: ListingId::new(1),
                    seller: Address::new("0xseller"),
                    token: Address::new("0xt0ken"),
                    price: Decimal::from(1_000_000),
                    quantity: 1,
                    currency: "USDC".into(),
                    ipfs_cid: "bafy".into(),
                }),
            ),
            envelope(
                2,
                EventPayload::PurchaseInitiated(PurchaseInitiated {
                    escrow_id: EscrowId::new(1),
                    listing_id: ListingId::new(1),
                    buyer: Address::new("0xbuyer"),
                    amount: Decimal::from(1_000_000),
                    token: Address::new("0xt0ken"),
                }),
            ),
            envelope(
                3,
                EventPayload::PurchaseCompleted(PurchaseCompleted {
                    escrow_id: EscrowId::new(1),
                }),
            ),
        ]
    }

    #[tokio::test]
    async fn test_projection_open_and_shutdown() {
        let (projection, _temp) = create_test_projection().await;
        projection.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_catch_up_drains_source() {
        let (projection, _temp) = create_test_projection().await;
        let mut source = VecSource::new(lifecycle_events());

        let consumed = projection.catch_up(&mut source).await.unwrap();
        assert_eq!(consumed, 3);

        let listing = projection.listing(ListingId::new(1)).await.unwrap().unwrap();
        assert_eq!(listing.status, ListingStatus::Sold);

        let seller = projection.user(Address::new("0xseller")).await.unwrap().unwrap();
        assert_eq!(seller.total_sales, 1);

        // A second pass finds nothing after the checkpoint
        let consumed = projection.catch_up(&mut source).await.unwrap();
        assert_eq!(consumed, 0);
        assert_eq!(
            projection.checkpoint().await.unwrap(),
            Some(OrderingKey::new(3, 0, 0))
        );

        projection.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_apply_stream_counts_applied() {
        let (projection, _temp) = create_test_projection().await;

        let mut events = lifecycle_events();
        // A replayed copy of the first event is skipped, not re-applied
        events.push(envelope(
            1,
            EventPayload::ListingCreated(ListingCreated {
                listing_id: ListingId::new(1),
                seller: Address::new("0xseller"),
                token: Address::new("0xt0ken"),
                price: Decimal::from(1_000_000),
                quantity: 1,
                currency: "USDC".into(),
                ipfs_cid: "bafy".into(),
            }),
        ));

        let applied = projection
            .apply_stream(tokio_stream::iter(events))
            .await
            .unwrap();
        assert_eq!(applied, 3);

        projection.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_checkpoint_resume_across_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        {
            let projection = Projection::open(config.clone()).await.unwrap();
            let mut source = VecSource::new(lifecycle_events());
            projection.catch_up(&mut source).await.unwrap();
            projection.shutdown().await.unwrap();
        }

        let projection = Projection::open(config).await.unwrap();
        assert_eq!(
            projection.checkpoint().await.unwrap(),
            Some(OrderingKey::new(3, 0, 0))
        );

        // Re-delivering the full history changes nothing
        let mut source = VecSource::new(lifecycle_events());
        let consumed = projection.catch_up(&mut source).await.unwrap();
        assert_eq!(consumed, 0);

        let seller = projection.user(Address::new("0xseller")).await.unwrap().unwrap();
        assert_eq!(seller.total_sales, 1);

        projection.shutdown().await.unwrap();
    }
}
