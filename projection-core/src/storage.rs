//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `users` - Materialized users (key: address)
//! - `listings` - Materialized listings (key: listing id, big-endian)
//! - `purchases` - Materialized purchases (key: escrow id, big-endian)
//! - `disputes` - Materialized disputes (key: dispute id, big-endian)
//! - `reviews` - Materialized reviews (key: synthetic review id)
//! - `proposals` - Materialized proposals (key: proposal id, big-endian)
//! - `votes` - Materialized votes (key: proposal id || voter)
//! - `indices` - Secondary indices for fast lookups
//! - `checkpoint` - Single-row checkpoint record
//!
//! Every event commits through [`Storage::commit`]: all staged entity
//! puts, index maintenance and the checkpoint advance go into one
//! `WriteBatch`, so readers always observe a consistent snapshot and a
//! failed event leaves neither partial mutations nor a moved checkpoint.

use crate::{
    entities::{Dispute, Listing, Proposal, Purchase, Review, User, Vote},
    error::{Error, Result},
    escrow::PurchaseStatus,
    types::{Address, DisputeId, EscrowId, ListingId, OrderingKey, ProposalId, ReviewId},
    Config,
};
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Column family names
const CF_USERS: &str = "users";
const CF_LISTINGS: &str = "listings";
const CF_PURCHASES: &str = "purchases";
const CF_DISPUTES: &str = "disputes";
const CF_REVIEWS: &str = "reviews";
const CF_PROPOSALS: &str = "proposals";
const CF_VOTES: &str = "votes";
const CF_INDICES: &str = "indices";
const CF_CHECKPOINT: &str = "checkpoint";

/// Index key kind tags, first byte of every key in `indices`
const IDX_SELLER_LISTING: u8 = b's';
const IDX_STATUS_PURCHASE: u8 = b'p';

/// Separator inside composite index keys
const SEP: u8 = b'|';

/// The single checkpoint row key
const CHECKPOINT_KEY: &[u8] = b"last_applied";

/// Mutations staged by one event handler
///
/// Handlers load entity copies, mutate them, and stage the copies here;
/// nothing touches the database until [`Storage::commit`]. Save is
/// last-writer-wins at whole-entity granularity.
#[derive(Debug, Default)]
pub struct WriteSet {
    users: Vec<User>,
    listings: Vec<Listing>,
    purchases: Vec<(Purchase, Option<PurchaseStatus>)>,
    disputes: Vec<Dispute>,
    reviews: Vec<Review>,
    proposals: Vec<Proposal>,
    votes: Vec<Vote>,
}

impl WriteSet {
    /// Stage a user
    pub fn put_user(&mut self, user: User) {
        self.users.push(user);
    }

    /// Stage a listing (the seller index entry is maintained on commit)
    pub fn put_listing(&mut self, listing: Listing) {
        self.listings.push(listing);
    }

    /// Stage a purchase; `prior_status` drives status-index maintenance
    /// (pass `None` for a newly created purchase)
    pub fn put_purchase(&mut self, purchase: Purchase, prior_status: Option<PurchaseStatus>) {
        self.purchases.push((purchase, prior_status));
    }

    /// Stage a dispute
    pub fn put_dispute(&mut self, dispute: Dispute) {
        self.disputes.push(dispute);
    }

    /// Stage a review
    pub fn put_review(&mut self, review: Review) {
        self.reviews.push(review);
    }

    /// Stage a proposal
    pub fn put_proposal(&mut self, proposal: Proposal) {
        self.proposals.push(proposal);
    }

    /// Stage a vote
    pub fn put_vote(&mut self, vote: Vote) {
        self.votes.push(vote);
    }

    /// Whether anything is staged
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
            && self.listings.is_empty()
            && self.purchases.is_empty()
            && self.disputes.is_empty()
            && self.reviews.is_empty()
            && self.proposals.is_empty()
            && self.votes.is_empty()
    }
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,

    /// Serializes commits so per-entity read-modify-write stays atomic
    /// across writers sharing this store
    commit_lock: Mutex<()>,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for the write-heavy apply path
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_USERS, Self::cf_options_entities()),
            ColumnFamilyDescriptor::new(CF_LISTINGS, Self::cf_options_entities()),
            ColumnFamilyDescriptor::new(CF_PURCHASES, Self::cf_options_entities()),
            ColumnFamilyDescriptor::new(CF_DISPUTES, Self::cf_options_entities()),
            ColumnFamilyDescriptor::new(CF_REVIEWS, Self::cf_options_entities()),
            ColumnFamilyDescriptor::new(CF_PROPOSALS, Self::cf_options_entities()),
            ColumnFamilyDescriptor::new(CF_VOTES, Self::cf_options_entities()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_CHECKPOINT, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!("Opened RocksDB at {:?}", path);

        Ok(Self {
            db: Arc::new(db),
            commit_lock: Mutex::new(()),
        })
    }

    // Column family options

    fn cf_options_entities() -> Options {
        let mut opts = Options::default();
        // Entities are frequently read back during apply, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        // Indices benefit from bloom filters
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    // Helper: get column family handle

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn get_cf_value<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf_handle(cf_name)?;
        match self.db.get_cf(cf, key)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    // Entity reads

    /// Get user by address
    pub fn user(&self, address: &Address) -> Result<Option<User>> {
        self.get_cf_value(CF_USERS, address.as_str().as_bytes())
    }

    /// Get listing by id
    pub fn listing(&self, id: ListingId) -> Result<Option<Listing>> {
        self.get_cf_value(CF_LISTINGS, &id.key_bytes())
    }

    /// Get purchase by escrow id
    pub fn purchase(&self, id: EscrowId) -> Result<Option<Purchase>> {
        self.get_cf_value(CF_PURCHASES, &id.key_bytes())
    }

    /// Get dispute by id
    pub fn dispute(&self, id: DisputeId) -> Result<Option<Dispute>> {
        self.get_cf_value(CF_DISPUTES, &id.key_bytes())
    }

    /// Get review by synthetic id
    pub fn review(&self, id: &ReviewId) -> Result<Option<Review>> {
        self.get_cf_value(CF_REVIEWS, id.as_str().as_bytes())
    }

    /// Get proposal by id
    pub fn proposal(&self, id: ProposalId) -> Result<Option<Proposal>> {
        self.get_cf_value(CF_PROPOSALS, &id.key_bytes())
    }

    /// Get a voter's current vote on a proposal
    pub fn vote(&self, proposal: ProposalId, voter: &Address) -> Result<Option<Vote>> {
        self.get_cf_value(CF_VOTES, &vote_key(proposal, voter))
    }

    // Checkpoint

    /// Ordering key of the last committed event, if any
    pub fn checkpoint(&self) -> Result<Option<OrderingKey>> {
        self.get_cf_value(CF_CHECKPOINT, CHECKPOINT_KEY)
    }

    // Atomic per-event commit

    /// Apply one event's staged mutations and checkpoint advance as a
    /// single atomic write
    pub fn commit(&self, write_set: WriteSet, ordering_key: OrderingKey) -> Result<()> {
        let _guard = self.commit_lock.lock();

        let mut batch = WriteBatch::default();

        let cf_users = self.cf_handle(CF_USERS)?;
        for user in &write_set.users {
            batch.put_cf(
                cf_users,
                user.address.as_str().as_bytes(),
                bincode::serialize(user)?,
            );
        }

        let cf_listings = self.cf_handle(CF_LISTINGS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;
        for listing in &write_set.listings {
            batch.put_cf(
                cf_listings,
                listing.id.key_bytes(),
                bincode::serialize(listing)?,
            );
            // Seller never changes, so re-putting the index entry is idempotent
            batch.put_cf(
                cf_indices,
                index_key_seller_listing(&listing.seller, listing.id),
                b"",
            );
        }

        let cf_purchases = self.cf_handle(CF_PURCHASES)?;
        for (purchase, prior_status) in &write_set.purchases {
            batch.put_cf(
                cf_purchases,
                purchase.id.key_bytes(),
                bincode::serialize(purchase)?,
            );
            if let Some(prior) = prior_status {
                if *prior != purchase.status {
                    batch.delete_cf(cf_indices, index_key_status_purchase(*prior, purchase.id));
                }
            }
            batch.put_cf(
                cf_indices,
                index_key_status_purchase(purchase.status, purchase.id),
                b"",
            );
        }

        let cf_disputes = self.cf_handle(CF_DISPUTES)?;
        for dispute in &write_set.disputes {
            batch.put_cf(
                cf_disputes,
                dispute.id.key_bytes(),
                bincode::serialize(dispute)?,
            );
        }

        let cf_reviews = self.cf_handle(CF_REVIEWS)?;
        for review in &write_set.reviews {
            batch.put_cf(
                cf_reviews,
                review.id.as_str().as_bytes(),
                bincode::serialize(review)?,
            );
        }

        let cf_proposals = self.cf_handle(CF_PROPOSALS)?;
        for proposal in &write_set.proposals {
            batch.put_cf(
                cf_proposals,
                proposal.id.key_bytes(),
                bincode::serialize(proposal)?,
            );
        }

        let cf_votes = self.cf_handle(CF_VOTES)?;
        for vote in &write_set.votes {
            batch.put_cf(
                cf_votes,
                vote_key(vote.proposal, &vote.voter),
                bincode::serialize(vote)?,
            );
        }

        let cf_checkpoint = self.cf_handle(CF_CHECKPOINT)?;
        batch.put_cf(cf_checkpoint, CHECKPOINT_KEY, bincode::serialize(&ordering_key)?);

        self.db.write(batch)?;

        Ok(())
    }

    // Secondary index queries

    /// All listings created by a seller
    pub fn listings_by_seller(&self, seller: &Address) -> Result<Vec<Listing>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let prefix = index_prefix_seller(seller);

        let iter = self
            .db
            .iterator_cf(cf_indices, IteratorMode::From(&prefix, Direction::Forward));

        let mut listings = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            // Listing id is the trailing 8 bytes of the index key
            if key.len() >= prefix.len() + 8 {
                let id_bytes: [u8; 8] = key[key.len() - 8..].try_into().expect("8-byte suffix");
                let id = ListingId::new(u64::from_be_bytes(id_bytes));
                if let Some(listing) = self.listing(id)? {
                    listings.push(listing);
                }
            }
        }

        Ok(listings)
    }

    /// All purchases currently in the given state
    pub fn purchases_by_status(&self, status: PurchaseStatus) -> Result<Vec<Purchase>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let prefix = index_prefix_status(status);

        let iter = self
            .db
            .iterator_cf(cf_indices, IteratorMode::From(&prefix, Direction::Forward));

        let mut purchases = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if key.len() >= prefix.len() + 8 {
                let id_bytes: [u8; 8] = key[key.len() - 8..].try_into().expect("8-byte suffix");
                let id = EscrowId::new(u64::from_be_bytes(id_bytes));
                if let Some(purchase) = self.purchase(id)? {
                    purchases.push(purchase);
                }
            }
        }

        Ok(purchases)
    }

    // Statistics

    /// Get storage statistics (approximate, fast)
    pub fn stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            total_users: self.approximate_count(CF_USERS)?,
            total_listings: self.approximate_count(CF_LISTINGS)?,
            total_purchases: self.approximate_count(CF_PURCHASES)?,
            total_reviews: self.approximate_count(CF_REVIEWS)?,
        })
    }

    fn approximate_count(&self, cf_name: &str) -> Result<u64> {
        let cf = self.cf_handle(cf_name)?;
        let prop = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);
        Ok(prop)
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

// Index key helpers

fn index_key_seller_listing(seller: &Address, listing: ListingId) -> Vec<u8> {
    let mut key = index_prefix_seller(seller);
    key.extend_from_slice(&listing.key_bytes());
    key
}

fn index_prefix_seller(seller: &Address) -> Vec<u8> {
    let mut key = vec![IDX_SELLER_LISTING];
    key.extend_from_slice(seller.as_str().as_bytes());
    key.push(SEP);
    key
}

fn index_key_status_purchase(status: PurchaseStatus, escrow: EscrowId) -> Vec<u8> {
    let mut key = index_prefix_status(status);
    key.extend_from_slice(&escrow.key_bytes());
    key
}

fn index_prefix_status(status: PurchaseStatus) -> Vec<u8> {
    vec![IDX_STATUS_PURCHASE, status.tag()]
}

fn vote_key(proposal: ProposalId, voter: &Address) -> Vec<u8> {
    let mut key = proposal.key_bytes().to_vec();
    key.push(SEP);
    key.extend_from_slice(voter.as_str().as_bytes());
    key
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Approximate user count
    pub total_users: u64,
    /// Approximate listing count
    pub total_listings: u64,
    /// Approximate purchase count
    pub total_purchases: u64,
    /// Approximate review count
    pub total_reviews: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{ListingStatus, User};
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (config, temp_dir)
    }

    fn ts(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn test_listing(id: u64, seller: &str) -> Listing {
        Listing {
            id: ListingId::new(id),
            seller: Address::new(seller),
            token: Address::new("0xt0ken"),
            price: Decimal::from(1_000_000),
            quantity: 1,
            currency: "USDC".into(),
            ipfs_cid: "bafy-listing".into(),
            status: ListingStatus::Active,
            created_at: ts(100),
            updated_at: ts(100),
            buyer: None,
            active_escrow: None,
        }
    }

    fn test_purchase(id: u64, listing: u64, status: PurchaseStatus) -> Purchase {
        Purchase {
            id: EscrowId::new(id),
            listing: ListingId::new(listing),
            buyer: Address::new("0xbuyer"),
            seller: Address::new("0xseller"),
            amount: Decimal::from(1_000_000),
            token: Address::new("0xt0ken"),
            status,
            created_at: ts(100),
            completed_at: None,
        }
    }

    #[test]
    fn test_storage_open() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        assert!(storage.checkpoint().unwrap().is_none());
    }

    #[test]
    fn test_commit_entities_and_checkpoint_atomically() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let addr = Address::new("0xAbC");
        let mut ws = WriteSet::default();
        ws.put_user(User::new(addr.clone(), ts(100)));
        ws.put_listing(test_listing(1, "0xabc"));

        let key = OrderingKey::new(10, 0, 0);
        storage.commit(ws, key).unwrap();

        let user = storage.user(&addr).unwrap().unwrap();
        assert_eq!(user.address, addr);
        assert_eq!(user.joined_at, ts(100));

        let listing = storage.listing(ListingId::new(1)).unwrap().unwrap();
        assert_eq!(listing.price, Decimal::from(1_000_000));

        assert_eq!(storage.checkpoint().unwrap(), Some(key));
    }

    #[test]
    fn test_empty_write_set_still_advances_checkpoint() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let key = OrderingKey::new(5, 1, 2);
        storage.commit(WriteSet::default(), key).unwrap();
        assert_eq!(storage.checkpoint().unwrap(), Some(key));
    }

    #[test]
    fn test_listings_by_seller() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let mut ws = WriteSet::default();
        ws.put_listing(test_listing(1, "0xaaa"));
        ws.put_listing(test_listing(2, "0xaaa"));
        ws.put_listing(test_listing(3, "0xbbb"));
        storage.commit(ws, OrderingKey::new(1, 0, 0)).unwrap();

        let listings = storage.listings_by_seller(&Address::new("0xAAA")).unwrap();
        assert_eq!(listings.len(), 2);
        assert!(listings.iter().all(|l| l.seller.as_str() == "0xaaa"));

        let other = storage.listings_by_seller(&Address::new("0xbbb")).unwrap();
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn test_status_index_follows_transitions() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let mut ws = WriteSet::default();
        ws.put_purchase(test_purchase(7, 1, PurchaseStatus::Funded), None);
        storage.commit(ws, OrderingKey::new(1, 0, 0)).unwrap();

        let funded = storage.purchases_by_status(PurchaseStatus::Funded).unwrap();
        assert_eq!(funded.len(), 1);

        let mut completed = test_purchase(7, 1, PurchaseStatus::Completed);
        completed.completed_at = Some(ts(200));
        let mut ws = WriteSet::default();
        ws.put_purchase(completed, Some(PurchaseStatus::Funded));
        storage.commit(ws, OrderingKey::new(2, 0, 0)).unwrap();

        assert!(storage
            .purchases_by_status(PurchaseStatus::Funded)
            .unwrap()
            .is_empty());
        let done = storage
            .purchases_by_status(PurchaseStatus::Completed)
            .unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].completed_at, Some(ts(200)));
    }

    #[test]
    fn test_vote_upsert_overwrites() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        let voter = Address::new("0xv0ter");

        let mut ws = WriteSet::default();
        ws.put_vote(Vote {
            proposal: ProposalId::new(1),
            voter: voter.clone(),
            support: true,
            weight: Decimal::from(10),
            cast_at: ts(100),
        });
        storage.commit(ws, OrderingKey::new(1, 0, 0)).unwrap();

        let mut ws = WriteSet::default();
        ws.put_vote(Vote {
            proposal: ProposalId::new(1),
            voter: voter.clone(),
            support: false,
            weight: Decimal::from(15),
            cast_at: ts(200),
        });
        storage.commit(ws, OrderingKey::new(2, 0, 0)).unwrap();

        let vote = storage.vote(ProposalId::new(1), &voter).unwrap().unwrap();
        assert!(!vote.support);
        assert_eq!(vote.weight, Decimal::from(15));
    }

    #[test]
    fn test_checkpoint_survives_reopen() {
        let (config, _temp) = test_config();
        let key = OrderingKey::new(42, 3, 1);

        {
            let storage = Storage::open(&config).unwrap();
            storage.commit(WriteSet::default(), key).unwrap();
        }

        let storage = Storage::open(&config).unwrap();
        assert_eq!(storage.checkpoint().unwrap(), Some(key));
    }
}
