//! Event feed: the seam to the external ledger layer
//!
//! The ledger delivers envelopes as JSON records (one per line in replay
//! files). Decoding maps unrecognized `kind` strings to
//! [`EventPayload::Unknown`] so that new ledger event kinds degrade to a
//! logged skip instead of a decode failure; malformed records of known
//! kinds are real decode errors.

use crate::error::{Error, Result};
use crate::types::{EventEnvelope, EventPayload, OrderingKey, TxHash};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A source of ordered event envelopes
///
/// On restart the consumer resumes by requesting events strictly after
/// the last committed checkpoint.
#[async_trait]
pub trait EventSource: Send {
    /// Fetch up to `limit` events with ordering key strictly greater
    /// than `after`, in ascending order
    async fn fetch_after(
        &mut self,
        after: Option<OrderingKey>,
        limit: usize,
    ) -> Result<Vec<EventEnvelope>>;
}

/// JSON wire shape of one feed record
#[derive(Debug, Deserialize)]
struct WireEnvelope {
    kind: String,
    block: u64,
    #[serde(rename = "txIndex")]
    tx_index: u32,
    #[serde(rename = "logIndex")]
    log_index: u32,
    #[serde(rename = "txHash")]
    tx_hash: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Decode a single JSON feed record
pub fn decode_envelope(record: &str) -> Result<EventEnvelope> {
    let wire: WireEnvelope = serde_json::from_str(record)
        .map_err(|e| Error::Decode(format!("Malformed feed record: {}", e)))?;

    let payload = match wire.kind.as_str() {
        "ListingCreated" => EventPayload::ListingCreated(serde_json::from_value(wire.payload)?),
        "ListingUpdated" => EventPayload::ListingUpdated(serde_json::from_value(wire.payload)?),
        "PurchaseInitiated" => {
            EventPayload::PurchaseInitiated(serde_json::from_value(wire.payload)?)
        }
        "PurchaseCompleted" => {
            EventPayload::PurchaseCompleted(serde_json::from_value(wire.payload)?)
        }
        "DisputeOpened" => EventPayload::DisputeOpened(serde_json::from_value(wire.payload)?),
        "DisputeResolved" => EventPayload::DisputeResolved(serde_json::from_value(wire.payload)?),
        "ReviewSubmitted" => EventPayload::ReviewSubmitted(serde_json::from_value(wire.payload)?),
        "ProposalCreated" => EventPayload::ProposalCreated(serde_json::from_value(wire.payload)?),
        "VoteCast" => EventPayload::VoteCast(serde_json::from_value(wire.payload)?),
        other => EventPayload::Unknown {
            kind: other.to_string(),
        },
    };

    Ok(EventEnvelope {
        ordering_key: OrderingKey::new(wire.block, wire.tx_index, wire.log_index),
        tx_hash: TxHash::new(wire.tx_hash),
        timestamp: wire.timestamp,
        payload,
    })
}

/// Decode a newline-delimited batch of feed records, skipping blank lines
pub fn decode_batch(records: &str) -> Result<Vec<EventEnvelope>> {
    records
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(decode_envelope)
        .collect()
}

/// In-memory event source for tests and replay files
///
/// Holds a pre-sorted batch of envelopes and serves the fetch-after
/// contract over it.
#[derive(Debug, Default)]
pub struct VecSource {
    events: Vec<EventEnvelope>,
}

impl VecSource {
    /// Create from envelopes; they are sorted by ordering key
    pub fn new(mut events: Vec<EventEnvelope>) -> Self {
        events.sort_by_key(|e| e.ordering_key);
        Self { events }
    }

    /// Number of held envelopes
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the source is empty
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[async_trait]
impl EventSource for VecSource {
    async fn fetch_after(
        &mut self,
        after: Option<OrderingKey>,
        limit: usize,
    ) -> Result<Vec<EventEnvelope>> {
        let start = match after {
            Some(after) => self
                .events
                .partition_point(|e| e.ordering_key <= after),
            None => 0,
        };
        Ok(self
            .events
            .iter()
            .skip(start)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventKind, ListingId};
    use rust_decimal::Decimal;

    const LISTING_RECORD: &str = r#"{
        "kind": "ListingCreated",
        "block": 100, "txIndex": 2, "logIndex": 0,
        "txHash": "0xABCD",
        "timestamp": "2024-05-01T12:00:00Z",
        "payload": {
            "listingId": 1, "seller": "0xSeller", "token": "0xT0ken",
            "price": "1000000", "quantity": 3,
            "currency": "USDC", "ipfsCid": "bafy-listing"
        }
    }"#;

    #[test]
    fn test_decode_known_kind() {
        let envelope = decode_envelope(LISTING_RECORD).unwrap();
        assert_eq!(envelope.ordering_key, OrderingKey::new(100, 2, 0));
        assert_eq!(envelope.tx_hash.as_str(), "0xabcd");

        let EventPayload::ListingCreated(p) = &envelope.payload else {
            panic!("expected ListingCreated");
        };
        assert_eq!(p.listing_id, ListingId::new(1));
        assert_eq!(p.seller.as_str(), "0xseller");
        assert_eq!(p.price, Decimal::from(1_000_000));
    }

    #[test]
    fn test_decode_unknown_kind() {
        let record = r#"{"kind": "ListingBoosted", "block": 1, "txIndex": 0,
            "logIndex": 0, "txHash": "0xff", "timestamp": "2024-05-01T12:00:00Z",
            "payload": {"boost": 9}}"#;
        let envelope = decode_envelope(record).unwrap();
        assert_eq!(envelope.kind(), EventKind::Unknown);
    }

    #[test]
    fn test_decode_malformed_record_fails() {
        assert!(decode_envelope("{not json").is_err());

        // Known kind with missing payload fields is a decode error, not Unknown
        let record = r#"{"kind": "PurchaseCompleted", "block": 1, "txIndex": 0,
            "logIndex": 0, "txHash": "0xff", "timestamp": "2024-05-01T12:00:00Z",
            "payload": {}}"#;
        assert!(decode_envelope(record).is_err());
    }

    #[test]
    fn test_decode_batch_skips_blank_lines() {
        let record = r#"{"kind": "DisputeResolved", "block": 3, "txIndex": 1,
            "logIndex": 2, "txHash": "0xff", "timestamp": "2024-05-01T12:00:00Z",
            "payload": {"disputeId": 4}}"#;
        let batch = format!("\n{}\n\n", record.replace('\n', " "));
        let envelopes = decode_batch(&batch).unwrap();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].kind(), EventKind::DisputeResolved);
    }

    #[tokio::test]
    async fn test_vec_source_fetch_after() {
        let record = |block: u64| {
            decode_envelope(&format!(
                r#"{{"kind": "PurchaseCompleted", "block": {}, "txIndex": 0,
                    "logIndex": 0, "txHash": "0xff",
                    "timestamp": "2024-05-01T12:00:00Z",
                    "payload": {{"escrowId": 1}}}}"#,
                block
            ))
            .unwrap()
        };
        let mut source = VecSource::new(vec![record(3), record(1), record(2)]);
        assert_eq!(source.len(), 3);

        let all = source.fetch_after(None, 10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].ordering_key.block, 1);

        let tail = source
            .fetch_after(Some(OrderingKey::new(1, 0, 0)), 10)
            .await
            .unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].ordering_key.block, 2);

        let limited = source.fetch_after(None, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }
}
