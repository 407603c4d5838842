//! Listing store and purchase ledger seams.
//!
//! The access flow reads listings and reads or appends purchase records. It
//! never updates or deletes either. Both seams are object-safe traits so a
//! server can inject SQLite, an external database, or the in-process
//! [`MemoryStore`] used by tests.

use std::fmt;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

use crate::amount::Currency;
use crate::facilitator::BoxFuture;
use crate::timestamp::UnixTimestamp;

/// An item offered for sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// Listing identifier.
    pub id: String,
    /// Title shown to buyers.
    pub title: String,
    /// Content released after payment.
    pub content: String,
    /// Price in base units, as stored.
    pub amount_base_units: String,
    /// Currency the price is denominated in.
    pub currency: Currency,
    /// Seller address, also the payee.
    pub seller_wallet: String,
    /// Whether the listing can currently be bought.
    pub is_listed: bool,
}

/// Identifier of a purchase record (a UUID v4 string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A purchase about to be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPurchase {
    /// Listing that was bought.
    pub listing_id: String,
    /// Address credited with the purchase.
    pub buyer_wallet: String,
    /// Currency paid in.
    pub currency: Currency,
    /// Amount paid, in base units.
    pub amount_base_units: String,
    /// On-chain transaction reference, when known.
    pub payment_tx: Option<String>,
}

/// Durable proof of a settled purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    /// Record identifier.
    pub id: RecordId,
    /// Listing that was bought.
    pub listing_id: String,
    /// Address credited with the purchase.
    pub buyer_wallet: String,
    /// Currency paid in.
    pub currency: Currency,
    /// Amount paid, in base units.
    pub amount_base_units: String,
    /// On-chain transaction reference, when known.
    pub payment_tx: Option<String>,
    /// When the record was written.
    pub created_at: UnixTimestamp,
}

impl PurchaseRecord {
    /// Materializes a new purchase with a fresh id and the current time.
    #[must_use]
    pub fn from_new(purchase: NewPurchase) -> Self {
        Self {
            id: RecordId::new(),
            listing_id: purchase.listing_id,
            buyer_wallet: purchase.buyer_wallet,
            currency: purchase.currency,
            amount_base_units: purchase.amount_base_units,
            payment_tx: purchase.payment_tx,
            created_at: UnixTimestamp::now(),
        }
    }
}

/// Errors raised by storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend failed to execute the operation.
    #[error("Storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// A stored row could not be interpreted.
    #[error("Corrupt stored data: {0}")]
    Corrupt(String),
    /// A lock guarding the backend was poisoned by a panicking thread.
    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    /// Wraps any backend error.
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(err))
    }
}

/// Read access to listings.
pub trait ListingStore: Send + Sync {
    /// Looks up a listing by id. `Ok(None)` means it does not exist.
    fn listing<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Listing>, StorageError>>;
}

/// Append-only record of settled purchases.
pub trait PurchaseLedger: Send + Sync {
    /// Returns `true` if `buyer_wallet` has a recorded purchase of `listing_id`.
    fn exists<'a>(
        &'a self,
        listing_id: &'a str,
        buyer_wallet: &'a str,
    ) -> BoxFuture<'a, Result<bool, StorageError>>;

    /// Records a purchase and returns its id.
    ///
    /// Recording a purchase whose `payment_tx` is already on file returns the
    /// existing record's id instead of inserting a second row.
    fn record(&self, purchase: NewPurchase) -> BoxFuture<'_, Result<RecordId, StorageError>>;
}

/// Concurrent in-memory listing store and purchase ledger.
#[derive(Debug, Default)]
pub struct MemoryStore {
    listings: DashMap<String, Listing>,
    purchases: DashMap<RecordId, PurchaseRecord>,
    by_transaction: DashMap<String, RecordId>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a listing.
    pub fn upsert_listing(&self, listing: Listing) {
        self.listings.insert(listing.id.clone(), listing);
    }

    /// Returns every recorded purchase of `listing_id`.
    #[must_use]
    pub fn purchases_for(&self, listing_id: &str) -> Vec<PurchaseRecord> {
        self.purchases
            .iter()
            .filter(|entry| entry.listing_id == listing_id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Total number of recorded purchases.
    #[must_use]
    pub fn purchase_count(&self) -> usize {
        self.purchases.len()
    }

    fn insert_purchase(&self, purchase: NewPurchase) -> RecordId {
        let Some(tx) = purchase.payment_tx.clone() else {
            let record = PurchaseRecord::from_new(purchase);
            let id = record.id.clone();
            self.purchases.insert(id.clone(), record);
            return id;
        };
        match self.by_transaction.entry(tx) {
            Entry::Occupied(existing) => {
                #[cfg(feature = "telemetry")]
                tracing::debug!(
                    payment_tx = %existing.key(),
                    record_id = %existing.get(),
                    "Purchase already recorded for transaction"
                );
                existing.get().clone()
            }
            Entry::Vacant(slot) => {
                let record = PurchaseRecord::from_new(purchase);
                let id = record.id.clone();
                self.purchases.insert(id.clone(), record);
                slot.insert(id.clone());
                id
            }
        }
    }
}

impl ListingStore for MemoryStore {
    fn listing<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Listing>, StorageError>> {
        Box::pin(async move { Ok(self.listings.get(id).map(|entry| entry.value().clone())) })
    }
}

impl PurchaseLedger for MemoryStore {
    fn exists<'a>(
        &'a self,
        listing_id: &'a str,
        buyer_wallet: &'a str,
    ) -> BoxFuture<'a, Result<bool, StorageError>> {
        Box::pin(async move {
            Ok(self
                .purchases
                .iter()
                .any(|entry| entry.listing_id == listing_id && entry.buyer_wallet == buyer_wallet))
        })
    }

    fn record(&self, purchase: NewPurchase) -> BoxFuture<'_, Result<RecordId, StorageError>> {
        Box::pin(async move { Ok(self.insert_purchase(purchase)) })
    }
}
