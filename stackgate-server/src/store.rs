//! SQLite-backed listing store and purchase ledger.
//!
//! One connection is shared behind a mutex; queries run on the blocking pool
//! so request tasks never hold the lock across an await point.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OptionalExtension, params};
use stackgate::amount::Currency;
use stackgate::facilitator::BoxFuture;
use stackgate::store::{
    Listing, ListingStore, NewPurchase, PurchaseLedger, PurchaseRecord, RecordId, StorageError,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS listings (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    price_base_units TEXT NOT NULL,
    currency TEXT NOT NULL DEFAULT 'STX',
    seller_wallet TEXT NOT NULL,
    is_listed INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS purchases (
    id TEXT PRIMARY KEY,
    listing_id TEXT NOT NULL,
    buyer_wallet TEXT NOT NULL,
    currency TEXT NOT NULL,
    amount_base_units TEXT NOT NULL,
    payment_tx TEXT,
    created_at INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_purchases_payment_tx
    ON purchases(payment_tx) WHERE payment_tx IS NOT NULL;

CREATE INDEX IF NOT EXISTS idx_purchases_listing_buyer
    ON purchases(listing_id, buyer_wallet);
";

/// Listing store and purchase ledger over a single SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] if the file cannot be opened or the
    /// schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path).map_err(StorageError::backend)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(StorageError::backend)?;
        Self::with_connection(conn)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory().map_err(StorageError::backend)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA).map_err(StorageError::backend)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Inserts or replaces a listing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the write fails.
    pub fn upsert_listing(&self, listing: &Listing) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        conn.execute(
            "INSERT INTO listings (id, title, content, price_base_units, currency, seller_wallet, is_listed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                price_base_units = excluded.price_base_units,
                currency = excluded.currency,
                seller_wallet = excluded.seller_wallet,
                is_listed = excluded.is_listed",
            params![
                listing.id,
                listing.title,
                listing.content,
                listing.amount_base_units,
                listing.currency.code(),
                listing.seller_wallet,
                listing.is_listed,
            ],
        )
        .map_err(StorageError::backend)?;
        Ok(())
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StorageError::LockPoisoned)?;
            f(&guard).map_err(StorageError::backend)
        })
        .await
        .map_err(StorageError::backend)?
    }
}

fn listing_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Listing> {
    let currency: String = row.get(4)?;
    Ok(Listing {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        amount_base_units: row.get(3)?,
        currency: Currency::from_stored(&currency),
        seller_wallet: row.get(5)?,
        is_listed: row.get(6)?,
    })
}

fn insert_purchase(conn: &Connection, purchase: NewPurchase) -> rusqlite::Result<RecordId> {
    let record = PurchaseRecord::from_new(purchase);
    let created_at = i64::try_from(record.created_at.as_secs()).unwrap_or(i64::MAX);
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO purchases
            (id, listing_id, buyer_wallet, currency, amount_base_units, payment_tx, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            record.id.as_str(),
            record.listing_id,
            record.buyer_wallet,
            record.currency.code(),
            record.amount_base_units,
            record.payment_tx,
            created_at,
        ],
    )?;
    if inserted > 0 {
        return Ok(record.id);
    }

    // Only the payment_tx index can reject a fresh UUID.
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM purchases WHERE payment_tx = ?1",
            params![record.payment_tx],
            |row| row.get(0),
        )
        .optional()?;
    #[cfg(feature = "telemetry")]
    tracing::debug!(
        payment_tx = record.payment_tx.as_deref(),
        "Purchase already recorded for transaction"
    );
    Ok(existing.map_or(record.id, RecordId::from))
}

impl ListingStore for SqliteStore {
    fn listing<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Listing>, StorageError>> {
        let id = id.to_owned();
        Box::pin(self.run(move |conn| {
            conn.query_row(
                "SELECT id, title, content, price_base_units, currency, seller_wallet, is_listed
                 FROM listings WHERE id = ?1",
                params![id],
                listing_from_row,
            )
            .optional()
        }))
    }
}

impl PurchaseLedger for SqliteStore {
    fn exists<'a>(
        &'a self,
        listing_id: &'a str,
        buyer_wallet: &'a str,
    ) -> BoxFuture<'a, Result<bool, StorageError>> {
        let listing_id = listing_id.to_owned();
        let buyer_wallet = buyer_wallet.to_owned();
        Box::pin(self.run(move |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM purchases WHERE listing_id = ?1 AND buyer_wallet = ?2)",
                params![listing_id, buyer_wallet],
                |row| row.get(0),
            )
        }))
    }

    fn record(&self, purchase: NewPurchase) -> BoxFuture<'_, Result<RecordId, StorageError>> {
        Box::pin(self.run(move |conn| insert_purchase(conn, purchase)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SELLER: &str = "ST16K4ZYM14WPG9GZQ5BPXNQAEVTJPRMA4VWJCXYY";
    const BUYER: &str = "ST1PQHQKV0RJXZFY1DGX8MNSNYVE3VGZJSRTPGZGM";

    fn listing() -> Listing {
        Listing {
            id: "listing-1".into(),
            title: "Haiku generator".into(),
            content: "Write a haiku".into(),
            amount_base_units: "500000".into(),
            currency: Currency::Sbtc,
            seller_wallet: SELLER.into(),
            is_listed: true,
        }
    }

    fn purchase(tx: Option<&str>) -> NewPurchase {
        NewPurchase {
            listing_id: "listing-1".into(),
            buyer_wallet: BUYER.into(),
            currency: Currency::Stx,
            amount_base_units: "500000".into(),
            payment_tx: tx.map(str::to_owned),
        }
    }

    fn count(store: &SqliteStore) -> i64 {
        store
            .conn
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM purchases", [], |row| row.get(0))
            .unwrap()
    }

    #[tokio::test]
    async fn test_listing_round_trip_and_upsert() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.listing("listing-1").await.unwrap(), None);

        store.upsert_listing(&listing()).unwrap();
        assert_eq!(store.listing("listing-1").await.unwrap(), Some(listing()));

        let unlisted = Listing {
            is_listed: false,
            amount_base_units: "750000".into(),
            ..listing()
        };
        store.upsert_listing(&unlisted).unwrap();
        assert_eq!(store.listing("listing-1").await.unwrap(), Some(unlisted));
    }

    #[tokio::test]
    async fn test_unknown_currency_reads_as_stx() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO listings (id, title, content, price_base_units, currency, seller_wallet)
                 VALUES ('legacy', 't', 'c', '10', 'doge', ?1)",
                params![SELLER],
            )
            .unwrap();
        let listing = store.listing("legacy").await.unwrap().unwrap();
        assert_eq!(listing.currency, Currency::Stx);
        assert!(listing.is_listed);
    }

    #[tokio::test]
    async fn test_record_is_idempotent_per_transaction() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(!store.exists("listing-1", BUYER).await.unwrap());

        let first = store.record(purchase(Some("0xabc"))).await.unwrap();
        let again = store.record(purchase(Some("0xabc"))).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(count(&store), 1);
        assert!(store.exists("listing-1", BUYER).await.unwrap());
        assert!(!store.exists("listing-2", BUYER).await.unwrap());
    }

    #[tokio::test]
    async fn test_purchases_without_transaction_are_all_kept() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = store.record(purchase(None)).await.unwrap();
        let second = store.record(purchase(None)).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(count(&store), 2);
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gate.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert_listing(&listing()).unwrap();
            store.record(purchase(Some("0x1"))).await.unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert!(store.listing("listing-1").await.unwrap().is_some());
        assert!(store.exists("listing-1", BUYER).await.unwrap());
    }
}
