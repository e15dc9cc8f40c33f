//! Durable persistence for raw events and aggregate checkpoints
//!
//! Two collections back the pipeline: `raw_events` holds one document per
//! event (unique on `eventId`, TTL-expired on `ts`) and `aggregates` holds
//! one coarse counter document per `(window, bucketStart)`.
//!
//! The adapter is deliberately off the broadcast path: once the service is
//! up, every persistence failure is logged and swallowed. Duplicate-key
//! rejections on re-submitted batches are the idempotency mechanism, not an
//! error. Only startup (initial connect, index setup) is allowed to fail the
//! process.

use std::time::Duration;

use anyhow::{Context, Result};
use mongodb::bson::{self, doc, DateTime, Document};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, IndexOptions, InsertManyOptions, UpdateOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use tracing::{debug, warn};
use types::event::EventRecord;
use types::window::Window;

const DB_NAME: &str = "analytics";
const RAW_EVENTS: &str = "raw_events";
const AGGREGATES: &str = "aggregates";
/// Name mongod derives for the single-field ascending index on `ts`.
const TTL_INDEX_NAME: &str = "ts_1";
/// Startup server selection timeout; an unreachable deployment fails fast.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Server code for "index exists with different options".
const INDEX_OPTIONS_CONFLICT: i32 = 85;
/// Server code for "index with this name was not found".
const INDEX_NOT_FOUND: i32 = 27;
/// Write error code for a unique-key violation.
const DUPLICATE_KEY: i32 = 11000;

/// Handle to the persistence backend, shared for the process lifetime.
pub struct EventStore {
    db: Database,
    raw_events: Collection<Document>,
    aggregates: Collection<Document>,
}

impl EventStore {
    /// Connect and verify the deployment answers before startup proceeds.
    pub async fn connect(uri: &str) -> Result<Self> {
        let mut options = ClientOptions::parse(uri).await.context("parsing MONGODB_URI")?;
        options.server_selection_timeout = Some(CONNECT_TIMEOUT);
        let client = Client::with_options(options).context("building mongodb client")?;
        let db = client
            .default_database()
            .unwrap_or_else(|| client.database(DB_NAME));
        db.run_command(doc! { "ping": 1 }, None)
            .await
            .context("pinging mongodb")?;

        Ok(Self {
            raw_events: db.collection(RAW_EVENTS),
            aggregates: db.collection(AGGREGATES),
            db,
        })
    }

    /// Idempotent index setup, safe to run on every start. A pre-existing
    /// TTL index whose expiry changed is dropped and recreated; concurrent
    /// creates of an identical spec are a server-side no-op.
    pub async fn ensure_indexes(&self, ttl_days: u32) -> Result<()> {
        let ttl = Duration::from_secs(u64::from(ttl_days) * 86_400);
        self.ensure_ttl_index(ttl).await?;

        for field in ["sessionId", "userId", "route"] {
            let model = IndexModel::builder().keys(doc! { field: 1 }).build();
            self.raw_events
                .create_index(model, None)
                .await
                .with_context(|| format!("creating {field} index"))?;
        }

        let unique = IndexModel::builder()
            .keys(doc! { "eventId": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.raw_events
            .create_index(unique, None)
            .await
            .context("creating unique eventId index")?;

        let compound = IndexModel::builder()
            .keys(doc! { "window": 1, "bucketStart": 1 })
            .build();
        self.aggregates
            .create_index(compound, None)
            .await
            .context("creating aggregate index")?;

        Ok(())
    }

    /// Liveness probe backing the readiness endpoint.
    pub async fn ping(&self) -> bool {
        match self.db.run_command(doc! { "ping": 1 }, None).await {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "persistence ping failed");
                false
            }
        }
    }

    /// Record a batch: raw insert plus aggregate upserts. Runs off the
    /// broadcast path; every failure here is logged and swallowed.
    pub async fn record_batch(&self, events: &[EventRecord], received_at_ms: i64) {
        if let Err(err) = self.insert_raw(events).await {
            if is_duplicate_key(&err) {
                debug!(batch = events.len(), "duplicate event ids ignored");
            } else {
                warn!(error = %err, batch = events.len(), "raw event insert failed");
            }
        }

        if let Err(err) = self.upsert_aggregates(events, received_at_ms).await {
            warn!(error = %err, "aggregate upsert failed");
        }
    }

    async fn ensure_ttl_index(&self, ttl: Duration) -> Result<()> {
        let model = || {
            IndexModel::builder()
                .keys(doc! { "ts": 1 })
                .options(IndexOptions::builder().expire_after(ttl).build())
                .build()
        };

        match self.raw_events.create_index(model(), None).await {
            Ok(_) => Ok(()),
            Err(err) if command_code(&err) == Some(INDEX_OPTIONS_CONFLICT) => {
                debug!(ttl_secs = ttl.as_secs(), "ttl expiry changed, recreating index");
                if let Err(drop_err) = self.raw_events.drop_index(TTL_INDEX_NAME, None).await {
                    // A concurrent restart may have dropped it first.
                    if command_code(&drop_err) != Some(INDEX_NOT_FOUND) {
                        return Err(drop_err).context("dropping stale ttl index");
                    }
                    debug!("stale ttl index already dropped");
                }
                self.raw_events
                    .create_index(model(), None)
                    .await
                    .context("recreating ttl index")?;
                Ok(())
            }
            Err(err) => Err(err).context("creating ttl index"),
        }
    }

    /// Unordered insert: duplicate `eventId`s are expected on re-submission
    /// and must not fail the rest of the batch.
    async fn insert_raw(&self, events: &[EventRecord]) -> Result<(), MongoError> {
        let mut docs = Vec::with_capacity(events.len());
        for event in events {
            match bson::to_document(event) {
                Ok(mut document) => {
                    // Stored as a BSON date so the TTL index applies.
                    document.insert("ts", DateTime::from_millis(event.ts));
                    docs.push(document);
                }
                Err(err) => {
                    debug!(error = %err, event_id = %event.event_id, "unencodable event skipped")
                }
            }
        }
        if docs.is_empty() {
            return Ok(());
        }

        let options = InsertManyOptions::builder().ordered(false).build();
        self.raw_events.insert_many(docs, options).await.map(|_| ())
    }

    /// Coarser than the in-memory buckets (no uniques, no routes): a
    /// durability checkpoint for headline counters across restarts.
    async fn upsert_aggregates(
        &self,
        events: &[EventRecord],
        received_at_ms: i64,
    ) -> Result<(), MongoError> {
        let count = events.len() as i64;
        let errors = events.iter().filter(|event| event.is_error()).count() as i64;
        let options = UpdateOptions::builder().upsert(true).build();

        for window in Window::ALL {
            let bucket_start = window.bucket_start(received_at_ms);
            let filter = doc! { "window": window.secs(), "bucketStart": bucket_start };
            let update = doc! {
                "$inc": { "count": count, "errors": errors },
                "$setOnInsert": { "createdAt": DateTime::from_millis(bucket_start) },
            };
            self.aggregates
                .update_one(filter, update, options.clone())
                .await?;
        }
        Ok(())
    }
}

fn command_code(err: &MongoError) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        _ => None,
    }
}

/// Whether an insert failure is purely unique-key rejection, i.e. the whole
/// batch was already persisted.
fn is_duplicate_key(err: &MongoError) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == DUPLICATE_KEY,
        ErrorKind::BulkWrite(failure) => failure
            .write_errors
            .as_ref()
            .is_some_and(|errors| {
                !errors.is_empty() && errors.iter().all(|e| e.code == DUPLICATE_KEY)
            }),
        _ => false,
    }
}
