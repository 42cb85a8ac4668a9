use mongodb::{Client, Collection, Database, IndexModel, bson::doc, options::IndexOptions};
use tracing::info;

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult},
    models::{CounterDocument, MongoMessageDocument, MongoRoomDocument},
};

const ROOM_COLLECTION_NAME: &str = "rooms";
const MESSAGE_COLLECTION_NAME: &str = "messages";
const COUNTER_COLLECTION_NAME: &str = "counters";

/// Open handle on the room database and its three collections.
///
/// A single ping decides whether opening succeeded; backoff between attempts belongs to the
/// storage supervisor that calls `connect` and `try_reconnect`.
#[derive(Clone)]
pub(super) struct RoomDatabase {
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl RoomDatabase {
    pub(super) async fn open(config: &MongoConfig) -> MongoResult<Self> {
        let client = Client::with_options(config.options.clone())
            .map_err(|source| MongoDaoError::ClientConstruction { source })?;
        let handle = Self {
            database: client.database(&config.database_name),
            client,
        };

        handle
            .ping()
            .await
            .map_err(|source| MongoDaoError::Connect {
                database: config.database_name.clone(),
                source,
            })?;
        info!(database = %config.database_name, "connected to MongoDB room database");
        Ok(handle)
    }

    pub(super) async fn ping(&self) -> Result<(), mongodb::error::Error> {
        self.database.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    /// Unique `(room_id, seq)` index that keeps each room's log gap-free and ordered.
    pub(super) async fn ensure_indexes(&self) -> MongoResult<()> {
        let index = IndexModel::builder()
            .keys(doc! {"room_id": 1, "seq": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("message_room_seq_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();

        self.messages()
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: MESSAGE_COLLECTION_NAME,
                index: "room_id,seq",
                source,
            })?;
        Ok(())
    }

    pub(super) fn rooms(&self) -> Collection<MongoRoomDocument> {
        self.database.collection(ROOM_COLLECTION_NAME)
    }

    pub(super) fn messages(&self) -> Collection<MongoMessageDocument> {
        self.database.collection(MESSAGE_COLLECTION_NAME)
    }

    pub(super) fn counters(&self) -> Collection<CounterDocument> {
        self.database.collection(COUNTER_COLLECTION_NAME)
    }
}
