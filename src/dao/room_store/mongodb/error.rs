use mongodb::error::Error as MongoError;
use thiserror::Error;

use crate::state::room::RoomId;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("could not reach MongoDB database `{database}`")]
    Connect {
        database: String,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to advance counter `{counter}`")]
    NextSequence {
        counter: String,
        #[source]
        source: MongoError,
    },
    #[error("counter `{counter}` returned no value")]
    MissingSequence { counter: String },
    #[error("value {value} does not fit a stored integer")]
    OutOfRange { value: u64 },
    #[error("stored timestamp {millis}ms is out of range")]
    InvalidTimestamp { millis: i64 },
    #[error("failed to save room `{id}`")]
    SaveRoom {
        id: RoomId,
        #[source]
        source: MongoError,
    },
    #[error("failed to load room `{id}`")]
    LoadRoom {
        id: RoomId,
        #[source]
        source: MongoError,
    },
    #[error("failed to list rooms")]
    ListRooms {
        #[source]
        source: MongoError,
    },
    #[error("failed to append message to room `{room_id}`")]
    AppendMessage {
        room_id: RoomId,
        #[source]
        source: MongoError,
    },
    #[error("failed to load messages of room `{room_id}`")]
    ListMessages {
        room_id: RoomId,
        #[source]
        source: MongoError,
    },
}
