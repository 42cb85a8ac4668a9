use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::error::{MongoDaoError, MongoResult};
use crate::{
    dao::models::{MessageEntity, RoomEntity},
    state::{message::SystemNotice, room::Role, state_machine::DebatePhase},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRoomDocument {
    #[serde(rename = "_id")]
    id: i64,
    name: String,
    description: String,
    phase: DebatePhase,
    proponent_id: Option<i64>,
    opponent_id: Option<i64>,
    #[serde(default)]
    observer_ids: Vec<i64>,
    start_time: Option<StoredTime>,
    end_time: Option<StoredTime>,
    current_round: u32,
    total_rounds: u32,
    round_duration_secs: i64,
    max_duration_minutes: i64,
    round_deadline: Option<StoredTime>,
    current_speaker_id: Option<i64>,
    created_at: StoredTime,
    #[serde(default)]
    version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoMessageDocument {
    room_id: i64,
    seq: i64,
    author_id: i64,
    role: Option<Role>,
    content: String,
    timestamp: StoredTime,
    notice: Option<SystemNotice>,
}

impl TryFrom<RoomEntity> for MongoRoomDocument {
    type Error = MongoDaoError;

    fn try_from(value: RoomEntity) -> MongoResult<Self> {
        Ok(Self {
            id: to_i64(value.id)?,
            name: value.name,
            description: value.description,
            phase: value.phase,
            proponent_id: value.proponent_id.map(to_i64).transpose()?,
            opponent_id: value.opponent_id.map(to_i64).transpose()?,
            observer_ids: value
                .observer_ids
                .into_iter()
                .map(to_i64)
                .collect::<MongoResult<_>>()?,
            start_time: value.start_time.map(to_stored_time),
            end_time: value.end_time.map(to_stored_time),
            current_round: value.current_round,
            total_rounds: value.total_rounds,
            round_duration_secs: to_i64(value.round_duration_secs)?,
            max_duration_minutes: to_i64(value.max_duration_minutes)?,
            round_deadline: value.round_deadline.map(to_stored_time),
            current_speaker_id: value.current_speaker_id.map(to_i64).transpose()?,
            created_at: to_stored_time(value.created_at),
            version: to_i64(value.version)?,
        })
    }
}

impl TryFrom<MongoRoomDocument> for RoomEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoRoomDocument) -> MongoResult<Self> {
        Ok(Self {
            id: from_i64(value.id),
            name: value.name,
            description: value.description,
            phase: value.phase,
            proponent_id: value.proponent_id.map(from_i64),
            opponent_id: value.opponent_id.map(from_i64),
            observer_ids: value.observer_ids.into_iter().map(from_i64).collect(),
            start_time: value.start_time.map(from_stored_time).transpose()?,
            end_time: value.end_time.map(from_stored_time).transpose()?,
            current_round: value.current_round,
            total_rounds: value.total_rounds,
            round_duration_secs: from_i64(value.round_duration_secs),
            max_duration_minutes: from_i64(value.max_duration_minutes),
            round_deadline: value.round_deadline.map(from_stored_time).transpose()?,
            current_speaker_id: value.current_speaker_id.map(from_i64),
            created_at: from_stored_time(value.created_at)?,
            version: from_i64(value.version),
        })
    }
}

impl MongoMessageDocument {
    pub fn new(seq: i64, entity: MessageEntity) -> MongoResult<Self> {
        Ok(Self {
            room_id: to_i64(entity.room_id)?,
            seq,
            author_id: to_i64(entity.author_id)?,
            role: entity.role,
            content: entity.content,
            timestamp: to_stored_time(entity.timestamp),
            notice: entity.notice,
        })
    }
}

impl TryFrom<MongoMessageDocument> for MessageEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoMessageDocument) -> MongoResult<Self> {
        Ok(Self {
            room_id: from_i64(value.room_id),
            author_id: from_i64(value.author_id),
            role: value.role,
            content: value.content,
            timestamp: from_stored_time(value.timestamp)?,
            notice: value.notice,
        })
    }
}

/// Counter document used to hand out monotonically increasing sequences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterDocument {
    #[serde(rename = "_id")]
    pub name: String,
    pub seq: i64,
}

pub fn to_i64(value: u64) -> MongoResult<i64> {
    i64::try_from(value).map_err(|_| MongoDaoError::OutOfRange { value })
}

fn from_i64(value: i64) -> u64 {
    value.max(0) as u64
}

/// BSON date plus the nanoseconds it cannot hold, so timestamps read back exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTime {
    at: DateTime,
    #[serde(default)]
    sub_millis_nanos: u32,
}

fn to_stored_time(value: OffsetDateTime) -> StoredTime {
    let nanos = value.unix_timestamp_nanos();
    StoredTime {
        at: DateTime::from_millis(nanos.div_euclid(1_000_000) as i64),
        sub_millis_nanos: nanos.rem_euclid(1_000_000) as u32,
    }
}

fn from_stored_time(value: StoredTime) -> MongoResult<OffsetDateTime> {
    let millis = value.at.timestamp_millis();
    let nanos = i128::from(millis) * 1_000_000 + i128::from(value.sub_millis_nanos);
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .map_err(|_| MongoDaoError::InvalidTimestamp { millis })
}

pub fn doc_id(id: i64) -> Document {
    doc! {"_id": id}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(nanos: i128) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap()
    }

    #[test]
    fn message_timestamps_keep_nanosecond_precision() {
        let entity = MessageEntity {
            room_id: 4,
            author_id: 9,
            role: Some(Role::Opponent),
            content: "rebuttal".into(),
            timestamp: at(1_700_000_000_123_456_789),
            notice: None,
        };

        let document = MongoMessageDocument::new(3, entity.clone()).unwrap();
        assert_eq!(document.timestamp.at.timestamp_millis(), 1_700_000_000_123);
        assert_eq!(MessageEntity::try_from(document).unwrap(), entity);
    }

    #[test]
    fn pre_epoch_timestamps_split_into_positive_remainders() {
        let stored = to_stored_time(at(-1_500_000));
        assert_eq!(stored.at.timestamp_millis(), -2);
        assert_eq!(stored.sub_millis_nanos, 500_000);
        assert_eq!(from_stored_time(stored).unwrap(), at(-1_500_000));
    }

    #[test]
    fn room_documents_read_back_unchanged() {
        let entity = RoomEntity {
            id: 12,
            name: "Motion".into(),
            description: String::new(),
            phase: DebatePhase::Ongoing,
            proponent_id: Some(1),
            opponent_id: Some(2),
            observer_ids: vec![7, 3],
            start_time: Some(at(1_700_000_000_000_000_001)),
            end_time: None,
            current_round: 1,
            total_rounds: 3,
            round_duration_secs: 90,
            max_duration_minutes: 30,
            round_deadline: Some(at(1_700_000_090_000_000_001)),
            current_speaker_id: Some(1),
            created_at: at(1_699_999_999_987_654_321),
            version: 5,
        };

        let document = MongoRoomDocument::try_from(entity.clone()).unwrap();
        assert_eq!(RoomEntity::try_from(document).unwrap(), entity);
    }

    #[test]
    fn ids_beyond_the_stored_range_are_rejected() {
        assert!(matches!(
            to_i64(u64::MAX),
            Err(MongoDaoError::OutOfRange { value: u64::MAX })
        ));
    }
}
