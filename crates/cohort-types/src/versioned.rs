//! The [`Versioned`] contract and its implementations for registry records.

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{BiobankOrder, LogPosition, Participant, ParticipantId, Timestamp};

/// An entity whose every write is numbered, stamped and kept in history.
pub trait Versioned: Clone + Serialize + DeserializeOwned {
    /// Keyspace holding the current version of each entity.
    const TABLE: &'static str;
    /// Keyspace holding every past version.
    const HISTORY_TABLE: &'static str;

    type Id: ?Sized + fmt::Display;

    fn id(&self) -> &Self::Id;
    fn encode_id(id: &Self::Id) -> Vec<u8>;

    fn version(&self) -> u32;
    fn set_version(&mut self, version: u32);
    fn set_created_at(&mut self, at: Timestamp);
    fn set_last_modified(&mut self, at: Timestamp);
    fn log_position(&self) -> LogPosition;
    fn set_log_position(&mut self, position: LogPosition);

    fn key(&self) -> Vec<u8> {
        Self::encode_id(self.id())
    }
}

impl Versioned for Participant {
    const TABLE: &'static str = "participant";
    const HISTORY_TABLE: &'static str = "participant_history";
    type Id = ParticipantId;

    fn id(&self) -> &ParticipantId {
        &self.participant_id
    }
    fn encode_id(id: &ParticipantId) -> Vec<u8> {
        id.to_key().to_vec()
    }
    fn version(&self) -> u32 {
        self.version
    }
    fn set_version(&mut self, version: u32) {
        self.version = version;
    }
    fn set_created_at(&mut self, at: Timestamp) {
        self.sign_up_time = at;
    }
    fn set_last_modified(&mut self, at: Timestamp) {
        self.last_modified = at;
    }
    fn log_position(&self) -> LogPosition {
        self.log_position
    }
    fn set_log_position(&mut self, position: LogPosition) {
        self.log_position = position;
    }
}

impl Versioned for BiobankOrder {
    const TABLE: &'static str = "biobank_order";
    const HISTORY_TABLE: &'static str = "biobank_order_history";
    type Id = str;

    fn id(&self) -> &str {
        &self.order_id
    }
    // Terminated so one id is never a key prefix of another.
    fn encode_id(id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(id.len() + 1);
        key.extend_from_slice(id.as_bytes());
        key.push(0);
        key
    }
    fn version(&self) -> u32 {
        self.version
    }
    fn set_version(&mut self, version: u32) {
        self.version = version;
    }
    fn set_created_at(&mut self, at: Timestamp) {
        self.created_at = at;
    }
    fn set_last_modified(&mut self, at: Timestamp) {
        self.last_modified = at;
    }
    fn log_position(&self) -> LogPosition {
        self.log_position
    }
    fn set_log_position(&mut self, position: LogPosition) {
        self.log_position = position;
    }
}
