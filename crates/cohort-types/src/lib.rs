//! Shared types and identifiers for Cohort.
//!
//! This crate defines the core types used across the Cohort workspace:
//! identifiers ([`ParticipantId`], [`BiobankId`], [`HpoId`]), ordering and
//! time primitives ([`LogPosition`], [`Timestamp`], [`Clock`]), and the
//! registry records ([`Participant`], [`ParticipantSummary`],
//! [`BiobankOrder`], [`Hpo`]).

mod clock;
mod versioned;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use clock::{Clock, ManualClock, SystemClock};
pub use versioned::Versioned;

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name(u32);

        impl $name {
            /// Wrap a raw numeric identifier.
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            /// Return the raw numeric value.
            pub const fn get(&self) -> u32 {
                self.0
            }

            /// Big-endian key bytes, so byte order matches numeric order.
            pub fn to_key(&self) -> [u8; 4] {
                self.0.to_be_bytes()
            }
        }

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

define_id!(
    /// Primary identity of a participant.
    ParticipantId
);

define_id!(
    /// Secondary identity of a participant, used to label biobank samples.
    BiobankId
);

define_id!(
    /// Identifier of a health provider organization (HPO), the grouping a
    /// participant is affiliated with.
    HpoId
);

/// Sentinel group for participants without a resolvable provider link.
pub const UNSET_HPO_ID: HpoId = HpoId::new(0);

// ---------------------------------------------------------------------------
// Ordering and time
// ---------------------------------------------------------------------------

/// Position in the global write log.
///
/// Every committed write to a participating table is stamped with a strictly
/// greater position than all writes committed before it. Sync clients order
/// by this value rather than by wall-clock timestamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct LogPosition(u64);

impl LogPosition {
    /// The position before any write has been committed.
    pub const ZERO: LogPosition = LogPosition(0);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(&self) -> u64 {
        self.0
    }

    /// The position immediately after this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Big-endian key bytes for ordered scans.
    pub fn to_key(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wall-clock instant in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    pub fn saturating_add(&self, d: Duration) -> Self {
        Self(self.0.saturating_add(d.as_millis() as u64))
    }

    pub fn saturating_sub(&self, d: Duration) -> Self {
        Self(self.0.saturating_sub(d.as_millis() as u64))
    }

    /// Big-endian key bytes for time-ordered scans.
    pub fn to_key(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// ---------------------------------------------------------------------------
// Participants
// ---------------------------------------------------------------------------

/// A registered research participant.
///
/// `participant_id`, `biobank_id` and `sign_up_time` never change after
/// insertion. `version` starts at 1 and advances by exactly one per update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub participant_id: ParticipantId,
    pub biobank_id: BiobankId,
    pub version: u32,
    /// Creation time of the participant.
    pub sign_up_time: Timestamp,
    pub last_modified: Timestamp,
    /// JSON list of provider links; the primary link determines the HPO.
    pub provider_link: Option<String>,
    pub hpo_id: HpoId,
    pub log_position: LogPosition,
}

/// Insert request for a participant.
///
/// Either both identities are supplied by the caller or neither is, in which
/// case the registry generates them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewParticipant {
    pub participant_id: Option<ParticipantId>,
    pub biobank_id: Option<BiobankId>,
    pub provider_link: Option<String>,
}

/// Denormalized, query-friendly projection of a participant.
///
/// Only ever written by the registry as part of a participant or biobank
/// order write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSummary {
    pub participant_id: ParticipantId,
    pub biobank_id: BiobankId,
    pub sign_up_time: Timestamp,
    pub hpo_id: HpoId,
    pub num_biobank_orders: u32,
    /// Samples ordered across all orders whose test is a baseline test.
    pub num_baseline_samples_ordered: u32,
}

/// A health provider organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hpo {
    pub hpo_id: HpoId,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Biobank orders
// ---------------------------------------------------------------------------

/// An order for biobank samples placed for a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiobankOrder {
    pub order_id: String,
    pub participant_id: ParticipantId,
    /// Must read `Patient/{participant_id}`.
    pub subject: String,
    /// Time the order was placed, as reported by the caller.
    pub created: Timestamp,
    pub identifiers: Vec<OrderIdentifier>,
    pub samples: Vec<OrderSample>,
    pub version: u32,
    pub created_at: Timestamp,
    pub last_modified: Timestamp,
    pub log_position: LogPosition,
}

/// Insert request for a biobank order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBiobankOrder {
    /// Generated when absent.
    pub order_id: Option<String>,
    pub subject: String,
    pub created: Timestamp,
    pub identifiers: Vec<OrderIdentifier>,
    pub samples: Vec<OrderSample>,
}

/// External identifier of an order, unique across all orders.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderIdentifier {
    pub system: String,
    pub value: String,
}

impl fmt::Display for OrderIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.system, self.value)
    }
}

/// A single sample requested by an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSample {
    /// Test code, e.g. `1ED10`.
    pub test: String,
    pub description: String,
}
