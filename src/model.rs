//! Core data model.
//!
//! An entry is an immutable record in a stream: a broker-assigned ID plus a
//! flat map of string fields. Order events are the typed view of those fields
//! that producers write and consumers decode.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Entry ID
// ---------------------------------------------------------------------------

/// Broker-assigned entry ID: `<milliseconds>-<sequence>`.
///
/// IDs are unique per stream and strictly increasing in append order.
/// Ordering compares the millisecond part first, then the sequence.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EntryId {
    pub ms: u64,
    pub seq: u64,
}

impl EntryId {
    /// `0-0`, lower than any ID a broker will ever assign.
    pub const ZERO: EntryId = EntryId { ms: 0, seq: 0 };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidEntryId(s.to_string());
        let (ms, seq) = s.split_once('-').ok_or_else(invalid)?;
        Ok(Self {
            ms: ms.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// Field name → value. Ordered so that entries print and compare stably.
pub type Fields = BTreeMap<String, String>;

/// A single record read from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: EntryId,
    pub fields: Fields,
}

/// Where a newly created consumer group starts reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartPosition {
    /// Only entries appended after the group is created (`$`).
    #[default]
    NewOnly,
    /// Every entry in the stream (`0`).
    Beginning,
}

impl StartPosition {
    /// The argument the broker expects for this position.
    pub fn as_arg(self) -> &'static str {
        match self {
            StartPosition::NewOnly => "$",
            StartPosition::Beginning => "0",
        }
    }
}

/// Snapshot of a group's pending entries list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PendingSummary {
    /// Entries delivered but not yet acknowledged.
    pub count: u64,
    pub lowest: Option<EntryId>,
    pub highest: Option<EntryId>,
    /// Pending count per consumer name.
    pub consumers: BTreeMap<String, u64>,
}

// ---------------------------------------------------------------------------
// Order events
// ---------------------------------------------------------------------------

pub const FIELD_ORDER_ID: &str = "order_id";
pub const FIELD_CUSTOMER: &str = "customer";
pub const FIELD_TIMESTAMP: &str = "timestamp";

/// Exclusive upper bound for generated order IDs.
const ORDER_ID_RANGE: u32 = 10_000;
/// Exclusive upper bound for generated customer numbers.
const CUSTOMER_RANGE: u32 = 100;

/// A placed order, as carried by a stream entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: u32,
    /// Customer tag, e.g. `customer_42`.
    pub customer: String,
    pub created_at: DateTime<Utc>,
}

impl OrderEvent {
    /// Synthesize an order with random order and customer numbers.
    pub fn random() -> Self {
        let mut rng = rand::rng();
        Self {
            order_id: rng.random_range(0..ORDER_ID_RANGE),
            customer: format!("customer_{}", rng.random_range(0..CUSTOMER_RANGE)),
            created_at: Utc::now(),
        }
    }

    /// Encode as stream fields. The timestamp is RFC 3339 at second precision.
    pub fn to_fields(&self) -> Fields {
        Fields::from([
            (FIELD_ORDER_ID.to_string(), self.order_id.to_string()),
            (FIELD_CUSTOMER.to_string(), self.customer.clone()),
            (
                FIELD_TIMESTAMP.to_string(),
                self.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
        ])
    }

    /// Decode from stream fields, validating every field.
    pub fn from_fields(fields: &Fields) -> Result<Self> {
        let order_id = required(fields, FIELD_ORDER_ID)?
            .parse::<u32>()
            .map_err(|e| Error::Decode {
                field: FIELD_ORDER_ID,
                reason: e.to_string(),
            })?;
        let customer = required(fields, FIELD_CUSTOMER)?.to_string();
        let created_at = DateTime::parse_from_rfc3339(required(fields, FIELD_TIMESTAMP)?)
            .map_err(|e| Error::Decode {
                field: FIELD_TIMESTAMP,
                reason: e.to_string(),
            })?
            .with_timezone(&Utc);

        Ok(Self {
            order_id,
            customer,
            created_at,
        })
    }

    /// Even order IDs are the simulated processing failures.
    pub fn is_even(&self) -> bool {
        self.order_id % 2 == 0
    }
}

fn required<'a>(fields: &'a Fields, field: &'static str) -> Result<&'a str> {
    fields.get(field).map(String::as_str).ok_or(Error::Decode {
        field,
        reason: "missing".to_string(),
    })
}
