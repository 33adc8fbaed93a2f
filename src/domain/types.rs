//! Shared types for the online QTC creator

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Stable identifier of a tracked entity (opaque to the core)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub String);

impl TrackId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Source timestamp in seconds (stream time, not wall clock)
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub f64);

impl Timestamp {
    #[inline]
    pub fn secs(self) -> f64 {
        self.0
    }

    #[inline]
    pub fn max(self, other: Timestamp) -> Timestamp {
        if other.0 > self.0 {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

/// Cartesian position; only x/y take part in the qualitative description
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn planar(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }
}

/// 2D point handed to the classifier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    #[inline]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn distance(&self, other: &Point2) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// One (reference, entity) coordinate pair: `[ref_x, ref_y, ent_x, ent_y]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample(pub [f64; 4]);

impl Sample {
    #[inline]
    pub fn new(reference: &Position, entity: &Position) -> Self {
        Self([reference.x, reference.y, entity.x, entity.y])
    }

    #[inline]
    pub fn reference(&self) -> Point2 {
        Point2::new(self.0[0], self.0[1])
    }

    #[inline]
    pub fn entity(&self) -> Point2 {
        Point2::new(self.0[2], self.0[3])
    }
}

/// One tracked entity inside an entities report
#[derive(Debug, Clone, PartialEq)]
pub struct EntityObservation {
    pub track_id: TrackId,
    pub position: Position,
}

/// A batch of entity positions captured at one instant in one source frame
#[derive(Debug, Clone, PartialEq)]
pub struct EntitiesReport {
    pub stamp: Timestamp,
    pub frame_id: String,
    pub entities: Vec<EntityObservation>,
}

/// Immutable snapshot queued by the producer: the report plus the
/// reference pose that was current when the report arrived
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent {
    pub report: EntitiesReport,
    pub reference: Position,
}

// ---------------------------------------------------------------------------
// Wire messages
// ---------------------------------------------------------------------------

/// People tracker message as received on the entities topic
#[derive(Debug, Deserialize)]
pub struct PeopleMessage {
    pub header: Header,
    #[serde(default)]
    pub uuids: Vec<String>,
    #[serde(default)]
    pub poses: Vec<PoseMessage>,
}

#[derive(Debug, Deserialize)]
pub struct Header {
    #[serde(deserialize_with = "deserialize_stamp")]
    pub stamp: Timestamp,
    #[serde(default)]
    pub frame_id: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PoseMessage {
    pub position: Position,
}

impl PeopleMessage {
    /// Convert into an entities report, pairing uuids with poses.
    /// Surplus entries on either side are ignored.
    pub fn into_report(self) -> EntitiesReport {
        let entities = self
            .uuids
            .into_iter()
            .zip(self.poses)
            .map(|(uuid, pose)| EntityObservation { track_id: TrackId(uuid), position: pose.position })
            .collect();
        EntitiesReport { stamp: self.header.stamp, frame_id: self.header.frame_id, entities }
    }
}

/// Stamp can be float/integer seconds or an RFC 3339 string
fn deserialize_stamp<'de, D>(deserializer: D) -> Result<Timestamp, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct StampVisitor;

    impl<'de> Visitor<'de> for StampVisitor {
        type Value = Timestamp;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("seconds as a number or an RFC 3339 string")
        }

        fn visit_f64<E>(self, value: f64) -> Result<Timestamp, E>
        where
            E: de::Error,
        {
            Ok(Timestamp(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Timestamp, E>
        where
            E: de::Error,
        {
            Ok(Timestamp(value as f64))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Timestamp, E>
        where
            E: de::Error,
        {
            Ok(Timestamp(value as f64))
        }

        fn visit_str<E>(self, value: &str) -> Result<Timestamp, E>
        where
            E: de::Error,
        {
            parse_rfc3339(value)
                .ok_or_else(|| E::custom(format!("invalid RFC 3339 stamp: {value}")))
        }
    }

    deserializer.deserialize_any(StampVisitor)
}

fn parse_rfc3339(value: &str) -> Option<Timestamp> {
    OffsetDateTime::parse(value, &Rfc3339)
        .ok()
        .map(|dt| Timestamp(dt.unix_timestamp_nanos() as f64 / 1e9))
}
