/*
[INPUT]:  Parsed exchange bodies + their ordering fields
[OUTPUT]: Immutable tagged events and their downstream wire encoding
[POS]:    Core data model - shared by producers, queue and forwarder
[UPDATE]: When the sink wire format or sequence metadata changes
*/

use serde::{Serialize, Serializer};

/// Event tag, encoded on the wire as `1` (snapshot) or `2` (incremental).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Snapshot,
    IncrementalUpdate,
}

impl EventKind {
    pub fn wire_code(self) -> u8 {
        match self {
            EventKind::Snapshot => 1,
            EventKind::IncrementalUpdate => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Snapshot => "snapshot",
            EventKind::IncrementalUpdate => "incremental",
        }
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.wire_code())
    }
}

/// Exchange-provided ordering fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceInfo {
    Snapshot {
        last_update_id: u64,
    },
    Incremental {
        first_update_id: u64,
        final_update_id: u64,
    },
}

/// Where a snapshot's `last_update_id` sits relative to an incremental range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPosition {
    /// Gap between the snapshot and this update; it cannot be applied.
    Before,
    /// The update bridges the snapshot: first one to apply.
    Within,
    /// Already contained in the snapshot; discard.
    After,
}

impl SequenceInfo {
    /// Classify a snapshot id against this incremental range.
    ///
    /// Returns `None` for snapshot events.
    pub fn snapshot_position(&self, last_update_id: u64) -> Option<SnapshotPosition> {
        let SequenceInfo::Incremental {
            first_update_id,
            final_update_id,
        } = *self
        else {
            return None;
        };

        let next_expected = last_update_id.saturating_add(1);
        let position = if final_update_id <= last_update_id {
            SnapshotPosition::After
        } else if first_update_id <= next_expected {
            SnapshotPosition::Within
        } else {
            SnapshotPosition::Before
        };
        Some(position)
    }

    /// Highest update id covered by the event.
    pub fn latest_update_id(&self) -> u64 {
        match *self {
            SequenceInfo::Snapshot { last_update_id } => last_update_id,
            SequenceInfo::Incremental { final_update_id, .. } => final_update_id,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            SequenceInfo::Snapshot { .. } => EventKind::Snapshot,
            SequenceInfo::Incremental { .. } => EventKind::IncrementalUpdate,
        }
    }
}

/// One unit flowing from a producer to the sink.
///
/// Fields are private: an event is never modified after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    sequence: SequenceInfo,
    payload: serde_json::Value,
}

#[derive(Serialize)]
struct WireEvent<'a> {
    connector: &'a str,
    #[serde(rename = "type")]
    kind: EventKind,
    data: &'a serde_json::Value,
}

impl Event {
    pub fn snapshot(last_update_id: u64, payload: serde_json::Value) -> Self {
        Self {
            sequence: SequenceInfo::Snapshot { last_update_id },
            payload,
        }
    }

    pub fn incremental(first_update_id: u64, final_update_id: u64, payload: serde_json::Value) -> Self {
        Self {
            sequence: SequenceInfo::Incremental {
                first_update_id,
                final_update_id,
            },
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.sequence.kind()
    }

    pub fn sequence(&self) -> SequenceInfo {
        self.sequence
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Encode as `{"connector":..,"type":1|2,"data":..}`.
    pub fn encode(&self, connector: &str) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&WireEvent {
            connector,
            kind: self.kind(),
            data: &self.payload,
        })
    }
}
