use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Sentinel identifier meaning "no specific leader known". Clients address
/// their first request here and replicas name it as their leader until an
/// election has produced one.
pub const BROADCAST: &str = "FFFF";

/// A single replicated operation with its position in the log and the term
/// of the leader that appended it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub key: String,
    pub value: String,
}

/// One wire message. The common header travels alongside a flattened,
/// `type`-tagged body, so the encoded form is a single flat JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub src: String,
    pub dst: String,
    /// Sender's best-known leader id, `BROADCAST` when it has none.
    pub leader: String,
    pub term: u64,
    #[serde(flatten)]
    pub body: Body,
}

/// Message bodies that replicas and clients pass between each other. One
/// variant per wire `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Body {
    /// Client read of a single key.
    Get {
        key: String,
        #[serde(rename = "MID")]
        mid: String,
    },
    /// Client write of a single key.
    Put {
        key: String,
        value: String,
        #[serde(rename = "MID")]
        mid: String,
    },
    /// Candidate soliciting votes. Carries the candidate's last log
    /// position so voters can refuse candidates with stale logs.
    RequestVote { last_index: i64, last_term: i64 },
    /// A favorable ballot naming the candidate voted for.
    Vote { vote: String },
    /// Leader-to-follower log synchronization; doubles as the heartbeat
    /// when `entries` is empty.
    AppendEntries {
        committed: i64,
        next_index: u64,
        last_index: i64,
        last_term: i64,
        entries: Vec<LogEntry>,
    },
    /// Success reply. To a client it echoes `MID` (and the value for a
    /// read); between replicas it reports the follower's new log length.
    Ok {
        #[serde(rename = "MID", default, skip_serializing_if = "Option::is_none")]
        mid: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_index: Option<u64>,
    },
    /// Failure reply, to a client (echoed `MID`) or to a leader whose
    /// append did not match.
    Fail {
        #[serde(rename = "MID", default, skip_serializing_if = "Option::is_none")]
        mid: Option<String>,
    },
    /// A non-leader's refusal to serve a client; the envelope's `leader`
    /// field carries its best guess at who can.
    Redirect {
        #[serde(rename = "MID")]
        mid: String,
    },
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(raw: &[u8]) -> Result<Envelope> {
        Ok(serde_json::from_slice(raw)?)
    }
}
