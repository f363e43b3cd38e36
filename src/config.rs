use std::time::Duration;

/// Lower bound of the randomized election timeout.
pub const ELECTION_TIMEOUT_MIN: Duration = Duration::from_millis(250);

/// Upper bound of the randomized election timeout.
pub const ELECTION_TIMEOUT_MAX: Duration = Duration::from_millis(500);

/// Longest the event loop will block waiting for transport input before
/// re-checking its deadlines.
pub const RECV_QUANTUM: Duration = Duration::from_millis(100);

/// Largest datagram the transport will send or receive.
pub const MAX_DATAGRAM: usize = 32 * 1024;

/// Immutable per-process configuration, fixed at startup and handed once
/// into the replica constructor.
#[derive(Debug, Clone)]
pub struct Config {
    /// Identifier of this replica; also names its datagram endpoint.
    pub id: String,

    /// Identifiers of every other replica in the cluster.
    pub peers: Vec<String>,

    /// Election timeout range; a fresh uniform draw is taken per reset.
    pub election_timeout: (Duration, Duration),

    /// Interval between leader append rounds. Kept well below the minimum
    /// election timeout so followers never time out under a live leader.
    pub heartbeat_interval: Duration,

    /// Bound on a single blocking transport wait.
    pub quantum: Duration,
}

impl Config {
    pub fn new(id: String, peers: Vec<String>) -> Config {
        Config {
            id,
            peers,
            election_timeout: (ELECTION_TIMEOUT_MIN, ELECTION_TIMEOUT_MAX),
            heartbeat_interval: ELECTION_TIMEOUT_MIN / 10,
            quantum: RECV_QUANTUM,
        }
    }

    /// Smallest number of replicas, this one included, that constitutes a
    /// quorum of the cluster.
    pub fn majority(&self) -> usize {
        (self.peers.len() + 1) / 2 + 1
    }
}
