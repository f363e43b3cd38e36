use std::cmp;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use log::{debug, info, warn};
use rand::Rng;

use crate::config::Config;
use crate::error::Result;
use crate::message::{Body, Envelope, LogEntry, BROADCAST};
use crate::timer::Timer;
use crate::transport::Transport;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Role {
    Follower,
    Candidate,
    Leader,
}

/// A put accepted by the leader but not yet committed. The client hears
/// nothing until the entry commits; if leadership is lost first, the
/// pending set is dropped and the client retries elsewhere.
struct PendingPut {
    client: String,
    mid: String,
}

/// Replica describes one member of the key-value cluster. It runs the
/// consensus algorithm over the given transport, keeping its log and the
/// committed key-value map consistent with the rest of the cluster.
pub struct Replica<T: Transport> {
    config: Config,

    /// Datagram channel to the cluster and its clients.
    transport: T,

    /// Current role; every replica boots as a Follower.
    role: Role,

    /// Current term. Never decreases.
    current_term: u64,

    /// Ballot record, term to candidate. At most one entry per term.
    voted_for: HashMap<u64, String>,

    /// Replicated operations, zero-indexed. Append-only except for
    /// truncation ordered by a newer leader.
    log: Vec<LogEntry>,

    /// Highest log index known committed, -1 when nothing is.
    committed_index: i64,

    /// Committed key-value state, the replay of the log up to
    /// `committed_index`.
    data: HashMap<String, String>,

    /// Best-known leader, `BROADCAST` when none.
    leader_id: String,

    /// Distinct voters for self in the election under way. Candidates only.
    votes: BTreeSet<String>,

    /// Per peer, the next log index to send it. Leaders only.
    next_index: BTreeMap<String, usize>,

    /// Log index to originating put request, awaiting commit. Leaders only.
    pending_puts: BTreeMap<usize, PendingPut>,

    /// Paces leader append rounds.
    heartbeat_timer: Timer,

    /// When this follower or candidate gives up on the current leader and
    /// starts an election.
    election_deadline: Instant,
}

impl<T: Transport> Replica<T> {
    pub fn new(config: Config, transport: T) -> Replica<T> {
        let heartbeat_timer = Timer::new(config.heartbeat_interval);
        let mut replica = Replica {
            transport,
            role: Role::Follower,
            current_term: 0,
            voted_for: HashMap::new(),
            log: Vec::new(),
            committed_index: -1,
            data: HashMap::new(),
            leader_id: BROADCAST.to_string(),
            votes: BTreeSet::new(),
            next_index: BTreeMap::new(),
            pending_puts: BTreeMap::new(),
            heartbeat_timer,
            election_deadline: Instant::now(),
            config,
        };
        replica.reset_election_deadline();
        replica
    }

    /// Run the event loop forever. Returns only on a transport error.
    pub fn run(&mut self) -> Result<()> {
        loop {
            match self.role {
                Role::Leader => self.poll_as_leader()?,
                Role::Follower => self.poll_as_follower()?,
                Role::Candidate => self.poll_as_candidate()?,
            }

            if self.role == Role::Leader {
                self.advance_commit_index()?;
            }
        }
    }

    fn poll_as_leader(&mut self) -> Result<()> {
        if self.heartbeat_timer.fired() {
            self.broadcast_append_entries()?;
            self.heartbeat_timer.renew();
        }

        let quantum = cmp::min(self.config.heartbeat_interval, self.config.quantum);
        if let Some(env) = self.transport.recv_deadline(Instant::now() + quantum) {
            self.dispatch(env)?;
        }
        Ok(())
    }

    fn poll_as_follower(&mut self) -> Result<()> {
        let deadline = cmp::min(
            self.election_deadline,
            Instant::now() + self.config.quantum,
        );
        match self.transport.recv_deadline(deadline) {
            Some(env) => self.dispatch(env)?,
            None => {
                if Instant::now() >= self.election_deadline {
                    self.become_candidate()?;
                }
            }
        }
        Ok(())
    }

    fn poll_as_candidate(&mut self) -> Result<()> {
        let deadline = cmp::min(
            self.election_deadline,
            Instant::now() + self.config.quantum,
        );
        match self.transport.recv_deadline(deadline) {
            Some(env) => self.dispatch(env)?,
            // The election went nowhere; start over with a fresh term.
            None => {
                if Instant::now() >= self.election_deadline {
                    self.become_candidate()?;
                }
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, env: Envelope) -> Result<()> {
        if env.dst != self.config.id && env.dst != BROADCAST {
            return Ok(());
        }

        // A newer term backed by a real leader demotes this replica before
        // any role-specific handling.
        if env.term > self.current_term && env.leader != BROADCAST {
            info!(
                "{}: adopting term {} from {}",
                self.config.id, env.term, env.src
            );
            self.leader_id = env.leader.clone();
            self.become_follower(env.term);
        }

        match self.role {
            Role::Leader => self.process_message_as_leader(env),
            Role::Candidate => self.process_message_as_candidate(env),
            Role::Follower => self.process_message_as_follower(env),
        }
    }

    fn process_message_as_leader(&mut self, env: Envelope) -> Result<()> {
        match env.body {
            Body::Get { key, mid } => self.serve_get(&env.src, &key, mid),
            Body::Put { key, value, mid } => {
                self.accept_put(env.src, key, value, mid);
                Ok(())
            }
            Body::Ok {
                next_index: Some(reported),
                ..
            } => {
                // The follower reports its resulting log length; that is
                // where replication to it resumes.
                let capped = (reported as usize).min(self.log.len());
                self.next_index.insert(env.src, capped);
                Ok(())
            }
            Body::Fail { mid: None } => {
                let fallback = self.log.len();
                let slot = self.next_index.entry(env.src).or_insert(fallback);
                *slot = slot.saturating_sub(1);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn process_message_as_follower(&mut self, env: Envelope) -> Result<()> {
        match env.body {
            Body::Get { mid, .. } | Body::Put { mid, .. } => self.redirect(&env.src, mid),
            Body::RequestVote {
                last_index,
                last_term,
            } => self.consider_vote(env.src, env.term, last_index, last_term),
            Body::AppendEntries {
                committed,
                next_index,
                last_term,
                entries,
                ..
            } => self.accept_append_entries(
                env.src, env.term, committed, next_index, last_term, entries,
            ),
            _ => Ok(()),
        }
    }

    fn process_message_as_candidate(&mut self, env: Envelope) -> Result<()> {
        match env.body {
            Body::AppendEntries { .. } => {
                // Some replica won this term or a newer one; concede and
                // let the follower path take the append.
                if env.term >= self.current_term {
                    info!(
                        "{}: conceding term {} to {}",
                        self.config.id, env.term, env.src
                    );
                    self.become_follower(env.term);
                    return self.process_message_as_follower(env);
                }
                Ok(())
            }
            Body::RequestVote {
                last_index,
                last_term,
            } => self.consider_vote(env.src, env.term, last_index, last_term),
            Body::Vote { vote } => {
                if vote != self.config.id {
                    return Ok(());
                }
                self.votes.insert(env.src);
                if self.votes.len() >= self.config.majority() {
                    self.become_leader()?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Grant or silently refuse a vote. A term gets at most one ballot
    /// from this replica, and a candidate whose log is behind ours gets
    /// none at all.
    fn consider_vote(
        &mut self,
        candidate: String,
        term: u64,
        last_index: i64,
        last_term: i64,
    ) -> Result<()> {
        if self.voted_for.contains_key(&term) {
            return Ok(());
        }
        if !self.candidate_is_current(last_index, last_term) {
            debug!(
                "{}: refusing vote for {} in term {}, candidate log is behind",
                self.config.id, candidate, term
            );
            return Ok(());
        }

        self.voted_for.insert(term, candidate.clone());
        self.send(
            &candidate,
            Body::Vote {
                vote: candidate.clone(),
            },
        )?;
        self.reset_election_deadline();
        Ok(())
    }

    /// The election restriction: only candidates whose log is at least as
    /// up-to-date as ours can be trusted to carry every committed entry.
    fn candidate_is_current(&self, last_index: i64, last_term: i64) -> bool {
        let (own_index, own_term) = self.last_log_position();
        last_term > own_term || (last_term == own_term && last_index >= own_index)
    }

    fn accept_append_entries(
        &mut self,
        leader: String,
        term: u64,
        committed: i64,
        next_index: u64,
        last_term: i64,
        mut entries: Vec<LogEntry>,
    ) -> Result<()> {
        // A deposed leader may still be emitting appends. Refusing without
        // touching the log keeps committed entries out of its reach.
        if term < self.current_term {
            warn!(
                "{}: rejecting append from {} at stale term {}",
                self.config.id, leader, term
            );
            return self.send(&leader, Body::Fail { mid: None });
        }

        self.leader_id = leader.clone();
        self.reset_election_deadline();

        // Commit information flows regardless of how the log match goes.
        self.apply_committed(committed);

        let next = next_index as usize;
        if next == 0 {
            // The leader has nothing earlier to match against: adopt its
            // log wholesale.
            self.log = entries;
        } else {
            let matched =
                next - 1 < self.log.len() && self.log[next - 1].term as i64 == last_term;
            if !matched {
                return self.send(&leader, Body::Fail { mid: None });
            }
            self.log.truncate(next);
            self.log.append(&mut entries);
        }

        let length = self.log.len() as u64;
        self.send(
            &leader,
            Body::Ok {
                mid: None,
                value: None,
                next_index: Some(length),
            },
        )
    }

    /// Adopt the leader's committed index, bounded by what is actually in
    /// the local log, and replay the newly committed entries.
    fn apply_committed(&mut self, committed: i64) {
        let target = committed.min(self.log.len() as i64 - 1);
        if target > self.committed_index {
            self.apply_up_to(target);
        }
    }

    fn apply_up_to(&mut self, target: i64) {
        for i in (self.committed_index + 1)..=target {
            let entry = &self.log[i as usize];
            self.data.insert(entry.key.clone(), entry.value.clone());
        }
        self.committed_index = target;
    }

    fn serve_get(&self, client: &str, key: &str, mid: String) -> Result<()> {
        match self.data.get(key) {
            Some(value) => self.send(
                client,
                Body::Ok {
                    mid: Some(mid),
                    value: Some(value.clone()),
                    next_index: None,
                },
            ),
            None => self.send(client, Body::Fail { mid: Some(mid) }),
        }
    }

    /// Append the put to the log and park the request. The acknowledgement
    /// goes out when the entry commits.
    fn accept_put(&mut self, client: String, key: String, value: String, mid: String) {
        let index = self.log.len();
        self.log.push(LogEntry {
            index: index as u64,
            term: self.current_term,
            key,
            value,
        });
        self.pending_puts.insert(index, PendingPut { client, mid });
    }

    fn redirect(&self, client: &str, mid: String) -> Result<()> {
        debug!(
            "{}: redirecting client {} to {}",
            self.config.id, client, self.leader_id
        );
        self.send(client, Body::Redirect { mid })
    }

    /// One append round: every peer gets the log suffix it is missing, or
    /// an empty heartbeat when it has everything.
    fn broadcast_append_entries(&mut self) -> Result<()> {
        for peer in &self.config.peers {
            let next = self
                .next_index
                .get(peer)
                .copied()
                .unwrap_or(self.log.len())
                .min(self.log.len());
            let (last_index, last_term) = if next == 0 {
                (-1, -1)
            } else {
                let prev = &self.log[next - 1];
                (prev.index as i64, prev.term as i64)
            };
            self.send(
                peer,
                Body::AppendEntries {
                    committed: self.committed_index,
                    next_index: next as u64,
                    last_index,
                    last_term,
                    entries: self.log[next..].to_vec(),
                },
            )?;
        }

        // Emitting a batch also quiets this replica's own election timer.
        self.reset_election_deadline();
        Ok(())
    }

    /// Move the commit index to the highest entry replicated on a quorum,
    /// then answer every put whose entry made it in.
    fn advance_commit_index(&mut self) -> Result<()> {
        if self.log.is_empty() {
            return Ok(());
        }

        let target = if self.config.peers.is_empty() {
            // A lone replica is its own quorum.
            self.log.len() as i64 - 1
        } else {
            let mut nexts: Vec<usize> = self.next_index.values().copied().collect();
            nexts.sort_unstable_by(|a, b| b.cmp(a));
            let slot = (self.config.majority() - 1).min(nexts.len() - 1);
            nexts[slot] as i64 - 1
        };

        if target <= self.committed_index {
            return Ok(());
        }
        // Only an entry from this term proves the quorum is current; older
        // entries commit transitively through it.
        if self.log[target as usize].term != self.current_term {
            return Ok(());
        }

        self.apply_up_to(target);
        debug!("{}: commit index now {}", self.config.id, target);

        // Split the committed prefix out of the pending set and answer it.
        let still_pending = self.pending_puts.split_off(&(target as usize + 1));
        let ready = std::mem::replace(&mut self.pending_puts, still_pending);
        for (_, pending) in ready {
            self.send(
                &pending.client,
                Body::Ok {
                    mid: Some(pending.mid),
                    value: None,
                    next_index: None,
                },
            )?;
        }
        Ok(())
    }

    fn become_follower(&mut self, term: u64) {
        self.current_term = term;
        self.role = Role::Follower;
        self.votes.clear();
        self.next_index.clear();
        // Unacked proposals die with leadership; clients retry them.
        self.pending_puts.clear();
        self.reset_election_deadline();
    }

    fn become_candidate(&mut self) -> Result<()> {
        self.current_term += 1;
        self.role = Role::Candidate;
        self.leader_id = BROADCAST.to_string();
        info!(
            "{}: starting election for term {}",
            self.config.id, self.current_term
        );

        // Vote for self, then solicit everyone else.
        self.votes.clear();
        self.votes.insert(self.config.id.clone());
        self.voted_for
            .insert(self.current_term, self.config.id.clone());

        let (last_index, last_term) = self.last_log_position();
        self.send(
            BROADCAST,
            Body::RequestVote {
                last_index,
                last_term,
            },
        )?;
        self.reset_election_deadline();

        // A single-replica cluster elects itself on the spot.
        if self.votes.len() >= self.config.majority() {
            self.become_leader()?;
        }
        Ok(())
    }

    fn become_leader(&mut self) -> Result<()> {
        info!(
            "{}: elected leader for term {}",
            self.config.id, self.current_term
        );
        self.role = Role::Leader;
        self.leader_id = self.config.id.clone();
        self.votes.clear();
        self.pending_puts.clear();

        self.next_index.clear();
        for peer in &self.config.peers {
            self.next_index.insert(peer.clone(), self.log.len());
        }

        // The first append round doubles as the first heartbeat.
        self.broadcast_append_entries()?;
        self.heartbeat_timer.renew();
        Ok(())
    }

    fn last_log_position(&self) -> (i64, i64) {
        match self.log.last() {
            Some(entry) => (entry.index as i64, entry.term as i64),
            None => (-1, -1),
        }
    }

    fn reset_election_deadline(&mut self) {
        let (lo, hi) = self.config.election_timeout;
        self.election_deadline = Instant::now() + rand::thread_rng().gen_range(lo..=hi);
    }

    fn send(&self, dst: &str, body: Body) -> Result<()> {
        self.transport.send(&Envelope {
            src: self.config.id.clone(),
            dst: dst.to_string(),
            leader: self.leader_id.clone(),
            term: self.current_term,
            body,
        })
    }
}
