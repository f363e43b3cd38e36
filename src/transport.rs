use std::os::unix::net::UnixDatagram;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::debug;

use crate::config::MAX_DATAGRAM;
use crate::error::{Error, Result};
use crate::message::Envelope;

/// Interface a replica uses to talk to the rest of the cluster and to its
/// clients. The replica owns its endpoint exclusively for the process
/// lifetime; this seam exists so tests can swap the socket for channels.
pub trait Transport {
    /// Send one message as a single framed datagram.
    fn send(&self, env: &Envelope) -> Result<()>;

    /// Wait for the next decodable inbound message, giving up at the
    /// deadline. `None` means the deadline passed first.
    fn recv_deadline(&self, deadline: Instant) -> Option<Envelope>;
}

/// Transport over a pre-bound local datagram endpoint named by the replica's
/// own id. A reader thread decodes datagrams off the socket and forwards
/// them over a channel so the event loop can block with a deadline.
pub struct DatagramTransport {
    socket: UnixDatagram,
    inbox: Receiver<Envelope>,
}

impl DatagramTransport {
    pub fn connect(endpoint: &str) -> Result<DatagramTransport> {
        let socket = UnixDatagram::unbound()?;
        socket.connect(endpoint)?;

        let reader = socket.try_clone()?;
        let (tx, rx): (Sender<Envelope>, Receiver<Envelope>) = unbounded();
        thread::spawn(move || {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                match reader.recv(&mut buf) {
                    // Empty and unparseable datagrams are dropped here so
                    // the replica only ever sees well-formed messages.
                    Ok(0) => continue,
                    Ok(n) => match Envelope::decode(&buf[..n]) {
                        Ok(env) => {
                            if tx.send(env).is_err() {
                                return;
                            }
                        }
                        Err(err) => debug!("dropping undecodable datagram: {}", err),
                    },
                    Err(_) => return,
                }
            }
        });

        Ok(DatagramTransport { socket, inbox: rx })
    }
}

impl Transport for DatagramTransport {
    fn send(&self, env: &Envelope) -> Result<()> {
        let raw = env.encode()?;
        self.socket.send(&raw)?;
        Ok(())
    }

    fn recv_deadline(&self, deadline: Instant) -> Option<Envelope> {
        self.inbox.recv_deadline(deadline).ok()
    }
}

/// Channel-backed transport for driving a replica in tests. Cloning yields
/// a handle onto the same pair of queues, so a test keeps one end while the
/// replica owns the other.
#[cfg(test)]
#[derive(Clone)]
pub struct LoopbackTransport {
    inbox_tx: Sender<Envelope>,
    inbox: Receiver<Envelope>,
    outbox_tx: Sender<Envelope>,
    outbox: Receiver<Envelope>,
}

#[cfg(test)]
impl LoopbackTransport {
    pub fn new() -> LoopbackTransport {
        let (inbox_tx, inbox) = unbounded();
        let (outbox_tx, outbox) = unbounded();
        LoopbackTransport {
            inbox_tx,
            inbox,
            outbox_tx,
            outbox,
        }
    }

    /// Queue a message for the replica to receive.
    pub fn inject(&self, env: Envelope) {
        self.inbox_tx.send(env).unwrap();
    }

    /// Drain everything the replica has sent so far.
    pub fn sent(&self) -> Vec<Envelope> {
        self.outbox.try_iter().collect()
    }
}

#[cfg(test)]
impl Transport for LoopbackTransport {
    fn send(&self, env: &Envelope) -> Result<()> {
        self.outbox_tx
            .send(env.clone())
            .map_err(|_| Error::Disconnected)
    }

    fn recv_deadline(&self, deadline: Instant) -> Option<Envelope> {
        self.inbox.recv_deadline(deadline).ok()
    }
}
