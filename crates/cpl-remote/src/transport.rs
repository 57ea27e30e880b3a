//! Blocking message transport between a master and its workers.
//!
//! The model is synchronous send/receive over a fixed set of peers; a caller
//! blocks until the peer reaches the matching call. The in-process transport
//! here runs a worker on its own thread over a channel pair; other transports
//! plug in behind the same trait.

use std::sync::mpsc::{self, Receiver, Sender};

use cpl_state::Field;

use crate::error::{RemoteError, RemoteResult};
use crate::protocol::{Command, Reply};

/// One blocking connection to a single peer.
pub trait Transport<F: Field>: Send {
    fn send(&self, command: Command<F>) -> RemoteResult<()>;
    fn recv(&self) -> RemoteResult<Reply<F>>;
}

/// Master side of an in-process channel connection.
pub struct ChannelTransport<F: Field> {
    tx: Sender<Command<F>>,
    rx: Receiver<Reply<F>>,
}

/// Worker side of an in-process channel connection.
pub struct WorkerEndpoint<F: Field> {
    rx: Receiver<Command<F>>,
    tx: Sender<Reply<F>>,
}

/// A connected (master, worker) endpoint pair.
pub fn channel_pair<F: Field>() -> (ChannelTransport<F>, WorkerEndpoint<F>) {
    let (cmd_tx, cmd_rx) = mpsc::channel();
    let (reply_tx, reply_rx) = mpsc::channel();
    (
        ChannelTransport {
            tx: cmd_tx,
            rx: reply_rx,
        },
        WorkerEndpoint {
            rx: cmd_rx,
            tx: reply_tx,
        },
    )
}

impl<F: Field> Transport<F> for ChannelTransport<F> {
    fn send(&self, command: Command<F>) -> RemoteResult<()> {
        self.tx.send(command).map_err(|_| RemoteError::Disconnected)
    }

    fn recv(&self) -> RemoteResult<Reply<F>> {
        self.rx.recv().map_err(|_| RemoteError::Disconnected)
    }
}

impl<F: Field> WorkerEndpoint<F> {
    pub fn recv(&self) -> RemoteResult<Command<F>> {
        self.rx.recv().map_err(|_| RemoteError::Disconnected)
    }

    pub fn send(&self, reply: Reply<F>) -> RemoteResult<()> {
        self.tx.send(reply).map_err(|_| RemoteError::Disconnected)
    }
}

/// One peer or a collective process group.
///
/// The single tagged variant replaces scattered is-this-a-group branching:
/// point-to-point and collective behavior differ in exactly two places,
/// [`Peer::broadcast`] and [`Peer::gather`].
pub enum Peer<F: Field> {
    Single(Box<dyn Transport<F>>),
    Group(Vec<Box<dyn Transport<F>>>),
}

impl<F: Field> Peer<F> {
    pub fn len(&self) -> usize {
        match self {
            Peer::Single(_) => 1,
            Peer::Group(members) => members.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send one command to every member.
    pub fn broadcast(&self, command: &Command<F>) -> RemoteResult<()>
    where
        Command<F>: Clone,
    {
        match self {
            Peer::Single(t) => t.send(command.clone()),
            Peer::Group(members) => {
                for t in members {
                    t.send(command.clone())?;
                }
                Ok(())
            }
        }
    }

    /// Collect one reply from every member, in member order.
    pub fn gather(&self) -> RemoteResult<Vec<Reply<F>>> {
        match self {
            Peer::Single(t) => Ok(vec![t.recv()?]),
            Peer::Group(members) => members.iter().map(|t| t.recv()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpl_state::DenseField;

    #[test]
    fn disconnected_send_is_an_error() {
        let (master, worker) = channel_pair::<DenseField>();
        drop(worker);
        assert!(matches!(
            master.send(Command::Init),
            Err(RemoteError::Disconnected)
        ));
    }

    #[test]
    fn pair_round_trips_a_message() {
        let (master, worker) = channel_pair::<DenseField>();
        master.send(Command::Solve).unwrap();
        let cmd = worker.recv().unwrap();
        assert_eq!(cmd.tag(), 6);
        worker.send(Reply::Status(true)).unwrap();
        assert!(matches!(master.recv().unwrap(), Reply::Status(true)));
    }
}
