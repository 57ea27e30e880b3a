//! cpl-remote: transparent remote proxies and the worker dispatch loop.
//!
//! A coupling engine built from `cpl-coupling` runs unmodified whether its
//! children are local objects, [`MasterSolverProxy`] stand-ins for a single
//! remote peer, or proxies for a collective process group. Every Solver and
//! SharedState operation crosses the wire as one tagged command; workers
//! answer with one reply each, reduced on the master side when the target is
//! a group.

pub mod error;
pub mod protocol;
pub mod proxy;
pub mod transport;
pub mod worker;

pub use error::{RemoteError, RemoteResult};
pub use protocol::{Command, Handle, Reply, WireField};
pub use proxy::{ExchangerProxy, MasterDataProxy, MasterSolverProxy, RemoteProcess};
pub use transport::{channel_pair, ChannelTransport, Peer, Transport, WorkerEndpoint};
pub use worker::{HandleTable, Worker};
