//! Messages exchanged between nodes.
//!
//! Three variants travel over node channels: a single completed value, one
//! element of a stream (tagged with its position and the total shape), and
//! an error. Every message carries the sender's node id and a pass-up flag
//! marking completed data flowing from a dependency to its dependent.
//!
//! Messages are immutable once built except for the id rewrite a node
//! performs when relabeling a received message as its own ([`Msg::with_id`]).

use crate::error::RunError;
use crate::node::{NodeId, ParentChans};
use crate::stream::StreamIndex;
use crate::value::Value;

/// A completed value.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueMsg {
    pub id: NodeId,
    pub pass_up: bool,
    pub data: Value,
}

/// One element of a stream. `idx` and `len` always have the same number of
/// components: one per For above the sender that propagates streams.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamMsg {
    pub id: NodeId,
    pub pass_up: bool,
    pub idx: StreamIndex,
    pub len: StreamIndex,
    pub data: Value,
}

/// A runtime failure, forwarded unchanged through intermediate nodes.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrMsg {
    pub id: NodeId,
    pub pass_up: bool,
    pub error: RunError,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Msg {
    Value(ValueMsg),
    Stream(StreamMsg),
    Error(ErrMsg),
}

impl Msg {
    pub fn value(id: NodeId, pass_up: bool, data: Value) -> Msg {
        Msg::Value(ValueMsg { id, pass_up, data })
    }

    pub fn stream(id: NodeId, pass_up: bool, idx: StreamIndex, len: StreamIndex, data: Value) -> Msg {
        Msg::Stream(StreamMsg {
            id,
            pass_up,
            idx,
            len,
            data,
        })
    }

    pub fn error(id: NodeId, pass_up: bool, error: RunError) -> Msg {
        Msg::Error(ErrMsg { id, pass_up, error })
    }

    /// The id of the node that sent the message.
    pub fn id(&self) -> NodeId {
        match self {
            Msg::Value(m) => m.id,
            Msg::Stream(m) => m.id,
            Msg::Error(m) => m.id,
        }
    }

    /// True when completed data is flowing from a dependency to its
    /// dependent.
    pub fn pass_up(&self) -> bool {
        match self {
            Msg::Value(m) => m.pass_up,
            Msg::Stream(m) => m.pass_up,
            Msg::Error(m) => m.pass_up,
        }
    }

    /// A copy of the message with the sender id replaced.
    pub fn with_id(mut self, id: NodeId) -> Msg {
        match &mut self {
            Msg::Value(m) => m.id = id,
            Msg::Stream(m) => m.id = id,
            Msg::Error(m) => m.id = id,
        }
        self
    }
}

/// Sends a copy of `msg` to every parent channel. Send failures mean the
/// parent already finished and dropped its receiver; those are ignored.
pub async fn broadcast(msg: &Msg, parents: &ParentChans) {
    for tx in parents.senders() {
        tx.send(msg.clone()).await.ok();
    }
}
