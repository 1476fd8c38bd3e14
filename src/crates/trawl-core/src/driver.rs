//! Graph startup and result delivery.
//!
//! Every registered node runs as one independent task; For nodes start
//! their runtime clones themselves. The result node gets one extra channel
//! attached outside the registry, on which the caller reads the final
//! message — a single value, or a stream read until the product of its
//! length index has been delivered.

use crate::error::{GraphError, RunError};
use crate::globals::Globals;
use crate::msg::{Msg, StreamMsg};
use crate::node::{MsgReceiver, Node, IN_CHAN_SIZE};
use crate::stream::StreamIndex;
use crate::value::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Starts every node currently in the registry. Nodes already started
/// (by an earlier call or a For expansion) are skipped.
pub fn start(globals: &Arc<Globals>) {
    let nodes = globals.nodes();
    tracing::debug!(count = nodes.len(), "starting graph nodes");
    for node in nodes {
        if globals.mark_started(node.id()) {
            let g = globals.clone();
            tokio::spawn(async move { node.run(&g).await });
        }
    }
}

/// Attaches a fresh channel to the result node and returns the receiving
/// end. Must be called before [`start`].
pub fn attach_result(globals: &Arc<Globals>) -> Result<MsgReceiver, GraphError> {
    let result = globals.result_node().ok_or(GraphError::MissingResultNode)?;
    let (tx, rx) = mpsc::channel(IN_CHAN_SIZE);
    result.parent_chans().insert(globals.generate_id(), tx);
    Ok(rx)
}

/// The final outcome of a graph run.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A single final value.
    Value(Value),
    /// A stream of elements, in arrival order, with the stream's shape.
    Stream {
        len: StreamIndex,
        items: Vec<StreamMsg>,
    },
    /// The run ended with an error.
    Error(RunError),
}

/// Reads the final message (and, for a stream, every subsequent element)
/// from a result channel.
pub async fn collect_result(mut rx: MsgReceiver) -> Outcome {
    match rx.recv().await {
        None => Outcome::Error(RunError::Protocol(
            "result channel closed without a message".into(),
        )),
        Some(Msg::Error(e)) => Outcome::Error(e.error),
        Some(Msg::Value(v)) => Outcome::Value(v.data),
        Some(Msg::Stream(first)) => {
            let expected = first.len.product();
            let len = first.len.clone();
            let mut items = vec![first];
            while items.len() < expected {
                match rx.recv().await {
                    Some(Msg::Stream(s)) => items.push(s),
                    Some(Msg::Error(e)) => return Outcome::Error(e.error),
                    Some(Msg::Value(_)) => {
                        return Outcome::Error(RunError::Protocol(
                            "value message inside a result stream".into(),
                        ))
                    }
                    None => {
                        return Outcome::Error(RunError::IncompleteStream {
                            received: items.len(),
                            expected,
                        })
                    }
                }
            }
            Outcome::Stream { len, items }
        }
    }
}

/// Runs a loaded graph to completion: attaches the result channel, starts
/// every node and collects the final message.
pub async fn execute(globals: &Arc<Globals>) -> Result<Outcome, GraphError> {
    let rx = attach_result(globals)?;
    start(globals);
    Ok(collect_result(rx).await)
}
