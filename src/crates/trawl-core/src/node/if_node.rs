//! Conditional node.

use crate::error::{GraphError, RunError};
use crate::globals::Globals;
use crate::msg::{broadcast, Msg};
use crate::node::{destroy_node, MsgReceiver, Node, NodeId, ParentChans, IN_CHAN_SIZE};
use std::any::Any;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Reads the predicate first, then forwards the chosen branch's output
/// under its own id. The unchosen branch's message, if it is ever
/// produced, stays unread in its buffer.
///
/// When the chosen branch streams, every element of the stream is
/// forwarded, so an If can stand between a For and its collection
/// dependency.
pub struct IfNode {
    id: NodeId,
    pred: Arc<dyn Node>,
    conseq: Arc<dyn Node>,
    alt: Arc<dyn Node>,
    pred_rx: Mutex<Option<MsgReceiver>>,
    conseq_rx: Mutex<Option<MsgReceiver>>,
    alt_rx: Mutex<Option<MsgReceiver>>,
    parent_chans: ParentChans,
}

impl IfNode {
    pub fn new(
        globals: &Arc<Globals>,
        id: NodeId,
        pred: Arc<dyn Node>,
        conseq: Arc<dyn Node>,
        alt: Arc<dyn Node>,
    ) -> Arc<IfNode> {
        let (pred_tx, pred_rx) = mpsc::channel(IN_CHAN_SIZE);
        let (conseq_tx, conseq_rx) = mpsc::channel(IN_CHAN_SIZE);
        let (alt_tx, alt_rx) = mpsc::channel(IN_CHAN_SIZE);
        pred.parent_chans().insert(id, pred_tx);
        conseq.parent_chans().insert(id, conseq_tx);
        alt.parent_chans().insert(id, alt_tx);

        let node = Arc::new(IfNode {
            id,
            pred,
            conseq,
            alt,
            pred_rx: Mutex::new(Some(pred_rx)),
            conseq_rx: Mutex::new(Some(conseq_rx)),
            alt_rx: Mutex::new(Some(alt_rx)),
            parent_chans: ParentChans::default(),
        });
        globals.register_node(id, node.clone());
        node
    }

    pub(crate) fn pred(&self) -> Arc<dyn Node> {
        self.pred.clone()
    }

    pub(crate) fn conseq(&self) -> Arc<dyn Node> {
        self.conseq.clone()
    }

    pub(crate) fn alt(&self) -> Arc<dyn Node> {
        self.alt.clone()
    }

    /// Forwards the chosen branch: a single message, or a whole stream
    /// when the first message is a stream element.
    async fn forward_branch(&self, rx: &mut MsgReceiver) {
        let first = match rx.recv().await {
            Some(msg) => msg,
            None => {
                let msg = Msg::error(
                    self.id,
                    true,
                    RunError::Protocol("branch channel closed without a message".into()),
                );
                broadcast(&msg, &self.parent_chans).await;
                return;
            }
        };

        let expected = match &first {
            Msg::Stream(s) => s.len.product(),
            _ => 1,
        };
        broadcast(&first.with_id(self.id), &self.parent_chans).await;

        let mut received = 1;
        while received < expected {
            match rx.recv().await {
                Some(msg) => {
                    broadcast(&msg.with_id(self.id), &self.parent_chans).await;
                    received += 1;
                }
                None => {
                    let msg = Msg::error(
                        self.id,
                        true,
                        RunError::IncompleteStream { received, expected },
                    );
                    broadcast(&msg, &self.parent_chans).await;
                    return;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Node for IfNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn parent_chans(&self) -> &ParentChans {
        &self.parent_chans
    }

    fn dependencies(&self) -> Vec<Arc<dyn Node>> {
        vec![self.pred.clone(), self.conseq.clone(), self.alt.clone()]
    }

    fn clone_node(&self, globals: &Arc<Globals>) -> Arc<dyn Node> {
        IfNode::new(
            globals,
            globals.generate_id(),
            self.pred.clone_node(globals),
            self.conseq.clone_node(globals),
            self.alt.clone_node(globals),
        )
    }

    async fn run(&self, _globals: &Arc<Globals>) {
        let pred_rx = self.pred_rx.lock().expect("if pred rx poisoned").take();
        let conseq_rx = self.conseq_rx.lock().expect("if conseq rx poisoned").take();
        let alt_rx = self.alt_rx.lock().expect("if alt rx poisoned").take();
        let (Some(mut pred_rx), Some(mut conseq_rx), Some(mut alt_rx)) =
            (pred_rx, conseq_rx, alt_rx)
        else {
            return;
        };

        match pred_rx.recv().await {
            Some(Msg::Error(e)) => {
                broadcast(&Msg::Error(e).with_id(self.id), &self.parent_chans).await;
            }
            Some(Msg::Value(v)) => match v.data {
                crate::value::Value::Bool(choice) => {
                    let rx = if choice { &mut conseq_rx } else { &mut alt_rx };
                    self.forward_branch(rx).await;
                }
                other => {
                    let msg = Msg::error(
                        self.id,
                        true,
                        RunError::Type(format!(
                            "if predicate must be a boolean, got {}",
                            other.kind()
                        )),
                    );
                    broadcast(&msg, &self.parent_chans).await;
                }
            },
            _ => {
                let msg = Msg::error(
                    self.id,
                    true,
                    RunError::Type("if predicate must be a boolean value".into()),
                );
                broadcast(&msg, &self.parent_chans).await;
            }
        }
        destroy_node(self);
    }

    fn write(&self, w: &mut dyn Write) -> Result<(), GraphError> {
        crate::io::write_if_node(self, w)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
