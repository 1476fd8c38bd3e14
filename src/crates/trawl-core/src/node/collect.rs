//! Stream collection node.

use crate::error::{GraphError, RunError};
use crate::globals::Globals;
use crate::msg::{broadcast, Msg};
use crate::node::{destroy_node, MsgReceiver, Node, NodeId, ParentChans, IN_CHAN_SIZE};
use crate::stream::DataTree;
use std::any::Any;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Consumes a stream and reassembles it into a nested array.
///
/// The first stream element fixes the total shape (its length index); a
/// data tree of that shape buffers elements at their indices. Once every
/// slot of the product space has been filled the tree flattens into one
/// value message.
pub struct CollectNode {
    id: NodeId,
    node: Arc<dyn Node>,
    rx: Mutex<Option<MsgReceiver>>,
    parent_chans: ParentChans,
}

impl CollectNode {
    pub fn new(globals: &Arc<Globals>, id: NodeId, node: Arc<dyn Node>) -> Arc<CollectNode> {
        let (tx, rx) = mpsc::channel(IN_CHAN_SIZE);
        node.parent_chans().insert(id, tx);

        let collect = Arc::new(CollectNode {
            id,
            node,
            rx: Mutex::new(Some(rx)),
            parent_chans: ParentChans::default(),
        });
        globals.register_node(id, collect.clone());
        collect
    }

    pub(crate) fn node(&self) -> Arc<dyn Node> {
        self.node.clone()
    }

    async fn gather(&self, rx: &mut MsgReceiver) -> Msg {
        let first = match rx.recv().await {
            Some(Msg::Stream(s)) => s,
            Some(Msg::Error(e)) => return Msg::Error(e).with_id(self.id),
            Some(_) => {
                return Msg::error(
                    self.id,
                    true,
                    RunError::Protocol("collect expects stream messages".into()),
                )
            }
            None => {
                return Msg::error(
                    self.id,
                    true,
                    RunError::Protocol("stream closed before any element arrived".into()),
                )
            }
        };

        let expected = first.len.product();
        let mut results = DataTree::from_lens(&first.len);
        if let Err(e) = results.set(&first.idx, first.data) {
            return Msg::error(self.id, true, e);
        }

        let mut received = 1;
        while received < expected {
            match rx.recv().await {
                Some(Msg::Stream(s)) => {
                    if let Err(e) = results.set(&s.idx, s.data) {
                        return Msg::error(self.id, true, e);
                    }
                    received += 1;
                }
                Some(Msg::Error(e)) => return Msg::Error(e).with_id(self.id),
                Some(_) => {
                    return Msg::error(
                        self.id,
                        true,
                        RunError::Protocol("collect expects stream messages".into()),
                    )
                }
                None => {
                    return Msg::error(
                        self.id,
                        true,
                        RunError::IncompleteStream { received, expected },
                    )
                }
            }
        }

        Msg::value(self.id, true, results.data())
    }
}

#[async_trait::async_trait]
impl Node for CollectNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn parent_chans(&self) -> &ParentChans {
        &self.parent_chans
    }

    fn dependencies(&self) -> Vec<Arc<dyn Node>> {
        vec![self.node.clone()]
    }

    fn clone_node(&self, globals: &Arc<Globals>) -> Arc<dyn Node> {
        CollectNode::new(
            globals,
            globals.generate_id(),
            self.node.clone_node(globals),
        )
    }

    async fn run(&self, _globals: &Arc<Globals>) {
        let Some(mut rx) = self.rx.lock().expect("collect rx poisoned").take() else {
            return;
        };
        let msg = self.gather(&mut rx).await;
        broadcast(&msg, &self.parent_chans).await;
        destroy_node(self);
    }

    fn write(&self, w: &mut dyn Write) -> Result<(), GraphError> {
        crate::io::write_collect_node(self, w)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ValueNode;
    use crate::stream::StreamIndex;
    use crate::value::Value;

    #[tokio::test]
    async fn reassembles_out_of_order_stream() {
        let globals = Globals::new();
        let dep = ValueNode::new(&globals, globals.generate_id(), Value::Null);
        let collect = CollectNode::new(&globals, globals.generate_id(), dep.clone() as Arc<dyn Node>);
        let (tx, mut rx) = mpsc::channel(1);
        collect.parent_chans().insert(99, tx);

        let sender = dep.parent_chans().senders()[0].clone();
        let len = StreamIndex::single(3);
        for i in [2usize, 0, 1] {
            sender
                .send(Msg::stream(
                    dep.id(),
                    true,
                    StreamIndex::single(i),
                    len.clone(),
                    Value::Int(i as i32 * 10),
                ))
                .await
                .unwrap();
        }
        collect.run(&globals).await;

        assert_eq!(
            rx.recv().await.unwrap(),
            Msg::value(
                collect.id(),
                true,
                Value::List(vec![Value::Int(0), Value::Int(10), Value::Int(20)])
            )
        );
    }

    #[tokio::test]
    async fn value_input_is_a_protocol_error() {
        let globals = Globals::new();
        let dep = ValueNode::new(&globals, globals.generate_id(), Value::Int(1));
        let collect = CollectNode::new(&globals, globals.generate_id(), dep.clone() as Arc<dyn Node>);
        let (tx, mut rx) = mpsc::channel(1);
        collect.parent_chans().insert(99, tx);

        dep.run(&globals).await;
        collect.run(&globals).await;

        match rx.recv().await.unwrap() {
            Msg::Error(e) => assert!(matches!(e.error, RunError::Protocol(_))),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn incomplete_stream_is_an_error() {
        let globals = Globals::new();
        let dep = ValueNode::new(&globals, globals.generate_id(), Value::Null);
        let collect = CollectNode::new(&globals, globals.generate_id(), dep.clone() as Arc<dyn Node>);
        let (tx, mut rx) = mpsc::channel(1);
        collect.parent_chans().insert(99, tx);

        let sender = dep.parent_chans().senders()[0].clone();
        sender
            .send(Msg::stream(
                dep.id(),
                true,
                StreamIndex::single(0),
                StreamIndex::single(2),
                Value::Int(1),
            ))
            .await
            .unwrap();
        // Drop every sender into the collect node before the second
        // element arrives.
        drop(sender);
        dep.parent_chans().clear();

        collect.run(&globals).await;
        match rx.recv().await.unwrap() {
            Msg::Error(e) => {
                assert_eq!(
                    e.error,
                    RunError::IncompleteStream {
                        received: 1,
                        expected: 2
                    }
                )
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn out_of_range_index_is_an_error() {
        let globals = Globals::new();
        let dep = ValueNode::new(&globals, globals.generate_id(), Value::Null);
        let collect = CollectNode::new(&globals, globals.generate_id(), dep.clone() as Arc<dyn Node>);
        let (tx, mut rx) = mpsc::channel(1);
        collect.parent_chans().insert(99, tx);

        dep.parent_chans().senders()[0]
            .send(Msg::stream(
                dep.id(),
                true,
                StreamIndex::single(7),
                StreamIndex::single(2),
                Value::Int(1),
            ))
            .await
            .unwrap();
        collect.run(&globals).await;

        match rx.recv().await.unwrap() {
            Msg::Error(e) => assert_eq!(e.error, RunError::OutOfRange { index: 7, len: 2 }),
            other => panic!("expected error, got {other:?}"),
        }
    }
}
