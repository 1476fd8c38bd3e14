//! Literal value node.

use crate::error::GraphError;
use crate::globals::Globals;
use crate::msg::{broadcast, Msg};
use crate::node::{destroy_node, Node, NodeId, ParentChans};
use crate::value::Value;
use std::any::Any;
use std::io::Write;
use std::sync::Arc;

/// Emits its stored value to every parent exactly once, then finishes.
pub struct ValueNode {
    id: NodeId,
    value: Value,
    parent_chans: ParentChans,
}

impl ValueNode {
    pub fn new(globals: &Arc<Globals>, id: NodeId, value: Value) -> Arc<ValueNode> {
        let node = Arc::new(ValueNode {
            id,
            value,
            parent_chans: ParentChans::default(),
        });
        globals.register_node(id, node.clone());
        node
    }

    pub(crate) fn value(&self) -> &Value {
        &self.value
    }
}

#[async_trait::async_trait]
impl Node for ValueNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn parent_chans(&self) -> &ParentChans {
        &self.parent_chans
    }

    fn dependencies(&self) -> Vec<Arc<dyn Node>> {
        Vec::new()
    }

    fn clone_node(&self, globals: &Arc<Globals>) -> Arc<dyn Node> {
        ValueNode::new(globals, globals.generate_id(), self.value.clone())
    }

    async fn run(&self, _globals: &Arc<Globals>) {
        let msg = Msg::value(self.id, true, self.value.clone());
        broadcast(&msg, &self.parent_chans).await;
        destroy_node(self);
    }

    fn write(&self, w: &mut dyn Write) -> Result<(), GraphError> {
        crate::io::write_value_node(self, w)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn emits_one_pass_up_value() {
        let globals = Globals::new();
        let node = ValueNode::new(&globals, globals.generate_id(), Value::Int(42));
        let (tx, mut rx) = mpsc::channel(1);
        node.parent_chans().insert(99, tx);

        node.run(&globals).await;

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg, Msg::value(node.id(), true, Value::Int(42)));
        // The channel closes after the node finishes: exactly one message.
        assert!(rx.recv().await.is_none());
    }
}
