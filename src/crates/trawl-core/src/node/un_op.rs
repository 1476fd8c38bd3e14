//! Unary operator node.

use crate::error::{GraphError, RunError};
use crate::globals::Globals;
use crate::msg::{broadcast, Msg};
use crate::node::{destroy_node, MsgReceiver, Node, NodeId, ParentChans};
use crate::tokens::Token;
use crate::value::Value;
use std::any::Any;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Waits for one value and applies a unary operator. The only operator is
/// `not` on booleans.
pub struct UnOpNode {
    id: NodeId,
    op: Token,
    node: Arc<dyn Node>,
    rx: Mutex<Option<MsgReceiver>>,
    parent_chans: ParentChans,
}

impl UnOpNode {
    pub fn new(
        globals: &Arc<Globals>,
        id: NodeId,
        op: Token,
        node: Arc<dyn Node>,
    ) -> Arc<UnOpNode> {
        let (tx, rx) = mpsc::channel(1);
        node.parent_chans().insert(id, tx);

        let un_op = Arc::new(UnOpNode {
            id,
            op,
            node,
            rx: Mutex::new(Some(rx)),
            parent_chans: ParentChans::default(),
        });
        globals.register_node(id, un_op.clone());
        un_op
    }

    pub(crate) fn op(&self) -> Token {
        self.op
    }

    pub(crate) fn node(&self) -> Arc<dyn Node> {
        self.node.clone()
    }
}

#[async_trait::async_trait]
impl Node for UnOpNode {
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
        UnOpNode::new(
            globals,
            globals.generate_id(),
            self.op,
            self.node.clone_node(globals),
        )
    }

    async fn run(&self, _globals: &Arc<Globals>) {
        let Some(mut rx) = self.rx.lock().expect("un op rx poisoned").take() else {
            return;
        };

        let msg = match rx.recv().await {
            Some(Msg::Error(e)) => Msg::Error(e).with_id(self.id),
            Some(Msg::Value(v)) => match apply_un_op(&v.data, self.op) {
                Ok(result) => Msg::value(self.id, true, result),
                Err(e) => Msg::error(self.id, true, e),
            },
            _ => Msg::error(
                self.id,
                true,
                RunError::Protocol("unary operator expects a value message".into()),
            ),
        };
        broadcast(&msg, &self.parent_chans).await;
        destroy_node(self);
    }

    fn write(&self, w: &mut dyn Write) -> Result<(), GraphError> {
        crate::io::write_un_op_node(self, w)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn apply_un_op(value: &Value, op: Token) -> Result<Value, RunError> {
    match op {
        Token::Not => match value {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(RunError::Type(format!(
                "not expects a boolean, got {}",
                other.kind()
            ))),
        },
        other => Err(RunError::UnknownOperator(other.name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_is_an_involution() {
        for b in [true, false] {
            let once = apply_un_op(&Value::Bool(b), Token::Not).unwrap();
            let twice = apply_un_op(&once, Token::Not).unwrap();
            assert_eq!(twice, Value::Bool(b));
        }
    }

    #[test]
    fn not_rejects_non_booleans() {
        assert!(matches!(
            apply_un_op(&Value::Int(1), Token::Not),
            Err(RunError::Type(_))
        ));
    }
}
