//! Binary operator node.

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

/// Waits for one message per operand (A first, then B, on distinct
/// channels so operand order is preserved) and emits one result.
///
/// Operators: `..` (integer range), `=` (deep equality on same-typed
/// values), `and`/`or` (booleans).
pub struct BinOpNode {
    id: NodeId,
    op: Token,
    a: Arc<dyn Node>,
    b: Arc<dyn Node>,
    a_rx: Mutex<Option<MsgReceiver>>,
    b_rx: Mutex<Option<MsgReceiver>>,
    parent_chans: ParentChans,
}

impl BinOpNode {
    pub fn new(
        globals: &Arc<Globals>,
        id: NodeId,
        op: Token,
        a: Arc<dyn Node>,
        b: Arc<dyn Node>,
    ) -> Arc<BinOpNode> {
        let (a_tx, a_rx) = mpsc::channel(1);
        let (b_tx, b_rx) = mpsc::channel(1);
        a.parent_chans().insert(id, a_tx);
        b.parent_chans().insert(id, b_tx);

        let node = Arc::new(BinOpNode {
            id,
            op,
            a,
            b,
            a_rx: Mutex::new(Some(a_rx)),
            b_rx: Mutex::new(Some(b_rx)),
            parent_chans: ParentChans::default(),
        });
        globals.register_node(id, node.clone());
        node
    }

    pub(crate) fn op(&self) -> Token {
        self.op
    }

    pub(crate) fn a(&self) -> Arc<dyn Node> {
        self.a.clone()
    }

    pub(crate) fn b(&self) -> Arc<dyn Node> {
        self.b.clone()
    }
}

#[async_trait::async_trait]
impl Node for BinOpNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn parent_chans(&self) -> &ParentChans {
        &self.parent_chans
    }

    fn dependencies(&self) -> Vec<Arc<dyn Node>> {
        vec![self.a.clone(), self.b.clone()]
    }

    fn clone_node(&self, globals: &Arc<Globals>) -> Arc<dyn Node> {
        BinOpNode::new(
            globals,
            globals.generate_id(),
            self.op,
            self.a.clone_node(globals),
            self.b.clone_node(globals),
        )
    }

    async fn run(&self, _globals: &Arc<Globals>) {
        let a_rx = self.a_rx.lock().expect("bin op rx poisoned").take();
        let b_rx = self.b_rx.lock().expect("bin op rx poisoned").take();
        let (Some(mut a_rx), Some(mut b_rx)) = (a_rx, b_rx) else {
            return;
        };

        let first = a_rx.recv().await;
        let second = b_rx.recv().await;

        let msg = match (first, second) {
            (Some(Msg::Error(e)), _) | (_, Some(Msg::Error(e))) => Msg::Error(e).with_id(self.id),
            (Some(Msg::Value(a)), Some(Msg::Value(b))) => {
                match apply_bin_op(&a.data, &b.data, self.op) {
                    Ok(result) => Msg::value(self.id, true, result),
                    Err(e) => Msg::error(self.id, true, e),
                }
            }
            _ => Msg::error(
                self.id,
                true,
                RunError::Protocol("binary operator expects one value message per operand".into()),
            ),
        };
        broadcast(&msg, &self.parent_chans).await;
        destroy_node(self);
    }

    fn write(&self, w: &mut dyn Write) -> Result<(), GraphError> {
        crate::io::write_bin_op_node(self, w)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn apply_bin_op(a: &Value, b: &Value, op: Token) -> Result<Value, RunError> {
    match op {
        Token::Range => match (a, b) {
            (Value::Int(start), Value::Int(end)) => {
                let (start, end) = (*start as i64, *end as i64);
                let count = (end - start).unsigned_abs() as usize;
                let step: i64 = if end >= start { 1 } else { -1 };
                Ok(Value::List(
                    (0..count)
                        .map(|i| Value::Int((start + step * i as i64) as i32))
                        .collect(),
                ))
            }
            _ => Err(RunError::Type(format!(
                "range expects two integers, got {} and {}",
                a.kind(),
                b.kind()
            ))),
        },
        Token::Equals => {
            if a.same_kind(b) {
                Ok(Value::Bool(a == b))
            } else {
                Err(RunError::Type(format!(
                    "equals expects operands of the same type, got {} and {}",
                    a.kind(),
                    b.kind()
                )))
            }
        }
        Token::And => match (a, b) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a && *b)),
            _ => Err(RunError::Type(format!(
                "and expects two booleans, got {} and {}",
                a.kind(),
                b.kind()
            ))),
        },
        Token::Or => match (a, b) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a || *b)),
            _ => Err(RunError::Type(format!(
                "or expects two booleans, got {} and {}",
                a.kind(),
                b.kind()
            ))),
        },
        other => Err(RunError::UnknownOperator(other.name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_ascending_descending_empty() {
        let asc = apply_bin_op(&Value::Int(1), &Value::Int(4), Token::Range).unwrap();
        assert_eq!(
            asc,
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );

        let desc = apply_bin_op(&Value::Int(4), &Value::Int(1), Token::Range).unwrap();
        assert_eq!(
            desc,
            Value::List(vec![Value::Int(4), Value::Int(3), Value::Int(2)])
        );

        let empty = apply_bin_op(&Value::Int(2), &Value::Int(2), Token::Range).unwrap();
        assert_eq!(empty, Value::List(vec![]));
    }

    #[test]
    fn equals_requires_same_type() {
        assert_eq!(
            apply_bin_op(&Value::Int(2), &Value::Int(2), Token::Equals).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            apply_bin_op(&Value::Int(2), &Value::Int(3), Token::Equals).unwrap(),
            Value::Bool(false)
        );
        assert!(matches!(
            apply_bin_op(&Value::Int(2), &Value::Str("2".into()), Token::Equals),
            Err(RunError::Type(_))
        ));
    }

    #[test]
    fn logical_ops_reject_non_booleans() {
        assert_eq!(
            apply_bin_op(&Value::Bool(true), &Value::Bool(false), Token::And).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            apply_bin_op(&Value::Bool(true), &Value::Bool(false), Token::Or).unwrap(),
            Value::Bool(true)
        );
        assert!(apply_bin_op(&Value::Int(1), &Value::Bool(true), Token::And).is_err());
    }

    #[tokio::test]
    async fn errors_pass_through_with_rewritten_id() {
        let globals = Globals::new();
        let a = super::super::ValueNode::new(&globals, globals.generate_id(), Value::Int(1));
        let b = super::super::ValueNode::new(&globals, globals.generate_id(), Value::Int(2));
        let op = BinOpNode::new(
            &globals,
            globals.generate_id(),
            Token::Equals,
            a.clone() as Arc<dyn Node>,
            b.clone() as Arc<dyn Node>,
        );
        let (tx, mut rx) = mpsc::channel(1);
        op.parent_chans().insert(99, tx);

        // Stand in for the dependencies: an error on the A channel, a
        // value on the B channel.
        a.parent_chans().senders()[0]
            .send(Msg::error(a.id(), true, RunError::DivisionByZero))
            .await
            .unwrap();
        b.parent_chans().senders()[0]
            .send(Msg::value(b.id(), true, Value::Int(2)))
            .await
            .unwrap();
        op.run(&globals).await;

        match rx.recv().await.unwrap() {
            Msg::Error(e) => {
                assert_eq!(e.id, op.id());
                assert_eq!(e.error, RunError::DivisionByZero);
            }
            other => panic!("expected error, got {other:?}"),
        }
    }
}
