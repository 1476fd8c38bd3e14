//! N-ary operator node.

use crate::error::{GraphError, RunError};
use crate::globals::Globals;
use crate::msg::{broadcast, Msg};
use crate::node::{destroy_node, MsgReceiver, Node, NodeId, ParentChans};
use crate::tokens::Token;
use crate::value::Value;
use std::any::Any;
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Waits for one value per operand, arriving in any order on one shared
/// channel, and applies an n-ary operator. Results are slotted by a
/// sender-id → position map so the fold runs in declared operand order.
///
/// Operators: `+` (integer sum or string concatenation), `-`, `*`, `/`
/// (integer left folds), `list` (the operands verbatim).
pub struct MultOpNode {
    id: NodeId,
    op: Token,
    nodes: Vec<Arc<dyn Node>>,
    idx_of: HashMap<NodeId, usize>,
    rx: Mutex<Option<MsgReceiver>>,
    parent_chans: ParentChans,
}

impl MultOpNode {
    pub fn new(
        globals: &Arc<Globals>,
        id: NodeId,
        op: Token,
        nodes: Vec<Arc<dyn Node>>,
    ) -> Arc<MultOpNode> {
        let (tx, rx) = mpsc::channel(nodes.len().max(1));
        let mut idx_of = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            node.parent_chans().insert(id, tx.clone());
            idx_of.insert(node.id(), i);
        }

        let mult_op = Arc::new(MultOpNode {
            id,
            op,
            nodes,
            idx_of,
            rx: Mutex::new(Some(rx)),
            parent_chans: ParentChans::default(),
        });
        globals.register_node(id, mult_op.clone());
        mult_op
    }

    pub(crate) fn op(&self) -> Token {
        self.op
    }

    pub(crate) fn nodes(&self) -> &[Arc<dyn Node>] {
        &self.nodes
    }

    async fn gather(&self, rx: &mut MsgReceiver) -> Result<Vec<Value>, RunError> {
        let mut results: Vec<Option<Value>> = vec![None; self.nodes.len()];
        for _ in 0..self.nodes.len() {
            match rx.recv().await {
                Some(Msg::Value(v)) => match self.idx_of.get(&v.id) {
                    Some(&i) => results[i] = Some(v.data),
                    None => {
                        return Err(RunError::Protocol(format!(
                            "operand message from unknown sender {}",
                            v.id
                        )))
                    }
                },
                Some(Msg::Error(e)) => return Err(e.error),
                Some(Msg::Stream(_)) => {
                    return Err(RunError::Protocol(
                        "n-ary operator expects value messages".into(),
                    ))
                }
                None => {
                    return Err(RunError::Protocol(
                        "operand channel closed before every value arrived".into(),
                    ))
                }
            }
        }
        results
            .into_iter()
            .collect::<Option<Vec<Value>>>()
            .ok_or_else(|| RunError::Protocol("an operand never produced a value".into()))
    }
}

#[async_trait::async_trait]
impl Node for MultOpNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn parent_chans(&self) -> &ParentChans {
        &self.parent_chans
    }

    fn dependencies(&self) -> Vec<Arc<dyn Node>> {
        self.nodes.clone()
    }

    fn clone_node(&self, globals: &Arc<Globals>) -> Arc<dyn Node> {
        let cloned = self.nodes.iter().map(|n| n.clone_node(globals)).collect();
        MultOpNode::new(globals, globals.generate_id(), self.op, cloned)
    }

    async fn run(&self, _globals: &Arc<Globals>) {
        let Some(mut rx) = self.rx.lock().expect("mult op rx poisoned").take() else {
            return;
        };

        let msg = match self.gather(&mut rx).await {
            Ok(values) => match apply_mult_op(values, self.op) {
                Ok(result) => Msg::value(self.id, true, result),
                Err(e) => Msg::error(self.id, true, e),
            },
            Err(e) => Msg::error(self.id, true, e),
        };
        broadcast(&msg, &self.parent_chans).await;
        destroy_node(self);
    }

    fn write(&self, w: &mut dyn Write) -> Result<(), GraphError> {
        crate::io::write_mult_op_node(self, w)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn int_fold(
    values: &[Value],
    op_name: &str,
    f: impl Fn(i32, i32) -> Result<i32, RunError>,
) -> Result<Value, RunError> {
    let mut iter = values.iter();
    let mut acc = match iter.next() {
        Some(Value::Int(i)) => *i,
        Some(other) => {
            return Err(RunError::Type(format!(
                "{op_name} expects integers, got {}",
                other.kind()
            )))
        }
        None => return Err(RunError::Type(format!("{op_name} needs at least one operand"))),
    };
    for v in iter {
        match v {
            Value::Int(i) => acc = f(acc, *i)?,
            other => {
                return Err(RunError::Type(format!(
                    "{op_name} expects integers, got {}",
                    other.kind()
                )))
            }
        }
    }
    Ok(Value::Int(acc))
}

fn apply_mult_op(values: Vec<Value>, op: Token) -> Result<Value, RunError> {
    if values.is_empty() {
        return Err(RunError::Type(format!(
            "{} needs at least one operand",
            op.name()
        )));
    }
    match op {
        Token::Add => match &values[0] {
            Value::Str(_) => {
                let mut out = String::new();
                for v in &values {
                    match v {
                        Value::Str(s) => out.push_str(s),
                        other => {
                            return Err(RunError::Type(format!(
                                "+ expects uniform operand types, got string and {}",
                                other.kind()
                            )))
                        }
                    }
                }
                Ok(Value::Str(out))
            }
            Value::Int(_) => int_fold(&values, "+", |a, b| Ok(a.wrapping_add(b))),
            other => Err(RunError::Type(format!(
                "+ expects integers or strings, got {}",
                other.kind()
            ))),
        },
        Token::Sub => int_fold(&values, "-", |a, b| Ok(a.wrapping_sub(b))),
        Token::Mul => int_fold(&values, "*", |a, b| Ok(a.wrapping_mul(b))),
        Token::Div => int_fold(&values, "/", |a, b| {
            if b == 0 {
                Err(RunError::DivisionByZero)
            } else {
                Ok(a.wrapping_div(b))
            }
        }),
        Token::List => Ok(Value::List(values)),
        other => Err(RunError::UnknownOperator(other.name())),
    }
}
