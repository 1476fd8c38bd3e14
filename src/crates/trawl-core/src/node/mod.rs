//! The node taxonomy and the shared node contract.
//!
//! Every vertex of a compiled graph implements [`Node`]: it has a registry
//! allocated id, an input side fed through bounded channels, a map from
//! parent id to the parent's input sender, a list of dependency nodes, a
//! structural [`clone_node`](Node::clone_node) and a
//! [`run`](Node::run) that executes exactly once. The concrete variants
//! live in the submodules.
//!
//! Channels are bounded (capacity [`IN_CHAN_SIZE`] unless a node knows its
//! exact input count), which applies backpressure: a producer blocks on
//! send when its consumer is slow.

use crate::error::GraphError;
use crate::globals::Globals;
use crate::msg::Msg;
use std::any::Any;
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

mod bin_op;
mod collect;
mod for_node;
mod goto;
mod if_node;
mod mult_op;
mod selector;
mod un_op;
mod value;
mod var;

pub use bin_op::BinOpNode;
pub use collect::CollectNode;
pub use for_node::ForNode;
pub use goto::GotoNode;
pub use if_node::IfNode;
pub use mult_op::MultOpNode;
pub use selector::{Selector, SelectorNode};
pub use un_op::UnOpNode;
pub use value::ValueNode;
pub use var::VarNode;

/// A registry-allocated node identifier.
pub type NodeId = i32;

/// Default capacity of node input channels.
pub const IN_CHAN_SIZE: usize = 5;

pub type MsgSender = mpsc::Sender<Msg>;
pub type MsgReceiver = mpsc::Receiver<Msg>;

/// The mutable map from parent id to that parent's input sender.
///
/// A dependency holds one entry per live dependent; the dependent removes
/// its entry when it finishes. Dropping an entry drops the sender, so a
/// receiver observes end-of-stream once every producer has finished.
#[derive(Default)]
pub struct ParentChans {
    chans: Mutex<HashMap<NodeId, MsgSender>>,
}

impl ParentChans {
    pub fn insert(&self, id: NodeId, tx: MsgSender) {
        self.chans.lock().expect("parent chans poisoned").insert(id, tx);
    }

    pub fn remove(&self, id: NodeId) {
        self.chans.lock().expect("parent chans poisoned").remove(&id);
    }

    pub fn clear(&self) {
        self.chans.lock().expect("parent chans poisoned").clear();
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.chans.lock().expect("parent chans poisoned").contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.chans.lock().expect("parent chans poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A snapshot of the senders, for broadcasting outside the lock.
    pub fn senders(&self) -> Vec<MsgSender> {
        self.chans
            .lock()
            .expect("parent chans poisoned")
            .values()
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for dyn Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("id", &self.id()).finish()
    }
}

/// One vertex of the evaluation graph.
#[async_trait::async_trait]
pub trait Node: Send + Sync {
    /// The node's registry-unique id.
    fn id(&self) -> NodeId;

    /// The map from parent id to parent input sender.
    fn parent_chans(&self) -> &ParentChans;

    /// The nodes whose outputs this node consumes, in declaration order.
    fn dependencies(&self) -> Vec<Arc<dyn Node>>;

    /// An independent structural copy with fresh ids, registered through
    /// the same registry.
    fn clone_node(&self, globals: &Arc<Globals>) -> Arc<dyn Node>;

    /// Executes the node. Called exactly once, from its own task.
    async fn run(&self, globals: &Arc<Globals>);

    /// Writes the node (tag, id, fields, dependencies) to a graph file.
    fn write(&self, w: &mut dyn Write) -> Result<(), GraphError>;

    fn as_any(&self) -> &dyn Any;
}

/// Deregisters a finishing node: removes it from each dependency's
/// parent-channel map and drops its own senders so parents observe
/// end-of-stream.
pub fn destroy_node(node: &dyn Node) {
    for dep in node.dependencies() {
        dep.parent_chans().remove(node.id());
    }
    node.parent_chans().clear();
}

/// True iff the subtree rooted at `node` contains a For node.
pub fn contains_loop_node(node: &Arc<dyn Node>) -> bool {
    let mut queue = vec![node.clone()];
    while let Some(n) = queue.pop() {
        if n.as_any().is::<ForNode>() {
            return true;
        }
        queue.extend(n.dependencies());
    }
    false
}

/// Walks the subtree rooted at `node` presetting every Var whose name
/// matches. Used by For expansion to deliver the iteration value into a
/// cloned body before it starts.
pub fn set_var_nodes(node: &Arc<dyn Node>, name: &str, msg: Msg) {
    let mut queue = vec![node.clone()];
    while let Some(n) = queue.pop() {
        if let Some(var) = n.as_any().downcast_ref::<VarNode>() {
            if var.name() == name {
                var.preset(msg.clone());
            }
        } else {
            queue.extend(n.dependencies());
        }
    }
}

/// Starts `node` and its dependency subtree as tasks. Only needed for
/// nodes created dynamically after the driver has launched the graph;
/// nodes already started (e.g. a shared body template) are skipped.
pub fn start_node(globals: &Arc<Globals>, node: Arc<dyn Node>) {
    let mut queue = vec![node];
    while let Some(n) = queue.pop() {
        queue.extend(n.dependencies());
        if globals.mark_started(n.id()) {
            let g = globals.clone();
            tokio::spawn(async move { n.run(&g).await });
        }
    }
}

/// Structural equality on node trees: same variant, same operator/name/
/// value/selector fields and structurally equal dependencies. Ids and
/// channel wiring are ignored, which makes this usable across registries
/// (deserialized graphs, compiler output in tests).
pub fn same_structure(a: &Arc<dyn Node>, b: &Arc<dyn Node>) -> bool {
    let (a, b) = (a.as_any(), b.as_any());
    if let (Some(x), Some(y)) = (a.downcast_ref::<ValueNode>(), b.downcast_ref::<ValueNode>()) {
        return x.value() == y.value();
    }
    if let (Some(x), Some(y)) = (a.downcast_ref::<VarNode>(), b.downcast_ref::<VarNode>()) {
        return x.name() == y.name();
    }
    if let (Some(x), Some(y)) = (a.downcast_ref::<BinOpNode>(), b.downcast_ref::<BinOpNode>()) {
        return x.op() == y.op()
            && same_structure(&x.a(), &y.a())
            && same_structure(&x.b(), &y.b());
    }
    if let (Some(x), Some(y)) = (a.downcast_ref::<UnOpNode>(), b.downcast_ref::<UnOpNode>()) {
        return x.op() == y.op() && same_structure(&x.node(), &y.node());
    }
    if let (Some(x), Some(y)) = (a.downcast_ref::<MultOpNode>(), b.downcast_ref::<MultOpNode>()) {
        return x.op() == y.op()
            && x.nodes().len() == y.nodes().len()
            && x.nodes().iter().zip(y.nodes().iter()).all(|(m, n)| same_structure(m, n));
    }
    if let (Some(x), Some(y)) = (a.downcast_ref::<IfNode>(), b.downcast_ref::<IfNode>()) {
        return same_structure(&x.pred(), &y.pred())
            && same_structure(&x.conseq(), &y.conseq())
            && same_structure(&x.alt(), &y.alt());
    }
    if let (Some(x), Some(y)) = (a.downcast_ref::<GotoNode>(), b.downcast_ref::<GotoNode>()) {
        return same_structure(&x.url(), &y.url());
    }
    if let (Some(x), Some(y)) =
        (a.downcast_ref::<SelectorNode>(), b.downcast_ref::<SelectorNode>())
    {
        return x.selectors() == y.selectors() && same_structure(&x.goto_node(), &y.goto_node());
    }
    if let (Some(x), Some(y)) = (a.downcast_ref::<ForNode>(), b.downcast_ref::<ForNode>()) {
        return x.name() == y.name()
            && x.fanout() == y.fanout()
            && same_structure(&x.collection(), &y.collection())
            && same_structure(&x.body(), &y.body());
    }
    if let (Some(x), Some(y)) = (a.downcast_ref::<CollectNode>(), b.downcast_ref::<CollectNode>()) {
        return same_structure(&x.node(), &y.node());
    }
    false
}
