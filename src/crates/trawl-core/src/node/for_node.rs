//! Loop expansion node.
//!
//! For owns loop expansion, concurrency control, streaming and index
//! management. It listens on two inputs: the collection dependency and a
//! lazily allocated channel fed by its cloned body subnodes.
//!
//! The first collection message decides the operating mode:
//!
//! * **Value mode** — the collection arrived as one array. One body clone
//!   is materialized per element up front, keyed by the string form of its
//!   position, with the element preset into the clone's loop variable.
//! * **Stream mode** — the collection is itself a stream (a nested For, or
//!   an If over streams). Each arriving element materializes one clone on
//!   demand, keyed by the element's stream index; the total is the product
//!   of the element's length index.
//!
//! Replies pass up as stream elements. Extending (not replacing) the index
//! and length on the way up is what makes nested loops composable: a
//! Collect any number of levels above sees the full product shape.
//!
//! Bodies that contain no further For start every clone at once; loop
//! bodies run at most `fanout` clones concurrently, advancing as replies
//! arrive.

use crate::error::{GraphError, RunError};
use crate::globals::Globals;
use crate::msg::{broadcast, Msg};
use crate::node::{
    contains_loop_node, destroy_node, set_var_nodes, start_node, MsgReceiver, MsgSender, Node,
    NodeId, ParentChans, IN_CHAN_SIZE,
};
use crate::stream::StreamIndex;
use crate::value::Value;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub struct ForNode {
    id: NodeId,
    name: String,
    fanout: AtomicUsize,
    collection: Arc<dyn Node>,
    body: Arc<dyn Node>,
    collection_rx: Mutex<Option<MsgReceiver>>,
    parent_chans: ParentChans,
}

impl ForNode {
    pub fn new(
        globals: &Arc<Globals>,
        id: NodeId,
        name: impl Into<String>,
        collection: Arc<dyn Node>,
        body: Arc<dyn Node>,
    ) -> Arc<ForNode> {
        let (tx, rx) = mpsc::channel(IN_CHAN_SIZE);
        collection.parent_chans().insert(id, tx);

        let node = Arc::new(ForNode {
            id,
            name: name.into(),
            fanout: AtomicUsize::new(1),
            collection,
            body,
            collection_rx: Mutex::new(Some(rx)),
            parent_chans: ParentChans::default(),
        });
        globals.register_node(id, node.clone());
        node
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The maximum number of body clones run concurrently when the body
    /// itself loops. Set by the fan-out planner; at least 1.
    pub fn fanout(&self) -> usize {
        self.fanout.load(Ordering::Relaxed)
    }

    pub fn set_fanout(&self, fanout: usize) {
        self.fanout.store(fanout.max(1), Ordering::Relaxed);
    }

    pub(crate) fn collection(&self) -> Arc<dyn Node> {
        self.collection.clone()
    }

    pub(crate) fn body(&self) -> Arc<dyn Node> {
        self.body.clone()
    }
}

#[async_trait::async_trait]
impl Node for ForNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn parent_chans(&self) -> &ParentChans {
        &self.parent_chans
    }

    fn dependencies(&self) -> Vec<Arc<dyn Node>> {
        vec![self.collection.clone(), self.body.clone()]
    }

    fn clone_node(&self, globals: &Arc<Globals>) -> Arc<dyn Node> {
        // The body template is cloned too: each copy of the loop must hold
        // its own template, or presets injected by an enclosing loop would
        // bleed between iterations.
        let cloned = ForNode::new(
            globals,
            globals.generate_id(),
            self.name.clone(),
            self.collection.clone_node(globals),
            self.body.clone_node(globals),
        );
        cloned.set_fanout(self.fanout());
        cloned
    }

    async fn run(&self, globals: &Arc<Globals>) {
        let Some(mut coll_rx) = self.collection_rx.lock().expect("for rx poisoned").take()
        else {
            return;
        };

        let is_loop = contains_loop_node(&self.body);
        let mut expansion = Expansion::new(self, is_loop);
        let mut in_rx: Option<MsgReceiver> = None;
        let mut collection_open = true;

        loop {
            if !collection_open && in_rx.is_none() {
                // The collection finished without producing any clones.
                break;
            }

            let event = tokio::select! {
                m = coll_rx.recv(), if collection_open => Event::Collection(m),
                m = recv_or_pending(in_rx.as_mut()) => Event::Reply(m),
            };

            match event {
                Event::Collection(None) => {
                    collection_open = false;
                    // No further clones can be materialized; once the
                    // existing ones drop their senders the reply channel
                    // closes instead of idling forever.
                    expansion.in_tx = None;
                }
                Event::Collection(Some(msg)) => {
                    match expansion.on_collection(globals, msg, &mut in_rx).await {
                        Flow::Continue => {}
                        Flow::CollectionDone => {
                            collection_open = false;
                            expansion.in_tx = None;
                        }
                        Flow::Finished => break,
                    }
                }
                Event::Reply(None) => break,
                Event::Reply(Some(msg)) => {
                    if expansion.on_reply(globals, msg).await {
                        break;
                    }
                }
            }
        }
        destroy_node(self);
    }

    fn write(&self, w: &mut dyn Write) -> Result<(), GraphError> {
        crate::io::write_for_node(self, w)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

enum Event {
    Collection(Option<Msg>),
    Reply(Option<Msg>),
}

enum Flow {
    Continue,
    CollectionDone,
    Finished,
}

enum Mode {
    Value,
    Stream { len_index: StreamIndex },
}

async fn recv_or_pending(rx: Option<&mut MsgReceiver>) -> Option<Msg> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Per-run expansion state of one For node.
struct Expansion<'a> {
    node: &'a ForNode,
    is_loop: bool,
    mode: Option<Mode>,
    /// Total number of iterations, fixed by the first collection message.
    total: usize,
    /// Stream-mode count of materialized collection elements.
    seen: usize,
    completed: usize,
    running: usize,
    in_tx: Option<MsgSender>,
    /// Subnode map keyed by the string form of the clone's index.
    subnodes: HashMap<String, Arc<dyn Node>>,
    /// Keys in creation order; value mode creates them in position order.
    order: Vec<String>,
    node_to_idx: HashMap<NodeId, StreamIndex>,
    started: HashSet<NodeId>,
    /// Stream replies seen per clone, for completion of streaming bodies.
    stream_replies: HashMap<NodeId, usize>,
}

impl<'a> Expansion<'a> {
    fn new(node: &'a ForNode, is_loop: bool) -> Expansion<'a> {
        Expansion {
            node,
            is_loop,
            mode: None,
            total: 0,
            seen: 0,
            completed: 0,
            running: 0,
            in_tx: None,
            subnodes: HashMap::new(),
            order: Vec::new(),
            node_to_idx: HashMap::new(),
            started: HashSet::new(),
            stream_replies: HashMap::new(),
        }
    }

    /// The length index this For contributes on the way up.
    fn for_len(&self) -> StreamIndex {
        match &self.mode {
            Some(Mode::Stream { len_index }) => len_index.clone(),
            _ => StreamIndex::single(self.total),
        }
    }

    async fn emit(&self, msg: Msg) {
        broadcast(&msg, self.node.parent_chans()).await;
    }

    async fn on_collection(
        &mut self,
        globals: &Arc<Globals>,
        msg: Msg,
        in_rx: &mut Option<MsgReceiver>,
    ) -> Flow {
        match msg {
            Msg::Error(e) => {
                self.emit(Msg::Error(e).with_id(self.node.id)).await;
                Flow::Finished
            }
            Msg::Value(v) => {
                if self.mode.is_some() {
                    tracing::warn!(id = self.node.id, "ignoring extra collection message");
                    return Flow::Continue;
                }
                let items = match v.data {
                    Value::List(items) => items,
                    other => {
                        self.emit(Msg::error(
                            self.node.id,
                            true,
                            RunError::Type(format!(
                                "for collection must be an array, got {}",
                                other.kind()
                            )),
                        ))
                        .await;
                        return Flow::Finished;
                    }
                };

                self.mode = Some(Mode::Value);
                self.total = items.len();
                if self.total == 0 {
                    return Flow::Finished;
                }
                let (tx, rx) = mpsc::channel(self.total);
                self.in_tx = Some(tx);
                *in_rx = Some(rx);

                for (i, item) in items.into_iter().enumerate() {
                    self.materialize(globals, StreamIndex::single(i), item);
                }
                if self.is_loop {
                    self.start_next(globals);
                } else {
                    for key in self.order.clone() {
                        let clone = self.subnodes[&key].clone();
                        self.start(globals, clone);
                    }
                }
                Flow::CollectionDone
            }
            Msg::Stream(s) => {
                if self.mode.is_none() {
                    self.total = s.len.product();
                    self.mode = Some(Mode::Stream {
                        len_index: s.len.clone(),
                    });
                    let (tx, rx) = mpsc::channel(self.total.max(1));
                    self.in_tx = Some(tx);
                    *in_rx = Some(rx);
                }

                self.seen += 1;
                let clone = self.materialize(globals, s.idx.clone(), s.data);
                if !self.is_loop || self.running < self.node.fanout() {
                    self.start(globals, clone);
                }
                if self.seen >= self.total {
                    Flow::CollectionDone
                } else {
                    Flow::Continue
                }
            }
        }
    }

    /// Clones the body for one iteration, wires it to the reply channel
    /// and presets the loop variable.
    fn materialize(
        &mut self,
        globals: &Arc<Globals>,
        idx: StreamIndex,
        value: Value,
    ) -> Arc<dyn Node> {
        let clone = self.node.body.clone_node(globals);
        clone
            .parent_chans()
            .insert(self.node.id, self.in_tx.clone().expect("reply channel"));
        self.node_to_idx.insert(clone.id(), idx.clone());
        set_var_nodes(&clone, &self.node.name, Msg::value(self.node.id, true, value));

        let key = idx.key();
        tracing::trace!(id = self.node.id, subnode = clone.id(), %key, "materialized body clone");
        self.order.push(key.clone());
        self.subnodes.insert(key, clone.clone());
        clone
    }

    fn start(&mut self, globals: &Arc<Globals>, clone: Arc<dyn Node>) {
        if self.started.insert(clone.id()) {
            self.running += 1;
            start_node(globals, clone);
        }
    }

    /// Starts materialized, not-yet-started clones until `fanout` of them
    /// run. Value mode materializes in position order, so this doubles as
    /// the position cursor.
    fn start_next(&mut self, globals: &Arc<Globals>) {
        while self.running < self.node.fanout() {
            let next = self.order.iter().find_map(|key| {
                let clone = &self.subnodes[key];
                (!self.started.contains(&clone.id())).then(|| clone.clone())
            });
            match next {
                Some(clone) => self.start(globals, clone),
                None => break,
            }
        }
    }

    fn complete(&mut self, sender: NodeId) {
        self.completed += 1;
        self.running = self.running.saturating_sub(1);
        self.stream_replies.remove(&sender);
    }

    /// Handles one reply from a body clone. Returns true when the For is
    /// finished.
    async fn on_reply(&mut self, globals: &Arc<Globals>, msg: Msg) -> bool {
        let sender = msg.id();
        let Some(sub_idx) = self.node_to_idx.get(&sender).cloned() else {
            tracing::warn!(id = self.node.id, sender, "reply from unknown subnode");
            return false;
        };

        match msg {
            Msg::Error(e) => {
                self.emit(Msg::Error(e).with_id(self.node.id)).await;
                self.complete(sender);
            }
            Msg::Value(v) => {
                let out = Msg::stream(self.node.id, true, sub_idx, self.for_len(), v.data);
                self.emit(out).await;
                self.complete(sender);
            }
            Msg::Stream(s) => {
                let mut idx = s.idx.clone();
                idx.concat(&sub_idx);
                let mut len = s.len.clone();
                len.concat(&self.for_len());
                self.emit(Msg::stream(self.node.id, true, idx, len, s.data))
                    .await;

                let count = self.stream_replies.entry(sender).or_insert(0);
                *count += 1;
                if *count >= s.len.product() {
                    self.complete(sender);
                } else {
                    return false;
                }
            }
        }

        if self.completed >= self.total {
            return true;
        }
        if self.is_loop {
            self.start_next(globals);
        }
        false
    }
}
