//! Variable reference node.

use crate::error::{GraphError, RunError};
use crate::globals::Globals;
use crate::msg::{broadcast, Msg};
use crate::node::{destroy_node, Node, NodeId, ParentChans};
use std::any::Any;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// How long a late-bound variable waits for a value before assuming the
/// graph is deadlocked.
pub const VAR_TIMEOUT: Duration = Duration::from_secs(30);

/// A named variable.
///
/// Two operating modes:
///
/// * *Preset* — a For loop installs the current iteration value via
///   [`preset`](VarNode::preset) before starting the cloned body; `run`
///   emits a copy of that message under the Var's own id.
/// * *Late-bound* — without a preset, the node blocks on its input channel
///   and forwards the first message it receives. The wait is bounded by
///   [`VAR_TIMEOUT`] as a deadlock-detection aid.
///
/// Stream messages are not usable as variable values and surface an error.
pub struct VarNode {
    id: NodeId,
    name: String,
    preset: Mutex<Option<Msg>>,
    tx: mpsc::Sender<Msg>,
    rx: Mutex<Option<mpsc::Receiver<Msg>>>,
    parent_chans: ParentChans,
}

impl VarNode {
    pub fn new(globals: &Arc<Globals>, id: NodeId, name: impl Into<String>) -> Arc<VarNode> {
        let (tx, rx) = mpsc::channel(1);
        let node = Arc::new(VarNode {
            id,
            name: name.into(),
            preset: Mutex::new(None),
            tx,
            rx: Mutex::new(Some(rx)),
            parent_chans: ParentChans::default(),
        });
        globals.register_node(id, node.clone());
        node
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Installs the message `run` will emit. Overwrites any earlier preset.
    pub fn preset(&self, msg: Msg) {
        *self.preset.lock().expect("preset lock poisoned") = Some(msg);
    }

    /// A sender into the variable's input channel, for late binding.
    pub fn sender(&self) -> mpsc::Sender<Msg> {
        self.tx.clone()
    }
}

#[async_trait::async_trait]
impl Node for VarNode {
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
        // The preset travels with the clone: an enclosing loop presets its
        // variable once per iteration subtree, and any For nested inside
        // that subtree re-clones the body afterwards.
        let clone = VarNode::new(globals, globals.generate_id(), self.name.clone());
        clone
            .preset
            .lock()
            .expect("preset lock poisoned")
            .clone_from(&self.preset.lock().expect("preset lock poisoned"));
        clone
    }

    async fn run(&self, _globals: &Arc<Globals>) {
        // Read without consuming: the slot must stay in place for clones
        // made after this node has already run (shared templates).
        let preset = self.preset.lock().expect("preset lock poisoned").clone();
        let received = match preset {
            Some(msg) => Some(msg),
            None => {
                let rx = self.rx.lock().expect("var rx poisoned").take();
                let Some(mut rx) = rx else { return };
                match tokio::time::timeout(VAR_TIMEOUT, rx.recv()).await {
                    Ok(received) => received,
                    Err(_) => {
                        tracing::debug!(name = %self.name, "variable timed out");
                        let msg =
                            Msg::error(self.id, true, RunError::VarTimeout(self.name.clone()));
                        broadcast(&msg, &self.parent_chans).await;
                        destroy_node(self);
                        return;
                    }
                }
            }
        };

        let msg = match received {
            Some(Msg::Stream(_)) => Msg::error(
                self.id,
                true,
                RunError::Protocol(format!(
                    "variable '{}' received a stream message",
                    self.name
                )),
            ),
            Some(msg) => msg.with_id(self.id),
            None => Msg::error(
                self.id,
                true,
                RunError::Protocol(format!(
                    "variable '{}' input closed without a value",
                    self.name
                )),
            ),
        };
        broadcast(&msg, &self.parent_chans).await;
        destroy_node(self);
    }

    fn write(&self, w: &mut dyn Write) -> Result<(), GraphError> {
        crate::io::write_var_node(self, w)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamIndex;
    use crate::value::Value;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn preset_value_is_relabeled() {
        let globals = Globals::new();
        let var = VarNode::new(&globals, globals.generate_id(), "i");
        var.preset(Msg::value(77, true, Value::Int(3)));

        let (tx, mut rx) = mpsc::channel(1);
        var.parent_chans().insert(99, tx);
        var.run(&globals).await;

        assert_eq!(rx.recv().await.unwrap(), Msg::value(var.id(), true, Value::Int(3)));
    }

    #[tokio::test]
    async fn preset_survives_running_and_cloning() {
        let globals = Globals::new();
        let var = VarNode::new(&globals, globals.generate_id(), "i");
        var.preset(Msg::value(77, true, Value::Int(3)));

        let (tx, mut rx) = mpsc::channel(1);
        var.parent_chans().insert(99, tx);
        var.run(&globals).await;
        rx.recv().await.unwrap();

        // A clone made after the run still carries the preset.
        let clone = var.clone_node(&globals);
        let (tx, mut rx) = mpsc::channel(1);
        clone.parent_chans().insert(99, tx);
        clone.run(&globals).await;
        assert_eq!(
            rx.recv().await.unwrap(),
            Msg::value(clone.id(), true, Value::Int(3))
        );
    }

    #[tokio::test]
    async fn late_bound_value_is_forwarded() {
        let globals = Globals::new();
        let var = VarNode::new(&globals, globals.generate_id(), "x");
        let (tx, mut rx) = mpsc::channel(1);
        var.parent_chans().insert(99, tx);

        var.sender()
            .send(Msg::value(5, true, Value::Str("hi".into())))
            .await
            .unwrap();
        var.run(&globals).await;

        assert_eq!(
            rx.recv().await.unwrap(),
            Msg::value(var.id(), true, Value::Str("hi".into()))
        );
    }

    #[tokio::test]
    async fn stream_input_is_an_error() {
        let globals = Globals::new();
        let var = VarNode::new(&globals, globals.generate_id(), "x");
        let (tx, mut rx) = mpsc::channel(1);
        var.parent_chans().insert(99, tx);

        var.sender()
            .send(Msg::stream(
                5,
                true,
                StreamIndex::single(0),
                StreamIndex::single(1),
                Value::Int(1),
            ))
            .await
            .unwrap();
        var.run(&globals).await;

        match rx.recv().await.unwrap() {
            Msg::Error(e) => assert!(matches!(e.error, RunError::Protocol(_))),
            other => panic!("expected error message, got {other:?}"),
        }
    }
}
