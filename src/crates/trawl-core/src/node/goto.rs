//! Page fetch node.

use crate::error::{GraphError, RunError};
use crate::globals::Globals;
use crate::msg::{broadcast, Msg};
use crate::node::{destroy_node, MsgReceiver, Node, NodeId, ParentChans, IN_CHAN_SIZE};
use crate::value::{Page, Value};
use std::any::Any;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Consumes a string URL, waits for a rate-limit token for the URL's host,
/// issues a GET and emits the unread response as a page value. The page is
/// consumed (read once) by the Selector above it.
pub struct GotoNode {
    id: NodeId,
    url: Arc<dyn Node>,
    rx: Mutex<Option<MsgReceiver>>,
    parent_chans: ParentChans,
}

impl GotoNode {
    pub fn new(globals: &Arc<Globals>, id: NodeId, url: Arc<dyn Node>) -> Arc<GotoNode> {
        let (tx, rx) = mpsc::channel(IN_CHAN_SIZE);
        url.parent_chans().insert(id, tx);

        let node = Arc::new(GotoNode {
            id,
            url,
            rx: Mutex::new(Some(rx)),
            parent_chans: ParentChans::default(),
        });
        globals.register_node(id, node.clone());
        node
    }

    pub(crate) fn url(&self) -> Arc<dyn Node> {
        self.url.clone()
    }

    async fn fetch(&self, globals: &Arc<Globals>, url: String) -> Result<Value, RunError> {
        let host = url::Url::parse(&url)
            .map_err(|e| RunError::Http(format!("invalid url '{url}': {e}")))?
            .host_str()
            .map(str::to_string);
        if let Some(host) = host {
            globals.rate_limit(&host).await;
        }

        tracing::debug!(%url, "fetching page");
        let response = globals
            .http()
            .get(url.as_str())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| RunError::Http(e.to_string()))?;
        Ok(Value::Page(Page::new(url, response)))
    }
}

#[async_trait::async_trait]
impl Node for GotoNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn parent_chans(&self) -> &ParentChans {
        &self.parent_chans
    }

    fn dependencies(&self) -> Vec<Arc<dyn Node>> {
        vec![self.url.clone()]
    }

    fn clone_node(&self, globals: &Arc<Globals>) -> Arc<dyn Node> {
        GotoNode::new(globals, globals.generate_id(), self.url.clone_node(globals))
    }

    async fn run(&self, globals: &Arc<Globals>) {
        let Some(mut rx) = self.rx.lock().expect("goto rx poisoned").take() else {
            return;
        };

        let msg = match rx.recv().await {
            Some(Msg::Error(e)) => Msg::Error(e).with_id(self.id),
            Some(Msg::Value(v)) => match v.data {
                Value::Str(url) => match self.fetch(globals, url).await {
                    Ok(page) => Msg::value(self.id, true, page),
                    Err(e) => Msg::error(self.id, true, e),
                },
                other => Msg::error(self.id, true, RunError::NonStringUrl(other.kind())),
            },
            _ => Msg::error(
                self.id,
                true,
                RunError::Protocol("goto expects a value message".into()),
            ),
        };
        broadcast(&msg, &self.parent_chans).await;
        destroy_node(self);
    }

    fn write(&self, w: &mut dyn Write) -> Result<(), GraphError> {
        crate::io::write_goto_node(self, w)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ValueNode;

    #[tokio::test]
    async fn non_string_url_is_an_error() {
        let globals = Globals::new();
        let url = ValueNode::new(&globals, globals.generate_id(), Value::Int(5));
        let goto = GotoNode::new(&globals, globals.generate_id(), url.clone() as Arc<dyn Node>);
        let (tx, mut rx) = mpsc::channel(1);
        goto.parent_chans().insert(99, tx);

        url.run(&globals).await;
        goto.run(&globals).await;

        match rx.recv().await.unwrap() {
            Msg::Error(e) => assert_eq!(e.error, RunError::NonStringUrl("int")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_url_is_an_http_error() {
        let globals = Globals::new();
        let url = ValueNode::new(
            &globals,
            globals.generate_id(),
            Value::Str("not a url".into()),
        );
        let goto = GotoNode::new(&globals, globals.generate_id(), url.clone() as Arc<dyn Node>);
        let (tx, mut rx) = mpsc::channel(1);
        goto.parent_chans().insert(99, tx);

        url.run(&globals).await;
        goto.run(&globals).await;

        match rx.recv().await.unwrap() {
            Msg::Error(e) => assert!(matches!(e.error, RunError::Http(_))),
            other => panic!("expected error, got {other:?}"),
        }
    }
}
