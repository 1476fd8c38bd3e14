//! CSS extraction node.

use crate::error::{GraphError, RunError};
use crate::globals::Globals;
use crate::msg::{broadcast, Msg};
use crate::node::{destroy_node, MsgReceiver, Node, NodeId, ParentChans, IN_CHAN_SIZE};
use crate::value::Value;
use scraper::{Html, Selector as CssSelector};
use std::any::Any;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// One named extraction: the first node matching `selector` yields the
/// text stored under `name`.
#[derive(Clone, Debug, PartialEq)]
pub struct Selector {
    pub name: String,
    pub selector: String,
}

impl Selector {
    pub fn new(name: impl Into<String>, selector: impl Into<String>) -> Selector {
        Selector {
            name: name.into(),
            selector: selector.into(),
        }
    }
}

/// Consumes a fetched page, parses it as HTML and emits a map from binding
/// name to the extracted text of the first match of each CSS selector.
/// Bindings without a match extract null.
pub struct SelectorNode {
    id: NodeId,
    goto_node: Arc<dyn Node>,
    selectors: Vec<Selector>,
    rx: Mutex<Option<MsgReceiver>>,
    parent_chans: ParentChans,
}

impl SelectorNode {
    pub fn new(
        globals: &Arc<Globals>,
        id: NodeId,
        goto_node: Arc<dyn Node>,
        selectors: Vec<Selector>,
    ) -> Arc<SelectorNode> {
        let (tx, rx) = mpsc::channel(IN_CHAN_SIZE);
        goto_node.parent_chans().insert(id, tx);

        let node = Arc::new(SelectorNode {
            id,
            goto_node,
            selectors,
            rx: Mutex::new(Some(rx)),
            parent_chans: ParentChans::default(),
        });
        globals.register_node(id, node.clone());
        node
    }

    pub(crate) fn goto_node(&self) -> Arc<dyn Node> {
        self.goto_node.clone()
    }

    pub(crate) fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    async fn select(&self, page: crate::value::Page) -> Result<Value, RunError> {
        let Some(response) = page.take() else {
            return Err(RunError::Protocol(format!(
                "page for '{}' was already consumed",
                page.url()
            )));
        };
        let body = response
            .text()
            .await
            .map_err(|e| RunError::Http(format!("reading body of '{}': {e}", page.url())))?;
        extract(&body, &self.selectors).map(Value::Map)
    }
}

/// Parses `body` and extracts every binding. Synchronous on purpose: the
/// parsed document is not `Send` and must not live across an await point.
fn extract(body: &str, selectors: &[Selector]) -> Result<BTreeMap<String, Value>, RunError> {
    let document = Html::parse_document(body);
    let mut out = BTreeMap::new();
    for binding in selectors {
        let css = CssSelector::parse(&binding.selector).map_err(|e| {
            RunError::Html(format!("invalid css selector '{}': {e}", binding.selector))
        })?;
        let text = document
            .select(&css)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string());
        out.insert(
            binding.name.clone(),
            text.map(Value::Str).unwrap_or(Value::Null),
        );
    }
    Ok(out)
}

#[async_trait::async_trait]
impl Node for SelectorNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn parent_chans(&self) -> &ParentChans {
        &self.parent_chans
    }

    fn dependencies(&self) -> Vec<Arc<dyn Node>> {
        vec![self.goto_node.clone()]
    }

    fn clone_node(&self, globals: &Arc<Globals>) -> Arc<dyn Node> {
        SelectorNode::new(
            globals,
            globals.generate_id(),
            self.goto_node.clone_node(globals),
            self.selectors.clone(),
        )
    }

    async fn run(&self, _globals: &Arc<Globals>) {
        let Some(mut rx) = self.rx.lock().expect("selector rx poisoned").take() else {
            return;
        };

        let msg = match rx.recv().await {
            Some(Msg::Error(e)) => Msg::Error(e).with_id(self.id),
            Some(Msg::Value(v)) => match v.data {
                Value::Page(page) => match self.select(page).await {
                    Ok(map) => Msg::value(self.id, true, map),
                    Err(e) => Msg::error(self.id, true, e),
                },
                other => Msg::error(
                    self.id,
                    true,
                    RunError::Protocol(format!(
                        "selector expects a fetched page, got {}",
                        other.kind()
                    )),
                ),
            },
            _ => Msg::error(
                self.id,
                true,
                RunError::Protocol("selector expects a value message".into()),
            ),
        };
        broadcast(&msg, &self.parent_chans).await;
        destroy_node(self);
    }

    fn write(&self, w: &mut dyn Write) -> Result<(), GraphError> {
        crate::io::write_selector_node(self, w)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
