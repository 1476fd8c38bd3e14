//! # trawl-core — the trawl graph evaluation engine
//!
//! A trawl program compiles to a directed graph of communicating nodes;
//! this crate executes that graph. Each node runs as one tokio task,
//! exchanging [`Msg`]s over bounded channels: a completed value, a stream
//! element tagged with a nestable [`StreamIndex`], or an error that passes
//! up unchanged through every intermediate node.
//!
//! ## Layers
//!
//! * [`msg`] / [`stream`] / [`value`] — the wire format between nodes:
//!   message variants, stream indices and the data tree that reassembles
//!   streams into nested arrays.
//! * [`node`] — the node runtimes behind one [`Node`] trait, For loop
//!   fan-out included.
//! * [`globals`] — the per-run registry: id allocation, the id→node map,
//!   the result node and per-host token-bucket rate limiting.
//! * [`planner`] — distributes a concurrency budget across For fan-outs
//!   before execution.
//! * [`driver`] — starts every node and delivers the final message (or
//!   stream) on a dedicated result channel.
//! * [`io`] — the little-endian binary graph file format.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use trawl_core::{driver, Globals, Outcome, Value};
//! use trawl_core::node::{MultOpNode, Node, ValueNode};
//! use trawl_core::tokens::Token;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let globals = Globals::new();
//! let two = ValueNode::new(&globals, globals.generate_id(), Value::Int(2));
//! let three = ValueNode::new(&globals, globals.generate_id(), Value::Int(3));
//! let sum = MultOpNode::new(
//!     &globals,
//!     globals.generate_id(),
//!     Token::Add,
//!     vec![two as Arc<dyn Node>, three as Arc<dyn Node>],
//! );
//! globals.set_result_id(sum.id());
//!
//! let outcome = driver::execute(&globals).await.unwrap();
//! assert_eq!(outcome, Outcome::Value(Value::Int(5)));
//! # }
//! ```

pub mod driver;
pub mod error;
pub mod globals;
pub mod io;
pub mod msg;
pub mod node;
pub mod planner;
pub mod stream;
pub mod tokens;
pub mod value;

pub use driver::Outcome;
pub use error::{GraphError, Result, RunError};
pub use globals::{Globals, RateLimit};
pub use msg::{ErrMsg, Msg, StreamMsg, ValueMsg};
pub use node::{Node, NodeId, IN_CHAN_SIZE};
pub use stream::{DataTree, StreamIndex};
pub use value::{Page, Value};
