//! The binary graph file format.
//!
//! Little-endian throughout: 32- and 64-bit signed integers,
//! length-prefixed UTF-8 strings, a 32-bit type tag per scalar value and a
//! single tag byte per node. A file holds the registry header (the next
//! node id, the result node id and the rate-limiter table) followed by the
//! result node's subtree; every node writes its tag, id and fields, then
//! recursively its dependencies. Reading is symmetric and reconstructs
//! nodes through the same constructors compilation uses, so channel wiring
//! is rebuilt identically.

use crate::error::{GraphError, Result};
use crate::globals::Globals;
use crate::node::{
    BinOpNode, CollectNode, ForNode, GotoNode, IfNode, MultOpNode, Node, Selector, SelectorNode,
    UnOpNode, ValueNode, VarNode,
};
use crate::tokens::Token;
use crate::value::Value;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

/// One byte per node variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum NodeTag {
    BinOp = 0,
    Collect = 1,
    For = 2,
    Goto = 3,
    If = 4,
    MultOp = 5,
    Selector = 6,
    UnOp = 7,
    Value = 8,
    Var = 9,
}

impl NodeTag {
    fn from_byte(b: u8) -> Result<NodeTag> {
        use NodeTag::*;
        Ok(match b {
            0 => BinOp,
            1 => Collect,
            2 => For,
            3 => Goto,
            4 => If,
            5 => MultOp,
            6 => Selector,
            7 => UnOp,
            8 => Value,
            9 => Var,
            other => return Err(GraphError::InvalidNodeTag(other)),
        })
    }
}

/// 32-bit scalar value tags.
const VALUE_INT: i32 = 0;
const VALUE_STRING: i32 = 1;
const VALUE_BOOL: i32 = 2;
const VALUE_NIL: i32 = 3;

pub fn write_i32(w: &mut dyn Write, v: i32) -> Result<()> {
    w.write_i32::<LittleEndian>(v)?;
    Ok(())
}

pub fn write_i64(w: &mut dyn Write, v: i64) -> Result<()> {
    w.write_i64::<LittleEndian>(v)?;
    Ok(())
}

pub fn write_string(w: &mut dyn Write, s: &str) -> Result<()> {
    write_i32(w, s.len() as i32)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

/// Writes a scalar value: type tag then payload. Booleans encode as 32-bit
/// 0/1, nil has no payload. Non-scalar values never appear in graph files.
pub fn write_value(w: &mut dyn Write, value: &Value) -> Result<()> {
    match value {
        Value::Int(i) => {
            write_i32(w, VALUE_INT)?;
            write_i32(w, *i)
        }
        Value::Str(s) => {
            write_i32(w, VALUE_STRING)?;
            write_string(w, s)
        }
        Value::Bool(b) => {
            write_i32(w, VALUE_BOOL)?;
            write_i32(w, i32::from(*b))
        }
        Value::Null => write_i32(w, VALUE_NIL),
        other => Err(GraphError::UnencodableValue(other.kind())),
    }
}

pub fn read_i32(r: &mut dyn Read) -> Result<i32> {
    Ok(r.read_i32::<LittleEndian>()?)
}

pub fn read_i64(r: &mut dyn Read) -> Result<i64> {
    Ok(r.read_i64::<LittleEndian>()?)
}

pub fn read_string(r: &mut dyn Read) -> Result<String> {
    let len = read_i32(r)?;
    if len < 0 {
        return Err(GraphError::NegativeLength(len));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(String::from_utf8(buf)?)
}

pub fn read_value(r: &mut dyn Read) -> Result<Value> {
    match read_i32(r)? {
        VALUE_INT => Ok(Value::Int(read_i32(r)?)),
        VALUE_STRING => Ok(Value::Str(read_string(r)?)),
        VALUE_BOOL => Ok(Value::Bool(read_i32(r)? != 0)),
        VALUE_NIL => Ok(Value::Null),
        other => Err(GraphError::InvalidValueTag(other)),
    }
}

fn write_tag(w: &mut dyn Write, tag: NodeTag) -> Result<()> {
    w.write_all(&[tag as u8])?;
    Ok(())
}

fn read_operator(r: &mut dyn Read) -> Result<Token> {
    let code = read_i32(r)?;
    Token::from_code(code).ok_or(GraphError::InvalidOperator(code))
}

pub(crate) fn write_bin_op_node(n: &BinOpNode, w: &mut dyn Write) -> Result<()> {
    write_tag(w, NodeTag::BinOp)?;
    write_i32(w, n.id())?;
    write_i32(w, n.op().code())?;
    n.a().write(w)?;
    n.b().write(w)
}

pub(crate) fn write_collect_node(n: &CollectNode, w: &mut dyn Write) -> Result<()> {
    write_tag(w, NodeTag::Collect)?;
    write_i32(w, n.id())?;
    n.node().write(w)
}

pub(crate) fn write_for_node(n: &ForNode, w: &mut dyn Write) -> Result<()> {
    write_tag(w, NodeTag::For)?;
    write_i32(w, n.id())?;
    write_i32(w, n.fanout() as i32)?;
    write_string(w, n.name())?;
    n.collection().write(w)?;
    n.body().write(w)
}

pub(crate) fn write_goto_node(n: &GotoNode, w: &mut dyn Write) -> Result<()> {
    write_tag(w, NodeTag::Goto)?;
    write_i32(w, n.id())?;
    n.url().write(w)
}

pub(crate) fn write_if_node(n: &IfNode, w: &mut dyn Write) -> Result<()> {
    write_tag(w, NodeTag::If)?;
    write_i32(w, n.id())?;
    n.pred().write(w)?;
    n.conseq().write(w)?;
    n.alt().write(w)
}

pub(crate) fn write_mult_op_node(n: &MultOpNode, w: &mut dyn Write) -> Result<()> {
    write_tag(w, NodeTag::MultOp)?;
    write_i32(w, n.id())?;
    write_i32(w, n.op().code())?;
    write_i32(w, n.nodes().len() as i32)?;
    for node in n.nodes() {
        node.write(w)?;
    }
    Ok(())
}

pub(crate) fn write_selector_node(n: &SelectorNode, w: &mut dyn Write) -> Result<()> {
    write_tag(w, NodeTag::Selector)?;
    write_i32(w, n.id())?;
    n.goto_node().write(w)?;
    write_i32(w, n.selectors().len() as i32)?;
    for selector in n.selectors() {
        write_string(w, &selector.name)?;
        write_string(w, &selector.selector)?;
    }
    Ok(())
}

pub(crate) fn write_un_op_node(n: &UnOpNode, w: &mut dyn Write) -> Result<()> {
    write_tag(w, NodeTag::UnOp)?;
    write_i32(w, n.id())?;
    write_i32(w, n.op().code())?;
    n.node().write(w)
}

pub(crate) fn write_value_node(n: &ValueNode, w: &mut dyn Write) -> Result<()> {
    write_tag(w, NodeTag::Value)?;
    write_i32(w, n.id())?;
    write_value(w, n.value())
}

pub(crate) fn write_var_node(n: &VarNode, w: &mut dyn Write) -> Result<()> {
    write_tag(w, NodeTag::Var)?;
    write_i32(w, n.id())?;
    write_string(w, n.name())
}

/// Reads one node (tag, id, fields and dependency subtrees), registering
/// everything through `globals` exactly as compilation would.
pub fn read_node(r: &mut dyn Read, globals: &Arc<Globals>) -> Result<Arc<dyn Node>> {
    let mut tag = [0u8; 1];
    r.read_exact(&mut tag)?;
    let node: Arc<dyn Node> = match NodeTag::from_byte(tag[0])? {
        NodeTag::BinOp => {
            let id = read_i32(r)?;
            let op = read_operator(r)?;
            let a = read_node(r, globals)?;
            let b = read_node(r, globals)?;
            BinOpNode::new(globals, id, op, a, b)
        }
        NodeTag::Collect => {
            let id = read_i32(r)?;
            let node = read_node(r, globals)?;
            CollectNode::new(globals, id, node)
        }
        NodeTag::For => {
            let id = read_i32(r)?;
            let fanout = read_i32(r)?;
            let name = read_string(r)?;
            let collection = read_node(r, globals)?;
            let body = read_node(r, globals)?;
            let for_node = ForNode::new(globals, id, name, collection, body);
            for_node.set_fanout(fanout.max(1) as usize);
            for_node
        }
        NodeTag::Goto => {
            let id = read_i32(r)?;
            let url = read_node(r, globals)?;
            GotoNode::new(globals, id, url)
        }
        NodeTag::If => {
            let id = read_i32(r)?;
            let pred = read_node(r, globals)?;
            let conseq = read_node(r, globals)?;
            let alt = read_node(r, globals)?;
            IfNode::new(globals, id, pred, conseq, alt)
        }
        NodeTag::MultOp => {
            let id = read_i32(r)?;
            let op = read_operator(r)?;
            let len = read_i32(r)?;
            if len < 0 {
                return Err(GraphError::NegativeLength(len));
            }
            let mut nodes = Vec::with_capacity(len as usize);
            for _ in 0..len {
                nodes.push(read_node(r, globals)?);
            }
            MultOpNode::new(globals, id, op, nodes)
        }
        NodeTag::Selector => {
            let id = read_i32(r)?;
            let goto_node = read_node(r, globals)?;
            let len = read_i32(r)?;
            if len < 0 {
                return Err(GraphError::NegativeLength(len));
            }
            let mut selectors = Vec::with_capacity(len as usize);
            for _ in 0..len {
                let name = read_string(r)?;
                let selector = read_string(r)?;
                selectors.push(Selector { name, selector });
            }
            SelectorNode::new(globals, id, goto_node, selectors)
        }
        NodeTag::UnOp => {
            let id = read_i32(r)?;
            let op = read_operator(r)?;
            let node = read_node(r, globals)?;
            UnOpNode::new(globals, id, op, node)
        }
        NodeTag::Value => {
            let id = read_i32(r)?;
            let value = read_value(r)?;
            ValueNode::new(globals, id, value)
        }
        NodeTag::Var => {
            let id = read_i32(r)?;
            let name = read_string(r)?;
            VarNode::new(globals, id, name)
        }
    };
    Ok(node)
}

/// Writes the registry header and the result node's subtree.
pub fn write_globals(w: &mut dyn Write, globals: &Arc<Globals>) -> Result<()> {
    let result = globals.result_node().ok_or(GraphError::MissingResultNode)?;
    write_i32(w, globals.curr_id())?;
    write_i32(w, globals.result_id().expect("result id present"))?;

    let limits = globals.rate_limits();
    write_i32(w, limits.len() as i32)?;
    for (host, limit) in limits {
        write_string(w, &host)?;
        write_i32(w, limit.max_times)?;
        write_i64(w, limit.period.as_nanos() as i64)?;
    }

    result.write(w)
}

/// Reads a graph file into a fresh registry. Rate limiters are rebuilt
/// from their configuration; live token state is not persisted.
pub fn read_globals(r: &mut dyn Read) -> Result<Arc<Globals>> {
    let curr_id = read_i32(r)?;
    let result_id = read_i32(r)?;
    let globals = Globals::new();

    let limiters = read_i32(r)?;
    if limiters < 0 {
        return Err(GraphError::NegativeLength(limiters));
    }
    for _ in 0..limiters {
        let host = read_string(r)?;
        let max_times = read_i32(r)?;
        let nanos = read_i64(r)?;
        globals.set_rate_limit(&host, max_times, Duration::from_nanos(nanos.max(0) as u64));
    }

    read_node(r, &globals)?;
    globals.set_curr_id(curr_id);
    globals.set_result_id(result_id);
    Ok(globals)
}

/// Serializes a planned graph to any writer.
pub fn write_graph<W: Write>(mut w: W, globals: &Arc<Globals>) -> Result<()> {
    write_globals(&mut w, globals)
}

/// Deserializes a graph from any reader.
pub fn read_graph<R: Read>(mut r: R) -> Result<Arc<Globals>> {
    read_globals(&mut r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::same_structure;

    fn round_trip(globals: &Arc<Globals>, node: Arc<dyn Node>) -> (Arc<Globals>, Arc<dyn Node>) {
        globals.set_result_id(node.id());
        let mut buf = Vec::new();
        write_graph(&mut buf, globals).unwrap();
        let loaded = read_graph(buf.as_slice()).unwrap();
        let result = loaded.result_node().expect("result node");
        (loaded, result)
    }

    #[test]
    fn scalar_values_round_trip() {
        for value in [
            Value::Int(-42),
            Value::Str("hello".into()),
            Value::Bool(true),
            Value::Bool(false),
            Value::Null,
        ] {
            let mut buf = Vec::new();
            write_value(&mut buf, &value).unwrap();
            assert_eq!(read_value(&mut buf.as_slice()).unwrap(), value);
        }
    }

    #[test]
    fn non_scalar_values_do_not_encode() {
        let mut buf = Vec::new();
        assert!(matches!(
            write_value(&mut buf, &Value::List(vec![])),
            Err(GraphError::UnencodableValue("list"))
        ));
    }

    #[test]
    fn strings_are_length_prefixed_little_endian() {
        let mut buf = Vec::new();
        write_string(&mut buf, "ab").unwrap();
        assert_eq!(buf, vec![2, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn every_node_kind_round_trips() {
        let globals = Globals::new();

        let value = ValueNode::new(&globals, globals.generate_id(), Value::Int(3));
        let var = VarNode::new(&globals, globals.generate_id(), "x");
        let bin = BinOpNode::new(
            &globals,
            globals.generate_id(),
            Token::Range,
            value.clone() as Arc<dyn Node>,
            var.clone() as Arc<dyn Node>,
        );
        let un = UnOpNode::new(
            &globals,
            globals.generate_id(),
            Token::Not,
            ValueNode::new(&globals, globals.generate_id(), Value::Bool(true)) as Arc<dyn Node>,
        );
        let mult = MultOpNode::new(
            &globals,
            globals.generate_id(),
            Token::Add,
            vec![bin.clone() as Arc<dyn Node>, un.clone() as Arc<dyn Node>],
        );
        let if_node = IfNode::new(
            &globals,
            globals.generate_id(),
            ValueNode::new(&globals, globals.generate_id(), Value::Bool(true)) as Arc<dyn Node>,
            mult.clone() as Arc<dyn Node>,
            ValueNode::new(&globals, globals.generate_id(), Value::Null) as Arc<dyn Node>,
        );
        let goto = GotoNode::new(
            &globals,
            globals.generate_id(),
            ValueNode::new(
                &globals,
                globals.generate_id(),
                Value::Str("http://example.com".into()),
            ) as Arc<dyn Node>,
        );
        let selector = SelectorNode::new(
            &globals,
            globals.generate_id(),
            goto as Arc<dyn Node>,
            vec![Selector::new("title", "h1"), Selector::new("body", "#b p")],
        );
        let for_node = ForNode::new(
            &globals,
            globals.generate_id(),
            "i",
            if_node as Arc<dyn Node>,
            selector as Arc<dyn Node>,
        );
        for_node.set_fanout(4);
        let collect = CollectNode::new(&globals, globals.generate_id(), for_node as Arc<dyn Node>);

        let (_loaded, result) = round_trip(&globals, collect.clone() as Arc<dyn Node>);
        assert!(same_structure(
            &(collect as Arc<dyn Node>),
            &result
        ));
    }

    #[test]
    fn registry_header_round_trips() {
        let globals = Globals::new();
        globals.set_rate_limit("example.com", 3, Duration::from_secs(4));
        globals.set_rate_limit("other.org", 1, Duration::from_millis(250));
        let node = ValueNode::new(&globals, globals.generate_id(), Value::Int(9));
        globals.set_result_id(node.id());

        let mut buf = Vec::new();
        write_graph(&mut buf, &globals).unwrap();
        let loaded = read_graph(buf.as_slice()).unwrap();

        assert_eq!(loaded.curr_id(), globals.curr_id());
        assert_eq!(loaded.result_id(), globals.result_id());
        assert_eq!(loaded.rate_limits(), globals.rate_limits());
    }

    #[test]
    fn node_ids_survive_round_trip() {
        let globals = Globals::new();
        let a = ValueNode::new(&globals, globals.generate_id(), Value::Int(1));
        let b = ValueNode::new(&globals, globals.generate_id(), Value::Int(2));
        let op = BinOpNode::new(
            &globals,
            globals.generate_id(),
            Token::Equals,
            a as Arc<dyn Node>,
            b as Arc<dyn Node>,
        );
        let (loaded, result) = round_trip(&globals, op.clone() as Arc<dyn Node>);
        assert_eq!(result.id(), op.id());
        // Dependencies were re-registered under their original ids.
        for dep in op.dependencies() {
            assert!(loaded.node(dep.id()).is_some());
        }
    }

    #[test]
    fn invalid_tag_is_rejected() {
        let buf = vec![0xEEu8];
        assert!(matches!(
            read_node(&mut buf.as_slice(), &Globals::new()),
            Err(GraphError::InvalidNodeTag(0xEE))
        ));
    }
}
