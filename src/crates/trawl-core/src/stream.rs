//! Stream indices and the data tree that reassembles streams.
//!
//! A [`StreamIndex`] is an integer path into the product space of nested
//! for loops. Components run from the innermost loop outward: `[3, 1]`
//! names position 1 in the inner collection and position 3 in the outer
//! one. A For extends an index on the way up by concatenation, which is
//! what makes nested loops composable — a Collect arbitrarily far above
//! sees the full product shape in the message's length index.
//!
//! A [`DataTree`] is built from an index of *lengths* and holds one slot
//! per point of the product space until every stream element has arrived.

use crate::error::RunError;
use crate::value::Value;
use std::fmt;

/// An ordered sequence of integers identifying a position inside nested
/// iteration spaces.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct StreamIndex {
    indexes: Vec<usize>,
}

impl StreamIndex {
    /// An index with no components.
    pub fn empty() -> Self {
        StreamIndex::default()
    }

    /// A one-component index.
    pub fn single(i: usize) -> Self {
        StreamIndex { indexes: vec![i] }
    }

    pub fn from_components(indexes: Vec<usize>) -> Self {
        StreamIndex { indexes }
    }

    /// Appends a single component.
    pub fn push(&mut self, i: usize) {
        self.indexes.push(i);
    }

    /// Appends every component of `other`, in order.
    pub fn concat(&mut self, other: &StreamIndex) {
        self.indexes.extend_from_slice(&other.indexes);
    }

    /// Removes and returns the last component.
    pub fn pop(&mut self) -> Option<usize> {
        self.indexes.pop()
    }

    /// The last component, without removing it.
    pub fn last(&self) -> Option<usize> {
        self.indexes.last().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Number of components (the nesting depth, not the product).
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn components(&self) -> &[usize] {
        &self.indexes
    }

    /// Product of all components. For a length index this is the total
    /// number of stream elements. The empty index has product 1.
    pub fn product(&self) -> usize {
        self.indexes.iter().product()
    }

    /// The string form used as a map key. Every component is followed by a
    /// separator so that concatenating indices concatenates keys:
    /// `[3, 1]` renders as `"3.1."`.
    pub fn key(&self) -> String {
        let mut s = String::new();
        for i in &self.indexes {
            s.push_str(&i.to_string());
            s.push('.');
        }
        s
    }
}

impl fmt::Display for StreamIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// A hierarchical buffer for stream elements, flattened into nested arrays
/// once complete.
#[derive(Clone, Debug, PartialEq)]
pub enum DataTree {
    Branch(Vec<DataTree>),
    Leaf(Option<Value>),
}

impl DataTree {
    /// Builds an empty tree from an index of lengths. The *last* component
    /// is the outermost level: `[3, 2]` produces two children of three
    /// leaves each, fifteen slots in total for `[3, 5]` and so on.
    pub fn from_lens(lens: &StreamIndex) -> DataTree {
        let mut lens = lens.clone();
        Self::build(&mut lens)
    }

    fn build(lens: &mut StreamIndex) -> DataTree {
        match lens.pop() {
            None => DataTree::Leaf(None),
            Some(len) => {
                let children = (0..len).map(|_| Self::build(&mut lens.clone())).collect();
                DataTree::Branch(children)
            }
        }
    }

    /// Stores `value` at `idx`, walking from the outermost component (the
    /// last) inward.
    pub fn set(&mut self, idx: &StreamIndex, value: Value) -> Result<(), RunError> {
        let mut idx = idx.clone();
        self.set_inner(&mut idx, value)
    }

    fn set_inner(&mut self, idx: &mut StreamIndex, value: Value) -> Result<(), RunError> {
        match self {
            DataTree::Leaf(slot) => {
                if idx.is_empty() {
                    *slot = Some(value);
                    Ok(())
                } else {
                    Err(RunError::Protocol(
                        "stream index deeper than the stream shape".into(),
                    ))
                }
            }
            DataTree::Branch(children) => {
                let i = idx.pop().ok_or_else(|| {
                    RunError::Protocol("stream index shallower than the stream shape".into())
                })?;
                let len = children.len();
                children
                    .get_mut(i)
                    .ok_or(RunError::OutOfRange { index: i, len })?
                    .set_inner(idx, value)
            }
        }
    }

    /// Reads the value at `idx`. Unset slots read as `None`.
    pub fn get(&self, idx: &StreamIndex) -> Result<Option<&Value>, RunError> {
        let mut idx = idx.clone();
        self.get_inner(&mut idx)
    }

    fn get_inner(&self, idx: &mut StreamIndex) -> Result<Option<&Value>, RunError> {
        match self {
            DataTree::Leaf(slot) => {
                if idx.is_empty() {
                    Ok(slot.as_ref())
                } else {
                    Err(RunError::Protocol(
                        "stream index deeper than the stream shape".into(),
                    ))
                }
            }
            DataTree::Branch(children) => {
                let i = idx.pop().ok_or_else(|| {
                    RunError::Protocol("stream index shallower than the stream shape".into())
                })?;
                let len = children.len();
                children
                    .get(i)
                    .ok_or(RunError::OutOfRange { index: i, len })?
                    .get_inner(idx)
            }
        }
    }

    /// Flattens the tree into nested lists. A level of length 1 collapses
    /// into its only child; unset leaves flatten to null.
    pub fn data(&self) -> Value {
        match self {
            DataTree::Leaf(slot) => slot.clone().unwrap_or(Value::Null),
            DataTree::Branch(children) if children.len() == 1 => children[0].data(),
            DataTree::Branch(children) => {
                Value::List(children.iter().map(DataTree::data).collect())
            }
        }
    }
}
