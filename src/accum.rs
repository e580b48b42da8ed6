//! Accumulation of currently open structural context.
//!
//! While tokens stream by, the extractor needs to know which
//! structures are open right now and what their attributes are. Two
//! disciplines exist in the wild: strictly nested files (a stack) and
//! files where structures open and close freely (a per-name set). The
//! configuration picks one once; both sit behind [Accumulator].

use crate::errors::ProcError;
use crate::vertical::Structure;
use rustc_hash::FxHashMap;

/// An open structure plus the line at which it was opened. Returned
/// to the driver when the matching close event arrives.
#[derive(Debug, Clone)]
pub struct AccumItem {
    pub elm: Structure,
    pub line_open: usize,
}

/// Attribute names checked, in order, to identify an element in a
/// self-recursion error message.
const IDENT_ATTRS: [&str; 4] = ["id", "name", "ident", "inst"];

pub enum Accumulator {
    Stack(StructStack),
    Set(StructSet),
}

impl Accumulator {
    /// `nested_strict` selects the stack variant; otherwise the set
    /// variant is used.
    pub fn new(nested_strict: bool) -> Accumulator {
        if nested_strict {
            Accumulator::Stack(StructStack::default())
        } else {
            Accumulator::Set(StructSet::default())
        }
    }

    pub fn begin(&mut self, line: usize, elm: Structure) -> Result<(), ProcError> {
        match self {
            Accumulator::Stack(s) => s.begin(line, elm),
            Accumulator::Set(s) => s.begin(line, elm),
        }
    }

    pub fn end(&mut self, line: usize, name: &str) -> Result<AccumItem, ProcError> {
        match self {
            Accumulator::Stack(s) => s.end(line, name),
            Accumulator::Set(s) => s.end(line, name),
        }
    }

    /// Calls `f(structure, attr, value)` for every attribute of every
    /// currently open structure. Returning `false` short-circuits.
    pub fn for_each_attr<F>(&self, f: F)
    where
        F: FnMut(&str, &str, &str) -> bool,
    {
        match self {
            Accumulator::Stack(s) => s.for_each_attr(f),
            Accumulator::Set(s) => s.for_each_attr(f),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Accumulator::Stack(s) => s.items.len(),
            Accumulator::Set(s) => s.elms.len(),
        }
    }
}

/// Strict LIFO accumulator for well-nested verticals.
#[derive(Default)]
pub struct StructStack {
    items: Vec<AccumItem>,
}

impl StructStack {
    fn begin(&mut self, line: usize, elm: Structure) -> Result<(), ProcError> {
        self.items.push(AccumItem {
            elm,
            line_open: line,
        });
        Ok(())
    }

    fn end(&mut self, _line: usize, name: &str) -> Result<AccumItem, ProcError> {
        match self.items.last() {
            None => Err(ProcError::MissingOpen {
                name: name.to_owned(),
            }),
            Some(top) if top.elm.name != name => Err(ProcError::NestedMismatch {
                expected: top.elm.name.clone(),
                got: name.to_owned(),
            }),
            Some(_) => Ok(self.items.pop().expect("stack is non-empty")),
        }
    }

    fn for_each_attr<F>(&self, mut f: F)
    where
        F: FnMut(&str, &str, &str) -> bool,
    {
        for item in self.items.iter().rev() {
            for (attr, val) in &item.elm.attrs {
                if !f(&item.elm.name, attr, val) {
                    return;
                }
            }
        }
    }
}

/// Nesting-agnostic accumulator keeping at most one open element per
/// structure name. A structure cannot be nested into itself here.
#[derive(Default)]
pub struct StructSet {
    elms: FxHashMap<String, AccumItem>,
}

impl StructSet {
    fn begin(&mut self, line: usize, elm: Structure) -> Result<(), ProcError> {
        if self.elms.contains_key(&elm.name) {
            let ident = IDENT_ATTRS
                .into_iter()
                .find_map(|a| elm.attr(a))
                .unwrap_or("??")
                .to_owned();
            return Err(ProcError::SelfRecursion {
                name: elm.name,
                ident,
            });
        }
        self.elms.insert(
            elm.name.clone(),
            AccumItem {
                elm,
                line_open: line,
            },
        );
        Ok(())
    }

    fn end(&mut self, _line: usize, name: &str) -> Result<AccumItem, ProcError> {
        self.elms.remove(name).ok_or_else(|| ProcError::MissingOpen {
            name: name.to_owned(),
        })
    }

    fn for_each_attr<F>(&self, mut f: F)
    where
        F: FnMut(&str, &str, &str) -> bool,
    {
        for item in self.elms.values() {
            for (attr, val) in &item.elm.attrs {
                if !f(&item.elm.name, attr, val) {
                    return;
                }
            }
        }
    }
}
