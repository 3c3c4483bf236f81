//! Finds shared and recursive nodes and extracts them into subroutines.
//!
//! Identity matters here, not structure: two structurally equal parsers built
//! separately are two nodes, one parser used twice is one node with two parents.
//! Nodes are interned into an arena by pointer, walked with an explicit stack, and the
//! tree is rebuilt with every extracted node replaced by a [`Expr::Call`].

use crate::expr::{resolve, Expr, SubRef, P};
use crate::token::Token;
use crate::value::address;
use crate::CompileError;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subroutine<T> {
    pub body: P<T>,
    pub recursive: bool,
}

/// An expression without forward references, plus the subroutines it calls.
#[derive(Clone, Debug)]
pub struct Bound<T> {
    pub main: P<T>,
    pub subroutines: BTreeMap<u32, Subroutine<T>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Colour {
    White,
    Grey,
    Black,
}

struct Binder<T> {
    nodes: Vec<P<T>>,
    index: HashMap<usize, usize>,
    kids: Vec<Vec<usize>>,
    indegree: Vec<usize>,
    recursive: Vec<bool>,
}

impl<T: Token> Binder<T> {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            kids: Vec::new(),
            indegree: Vec::new(),
            recursive: Vec::new(),
        }
    }

    /// The arena index of `p` after following forward references.
    fn intern(&mut self, p: &P<T>) -> Result<usize, CompileError> {
        let p = resolve(p)?;
        let key = address(&p);
        if let Some(&idx) = self.index.get(&key) {
            return Ok(idx);
        }

        let idx = self.nodes.len();
        self.index.insert(key, idx);
        self.nodes.push(p);
        self.kids.push(Vec::new());
        self.indegree.push(0);
        self.recursive.push(false);
        Ok(idx)
    }

    /// Depth-first walk from `root`, returning nodes in finish order.
    fn walk(&mut self, root: usize) -> Result<Vec<usize>, CompileError> {
        let mut colour = vec![Colour::White; self.nodes.len()];
        let mut finished = Vec::new();
        // (node, index of the next child to visit)
        let mut stack = vec![(root, 0usize)];
        colour[root] = Colour::Grey;

        while let Some(&(node, next)) = stack.last() {
            if next == 0 {
                let children: Vec<P<T>> =
                    self.nodes[node].children().into_iter().cloned().collect();
                let mut kids = Vec::with_capacity(children.len());
                for c in &children {
                    kids.push(self.intern(c)?);
                }
                colour.resize(self.nodes.len(), Colour::White);
                self.kids[node] = kids;
            }

            let Some(&child) = self.kids[node].get(next) else {
                colour[node] = Colour::Black;
                finished.push(node);
                stack.pop();
                continue;
            };

            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }
            self.indegree[child] += 1;
            match colour[child] {
                Colour::White => {
                    colour[child] = Colour::Grey;
                    stack.push((child, 0));
                }
                Colour::Grey => self.recursive[child] = true,
                Colour::Black => {}
            }
        }

        Ok(finished)
    }

    /// Primitives and one combinator directly over primitives are cheap enough to
    /// duplicate at every use.
    fn is_small(&self, idx: usize) -> bool {
        let node = &self.nodes[idx];
        if node.is_leaf() {
            return true;
        }
        matches!(
            node.as_ref(),
            Expr::Map(..) | Expr::Seq(..) | Expr::Attempt(_) | Expr::Label(..)
        ) && self.kids[idx].iter().all(|&k| self.nodes[k].is_leaf())
    }
}

/// Forces every forward reference reachable from `root` and extracts shared and
/// recursive nodes into subroutines.
pub fn bind<T: Token>(root: &P<T>) -> Result<Bound<T>, CompileError> {
    let mut binder = Binder::new();
    let root = binder.intern(root)?;
    let order = binder.walk(root)?;

    let extract: Vec<bool> = (0..binder.nodes.len())
        .map(|i| binder.recursive[i] || (binder.indegree[i] > 1 && !binder.is_small(i)))
        .collect();

    let mut labels = HashMap::new();
    for &i in &order {
        if extract[i] {
            labels.insert(i, labels.len() as u32);
        }
    }

    let call = |i: usize| -> P<T> {
        Rc::new(Expr::Call(SubRef {
            label: labels[&i],
            recursive: binder.recursive[i],
        }))
    };

    let mut built: Vec<Option<P<T>>> = vec![None; binder.nodes.len()];
    let mut subroutines = BTreeMap::new();
    for &i in &order {
        let node = &binder.nodes[i];
        let kids = &binder.kids[i];
        let rebuilt = if kids.is_empty() {
            node.clone()
        } else {
            let children = kids
                .iter()
                .map(|&k| match &built[k] {
                    Some(b) if !extract[k] => b.clone(),
                    _ => call(k),
                })
                .collect();
            Rc::new(node.with_children(children))
        };

        if extract[i] {
            subroutines.insert(
                labels[&i],
                Subroutine {
                    body: rebuilt.clone(),
                    recursive: binder.recursive[i],
                },
            );
        }
        built[i] = Some(rebuilt);
    }

    let main = if extract[root] {
        call(root)
    } else {
        built[root].clone().unwrap_or_else(|| call(root))
    };

    log::debug!(
        "bound {} nodes, extracted {} subroutines ({} recursive)",
        binder.nodes.len(),
        subroutines.len(),
        subroutines.values().filter(|s| s.recursive).count()
    );

    Ok(Bound { main, subroutines })
}
