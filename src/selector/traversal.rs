// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Pull-based, resumable traversal.
//!
//! The cursor never loads anything itself. When it reaches a link it hands
//! back [`Step::NeedBlock`] and waits for [`Traversal::resume`]. Visits are
//! pre-order; children come in natural order (list index, map key).

use super::{display_path, PathSegment, Selector};
use crate::error::{KernelError, Result};
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Visit { path: Vec<PathSegment>, node: Ipld },
    NeedBlock(Cid),
    Done,
}

#[derive(Debug, Clone)]
enum Target {
    Node(Ipld),
    Link(Cid),
}

#[derive(Debug, Clone)]
struct Work {
    path: Vec<PathSegment>,
    target: Target,
    selector: Selector,
}

#[derive(Debug)]
pub struct Traversal {
    stack: Vec<Work>,
    pending: Option<(Cid, Vec<PathSegment>, Selector)>,
    deferred: Option<KernelError>,
}

impl Traversal {
    /// Starts at a root that still has to be loaded.
    pub fn from_link(root: Cid, selector: Selector) -> Self {
        Self::start(Target::Link(root), selector)
    }

    pub fn from_node(root: Ipld, selector: Selector) -> Self {
        Self::start(Target::Node(root), selector)
    }

    fn start(target: Target, selector: Selector) -> Self {
        Self {
            stack: vec![Work {
                path: Vec::new(),
                target,
                selector,
            }],
            pending: None,
            deferred: None,
        }
    }

    /// Advances to the next visit or block request.
    ///
    /// A missing child surfaces as `NotFound` after its parent's visit. Only
    /// that branch is dropped; calling `step` again continues with the rest.
    pub fn step(&mut self) -> Result<Step> {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }
        if let Some((cid, _, _)) = &self.pending {
            return Ok(Step::NeedBlock(*cid));
        }
        while let Some(work) = self.stack.pop() {
            match work.target {
                Target::Link(cid) => {
                    self.pending = Some((cid, work.path, work.selector));
                    return Ok(Step::NeedBlock(cid));
                }
                Target::Node(node) => {
                    self.expand(&work.path, &node, &work.selector);
                    if work.selector.decide(&node) {
                        return Ok(Step::Visit {
                            path: work.path,
                            node,
                        });
                    }
                    if let Some(err) = self.deferred.take() {
                        return Err(err);
                    }
                }
            }
        }
        Ok(Step::Done)
    }

    /// Feeds the decoded block the last `NeedBlock` asked for.
    pub fn resume(&mut self, cid: &Cid, node: Ipld) -> Result<()> {
        match self.pending.take() {
            Some((want, path, selector)) if want == *cid => {
                self.stack.push(Work {
                    path,
                    target: Target::Node(node),
                    selector,
                });
                Ok(())
            }
            other => {
                self.pending = other;
                Err(KernelError::NotFound(format!(
                    "traversal is not waiting for {cid}"
                )))
            }
        }
    }

    /// The link the cursor is blocked on, if any.
    pub fn waiting_on(&self) -> Option<&Cid> {
        self.pending.as_ref().map(|(cid, _, _)| cid)
    }

    fn expand(&mut self, path: &[PathSegment], node: &Ipld, selector: &Selector) {
        if selector.explores_nothing() || !matches!(node, Ipld::Map(_) | Ipld::List(_)) {
            return;
        }
        let len = match node {
            Ipld::Map(m) => m.len(),
            Ipld::List(l) => l.len(),
            _ => 0,
        };
        let interests = selector.interests(len);
        let mut children: Vec<(PathSegment, Ipld, Selector)> = Vec::new();
        if interests.is_empty() {
            let segments: Vec<PathSegment> = match node {
                Ipld::Map(m) => m.keys().cloned().map(PathSegment::Field).collect(),
                Ipld::List(l) => (0..l.len()).map(PathSegment::Index).collect(),
                _ => Vec::new(),
            };
            for seg in segments {
                if let (Some(next), Some(child)) = (selector.explore(node, &seg), seg.lookup(node)) {
                    children.push((seg, child.clone(), next));
                }
            }
        } else {
            for seg in interests {
                match seg.lookup(node) {
                    Some(child) => {
                        if let Some(next) = selector.explore(node, &seg) {
                            children.push((seg, child.clone(), next));
                        }
                    }
                    None => {
                        if self.deferred.is_none() {
                            let mut missing = path.to_vec();
                            missing.push(seg);
                            self.deferred = Some(KernelError::NotFound(display_path(&missing)));
                        }
                    }
                }
            }
        }
        for (seg, child, next) in children.into_iter().rev() {
            let mut child_path = path.to_vec();
            child_path.push(seg);
            let target = match child {
                Ipld::Link(cid) => Target::Link(cid),
                other => Target::Node(other),
            };
            self.stack.push(Work {
                path: child_path,
                target,
                selector: next,
            });
        }
    }
}

/// Drives a traversal to completion with a synchronous block source.
pub fn walk<L, V>(root: Ipld, selector: &Selector, mut load: L, mut visit: V) -> Result<()>
where
    L: FnMut(&Cid) -> Result<Ipld>,
    V: FnMut(&[PathSegment], &Ipld),
{
    let mut traversal = Traversal::from_node(root, selector.clone());
    loop {
        match traversal.step()? {
            Step::Visit { path, node } => visit(&path, &node),
            Step::NeedBlock(cid) => {
                let node = load(&cid)?;
                traversal.resume(&cid, node)?;
            }
            Step::Done => return Ok(()),
        }
    }
}
