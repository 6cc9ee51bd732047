// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Parsed selectors and the explore/decide rules.

use super::{Condition, PathSegment, RecursionLimit, SelectorNode};
use crate::error::{KernelError, Result};
use ipld_core::ipld::Ipld;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq)]
pub enum Selector {
    Matcher,
    ExploreAll(Box<Selector>),
    ExploreFields(BTreeMap<String, Selector>),
    ExploreIndex {
        index: usize,
        next: Box<Selector>,
    },
    ExploreRange {
        start: usize,
        end: usize,
        next: Box<Selector>,
    },
    /// `current` is what applies at this level; `sequence` replaces each edge
    /// reached while the limit allows another round.
    ExploreRecursive {
        sequence: Box<Selector>,
        current: Box<Selector>,
        limit: RecursionLimit,
        stop_at: Option<Condition>,
    },
    RecursiveEdge,
    Union(Vec<Selector>),
    Conditional {
        condition: Condition,
        next: Box<Selector>,
    },
    StopAt {
        condition: Condition,
        next: Box<Selector>,
    },
}

/// Parses a selector tree, resolving every recursive edge against its
/// enclosing recursive explore.
pub fn parse(node: &SelectorNode) -> Result<Selector> {
    compile(node, &[])
}

fn compile(node: &SelectorNode, ancestors: &[&SelectorNode]) -> Result<Selector> {
    let sel = match node {
        SelectorNode::Matcher => Selector::Matcher,
        SelectorNode::ExploreAll { next } => Selector::ExploreAll(Box::new(compile(next, ancestors)?)),
        SelectorNode::ExploreFields { fields } => {
            let mut compiled = BTreeMap::new();
            for (name, sel) in fields {
                compiled.insert(name.clone(), compile(sel, ancestors)?);
            }
            Selector::ExploreFields(compiled)
        }
        SelectorNode::ExploreIndex { index, next } => Selector::ExploreIndex {
            index: *index,
            next: Box::new(compile(next, ancestors)?),
        },
        SelectorNode::ExploreRange { start, end, next } => Selector::ExploreRange {
            start: *start,
            end: *end,
            next: Box::new(compile(next, ancestors)?),
        },
        SelectorNode::ExploreRecursive {
            limit,
            sequence,
            stop_at,
        } => {
            let mut chain = ancestors.to_vec();
            chain.push(node);
            let sequence = compile(sequence, &chain)?;
            if let RecursionLimit::Depth(0) = limit {
                // Zero rounds: nothing below the root is explored.
                return Ok(Selector::Matcher);
            }
            Selector::ExploreRecursive {
                current: Box::new(sequence.clone()),
                sequence: Box::new(sequence),
                limit: *limit,
                stop_at: stop_at.clone(),
            }
        }
        SelectorNode::ExploreRecursiveEdge => {
            let enclosed = ancestors
                .iter()
                .any(|a| matches!(a, SelectorNode::ExploreRecursive { .. }));
            if !enclosed {
                return Err(KernelError::MalformedSelector(
                    "recursive edge outside of a recursive explore".into(),
                ));
            }
            Selector::RecursiveEdge
        }
        SelectorNode::ExploreUnion(members) => Selector::Union(
            members
                .iter()
                .map(|m| compile(m, ancestors))
                .collect::<Result<Vec<_>>>()?,
        ),
        SelectorNode::ExploreConditional { condition, next } => Selector::Conditional {
            condition: condition.clone(),
            next: Box::new(compile(next, ancestors)?),
        },
        SelectorNode::StopAt { condition, next } => Selector::StopAt {
            condition: condition.clone(),
            next: Box::new(compile(next, ancestors)?),
        },
    };
    Ok(sel)
}

impl Selector {
    /// Segments this selector wants looked up in a node with `len` children.
    /// Empty means every child. Ranges are cut off at `len`.
    pub fn interests(&self, len: usize) -> Vec<PathSegment> {
        match self {
            Selector::Matcher | Selector::RecursiveEdge | Selector::ExploreAll(_) => Vec::new(),
            Selector::ExploreFields(fields) => {
                fields.keys().map(|k| PathSegment::Field(k.clone())).collect()
            }
            Selector::ExploreIndex { index, .. } => vec![PathSegment::Index(*index)],
            Selector::ExploreRange { start, end, .. } => {
                (*start..(*end).min(len)).map(PathSegment::Index).collect()
            }
            Selector::ExploreRecursive { current, .. } => current.interests(len),
            Selector::Union(members) => {
                let mut out: Vec<PathSegment> = Vec::new();
                for member in members.iter().filter(|m| !m.explores_nothing()) {
                    let wanted = member.interests(len);
                    if wanted.is_empty() {
                        return Vec::new();
                    }
                    for seg in wanted {
                        if !out.contains(&seg) {
                            out.push(seg);
                        }
                    }
                }
                out
            }
            Selector::Conditional { next, .. } | Selector::StopAt { next, .. } => next.interests(len),
        }
    }

    /// True when no child can ever be explored from here.
    pub fn explores_nothing(&self) -> bool {
        match self {
            Selector::Matcher | Selector::RecursiveEdge => true,
            Selector::ExploreFields(fields) => fields.is_empty(),
            Selector::ExploreRange { start, end, .. } => start >= end,
            Selector::ExploreAll(_) | Selector::ExploreIndex { .. } => false,
            Selector::ExploreRecursive { current, .. } => current.explores_nothing(),
            Selector::Union(members) => members.iter().all(|m| m.explores_nothing()),
            Selector::Conditional { next, .. } | Selector::StopAt { next, .. } => {
                next.explores_nothing()
            }
        }
    }

    /// Selector to apply to the child at `segment` of `node`, or `None` to
    /// leave that child alone.
    pub fn explore(&self, node: &Ipld, segment: &PathSegment) -> Option<Selector> {
        match self {
            Selector::Matcher | Selector::RecursiveEdge => None,
            Selector::ExploreAll(next) => Some((**next).clone()),
            Selector::ExploreFields(fields) => fields.get(&segment.to_string()).cloned(),
            Selector::ExploreIndex { index, next } => {
                (segment_index(segment) == Some(*index)).then(|| (**next).clone())
            }
            Selector::ExploreRange { start, end, next } => match segment_index(segment) {
                Some(i) if i >= *start && i < *end => Some((**next).clone()),
                _ => None,
            },
            Selector::ExploreRecursive {
                sequence,
                current,
                limit,
                stop_at,
            } => {
                if let Some(cond) = stop_at {
                    if segment.lookup(node).is_some_and(|child| cond.matches(child)) {
                        return None;
                    }
                }
                let next = current.explore(node, segment)?;
                if !next.contains_edge() {
                    return Some(Selector::ExploreRecursive {
                        sequence: sequence.clone(),
                        current: Box::new(next),
                        limit: *limit,
                        stop_at: stop_at.clone(),
                    });
                }
                let remaining = match limit {
                    RecursionLimit::None => RecursionLimit::None,
                    RecursionLimit::Depth(n) if *n > 1 => RecursionLimit::Depth(n - 1),
                    RecursionLimit::Depth(_) => return next.replace_edge(None),
                };
                Some(Selector::ExploreRecursive {
                    sequence: sequence.clone(),
                    current: Box::new(next.replace_edge(Some(sequence.as_ref()))?),
                    limit: remaining,
                    stop_at: stop_at.clone(),
                })
            }
            Selector::Union(members) => {
                let mut explored: Vec<Selector> = members
                    .iter()
                    .filter_map(|m| m.explore(node, segment))
                    .collect();
                match explored.len() {
                    0 => None,
                    1 => explored.pop(),
                    _ => Some(Selector::Union(explored)),
                }
            }
            Selector::Conditional { next, .. } => next.explore(node, segment),
            Selector::StopAt { condition, next } => {
                if segment.lookup(node).is_some_and(|child| condition.matches(child)) {
                    return None;
                }
                next.explore(node, segment).map(|n| Selector::StopAt {
                    condition: condition.clone(),
                    next: Box::new(n),
                })
            }
        }
    }

    /// Whether the visit callback fires for `node`. Nodes reached only by
    /// exploring are visited unless a condition rules them out.
    pub fn decide(&self, node: &Ipld) -> bool {
        self.verdict(node).unwrap_or(true)
    }

    /// `None` when nothing here has an opinion about `node`.
    fn verdict(&self, node: &Ipld) -> Option<bool> {
        match self {
            Selector::Matcher => Some(true),
            Selector::Conditional { condition, next } => {
                Some(condition.matches(node) && next.verdict(node).unwrap_or(true))
            }
            Selector::Union(members) => {
                let mut verdict = None;
                for member in members {
                    match member.verdict(node) {
                        Some(true) => return Some(true),
                        Some(false) => verdict = Some(false),
                        None => {}
                    }
                }
                verdict
            }
            Selector::ExploreRecursive { current, .. } => current.verdict(node),
            Selector::StopAt { next, .. } => next.verdict(node),
            Selector::ExploreAll(_)
            | Selector::ExploreFields(_)
            | Selector::ExploreIndex { .. }
            | Selector::ExploreRange { .. }
            | Selector::RecursiveEdge => None,
        }
    }

    fn contains_edge(&self) -> bool {
        match self {
            Selector::RecursiveEdge => true,
            Selector::Matcher | Selector::ExploreRecursive { .. } => false,
            Selector::ExploreAll(next)
            | Selector::ExploreIndex { next, .. }
            | Selector::ExploreRange { next, .. }
            | Selector::Conditional { next, .. }
            | Selector::StopAt { next, .. } => next.contains_edge(),
            Selector::ExploreFields(fields) => fields.values().any(Selector::contains_edge),
            Selector::Union(members) => members.iter().any(Selector::contains_edge),
        }
    }

    /// Substitutes edges owned by the enclosing recursion. `None` drops them,
    /// pruning whatever becomes empty.
    fn replace_edge(&self, replacement: Option<&Selector>) -> Option<Selector> {
        let rewrap = |next: &Selector| next.replace_edge(replacement).map(Box::new);
        match self {
            Selector::RecursiveEdge => replacement.cloned(),
            Selector::Matcher | Selector::ExploreRecursive { .. } => Some(self.clone()),
            Selector::ExploreAll(next) => rewrap(next).map(Selector::ExploreAll),
            Selector::ExploreIndex { index, next } => rewrap(next).map(|next| Selector::ExploreIndex {
                index: *index,
                next,
            }),
            Selector::ExploreRange { start, end, next } => {
                rewrap(next).map(|next| Selector::ExploreRange {
                    start: *start,
                    end: *end,
                    next,
                })
            }
            Selector::Conditional { condition, next } => {
                rewrap(next).map(|next| Selector::Conditional {
                    condition: condition.clone(),
                    next,
                })
            }
            Selector::StopAt { condition, next } => rewrap(next).map(|next| Selector::StopAt {
                condition: condition.clone(),
                next,
            }),
            Selector::ExploreFields(fields) => {
                let kept: BTreeMap<String, Selector> = fields
                    .iter()
                    .filter_map(|(k, v)| v.replace_edge(replacement).map(|v| (k.clone(), v)))
                    .collect();
                (!kept.is_empty()).then_some(Selector::ExploreFields(kept))
            }
            Selector::Union(members) => {
                let mut kept: Vec<Selector> = members
                    .iter()
                    .filter_map(|m| m.replace_edge(replacement))
                    .collect();
                match kept.len() {
                    0 => None,
                    1 => kept.pop(),
                    _ => Some(Selector::Union(kept)),
                }
            }
        }
    }
}

fn segment_index(segment: &PathSegment) -> Option<usize> {
    match segment {
        PathSegment::Index(i) => Some(*i),
        PathSegment::Field(name) => name.parse().ok(),
    }
}
