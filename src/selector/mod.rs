// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Selectors: the declarative description of which parts of a DAG to visit.
//!
//! A [`SelectorNode`] is the wire-level tree (what a request carries). Parsing
//! it with [`parse`] produces a [`Selector`], which the traversal consults at
//! every node and path segment.

pub mod engine;
pub mod traversal;

use crate::error::{KernelError, Result};
use crate::types::block::{decode_cbor, encode_cbor, Block};
use crate::types::dagpb::named_link;
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;
use std::collections::BTreeMap;
use std::fmt;

pub use engine::{parse, Selector};
pub use traversal::{walk, Step, Traversal};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecursionLimit {
    None,
    Depth(u64),
}

/// Predicate evaluated against a node (or an unloaded link).
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    HasField(String),
    Equals(Ipld),
    IsLink,
}

impl Condition {
    pub fn matches(&self, node: &Ipld) -> bool {
        match self {
            Condition::HasField(name) => matches!(node, Ipld::Map(m) if m.contains_key(name)),
            Condition::Equals(value) => node == value,
            Condition::IsLink => matches!(node, Ipld::Link(_)),
        }
    }

    fn to_ipld(&self) -> Ipld {
        match self {
            Condition::HasField(name) => {
                single("hf", single("f", Ipld::String(name.clone())))
            }
            Condition::Equals(value) => single("=", value.clone()),
            Condition::IsLink => single("l", Ipld::Map(BTreeMap::new())),
        }
    }

    fn from_ipld(node: &Ipld) -> Result<Self> {
        let (tag, body) = tagged(node)?;
        match tag {
            "hf" => Ok(Condition::HasField(as_string(required(body, "f")?)?)),
            "=" => Ok(Condition::Equals(body.clone())),
            "l" => Ok(Condition::IsLink),
            other => Err(malformed(format!("unknown condition tag {other:?}"))),
        }
    }
}

/// One step of a path through the data model.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

impl PathSegment {
    /// Splits a `/`-separated path. Purely numeric segments stay fields;
    /// lookups against lists accept either form.
    pub fn parse_path(path: &str) -> Vec<PathSegment> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .map(|s| PathSegment::Field(s.to_string()))
            .collect()
    }

    /// Resolves this segment against a map or list node.
    pub fn lookup<'a>(&self, node: &'a Ipld) -> Option<&'a Ipld> {
        match (node, self) {
            (Ipld::Map(m), PathSegment::Field(name)) => {
                m.get(name).or_else(|| named_link(m, name))
            }
            (Ipld::Map(m), PathSegment::Index(i)) => m.get(&i.to_string()),
            (Ipld::List(l), PathSegment::Index(i)) => l.get(*i),
            (Ipld::List(l), PathSegment::Field(name)) => {
                name.parse::<usize>().ok().and_then(|i| l.get(i))
            }
            _ => None,
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Field(name) => f.write_str(name),
            PathSegment::Index(i) => write!(f, "{i}"),
        }
    }
}

pub fn display_path(path: &[PathSegment]) -> String {
    path.iter().map(|s| s.to_string()).collect::<Vec<_>>().join("/")
}

/// Selector tree as carried on the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectorNode {
    Matcher,
    ExploreAll {
        next: Box<SelectorNode>,
    },
    ExploreFields {
        fields: BTreeMap<String, SelectorNode>,
    },
    ExploreIndex {
        index: usize,
        next: Box<SelectorNode>,
    },
    ExploreRange {
        start: usize,
        end: usize,
        next: Box<SelectorNode>,
    },
    ExploreRecursive {
        limit: RecursionLimit,
        sequence: Box<SelectorNode>,
        stop_at: Option<Condition>,
    },
    ExploreRecursiveEdge,
    ExploreUnion(Vec<SelectorNode>),
    ExploreConditional {
        condition: Condition,
        next: Box<SelectorNode>,
    },
    StopAt {
        condition: Condition,
        next: Box<SelectorNode>,
    },
}

impl SelectorNode {
    pub fn to_ipld(&self) -> Ipld {
        match self {
            SelectorNode::Matcher => single(".", Ipld::Map(BTreeMap::new())),
            SelectorNode::ExploreAll { next } => single("a", single(">", next.to_ipld())),
            SelectorNode::ExploreFields { fields } => {
                let inner = fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_ipld()))
                    .collect::<BTreeMap<_, _>>();
                single("f", single("f>", Ipld::Map(inner)))
            }
            SelectorNode::ExploreIndex { index, next } => {
                let mut body = BTreeMap::new();
                body.insert("i".to_string(), Ipld::Integer(*index as i128));
                body.insert(">".to_string(), next.to_ipld());
                single("i", Ipld::Map(body))
            }
            SelectorNode::ExploreRange { start, end, next } => {
                let mut body = BTreeMap::new();
                body.insert("^".to_string(), Ipld::Integer(*start as i128));
                body.insert("$".to_string(), Ipld::Integer(*end as i128));
                body.insert(">".to_string(), next.to_ipld());
                single("r", Ipld::Map(body))
            }
            SelectorNode::ExploreRecursive {
                limit,
                sequence,
                stop_at,
            } => {
                let limit = match limit {
                    RecursionLimit::None => single("none", Ipld::Map(BTreeMap::new())),
                    RecursionLimit::Depth(n) => single("depth", Ipld::Integer(*n as i128)),
                };
                let mut body = BTreeMap::new();
                body.insert("l".to_string(), limit);
                body.insert(":>".to_string(), sequence.to_ipld());
                if let Some(cond) = stop_at {
                    body.insert("!".to_string(), cond.to_ipld());
                }
                single("R", Ipld::Map(body))
            }
            SelectorNode::ExploreRecursiveEdge => single("@", Ipld::Map(BTreeMap::new())),
            SelectorNode::ExploreUnion(members) => {
                single("|", Ipld::List(members.iter().map(|m| m.to_ipld()).collect()))
            }
            SelectorNode::ExploreConditional { condition, next } => {
                let mut body = BTreeMap::new();
                body.insert("&".to_string(), condition.to_ipld());
                body.insert(">".to_string(), next.to_ipld());
                single("&", Ipld::Map(body))
            }
            SelectorNode::StopAt { condition, next } => {
                let mut body = BTreeMap::new();
                body.insert("!".to_string(), condition.to_ipld());
                body.insert(">".to_string(), next.to_ipld());
                single("!", Ipld::Map(body))
            }
        }
    }

    /// Structural decode. Edge placement is checked later by [`parse`].
    pub fn from_ipld(node: &Ipld) -> Result<Self> {
        let (tag, body) = tagged(node)?;
        match tag {
            "." => Ok(SelectorNode::Matcher),
            "a" => Ok(SelectorNode::ExploreAll {
                next: Box::new(Self::from_ipld(required(body, ">")?)?),
            }),
            "f" => {
                let Ipld::Map(inner) = required(body, "f>")? else {
                    return Err(malformed("explore-fields body must be a map"));
                };
                let mut fields = BTreeMap::new();
                for (name, sel) in inner {
                    fields.insert(name.clone(), Self::from_ipld(sel)?);
                }
                Ok(SelectorNode::ExploreFields { fields })
            }
            "i" => Ok(SelectorNode::ExploreIndex {
                index: as_usize(required(body, "i")?)?,
                next: Box::new(Self::from_ipld(required(body, ">")?)?),
            }),
            "r" => {
                let start = as_usize(required(body, "^")?)?;
                let end = as_usize(required(body, "$")?)?;
                if end < start {
                    return Err(malformed("explore-range end precedes start"));
                }
                Ok(SelectorNode::ExploreRange {
                    start,
                    end,
                    next: Box::new(Self::from_ipld(required(body, ">")?)?),
                })
            }
            "R" => {
                let limit = match tagged(required(body, "l")?)? {
                    ("none", _) => RecursionLimit::None,
                    ("depth", n) => RecursionLimit::Depth(as_usize(n)? as u64),
                    (other, _) => {
                        return Err(malformed(format!("unknown recursion limit {other:?}")))
                    }
                };
                let stop_at = match body {
                    Ipld::Map(m) => m.get("!").map(Condition::from_ipld).transpose()?,
                    _ => None,
                };
                Ok(SelectorNode::ExploreRecursive {
                    limit,
                    sequence: Box::new(Self::from_ipld(required(body, ":>")?)?),
                    stop_at,
                })
            }
            "@" => Ok(SelectorNode::ExploreRecursiveEdge),
            "|" => {
                let Ipld::List(members) = body else {
                    return Err(malformed("explore-union body must be a list"));
                };
                members
                    .iter()
                    .map(Self::from_ipld)
                    .collect::<Result<Vec<_>>>()
                    .map(SelectorNode::ExploreUnion)
            }
            "&" => Ok(SelectorNode::ExploreConditional {
                condition: Condition::from_ipld(required(body, "&")?)?,
                next: Box::new(Self::from_ipld(required(body, ">")?)?),
            }),
            "!" => Ok(SelectorNode::StopAt {
                condition: Condition::from_ipld(required(body, "!")?)?,
                next: Box::new(Self::from_ipld(required(body, ">")?)?),
            }),
            other => Err(malformed(format!("unknown selector tag {other:?}"))),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode_cbor(&self.to_ipld())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_ipld(&decode_cbor(bytes)?)
    }
}

/// Visits every node reachable from the root.
pub fn all_selector() -> SelectorNode {
    SelectorNode::ExploreRecursive {
        limit: RecursionLimit::None,
        sequence: Box::new(SelectorNode::ExploreUnion(vec![
            SelectorNode::Matcher,
            SelectorNode::ExploreAll {
                next: Box::new(SelectorNode::ExploreRecursiveEdge),
            },
        ])),
        stop_at: None,
    }
}

/// Visits the root and lists its direct entries without descending into them.
pub fn entries_selector() -> SelectorNode {
    SelectorNode::ExploreRecursive {
        limit: RecursionLimit::Depth(1),
        sequence: Box::new(SelectorNode::ExploreAll {
            next: Box::new(SelectorNode::ExploreRecursiveEdge),
        }),
        stop_at: None,
    }
}

/// Follows `segments` from the root and applies `terminal` at the end.
pub fn path_selector(segments: &[PathSegment], terminal: SelectorNode) -> SelectorNode {
    segments.iter().rev().fold(terminal, |next, seg| match seg {
        PathSegment::Field(name) => {
            let mut fields = BTreeMap::new();
            fields.insert(name.clone(), next);
            SelectorNode::ExploreFields { fields }
        }
        PathSegment::Index(index) => SelectorNode::ExploreIndex {
            index: *index,
            next: Box::new(next),
        },
    })
}

/// CID of the dag-cbor encoded selector.
pub fn selector_cid(node: &SelectorNode) -> Result<Cid> {
    Ok(*Block::encode(&node.to_ipld())?.cid())
}

fn single(key: &str, value: Ipld) -> Ipld {
    let mut map = BTreeMap::new();
    map.insert(key.to_string(), value);
    Ipld::Map(map)
}

fn tagged(node: &Ipld) -> Result<(&str, &Ipld)> {
    match node {
        Ipld::Map(m) if m.len() == 1 => m
            .iter()
            .next()
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| malformed("empty selector map")),
        _ => Err(malformed("selector nodes are single-entry maps")),
    }
}

fn required<'a>(body: &'a Ipld, key: &str) -> Result<&'a Ipld> {
    match body {
        Ipld::Map(m) => m
            .get(key)
            .ok_or_else(|| malformed(format!("missing field {key:?}"))),
        _ => Err(malformed(format!("expected a map holding {key:?}"))),
    }
}

fn as_usize(node: &Ipld) -> Result<usize> {
    match node {
        Ipld::Integer(i) => usize::try_from(*i).map_err(|_| malformed(format!("bad integer {i}"))),
        _ => Err(malformed("expected an integer")),
    }
}

fn as_string(node: &Ipld) -> Result<String> {
    match node {
        Ipld::String(s) => Ok(s.clone()),
        _ => Err(malformed("expected a string")),
    }
}

fn malformed(msg: impl Into<String>) -> KernelError {
    KernelError::MalformedSelector(msg.into())
}
