// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Identity types.

use core::fmt;

/// Identifier the client assigns to a retrieval deal (also the transfer id).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct DealId(pub u64);

impl DealId {
    pub fn next(&self) -> Self {
        DealId(self.0 + 1)
    }
}

impl fmt::Display for DealId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Block-exchange request id, local to one client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct RequestId(pub i32);

impl RequestId {
    pub fn next(&self) -> Self {
        RequestId(self.0.wrapping_add(1))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
