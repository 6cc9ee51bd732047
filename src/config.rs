// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Configuration constants.

/// Bit width used by the payment channel actor for its lane-state AMT.
pub const LANE_STATES_BIT_WIDTH: u32 = 3;

/// Widest AMT node accepted by the decoder (2^18 slots).
pub const MAX_AMT_BIT_WIDTH: u32 = 18;

/// Deepest AMT accepted by the decoder.
pub const MAX_AMT_HEIGHT: u32 = 64;

/// Number of leading bytes inspected when sniffing content types.
pub const SNIFF_LEN: usize = 512;

/// Extension name carrying the deal envelope inside block-exchange messages.
pub const TRANSFER_EXTENSION: &str = "fil/data-transfer/1.1";
