// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod actor;
pub mod manager;

pub use actor::{amt_entries, read_actor_state, ActorState};
pub use manager::{PaychManager, VoucherOutcome};
