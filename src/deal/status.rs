// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Retrieval deal statuses as reported by providers.

use core::fmt;

macro_rules! deal_statuses {
    ($($name:ident = $code:expr),* $(,)?) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum DealStatus {
            $($name,)*
        }

        impl DealStatus {
            pub fn code(self) -> u64 {
                match self {
                    $(DealStatus::$name => $code,)*
                }
            }

            pub fn from_code(code: u64) -> Option<Self> {
                match code {
                    $($code => Some(DealStatus::$name),)*
                    _ => None,
                }
            }
        }

        impl fmt::Display for DealStatus {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(DealStatus::$name => f.write_str(stringify!($name)),)*
                }
            }
        }
    };
}

deal_statuses! {
    New = 0,
    Unsealing = 1,
    Unsealed = 2,
    WaitForAcceptance = 3,
    PaymentChannelCreating = 4,
    PaymentChannelAddingFunds = 5,
    Accepted = 6,
    FundsNeededUnseal = 7,
    Failing = 8,
    Rejected = 9,
    FundsNeeded = 10,
    SendFunds = 11,
    SendFundsLastPayment = 12,
    Ongoing = 13,
    FundsNeededLastPayment = 14,
    Completed = 15,
    DealNotFound = 16,
    Errored = 17,
    BlocksComplete = 18,
    Finalizing = 19,
    Completing = 20,
    CheckComplete = 21,
    CheckFunds = 22,
    InsufficientFunds = 23,
    PaymentChannelAllocatingLane = 24,
    Cancelling = 25,
    Cancelled = 26,
    RetryLegacy = 27,
    WaitForAcceptanceLegacy = 28,
    ClientWaitingForLastBlocks = 29,
    PaymentChannelAddingInitialFunds = 30,
}
