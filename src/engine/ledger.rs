use serde::{Deserialize, Serialize};

/// Running account of token spend against a fixed total.
///
/// `remaining` never exceeds `total_budget` and never goes below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLedger {
    total_budget: u64,
    remaining: u64,
}

/// A debit that would overdraw the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overdraft {
    pub requested: u64,
    pub remaining: u64,
}

impl TokenLedger {
    pub fn new(total_budget: u64) -> Self {
        Self {
            total_budget,
            remaining: total_budget,
        }
    }

    /// Restores a ledger from a previous run. `remaining` is capped at the total.
    pub fn with_remaining(total_budget: u64, remaining: u64) -> Self {
        Self {
            total_budget,
            remaining: remaining.min(total_budget),
        }
    }

    pub fn total_budget(&self) -> u64 {
        self.total_budget
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn spent(&self) -> u64 {
        self.total_budget - self.remaining
    }

    pub fn can_afford(&self, tokens: u64) -> bool {
        tokens <= self.remaining
    }

    /// Debits `tokens`, or leaves the ledger untouched and reports the overdraft.
    pub fn try_debit(&mut self, tokens: u64) -> Result<u64, Overdraft> {
        if !self.can_afford(tokens) {
            return Err(Overdraft {
                requested: tokens,
                remaining: self.remaining,
            });
        }
        self.remaining -= tokens;
        Ok(self.remaining)
    }
}
