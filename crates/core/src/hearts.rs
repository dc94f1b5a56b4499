//! Local, optimistic view of a learner's hearts balance.
//!
//! The authoritative balance lives in the progress store. The ledger applies a
//! mutation locally, remembers the previous value while the store confirms,
//! and either adopts the confirmed balance or rolls back.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HeartsError {
    #[error("a hearts mutation is already awaiting confirmation")]
    MutationPending,

    #[error("no hearts mutation is awaiting confirmation")]
    NothingPending,
}

/// Balance as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartsSnapshot {
    pub balance: u32,
    /// Premium accounts: debits are skipped entirely.
    pub unlimited: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartsMutation {
    Debit(u32),
    Credit(u32),
}

impl HeartsMutation {
    #[must_use]
    pub fn amount(self) -> u32 {
        match self {
            HeartsMutation::Debit(n) | HeartsMutation::Credit(n) => n,
        }
    }
}

/// Mutation the caller must forward to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartsRequest {
    pub mutation: HeartsMutation,
    pub optimistic_balance: u32,
}

/// Result of adopting a confirmed balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartsChange {
    pub balance: u32,
    /// True only on the transition into zero.
    pub depleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pending {
    mutation: HeartsMutation,
    previous: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartsLedger {
    balance: u32,
    unlimited: bool,
    pending: Option<Pending>,
    depletion_reported: bool,
}

impl HeartsLedger {
    #[must_use]
    pub fn from_snapshot(snapshot: HeartsSnapshot) -> Self {
        Self {
            balance: snapshot.balance,
            unlimited: snapshot.unlimited,
            pending: None,
            depletion_reported: snapshot.balance == 0,
        }
    }

    #[must_use]
    pub fn balance(&self) -> u32 {
        self.balance
    }

    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.unlimited
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    #[must_use]
    pub fn pending_mutation(&self) -> Option<HeartsMutation> {
        self.pending.map(|p| p.mutation)
    }

    #[must_use]
    pub fn can_start_attempt(&self) -> bool {
        self.unlimited || self.balance > 0
    }

    /// Applies an optimistic debit, clamped at zero.
    ///
    /// Unlimited accounts return `Ok(None)`: nothing is debited or sent.
    ///
    /// # Errors
    ///
    /// Returns `HeartsError::MutationPending` while another mutation is unconfirmed.
    pub fn begin_debit(&mut self, amount: u32) -> Result<Option<HeartsRequest>, HeartsError> {
        if self.unlimited || amount == 0 {
            return Ok(None);
        }
        self.begin(HeartsMutation::Debit(amount), self.balance.saturating_sub(amount))
            .map(Some)
    }

    /// Applies an optimistic credit.
    ///
    /// # Errors
    ///
    /// Returns `HeartsError::MutationPending` while another mutation is unconfirmed.
    pub fn begin_credit(&mut self, amount: u32) -> Result<Option<HeartsRequest>, HeartsError> {
        if self.unlimited || amount == 0 {
            return Ok(None);
        }
        self.begin(HeartsMutation::Credit(amount), self.balance.saturating_add(amount))
            .map(Some)
    }

    fn begin(&mut self, mutation: HeartsMutation, next: u32) -> Result<HeartsRequest, HeartsError> {
        if self.pending.is_some() {
            return Err(HeartsError::MutationPending);
        }
        self.pending = Some(Pending {
            mutation,
            previous: self.balance,
        });
        self.balance = next;
        Ok(HeartsRequest {
            mutation,
            optimistic_balance: next,
        })
    }

    /// Adopts the balance the store confirmed.
    ///
    /// # Errors
    ///
    /// Returns `HeartsError::NothingPending` if no mutation was in flight.
    pub fn confirm(&mut self, confirmed_balance: u32) -> Result<HeartsChange, HeartsError> {
        if self.pending.take().is_none() {
            return Err(HeartsError::NothingPending);
        }
        Ok(self.adopt(confirmed_balance))
    }

    /// Restores the balance from before the unconfirmed mutation.
    ///
    /// # Errors
    ///
    /// Returns `HeartsError::NothingPending` if no mutation was in flight.
    pub fn rollback(&mut self) -> Result<u32, HeartsError> {
        let pending = self.pending.take().ok_or(HeartsError::NothingPending)?;
        self.balance = pending.previous;
        Ok(self.balance)
    }

    /// Overwrites local state with a fresh store snapshot.
    ///
    /// Ignored while a mutation is pending; the confirm/rollback path wins.
    pub fn reconcile(&mut self, snapshot: HeartsSnapshot) -> Option<HeartsChange> {
        if self.pending.is_some() {
            return None;
        }
        self.unlimited = snapshot.unlimited;
        Some(self.adopt(snapshot.balance))
    }

    fn adopt(&mut self, balance: u32) -> HeartsChange {
        self.balance = balance;
        let depleted = !self.unlimited && balance == 0 && !self.depletion_reported;
        self.depletion_reported = !self.unlimited && balance == 0;
        HeartsChange { balance, depleted }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(balance: u32) -> HeartsLedger {
        HeartsLedger::from_snapshot(HeartsSnapshot {
            balance,
            unlimited: false,
        })
    }

    #[test]
    fn debit_is_optimistic_until_confirmed() {
        let mut hearts = ledger(3);
        let request = hearts.begin_debit(1).unwrap().unwrap();
        assert_eq!(request.optimistic_balance, 2);
        assert_eq!(hearts.balance(), 2);
        assert_eq!(hearts.pending_mutation(), Some(HeartsMutation::Debit(1)));
        assert_eq!(hearts.begin_debit(1).unwrap_err(), HeartsError::MutationPending);

        let change = hearts.confirm(2).unwrap();
        assert_eq!(change, HeartsChange { balance: 2, depleted: false });
        assert!(!hearts.is_pending());
    }

    #[test]
    fn failed_confirmation_rolls_back() {
        let mut hearts = ledger(1);
        hearts.begin_debit(1).unwrap();
        assert_eq!(hearts.balance(), 0);
        assert_eq!(hearts.rollback().unwrap(), 1);
        assert_eq!(hearts.balance(), 1);
        assert_eq!(hearts.rollback().unwrap_err(), HeartsError::NothingPending);
    }

    #[test]
    fn balance_never_goes_negative_and_depletion_fires_once() {
        let mut hearts = ledger(1);
        hearts.begin_debit(5).unwrap();
        assert_eq!(hearts.balance(), 0);
        assert!(hearts.confirm(0).unwrap().depleted);

        hearts.begin_debit(1).unwrap();
        let again = hearts.confirm(0).unwrap();
        assert_eq!(again.balance, 0);
        assert!(!again.depleted);

        hearts.reconcile(HeartsSnapshot {
            balance: 2,
            unlimited: false,
        });
        hearts.begin_debit(2).unwrap();
        assert!(hearts.confirm(0).unwrap().depleted);
    }

    #[test]
    fn unlimited_accounts_bypass_debits() {
        let mut hearts = HeartsLedger::from_snapshot(HeartsSnapshot {
            balance: 0,
            unlimited: true,
        });
        assert!(hearts.can_start_attempt());
        assert_eq!(hearts.begin_debit(1).unwrap(), None);
        assert_eq!(hearts.balance(), 0);
    }

    #[test]
    fn zero_balance_blocks_start() {
        let hearts = ledger(0);
        assert!(!hearts.can_start_attempt());
    }

    #[test]
    fn reconcile_is_ignored_while_pending() {
        let mut hearts = ledger(3);
        hearts.begin_credit(2).unwrap();
        assert_eq!(hearts.balance(), 5);
        assert_eq!(
            hearts.reconcile(HeartsSnapshot {
                balance: 9,
                unlimited: false
            }),
            None
        );
        assert_eq!(hearts.confirm(5).unwrap().balance, 5);
    }
}
