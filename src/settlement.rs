// Settlement engine: replays movement history in chronological order and
// derives per-contributor balances, sibling equity and household totals.
//
// Balances are state, never storage. Every settle() call folds the full
// history from scratch, so deleting or backdating a movement simply
// changes the next report; nothing persisted needs fixing up.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::{SettlementConfig, SettlementPolicy};
use crate::model::{Category, Contributor, Direction, Movement, Role};

// ============================================================================
// ENGINE
// ============================================================================

/// Per-contributor running state during the fold.
///
/// `balance` is what the pool currently owes the contributor (negative:
/// what they owe the pool). The `contributed_*` pair are lifetime inflow
/// totals and are never reduced by any expense.
#[derive(Debug, Clone, Copy, Default)]
struct Account {
    balance: f64,
    contributed_reference: f64,
    contributed_local: f64,
}

pub struct SettlementEngine {
    config: SettlementConfig,
}

impl SettlementEngine {
    pub fn new(config: SettlementConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// Replay `movements` (already in date ASC, id ASC order) and build the
    /// full settlement picture for `contributors`.
    ///
    /// Only NORMAL movements move balances. Inflows credit the recording
    /// contributor. Household outflows are charged per the configured
    /// policy; sibling-asset outflows debit their owner alone, whatever
    /// the owner's role, so the pool total always stays consistent.
    pub fn settle(&self, contributors: &[Contributor], movements: &[Movement]) -> Summary {
        let config = &self.config;

        let sibling_ids: Vec<i64> = contributors
            .iter()
            .filter(|c| config.role_of(&c.name) == Role::Sibling)
            .map(|c| c.id)
            .collect();
        let household_id = contributors
            .iter()
            .find(|c| config.role_of(&c.name) == Role::Household)
            .map(|c| c.id);
        let divisor = sibling_ids.len().max(1) as f64;

        let mut accounts: HashMap<i64, Account> = HashMap::new();
        let mut total_household_expense = 0.0;
        let mut total_sibling_asset_expense = 0.0;
        let mut household_covered = 0.0;

        for movement in movements {
            if !movement.kind.affects_settlement() {
                continue;
            }
            let amount = movement.amount_reference;
            match movement.direction {
                Direction::Inflow => {
                    let account = accounts.entry(movement.contributor_id).or_default();
                    account.balance += amount;
                    account.contributed_reference += amount;
                    account.contributed_local += movement.amount_local;
                }
                Direction::Outflow => match movement.category {
                    Category::Household => {
                        total_household_expense += amount;
                        let mut remainder = amount;
                        if config.policy == SettlementPolicy::DepleteHouseholdFirst {
                            if let Some(id) = household_id {
                                let account = accounts.entry(id).or_default();
                                let paid = account.balance.max(0.0).min(remainder);
                                account.balance -= paid;
                                household_covered += paid;
                                remainder -= paid;
                            }
                        }
                        if remainder > 0.0 {
                            let share = remainder / divisor;
                            for id in &sibling_ids {
                                accounts.entry(*id).or_default().balance -= share;
                            }
                        }
                    }
                    Category::SiblingAsset => {
                        total_sibling_asset_expense += amount;
                        accounts.entry(movement.contributor_id).or_default().balance -= amount;
                    }
                },
            }
        }

        let mut rows = Vec::with_capacity(contributors.len());
        for contributor in contributors {
            let account = accounts.get(&contributor.id).copied().unwrap_or_default();
            let implied_rate = if account.contributed_reference > 0.0 {
                Some(account.contributed_local / account.contributed_reference)
            } else {
                None
            };
            rows.push(ContributorSummary {
                contributor_id: contributor.id,
                name: contributor.name.clone(),
                role: config.role_of(&contributor.name),
                contributed_local: account.contributed_local,
                contributed_reference: account.contributed_reference,
                balance: account.balance,
                implied_rate,
            });
        }

        let sibling_total: f64 = rows
            .iter()
            .filter(|r| r.role == Role::Sibling)
            .map(|r| r.balance)
            .sum();
        let average_balance = sibling_total / divisor;
        let sibling_equity: Vec<SiblingEquity> = rows
            .iter()
            .filter(|r| r.role == Role::Sibling)
            .map(|r| SiblingEquity {
                contributor_id: r.contributor_id,
                name: r.name.clone(),
                balance: r.balance,
                equity_delta: r.balance - average_balance,
            })
            .collect();

        // Totals come from the fold accounts, not the display rows, so
        // they stay honest even if the roster passed in is incomplete.
        let pooled_balance = accounts.values().map(|a| a.balance).sum();
        let total_contributed_reference =
            accounts.values().map(|a| a.contributed_reference).sum();
        let fair_share = (total_household_expense - household_covered) / divisor;

        Summary {
            policy: config.policy,
            contributors: rows,
            sibling_equity,
            total_contributed_reference,
            total_household_expense,
            total_sibling_asset_expense,
            household_covered,
            fair_share,
            average_balance,
            pooled_balance,
            bank_balances: bank_balances(movements),
            movement_count: movements.len(),
        }
    }
}

impl Default for SettlementEngine {
    fn default() -> Self {
        Self::new(SettlementConfig::default())
    }
}

// ============================================================================
// BANK LEDGER
// ============================================================================

/// Running balance per bank in local currency, over every movement kind.
/// Transfers and adjustments count here even though settlement skips
/// them: the bank ledger answers "where does the cash sit", not "who
/// owes whom".
pub fn bank_balances(movements: &[Movement]) -> BTreeMap<String, f64> {
    let mut banks = BTreeMap::new();
    for movement in movements {
        if let Some(bank) = &movement.bank {
            *banks.entry(bank.clone()).or_insert(0.0) += movement.signed_local();
        }
    }
    banks
}

// ============================================================================
// SUMMARY TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributorSummary {
    pub contributor_id: i64,
    pub name: String,
    pub role: Role,
    /// Lifetime inflows in the currencies they were recorded in, summed.
    pub contributed_local: f64,
    /// Lifetime inflows converted to the reference currency.
    pub contributed_reference: f64,
    pub balance: f64,
    /// Average local units per reference unit across all contributions;
    /// `None` until the contributor has contributed something.
    pub implied_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiblingEquity {
    pub contributor_id: i64,
    pub name: String,
    pub balance: f64,
    /// Distance from the sibling average. Positive means the sibling has
    /// put in more than their peers; the figure is policy-independent.
    pub equity_delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub policy: SettlementPolicy,
    pub contributors: Vec<ContributorSummary>,
    pub sibling_equity: Vec<SiblingEquity>,
    pub total_contributed_reference: f64,
    pub total_household_expense: f64,
    pub total_sibling_asset_expense: f64,
    /// Portion of household expenses absorbed by the household member's
    /// own balance (always zero under the equal-split policy).
    pub household_covered: f64,
    /// What each sibling is expected to shoulder of the expenses the
    /// household member did not cover.
    pub fair_share: f64,
    pub average_balance: f64,
    /// Sum of all balances. Equals total inflows minus total outflows
    /// over settlement-relevant movements.
    pub pooled_balance: f64,
    pub bank_balances: BTreeMap<String, f64>,
    pub movement_count: usize,
}

impl Summary {
    pub fn headline(&self) -> String {
        format!(
            "{} movements | pool {:.2} | household expenses {:.2} (covered {:.2}) | fair share {:.2}",
            self.movement_count,
            self.pooled_balance,
            self.total_household_expense,
            self.household_covered,
            self.fair_share
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
