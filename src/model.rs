// Data model for the family pooled-fund ledger.
// The text codes are the storage vocabulary: they appear in the SQLite
// CHECK constraints, in the JSON API and in the admin form values.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

/// Relative tolerance for the stored-vs-recomputed reference amount
/// check. Anything beyond ordinary f64 noise counts as drift.
pub const REFERENCE_TOLERANCE: f64 = 1e-9;

// ============================================================================
// ENUMS
// ============================================================================

/// Whether a movement puts money into the pool or takes it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "IN")]
    Inflow,
    #[serde(rename = "OUT")]
    Outflow,
}

impl Direction {
    pub fn as_code(&self) -> &'static str {
        match self {
            Direction::Inflow => "IN",
            Direction::Outflow => "OUT",
        }
    }

    pub fn parse_code(code: &str) -> Result<Self> {
        match code {
            "IN" => Ok(Direction::Inflow),
            "OUT" => Ok(Direction::Outflow),
            other => Err(LedgerError::Validation(format!(
                "unknown direction `{other}` (expected IN or OUT)"
            ))),
        }
    }
}

/// Which expense bucket an outflow belongs to: the shared household pool
/// or an asset expense charged to one contributor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "HOUSEHOLD")]
    Household,
    #[serde(rename = "SIBLING_ASSET")]
    SiblingAsset,
}

impl Category {
    pub fn as_code(&self) -> &'static str {
        match self {
            Category::Household => "HOUSEHOLD",
            Category::SiblingAsset => "SIBLING_ASSET",
        }
    }

    pub fn parse_code(code: &str) -> Result<Self> {
        match code {
            "HOUSEHOLD" => Ok(Category::Household),
            "SIBLING_ASSET" => Ok(Category::SiblingAsset),
            other => Err(LedgerError::Validation(format!(
                "unknown category `{other}` (expected HOUSEHOLD or SIBLING_ASSET)"
            ))),
        }
    }
}

/// Movement kind. Only `Normal` movements enter the settlement; transfers
/// and adjustments move cash between bank accounts without touching any
/// contributor balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementKind {
    #[serde(rename = "NORMAL")]
    Normal,
    #[serde(rename = "TRANSFER")]
    Transfer,
    #[serde(rename = "ADJUSTMENT")]
    Adjustment,
}

impl MovementKind {
    pub fn as_code(&self) -> &'static str {
        match self {
            MovementKind::Normal => "NORMAL",
            MovementKind::Transfer => "TRANSFER",
            MovementKind::Adjustment => "ADJUSTMENT",
        }
    }

    pub fn parse_code(code: &str) -> Result<Self> {
        match code {
            "NORMAL" => Ok(MovementKind::Normal),
            "TRANSFER" => Ok(MovementKind::Transfer),
            "ADJUSTMENT" => Ok(MovementKind::Adjustment),
            other => Err(LedgerError::Validation(format!(
                "unknown movement kind `{other}` (expected NORMAL, TRANSFER or ADJUSTMENT)"
            ))),
        }
    }

    /// Settlement only ever looks at `Normal` movements.
    pub fn affects_settlement(&self) -> bool {
        matches!(self, MovementKind::Normal)
    }
}

/// Derived classification of a contributor. Never stored: resolved at
/// settlement time by matching names against the configured role sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The dependent whose expenses the pool pays.
    Household,
    /// A contributor who shares the household costs.
    Sibling,
    /// Present in the ledger but in neither configured set.
    Unassigned,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Household => "household",
            Role::Sibling => "sibling",
            Role::Unassigned => "unassigned",
        }
    }
}

// ============================================================================
// RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    pub id: i64,
    pub name: String,
}

/// One dated financial event, joined with its contributor's name.
///
/// `amount_local / fx_rate = amount_reference`; the reference amount is
/// stored redundantly for reporting and revalidated on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    pub id: i64,
    pub date: NaiveDate,
    pub contributor_id: i64,
    pub contributor_name: String,
    pub direction: Direction,
    pub category: Category,
    pub kind: MovementKind,
    /// Magnitude in the entry currency; always positive, the sign comes
    /// from `direction`.
    pub amount_local: f64,
    pub currency: String,
    /// Local units per one reference-currency unit (divisor).
    pub fx_rate: f64,
    pub amount_reference: f64,
    /// Optional cash-account tag; open set, new names appear freely.
    pub bank: Option<String>,
    /// Shared by the two rows of one transfer.
    pub transfer_key: Option<String>,
    pub description: String,
}

impl Movement {
    /// Local amount signed by direction, for the bank cash ledger.
    pub fn signed_local(&self) -> f64 {
        match self.direction {
            Direction::Inflow => self.amount_local,
            Direction::Outflow => -self.amount_local,
        }
    }

    /// The reference amount this row should carry.
    pub fn recomputed_reference(&self) -> f64 {
        self.amount_local / self.fx_rate
    }

    /// True if the stored reference amount no longer matches
    /// `amount_local / fx_rate` beyond f64 noise.
    pub fn has_reference_drift(&self) -> bool {
        let recomputed = self.recomputed_reference();
        let scale = recomputed.abs().max(1.0);
        (self.amount_reference - recomputed).abs() > REFERENCE_TOLERANCE * scale
    }
}

/// Fields collected by the admin entry form for a single movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMovement {
    pub date: NaiveDate,
    pub contributor_id: i64,
    pub direction: Direction,
    pub category: Category,
    pub kind: MovementKind,
    pub amount_local: f64,
    pub currency: String,
    pub fx_rate: f64,
    pub bank: Option<String>,
    pub description: String,
}

impl NewMovement {
    /// Checks that run before any row is written. Insert never partially
    /// applies: a validation failure leaves the store untouched.
    pub fn validate(&self) -> Result<()> {
        validate_positive("amount_local", self.amount_local)?;
        validate_positive("fx_rate", self.fx_rate)?;
        if self.currency.trim().is_empty() {
            return Err(LedgerError::Validation("currency is required".into()));
        }
        if self.kind == MovementKind::Transfer {
            return Err(LedgerError::Validation(
                "transfers must be created through insert_transfer so both legs stay linked"
                    .into(),
            ));
        }
        if self.kind == MovementKind::Adjustment && self.normalized_bank().is_none() {
            return Err(LedgerError::Validation(
                "adjustment movements require a bank account".into(),
            ));
        }
        Ok(())
    }

    pub fn amount_reference(&self) -> f64 {
        self.amount_local / self.fx_rate
    }

    /// Bank tag with surrounding whitespace stripped; blank becomes None.
    pub fn normalized_bank(&self) -> Option<&str> {
        self.bank
            .as_deref()
            .map(str::trim)
            .filter(|bank| !bank.is_empty())
    }
}

/// One admin "transfer" submission. Becomes exactly two linked movement
/// rows: an outflow from `bank_from` and an inflow to `bank_to`, both
/// attributed to the household contributor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub date: NaiveDate,
    /// The household contributor both legs are attributed to.
    pub contributor_id: i64,
    pub bank_from: String,
    pub bank_to: String,
    pub amount_local: f64,
    pub currency: String,
    pub fx_rate: f64,
    pub description: String,
}

impl TransferRequest {
    pub fn validate(&self) -> Result<()> {
        validate_positive("amount_local", self.amount_local)?;
        validate_positive("fx_rate", self.fx_rate)?;
        if self.currency.trim().is_empty() {
            return Err(LedgerError::Validation("currency is required".into()));
        }
        let from = self.bank_from.trim();
        let to = self.bank_to.trim();
        if from.is_empty() || to.is_empty() {
            return Err(LedgerError::Validation(
                "transfer requires both a source and a destination bank".into(),
            ));
        }
        if from.eq_ignore_ascii_case(to) {
            return Err(LedgerError::Validation(
                "transfer source and destination banks must differ".into(),
            ));
        }
        Ok(())
    }
}

fn validate_positive(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(LedgerError::Validation(format!("{field} must be numeric")));
    }
    if value <= 0.0 {
        return Err(LedgerError::Validation(format!(
            "{field} must be greater than zero"
        )));
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
