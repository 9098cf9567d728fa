// Pozo Familiar - Core Library
// Exposes the ledger store and settlement engine for the CLI, the web
// server and tests.

pub mod config;
pub mod error;
pub mod model;
pub mod settlement;
pub mod store;

// Re-export commonly used types
pub use config::{SettlementConfig, SettlementPolicy};
pub use error::{LedgerError, Result};
pub use model::{
    Category, Contributor, Direction, Movement, MovementKind, NewMovement, Role,
    TransferRequest, REFERENCE_TOLERANCE,
};
pub use settlement::{
    bank_balances, ContributorSummary, SettlementEngine, SiblingEquity, Summary,
};
pub use store::{
    backup_to, count_movements, delete_movement, find_contributor, get_contributor,
    insert_movement, insert_transfer, list_contributors, list_movements,
    list_movements_recent, open_ledger, restore_from, setup_database,
    verify_reference_amounts, ReferenceDrift,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
