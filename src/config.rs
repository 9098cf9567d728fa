// Role and policy configuration for the settlement engine.
// The contributor set is effectively static, so roles live here as plain
// name lists instead of a stored attribute.

use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::model::Role;

/// How a pooled household expense is apportioned. This switch changes
/// every downstream number, so it is explicit configuration rather than
/// a buried constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SettlementPolicy {
    /// Split the gross expense evenly across all siblings; the household
    /// contributor's own balance is never tapped.
    EqualSplit,
    /// Pay from the household contributor's accumulated balance first
    /// (down to zero), then split only the remainder across siblings.
    #[default]
    DepleteHouseholdFirst,
}

impl SettlementPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementPolicy::EqualSplit => "equal-split",
            SettlementPolicy::DepleteHouseholdFirst => "deplete-household-first",
        }
    }
}

impl FromStr for SettlementPolicy {
    type Err = LedgerError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim() {
            "equal-split" => Ok(SettlementPolicy::EqualSplit),
            "deplete-household-first" => Ok(SettlementPolicy::DepleteHouseholdFirst),
            other => Err(LedgerError::Config(format!(
                "unknown settlement policy `{other}` (expected equal-split or deplete-household-first)"
            ))),
        }
    }
}

/// Names driving role classification plus the active split policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// The dependent whose expenses the pool pays.
    pub household: String,
    /// Contributors who share the household costs.
    pub siblings: Vec<String>,
    pub policy: SettlementPolicy,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            household: "Emilse".to_string(),
            siblings: vec![
                "Gerardo".to_string(),
                "Néstor".to_string(),
                "Leandro".to_string(),
            ],
            policy: SettlementPolicy::default(),
        }
    }
}

impl SettlementConfig {
    /// Default family, overridden by `POZO_HOUSEHOLD`, `POZO_SIBLINGS`
    /// (comma-separated) and `POZO_POLICY` when set.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(name) = env::var("POZO_HOUSEHOLD") {
            let name = name.trim();
            if !name.is_empty() {
                config.household = name.to_string();
            }
        }
        if let Ok(list) = env::var("POZO_SIBLINGS") {
            config.siblings = list
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(policy) = env::var("POZO_POLICY") {
            config.policy = policy.parse()?;
        }
        Ok(config)
    }

    pub fn with_policy(mut self, policy: SettlementPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Classify a contributor by name. ASCII case folding only: accented
    /// names must match their accents ("Néstor" stays "Néstor").
    pub fn role_of(&self, name: &str) -> Role {
        if name.eq_ignore_ascii_case(&self.household) {
            return Role::Household;
        }
        if self
            .siblings
            .iter()
            .any(|sibling| sibling.eq_ignore_ascii_case(name))
        {
            return Role::Sibling;
        }
        Role::Unassigned
    }
}
