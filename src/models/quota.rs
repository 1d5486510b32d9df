//! Usage quota for metered search and enrichment actions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Free,
    Pro,
    Unlimited,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Unlimited => "unlimited",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "free" => Some(Tier::Free),
            "pro" => Some(Tier::Pro),
            "unlimited" => Some(Tier::Unlimited),
            _ => None,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Tier::Unlimited)
    }
}

/// A metered action type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaAction {
    Search,
    Enrich,
}

impl QuotaAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaAction::Search => "search",
            QuotaAction::Enrich => "enrich",
        }
    }
}

/// Remaining allowance as reported by the quota service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quota {
    pub search_remaining: i64,
    pub enrich_remaining: i64,
    pub tier: Tier,
}

impl Quota {
    pub fn remaining(&self, action: QuotaAction) -> i64 {
        match action {
            QuotaAction::Search => self.search_remaining,
            QuotaAction::Enrich => self.enrich_remaining,
        }
    }

    pub fn set_remaining(&mut self, action: QuotaAction, value: i64) {
        match action {
            QuotaAction::Search => self.search_remaining = value,
            QuotaAction::Enrich => self.enrich_remaining = value,
        }
    }

    /// Whether the cached counter allows invoking `action`.
    pub fn allows(&self, action: QuotaAction) -> bool {
        self.tier.is_unlimited() || self.remaining(action) > 0
    }
}
