//! TTL Policy Module
//!
//! Named cache strategies, the category table that picks a strategy for a class of
//! data, and resolution of a strategy or explicit duration into a concrete expiry.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

pub const SECONDS_PER_DAY: u64 = 86_400;

/// Longest TTL ever sent to the backend (ten years).
pub const MAX_TTL_SECONDS: u64 = 3_650 * SECONDS_PER_DAY;

// == Strategy ==
/// A named TTL tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    NoCache,
    Short,
    Medium,
    Long,
    /// Expires at the next 00:00:00 UTC
    Daily,
    Weekly,
    Monthly,
    Quarterly,
}

impl Strategy {
    pub const ALL: [Strategy; 8] = [
        Strategy::NoCache,
        Strategy::Short,
        Strategy::Medium,
        Strategy::Long,
        Strategy::Daily,
        Strategy::Weekly,
        Strategy::Monthly,
        Strategy::Quarterly,
    ];

    /// Nominal TTL in seconds.
    ///
    /// `Daily` reports a full day here; at set-time it resolves to the seconds
    /// left until midnight instead.
    pub fn ttl_seconds(self) -> u64 {
        match self {
            Strategy::NoCache => 0,
            Strategy::Short => 60,
            Strategy::Medium => 900,
            Strategy::Long => 3_600,
            Strategy::Daily => SECONDS_PER_DAY,
            Strategy::Weekly => 7 * SECONDS_PER_DAY,
            Strategy::Monthly => 30 * SECONDS_PER_DAY,
            Strategy::Quarterly => 90 * SECONDS_PER_DAY,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::NoCache => "NO_CACHE",
            Strategy::Short => "SHORT",
            Strategy::Medium => "MEDIUM",
            Strategy::Long => "LONG",
            Strategy::Daily => "DAILY",
            Strategy::Weekly => "WEEKLY",
            Strategy::Monthly => "MONTHLY",
            Strategy::Quarterly => "QUARTERLY",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// == Category ==
/// Class of cached data, each with a fixed default strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    MarketData,
    TickerInfo,
    FinancialStatements,
    HistoricalPrices,
    CompanyProfile,
    Recommendations,
    SearchResults,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::MarketData,
        Category::TickerInfo,
        Category::FinancialStatements,
        Category::HistoricalPrices,
        Category::CompanyProfile,
        Category::Recommendations,
        Category::SearchResults,
    ];

    pub fn strategy(self) -> Strategy {
        match self {
            Category::MarketData => Strategy::Short,
            Category::TickerInfo => Strategy::Long,
            Category::FinancialStatements => Strategy::Daily,
            Category::HistoricalPrices => Strategy::Daily,
            Category::CompanyProfile => Strategy::Monthly,
            Category::Recommendations => Strategy::Daily,
            Category::SearchResults => Strategy::Short,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::MarketData => "market_data",
            Category::TickerInfo => "ticker_info",
            Category::FinancialStatements => "financial_statements",
            Category::HistoricalPrices => "historical_prices",
            Category::CompanyProfile => "company_profile",
            Category::Recommendations => "recommendations",
            Category::SearchResults => "search_results",
        }
    }
}

/// Unmapped tags are a configuration error, never a silent default.
impl FromStr for Category {
    type Err = CacheError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == tag)
            .ok_or_else(|| CacheError::UnknownCategory(tag.to_string()))
    }
}

// == TTL Phrases ==
const TTL_PHRASES: [(&str, u64); 15] = [
    ("30 seconds", 30),
    ("1 minute", 60),
    ("5 minutes", 300),
    ("15 minutes", 900),
    ("30 minutes", 1_800),
    ("1 hour", 3_600),
    ("2 hours", 7_200),
    ("6 hours", 21_600),
    ("12 hours", 43_200),
    ("1 day", SECONDS_PER_DAY),
    ("2 days", 2 * SECONDS_PER_DAY),
    ("1 week", 7 * SECONDS_PER_DAY),
    ("2 weeks", 14 * SECONDS_PER_DAY),
    ("1 month", 30 * SECONDS_PER_DAY),
    ("3 months", 90 * SECONDS_PER_DAY),
];

/// Parses a human TTL such as `"15 minutes"` into seconds.
pub fn parse_ttl_phrase(phrase: &str) -> Result<u64, CacheError> {
    let wanted = phrase.trim().to_ascii_lowercase();
    TTL_PHRASES
        .iter()
        .find(|(p, _)| *p == wanted)
        .map(|(_, secs)| *secs)
        .ok_or_else(|| CacheError::InvalidRequest(format!("unknown TTL phrase '{}'", phrase)))
}

// == Expiry ==
/// Expiry requested for a single write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Never,
    Seconds(u64),
    /// Next 00:00:00 UTC, computed when the write happens
    Midnight,
}

impl Expiry {
    /// Concrete TTL at `now`; `None` means no expiry.
    ///
    /// Explicit durations are capped at [`MAX_TTL_SECONDS`].
    pub fn ttl_at(self, now: DateTime<Utc>) -> Option<u64> {
        match self {
            Expiry::Never => None,
            Expiry::Seconds(secs) => Some(secs.min(MAX_TTL_SECONDS)),
            Expiry::Midnight => Some(seconds_until_midnight(now)),
        }
    }
}

/// Seconds from `now` to the next 00:00:00 UTC, never less than one.
pub fn seconds_until_midnight(now: DateTime<Utc>) -> u64 {
    let next_midnight = (now.date_naive() + ChronoDuration::days(1))
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc());

    match next_midnight {
        Some(midnight) => (midnight - now).num_seconds().max(1) as u64,
        None => SECONDS_PER_DAY,
    }
}

// == Policy ==
/// What the caller asked for; resolved into an [`Expiry`] at write time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TtlPolicy {
    /// Explicit TTL in seconds, overrides the strategy
    pub ttl: Option<u64>,
    pub strategy: Option<Strategy>,
    /// Expire at next UTC midnight regardless of ttl/strategy
    pub invalidate_at_midnight: bool,
}

/// Outcome of resolving a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved {
    /// `NO_CACHE`: do not write
    Skip,
    Store(Expiry),
}

impl TtlPolicy {
    pub fn seconds(ttl: u64) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    pub fn strategy(strategy: Strategy) -> Self {
        Self {
            strategy: Some(strategy),
            ..Self::default()
        }
    }

    pub fn midnight() -> Self {
        Self {
            invalidate_at_midnight: true,
            ..Self::default()
        }
    }

    pub fn category(category: Category) -> Self {
        Self::strategy(category.strategy())
    }

    /// Midnight flag, then explicit TTL, then strategy, then no expiry.
    ///
    /// An explicit TTL of zero means no expiry.
    pub fn resolve(&self) -> Resolved {
        if self.invalidate_at_midnight {
            return Resolved::Store(Expiry::Midnight);
        }

        if let Some(ttl) = self.ttl {
            return Resolved::Store(if ttl == 0 {
                Expiry::Never
            } else {
                Expiry::Seconds(ttl)
            });
        }

        match self.strategy {
            Some(Strategy::NoCache) => Resolved::Skip,
            Some(Strategy::Daily) => Resolved::Store(Expiry::Midnight),
            Some(other) => Resolved::Store(Expiry::Seconds(other.ttl_seconds())),
            None => Resolved::Store(Expiry::Never),
        }
    }
}
