//! Core domain model for crowdfunding campaign discovery.
//!
//! Campaign records are immutable once they enter a catalog. The filter and
//! sort value objects defined here are plain data; the engine that evaluates
//! them lives in `cfd-discovery`.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "cfd-core";

/// Location filter value that disables the location predicate.
pub const ALL_LOCATIONS: &str = "All Locations";

pub const DEFAULT_MIN_FUNDING_GOAL: f64 = 0.0;
pub const DEFAULT_MAX_FUNDING_GOAL: f64 = 1_000_000.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseEnumError {
    #[error("unknown category `{0}`")]
    Category(String),
    #[error("unknown campaign status `{0}`")]
    Status(String),
    #[error("unknown sort direction `{0}`")]
    Direction(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("funding range is inverted: min {min} > max {max}")]
    InvertedRange { min: f64, max: f64 },
    #[error("funding range bound is not a finite number")]
    NonFiniteBound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Medical,
    Education,
    Technology,
    Community,
    DisasterRelief,
    Animals,
    ArtsCulture,
    Sports,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Medical,
        Category::Education,
        Category::Technology,
        Category::Community,
        Category::DisasterRelief,
        Category::Animals,
        Category::ArtsCulture,
        Category::Sports,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Medical => "medical",
            Category::Education => "education",
            Category::Technology => "technology",
            Category::Community => "community",
            Category::DisasterRelief => "disaster_relief",
            Category::Animals => "animals",
            Category::ArtsCulture => "arts_culture",
            Category::Sports => "sports",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| ParseEnumError::Category(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    PendingReview,
    Active,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl CampaignStatus {
    pub const ALL: [CampaignStatus; 7] = [
        CampaignStatus::Draft,
        CampaignStatus::PendingReview,
        CampaignStatus::Active,
        CampaignStatus::Paused,
        CampaignStatus::Completed,
        CampaignStatus::Cancelled,
        CampaignStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::PendingReview => "pending_review",
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Cancelled => "cancelled",
            CampaignStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        CampaignStatus::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| ParseEnumError::Status(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Creator {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub rating: f32,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub country: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub city: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

/// A single fundraising campaign as supplied by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub short_description: String,
    pub category: Category,
    pub status: CampaignStatus,
    pub funding_goal: f64,
    pub current_amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub creator: Creator,
    #[serde(default)]
    pub location: Option<Location>,
    pub created_at: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub donor_count: u64,
    #[serde(default)]
    pub view_count: u64,
    #[serde(default)]
    pub share_count: u64,
    #[serde(default)]
    pub featured: bool,
    #[serde(default)]
    pub trending: bool,
    #[serde(default)]
    pub urgent: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Campaign {
    /// Funding progress in percent, derived from the current amount and goal.
    pub fn percent_funded(&self) -> f64 {
        if self.funding_goal > 0.0 {
            self.current_amount / self.funding_goal * 100.0
        } else {
            0.0
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.end_date <= now
    }

    /// Whole days left until `end_date`, rounded up, never negative.
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        let secs = (self.end_date - now).num_seconds();
        if secs <= 0 {
            0
        } else {
            (secs + 86_399) / 86_400
        }
    }
}

/// Inclusive funding-goal bounds. `min <= max` is enforced on construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 2]", into = "[f64; 2]")]
pub struct FundingRange {
    min: f64,
    max: f64,
}

impl FundingRange {
    pub fn new(min: f64, max: f64) -> Result<Self, FilterError> {
        if !min.is_finite() || !max.is_finite() {
            return Err(FilterError::NonFiniteBound);
        }
        if min > max {
            return Err(FilterError::InvertedRange { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn contains(&self, amount: f64) -> bool {
        self.min <= amount && amount <= self.max
    }
}

impl Default for FundingRange {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_FUNDING_GOAL,
            max: DEFAULT_MAX_FUNDING_GOAL,
        }
    }
}

impl TryFrom<[f64; 2]> for FundingRange {
    type Error = FilterError;

    fn try_from(value: [f64; 2]) -> Result<Self, Self::Error> {
        Self::new(value[0], value[1])
    }
}

impl From<FundingRange> for [f64; 2] {
    fn from(value: FundingRange) -> Self {
        [value.min, value.max]
    }
}

/// User-selected discovery filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterState {
    pub categories: BTreeSet<Category>,
    pub statuses: BTreeSet<CampaignStatus>,
    pub funding_range: FundingRange,
    pub location: String,
    pub search_query: String,
    /// Range the funding filter resets to; a committed range equal to it is inactive.
    #[serde(skip)]
    pub default_range: FundingRange,
}

impl Default for FilterState {
    fn default() -> Self {
        Self::with_default_range(FundingRange::default())
    }
}

impl FilterState {
    pub fn with_default_range(default_range: FundingRange) -> Self {
        Self {
            categories: BTreeSet::new(),
            statuses: BTreeSet::new(),
            funding_range: default_range,
            location: ALL_LOCATIONS.to_string(),
            search_query: String::new(),
            default_range,
        }
    }

    pub fn toggle_category(&mut self, category: Category) {
        if !self.categories.remove(&category) {
            self.categories.insert(category);
        }
    }

    pub fn toggle_status(&mut self, status: CampaignStatus) {
        if !self.statuses.remove(&status) {
            self.statuses.insert(status);
        }
    }

    /// The selected location, or `None` when the location dimension is disabled.
    /// The value is compared verbatim; no trimming or case folding.
    pub fn active_location(&self) -> Option<&str> {
        let location = self.location.as_str();
        if location.is_empty() || location == ALL_LOCATIONS {
            None
        } else {
            Some(location)
        }
    }

    pub fn is_funding_range_active(&self) -> bool {
        self.funding_range != self.default_range
    }

    /// Number of active filter badges. The search query is not counted.
    pub fn active_filter_count(&self) -> usize {
        self.categories.len()
            + self.statuses.len()
            + usize::from(self.active_location().is_some())
            + usize::from(self.is_funding_range_active())
    }

    /// Reset every dimension except the free-text query.
    pub fn clear_all(&mut self) {
        let search_query = std::mem::take(&mut self.search_query);
        *self = Self::with_default_range(self.default_range);
        self.search_query = search_query;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Trending,
    Popular,
    EndingSoon,
    MostFunded,
    RecentlyLaunched,
    /// Leaves records in catalog order. Unrecognized keys land here.
    #[serde(other)]
    Unsorted,
}

impl SortKey {
    /// Parse a sort key name. Unknown names fall back to [`SortKey::Unsorted`].
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "trending" => SortKey::Trending,
            "popular" => SortKey::Popular,
            "ending_soon" => SortKey::EndingSoon,
            "most_funded" => SortKey::MostFunded,
            "recently_launched" => SortKey::RecentlyLaunched,
            _ => SortKey::Unsorted,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortKey::Trending => "trending",
            SortKey::Popular => "popular",
            SortKey::EndingSoon => "ending_soon",
            SortKey::MostFunded => "most_funded",
            SortKey::RecentlyLaunched => "recently_launched",
            SortKey::Unsorted => "unsorted",
        }
    }

    pub fn default_direction(self) -> SortDirection {
        match self {
            SortKey::EndingSoon => SortDirection::Asc,
            _ => SortDirection::Desc,
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

impl FromStr for SortDirection {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            _ => Err(ParseEnumError::Direction(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortState {
    pub sort_by: SortKey,
    pub direction: SortDirection,
}

impl SortState {
    /// Sort by `key` in its natural direction.
    pub fn by(key: SortKey) -> Self {
        Self {
            sort_by: key,
            direction: key.default_direction(),
        }
    }
}

impl Default for SortState {
    fn default() -> Self {
        Self::by(SortKey::default())
    }
}
