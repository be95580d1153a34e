//! Campaign discovery engine: query parsing, filtering, ranking and windowed views.
//!
//! The pipeline is `catalog -> filter -> sort -> window`. Every stage is a pure
//! function of its inputs; [`compute_view`] runs all of them from scratch and is
//! safe to call from any number of concurrent requests. [`DiscoverySession`]
//! layers the interactive state (filters, sort, loaded pages) on top.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cfd_core::{
    Campaign, CampaignStatus, Category, FilterError, FilterState, FundingRange, SortDirection,
    SortKey, SortState, DEFAULT_MAX_FUNDING_GOAL, DEFAULT_MIN_FUNDING_GOAL,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "cfd-discovery";

pub const DEFAULT_PAGE_SIZE: usize = 9;
pub const DEFAULT_LOAD_MORE_DELAY_MS: u64 = 800;

const CATEGORY_PREFIX: &str = "category:";
const CREATOR_PREFIX: &str = "creator:";

/// Parsed free-text search. Terms are trimmed and lower-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    Any,
    Category(String),
    Creator(String),
    General(String),
}

impl SearchQuery {
    pub fn parse(raw: &str) -> Self {
        let query = raw.trim().to_lowercase();
        if query.is_empty() {
            return SearchQuery::Any;
        }
        if let Some(rest) = query.strip_prefix(CATEGORY_PREFIX) {
            return SearchQuery::Category(rest.trim().to_string());
        }
        if let Some(rest) = query.strip_prefix(CREATOR_PREFIX) {
            return SearchQuery::Creator(rest.trim().to_string());
        }
        SearchQuery::General(query)
    }

    pub fn matches(&self, campaign: &Campaign) -> bool {
        match self {
            SearchQuery::Any => true,
            SearchQuery::Category(term) => campaign.category.as_str().contains(term.as_str()),
            SearchQuery::Creator(term) => campaign
                .creator
                .display_name
                .to_lowercase()
                .contains(term.as_str()),
            SearchQuery::General(term) => [
                campaign.title.as_str(),
                campaign.description.as_str(),
                campaign.creator.display_name.as_str(),
                campaign.category.as_str(),
            ]
            .iter()
            .any(|field| field.to_lowercase().contains(term.as_str())),
        }
    }
}

/// A [`FilterState`] with its search query parsed once, ready to test records.
#[derive(Debug, Clone)]
pub struct CompiledFilter<'f> {
    filters: &'f FilterState,
    query: SearchQuery,
}

impl<'f> CompiledFilter<'f> {
    pub fn new(filters: &'f FilterState) -> Self {
        Self {
            filters,
            query: SearchQuery::parse(&filters.search_query),
        }
    }

    pub fn query(&self) -> &SearchQuery {
        &self.query
    }

    pub fn matches(&self, campaign: &Campaign) -> bool {
        let filters = self.filters;
        if !filters.categories.is_empty() && !filters.categories.contains(&campaign.category) {
            return false;
        }
        if !filters.statuses.is_empty() && !filters.statuses.contains(&campaign.status) {
            return false;
        }
        if !filters.funding_range.contains(campaign.funding_goal) {
            return false;
        }
        if let Some(selected) = filters.active_location() {
            let at_location = campaign
                .location
                .as_ref()
                .is_some_and(|loc| loc.city == selected || loc.state == selected);
            if !at_location {
                return false;
            }
        }
        self.query.matches(campaign)
    }
}

/// Records satisfying every active predicate, in catalog order.
pub fn filter_campaigns<'a>(catalog: &'a [Campaign], filters: &FilterState) -> Vec<&'a Campaign> {
    let compiled = CompiledFilter::new(filters);
    catalog.iter().filter(|c| compiled.matches(c)).collect()
}

fn directed(ordering: Ordering, direction: SortDirection) -> Ordering {
    match direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}

/// Ordering of two records under `sort`. Only the primary key follows
/// `sort.direction`; the trending flag and expiry partition are fixed.
pub fn compare_campaigns(
    a: &Campaign,
    b: &Campaign,
    sort: SortState,
    now: DateTime<Utc>,
) -> Ordering {
    let direction = sort.direction;
    match sort.sort_by {
        SortKey::Trending => b
            .trending
            .cmp(&a.trending)
            .then_with(|| directed(a.view_count.cmp(&b.view_count), direction)),
        SortKey::Popular => directed(a.donor_count.cmp(&b.donor_count), direction),
        SortKey::EndingSoon => {
            let (a_expired, b_expired) = (a.is_expired(now), b.is_expired(now));
            a_expired.cmp(&b_expired).then_with(|| {
                if a_expired && b_expired {
                    b.created_at.cmp(&a.created_at)
                } else {
                    directed(a.end_date.cmp(&b.end_date), direction)
                }
            })
        }
        SortKey::MostFunded => directed(a.current_amount.total_cmp(&b.current_amount), direction),
        SortKey::RecentlyLaunched => directed(a.created_at.cmp(&b.created_at), direction),
        SortKey::Unsorted => Ordering::Equal,
    }
}

/// A newly ordered copy of `filtered`. Stable, so full ties keep catalog order.
pub fn sort_campaigns<'a>(
    filtered: &[&'a Campaign],
    sort: SortState,
    now: DateTime<Utc>,
) -> Vec<&'a Campaign> {
    let mut sorted = filtered.to_vec();
    if sort.sort_by != SortKey::Unsorted {
        sorted.sort_by(|a, b| compare_campaigns(a, b, sort, now));
    }
    sorted
}

/// The loaded prefix of a sorted result: `page` pages of `page_size` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    page_size: usize,
    page: usize,
}

impl Window {
    pub fn new(page_size: usize, page: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            page: page.max(1),
        }
    }

    pub fn first(page_size: usize) -> Self {
        Self::new(page_size, 1)
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn limit(&self) -> usize {
        self.page_size.saturating_mul(self.page)
    }

    pub fn apply<'s, T>(&self, sorted: &'s [T]) -> &'s [T] {
        &sorted[..self.limit().min(sorted.len())]
    }

    pub fn has_more(&self, total: usize) -> bool {
        self.limit() < total
    }

    /// The next window, or `None` when everything is already displayed.
    pub fn next(&self, total: usize) -> Option<Window> {
        self.has_more(total)
            .then(|| Window::new(self.page_size, self.page + 1))
    }
}

/// Read-only projection of the catalog for one set of inputs.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogView<'a> {
    pub displayed: Vec<&'a Campaign>,
    pub has_more: bool,
    pub total_matched: usize,
    pub active_filter_count: usize,
    pub page: usize,
    pub page_size: usize,
}

pub fn compute_view<'a>(
    catalog: &'a [Campaign],
    filters: &FilterState,
    sort: SortState,
    window: Window,
    now: DateTime<Utc>,
) -> CatalogView<'a> {
    let filtered = filter_campaigns(catalog, filters);
    let sorted = sort_campaigns(&filtered, sort, now);
    let displayed = window.apply(&sorted).to_vec();
    let has_more = displayed.len() < sorted.len();
    debug!(
        catalog = catalog.len(),
        matched = sorted.len(),
        displayed = displayed.len(),
        sort = %sort.sort_by,
        page = window.page(),
        "computed discovery view"
    );
    CatalogView {
        displayed,
        has_more,
        total_matched: sorted.len(),
        active_filter_count: filters.active_filter_count(),
        page: window.page(),
        page_size: window.page_size(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacetCount<T> {
    pub value: T,
    pub count: usize,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Facets {
    pub categories: Vec<FacetCount<Category>>,
    pub statuses: Vec<FacetCount<CampaignStatus>>,
}

/// Per-category and per-status counts over the whole catalog.
pub fn facet_counts(catalog: &[Campaign], filters: &FilterState) -> Facets {
    let mut categories = BTreeMap::<Category, usize>::new();
    let mut statuses = BTreeMap::<CampaignStatus, usize>::new();
    for c in catalog {
        *categories.entry(c.category).or_default() += 1;
        *statuses.entry(c.status).or_default() += 1;
    }
    Facets {
        categories: Category::ALL
            .into_iter()
            .map(|value| FacetCount {
                value,
                count: categories.get(&value).copied().unwrap_or(0),
                selected: filters.categories.contains(&value),
            })
            .collect(),
        statuses: CampaignStatus::ALL
            .into_iter()
            .map(|value| FacetCount {
                value,
                count: statuses.get(&value).copied().unwrap_or(0),
                selected: filters.statuses.contains(&value),
            })
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub page_size: usize,
    pub load_more_delay_ms: u64,
    pub max_funding_goal: f64,
    pub default_sort: SortKey,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            load_more_delay_ms: DEFAULT_LOAD_MORE_DELAY_MS,
            max_funding_goal: DEFAULT_MAX_FUNDING_GOAL,
            default_sort: SortKey::default(),
        }
    }
}

impl DiscoveryConfig {
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// `discovery.yaml` under `workspace_root` when present, then environment overrides.
    pub fn load(workspace_root: &Path) -> Result<Self> {
        let path = workspace_root.join("discovery.yaml");
        let base = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };
        Ok(base.with_env_overrides())
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = std::env::var("CFD_PAGE_SIZE").ok().and_then(|v| v.parse().ok()) {
            self.page_size = v;
        }
        if let Some(v) = std::env::var("CFD_LOAD_MORE_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.load_more_delay_ms = v;
        }
        if let Some(v) = std::env::var("CFD_MAX_FUNDING_GOAL")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.max_funding_goal = v;
        }
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size.max(1)
    }

    pub fn load_more_delay(&self) -> Duration {
        Duration::from_millis(self.load_more_delay_ms)
    }

    /// The unfiltered funding range. A bad `max_funding_goal` falls back to the built-in default.
    pub fn default_range(&self) -> FundingRange {
        FundingRange::new(DEFAULT_MIN_FUNDING_GOAL, self.max_funding_goal).unwrap_or_else(|err| {
            warn!(error = %err, "invalid max_funding_goal; using default funding range");
            FundingRange::default()
        })
    }

    pub fn default_filters(&self) -> FilterState {
        FilterState::with_default_range(self.default_range())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum LoadMoreOutcome {
    Loaded { page: usize },
    /// Everything matching is already displayed; nothing changed.
    Exhausted,
    /// Another load is in flight; this call was ignored.
    AlreadyLoading,
    /// Filters or sort changed (or the session shut down) during the delay.
    Superseded,
}

#[derive(Debug, Clone)]
struct SessionState {
    filters: FilterState,
    sort: SortState,
    page: usize,
    draft_range: FundingRange,
    generation: u64,
}

/// Token of the `load_more` call currently waiting out its delay; 0 when idle.
///
/// Released synchronously on drop, so a caller that abandons the future
/// (timeout, `select!`, aborted task) does not leave the session stuck.
struct InFlightLoad<'s> {
    slot: &'s AtomicU64,
    token: u64,
}

impl Drop for InFlightLoad<'_> {
    fn drop(&mut self) {
        // A newer call may own the slot after an invalidation; leave it alone.
        let _ = self.slot.compare_exchange(
            self.token,
            0,
            AtomicOrdering::AcqRel,
            AtomicOrdering::Acquire,
        );
    }
}

/// Owned snapshot of a session's current view.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub campaigns: Vec<Campaign>,
    pub has_more: bool,
    pub total_matched: usize,
    pub active_filter_count: usize,
    pub page: usize,
    pub page_size: usize,
    pub loading: bool,
}

/// Interactive discovery state over one catalog snapshot.
///
/// Any filter or sort change resets the window to page 1 and cancels an
/// in-flight [`DiscoverySession::load_more`].
#[derive(Debug)]
pub struct DiscoverySession {
    catalog: Arc<Vec<Campaign>>,
    page_size: usize,
    load_more_delay: Duration,
    state: Mutex<SessionState>,
    generation_tx: watch::Sender<u64>,
    in_flight: AtomicU64,
    next_token: AtomicU64,
}

impl DiscoverySession {
    pub fn new(catalog: Arc<Vec<Campaign>>, config: &DiscoveryConfig) -> Self {
        let filters = config.default_filters();
        let (generation_tx, _) = watch::channel(0);
        Self {
            catalog,
            page_size: config.page_size(),
            load_more_delay: config.load_more_delay(),
            state: Mutex::new(SessionState {
                draft_range: filters.funding_range,
                filters,
                sort: SortState::by(config.default_sort),
                page: 1,
                generation: 0,
            }),
            generation_tx,
            in_flight: AtomicU64::new(0),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn catalog(&self) -> &[Campaign] {
        &self.catalog
    }

    pub async fn filters(&self) -> FilterState {
        self.state.lock().await.filters.clone()
    }

    pub async fn sort(&self) -> SortState {
        self.state.lock().await.sort
    }

    pub async fn page(&self) -> usize {
        self.state.lock().await.page
    }

    pub async fn draft_range(&self) -> FundingRange {
        self.state.lock().await.draft_range
    }

    pub async fn is_loading(&self) -> bool {
        self.in_flight.load(AtomicOrdering::Acquire) != 0
    }

    fn invalidate(&self, state: &mut SessionState) {
        state.page = 1;
        self.cancel_pending(state);
    }

    fn cancel_pending(&self, state: &mut SessionState) {
        self.in_flight.store(0, AtomicOrdering::Release);
        state.generation += 1;
        self.generation_tx.send_replace(state.generation);
    }

    /// Apply an arbitrary filter edit, then reset pagination.
    pub async fn update_filters(&self, edit: impl FnOnce(&mut FilterState)) {
        let mut state = self.state.lock().await;
        edit(&mut state.filters);
        self.invalidate(&mut state);
    }

    pub async fn toggle_category(&self, category: Category) {
        self.update_filters(|f| f.toggle_category(category)).await;
    }

    pub async fn toggle_status(&self, status: CampaignStatus) {
        self.update_filters(|f| f.toggle_status(status)).await;
    }

    pub async fn set_location(&self, location: impl Into<String>) {
        let location = location.into();
        self.update_filters(|f| f.location = location).await;
    }

    pub async fn set_search_query(&self, query: impl Into<String>) {
        let query = query.into();
        self.update_filters(|f| f.search_query = query).await;
    }

    /// Live slider movement. Only the draft slot changes; results do not.
    pub async fn drag_funding_range(&self, min: f64, max: f64) -> Result<(), FilterError> {
        let range = FundingRange::new(min, max)?;
        self.state.lock().await.draft_range = range;
        Ok(())
    }

    /// Slider release: the draft range becomes the active filter.
    pub async fn commit_funding_range(&self) {
        let mut state = self.state.lock().await;
        state.filters.funding_range = state.draft_range;
        self.invalidate(&mut state);
    }

    pub async fn clear_all_filters(&self) {
        let mut state = self.state.lock().await;
        state.filters.clear_all();
        state.draft_range = state.filters.funding_range;
        self.invalidate(&mut state);
    }

    pub async fn set_sort(&self, sort: SortState) {
        let mut state = self.state.lock().await;
        state.sort = sort;
        self.invalidate(&mut state);
    }

    /// Switch key, taking that key's natural direction.
    pub async fn set_sort_key(&self, key: SortKey) {
        self.set_sort(SortState::by(key)).await;
    }

    pub async fn toggle_direction(&self) {
        let mut state = self.state.lock().await;
        state.sort.direction = state.sort.direction.flipped();
        self.invalidate(&mut state);
    }

    /// Cancel any pending load; call on teardown.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        self.cancel_pending(&mut state);
    }

    /// Reveal one more page after the configured delay.
    pub async fn load_more(&self) -> LoadMoreOutcome {
        let (generation, mut changes, in_flight) = {
            let state = self.state.lock().await;
            if self.in_flight.load(AtomicOrdering::Acquire) != 0 {
                return LoadMoreOutcome::AlreadyLoading;
            }
            let matched = filter_campaigns(&self.catalog, &state.filters).len();
            if !Window::new(self.page_size, state.page).has_more(matched) {
                return LoadMoreOutcome::Exhausted;
            }
            let token = self.next_token.fetch_add(1, AtomicOrdering::Relaxed);
            if self
                .in_flight
                .compare_exchange(0, token, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
                .is_err()
            {
                return LoadMoreOutcome::AlreadyLoading;
            }
            let guard = InFlightLoad {
                slot: &self.in_flight,
                token,
            };
            (state.generation, self.generation_tx.subscribe(), guard)
        };

        if !self.load_more_delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.load_more_delay) => {}
                _ = changes.changed() => {}
            }
        }

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!(generation, current = state.generation, "load more superseded");
            return LoadMoreOutcome::Superseded;
        }
        state.page += 1;
        drop(in_flight);
        LoadMoreOutcome::Loaded { page: state.page }
    }

    pub async fn view_at(&self, now: DateTime<Utc>) -> SessionView {
        let state = self.state.lock().await.clone();
        let loading = self.in_flight.load(AtomicOrdering::Acquire) != 0;
        let view = compute_view(
            &self.catalog,
            &state.filters,
            state.sort,
            Window::new(self.page_size, state.page),
            now,
        );
        SessionView {
            campaigns: view.displayed.into_iter().cloned().collect(),
            has_more: view.has_more,
            total_matched: view.total_matched,
            active_filter_count: view.active_filter_count,
            page: view.page,
            page_size: view.page_size,
            loading,
        }
    }

    pub async fn view(&self) -> SessionView {
        self.view_at(Utc::now()).await
    }
}
