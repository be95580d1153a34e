//! Axum JSON API over the discovery engine.
//!
//! Handlers hold no per-user state: every request rebuilds its view from the
//! catalog snapshot and the query string.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use cfd_catalog::{CatalogSnapshot, CatalogState};
use cfd_core::{
    Campaign, CampaignStatus, Category, FilterState, FundingRange, Location, SortDirection,
    SortKey, SortState,
};
use cfd_discovery::{compute_view, facet_counts, DiscoveryConfig, Facets, Window};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "cfd-web";

pub const MAX_PAGE_SIZE: usize = 60;

#[derive(Clone)]
pub struct AppState {
    pub catalog: CatalogState,
    pub config: DiscoveryConfig,
    /// Fixed reference time for time-based sorting; `None` uses the wall clock.
    pub now: Option<DateTime<Utc>>,
}

impl AppState {
    pub fn new(catalog: CatalogState, config: DiscoveryConfig) -> Self {
        Self {
            catalog,
            config,
            now: None,
        }
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    fn snapshot(&self) -> Result<&CatalogSnapshot, ApiError> {
        match &self.catalog {
            CatalogState::Ready(snapshot) => Ok(snapshot),
            CatalogState::Empty { source_id } => Err(ApiError::unavailable(format!(
                "catalog {source_id} has no campaigns"
            ))),
            CatalogState::Failed { source_id, reason } => Err(ApiError::unavailable(format!(
                "catalog {source_id} failed to load: {reason}"
            ))),
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

/// Query string accepted by the listing and facet endpoints.
#[derive(Debug, Deserialize, Default)]
pub struct DiscoverQuery {
    /// Comma-separated category slugs.
    pub category: Option<String>,
    /// Comma-separated status slugs.
    pub status: Option<String>,
    pub min_goal: Option<f64>,
    pub max_goal: Option<f64>,
    pub location: Option<String>,
    pub q: Option<String>,
    pub sort: Option<String>,
    pub direction: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

impl DiscoverQuery {
    pub fn filters(&self, config: &DiscoveryConfig) -> Result<FilterState, ApiError> {
        let mut filters = config.default_filters();
        for slug in split_list(self.category.as_deref()) {
            let category = slug
                .parse::<Category>()
                .map_err(|err| ApiError::bad_request(err.to_string()))?;
            filters.categories.insert(category);
        }
        for slug in split_list(self.status.as_deref()) {
            let status = slug
                .parse::<CampaignStatus>()
                .map_err(|err| ApiError::bad_request(err.to_string()))?;
            filters.statuses.insert(status);
        }
        if self.min_goal.is_some() || self.max_goal.is_some() {
            let defaults = filters.default_range;
            filters.funding_range = FundingRange::new(
                self.min_goal.unwrap_or(defaults.min()),
                self.max_goal.unwrap_or(defaults.max()),
            )
            .map_err(|err| ApiError::bad_request(err.to_string()))?;
        }
        if let Some(location) = &self.location {
            filters.location = location.clone();
        }
        if let Some(q) = &self.q {
            filters.search_query = q.clone();
        }
        Ok(filters)
    }

    pub fn sort(&self, config: &DiscoveryConfig) -> Result<SortState, ApiError> {
        let key = match self.sort.as_deref() {
            Some(raw) => {
                let key = SortKey::parse(raw);
                if key == SortKey::Unsorted && !raw.trim().eq_ignore_ascii_case("unsorted") {
                    warn!(sort = raw, "unrecognized sort key; keeping catalog order");
                }
                key
            }
            None => config.default_sort,
        };
        let mut sort = SortState::by(key);
        if let Some(raw) = self.direction.as_deref() {
            sort.direction = raw
                .parse::<SortDirection>()
                .map_err(|err| ApiError::bad_request(err.to_string()))?;
        }
        Ok(sort)
    }

    pub fn window(&self, config: &DiscoveryConfig) -> Window {
        let page_size = self
            .page_size
            .unwrap_or_else(|| config.page_size())
            .clamp(1, MAX_PAGE_SIZE);
        Window::new(page_size, self.page.unwrap_or(1))
    }
}

fn split_list(raw: Option<&str>) -> impl Iterator<Item = &str> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignCard {
    pub id: String,
    pub title: String,
    pub short_description: String,
    pub category: Category,
    pub status: CampaignStatus,
    pub funding_goal: f64,
    pub current_amount: f64,
    pub currency: String,
    pub percent_funded: f64,
    pub days_remaining: i64,
    pub donor_count: u64,
    pub creator_name: String,
    pub location: Option<String>,
    pub featured: bool,
    pub trending: bool,
    pub urgent: bool,
}

impl CampaignCard {
    pub fn from_campaign(campaign: &Campaign, now: DateTime<Utc>) -> Self {
        Self {
            id: campaign.id.clone(),
            title: campaign.title.clone(),
            short_description: campaign.short_description.clone(),
            category: campaign.category,
            status: campaign.status,
            funding_goal: campaign.funding_goal,
            current_amount: campaign.current_amount,
            currency: campaign.currency.clone(),
            percent_funded: campaign.percent_funded(),
            days_remaining: campaign.days_remaining(now),
            donor_count: campaign.donor_count,
            creator_name: campaign.creator.display_name.clone(),
            location: campaign.location.as_ref().and_then(location_label),
            featured: campaign.featured,
            trending: campaign.trending,
            urgent: campaign.urgent,
        }
    }
}

/// `"City, State"`, skipping blank parts; `None` when both are blank.
fn location_label(location: &Location) -> Option<String> {
    let parts = [location.city.trim(), location.state.trim()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>();
    (!parts.is_empty()).then(|| parts.join(", "))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignPage {
    pub campaigns: Vec<CampaignCard>,
    pub has_more: bool,
    pub total_matched: usize,
    pub active_filter_count: usize,
    pub page: usize,
    pub page_size: usize,
    pub catalog_fingerprint: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/campaigns", get(campaigns_handler))
        .route("/campaigns/{id}", get(campaign_detail_handler))
        .route("/facets", get(facets_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "discovery api listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub fn port_from_env() -> u16 {
    std::env::var("CFD_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000)
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn campaigns_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DiscoverQuery>,
) -> Result<Json<CampaignPage>, ApiError> {
    let snapshot = state.snapshot()?;
    let filters = query.filters(&state.config)?;
    let sort = query.sort(&state.config)?;
    let now = state.now();
    let view = compute_view(&snapshot.campaigns, &filters, sort, query.window(&state.config), now);
    Ok(Json(CampaignPage {
        campaigns: view
            .displayed
            .iter()
            .map(|c| CampaignCard::from_campaign(c, now))
            .collect(),
        has_more: view.has_more,
        total_matched: view.total_matched,
        active_filter_count: view.active_filter_count,
        page: view.page,
        page_size: view.page_size,
        catalog_fingerprint: snapshot.fingerprint.clone(),
    }))
}

async fn campaign_detail_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<CampaignCard>, ApiError> {
    let snapshot = state.snapshot()?;
    snapshot
        .campaigns
        .iter()
        .find(|c| c.id == id)
        .map(|c| Json(CampaignCard::from_campaign(c, state.now())))
        .ok_or_else(|| ApiError::not_found(format!("campaign {id} not found")))
}

async fn facets_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DiscoverQuery>,
) -> Result<Json<Facets>, ApiError> {
    let snapshot = state.snapshot()?;
    let filters = query.filters(&state.config)?;
    Ok(Json(facet_counts(&snapshot.campaigns, &filters)))
}
