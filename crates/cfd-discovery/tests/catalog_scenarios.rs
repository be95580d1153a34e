use std::sync::Arc;

use cfd_catalog::bundled_catalog;
use cfd_core::{
    Campaign, CampaignStatus, Category, FilterState, FundingRange, SortDirection, SortKey,
    SortState,
};
use cfd_discovery::{
    compute_view, filter_campaigns, sort_campaigns, CompiledFilter, DiscoveryConfig,
    DiscoverySession, LoadMoreOutcome, Window, DEFAULT_PAGE_SIZE,
};
use chrono::{DateTime, Duration, TimeZone, Utc};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).single().unwrap()
}

fn catalog() -> Arc<Vec<Campaign>> {
    bundled_catalog().expect("bundled catalog").campaigns
}

fn ids(records: &[&Campaign]) -> Vec<String> {
    records.iter().map(|c| c.id.clone()).collect()
}

#[test]
fn medical_category_filter_selects_the_medical_subset() {
    let catalog = catalog();
    let mut filters = FilterState::default();
    filters.toggle_category(Category::Medical);

    let view = compute_view(
        &catalog,
        &filters,
        SortState::by(SortKey::Unsorted),
        Window::first(DEFAULT_PAGE_SIZE),
        now(),
    );

    assert_eq!(ids(&view.displayed), vec!["camp-001", "camp-009", "camp-017"]);
    assert!(view.displayed.iter().all(|c| c.category == Category::Medical));
    assert_eq!(view.active_filter_count, 1);
    assert_eq!(view.total_matched, 3);
}

#[test]
fn category_scoped_query_ignores_description_mentions() {
    let catalog = catalog();
    let mut filters = FilterState::default();
    filters.search_query = "category:technology".into();

    let matched = filter_campaigns(&catalog, &filters);
    assert_eq!(ids(&matched), vec!["camp-003", "camp-010", "camp-018"]);

    filters.search_query = "technology".into();
    let general = filter_campaigns(&catalog, &filters);
    assert_eq!(
        ids(&general),
        vec!["camp-002", "camp-003", "camp-010", "camp-011", "camp-018"]
    );
}

#[test]
fn default_filters_show_one_page_of_the_catalog() {
    let catalog = catalog();
    let view = compute_view(
        &catalog,
        &FilterState::default(),
        SortState::default(),
        Window::first(DEFAULT_PAGE_SIZE),
        now(),
    );

    assert_eq!(view.displayed.len(), DEFAULT_PAGE_SIZE.min(catalog.len()));
    assert_eq!(view.has_more, catalog.len() > DEFAULT_PAGE_SIZE);
    assert_eq!(view.total_matched, 18);
    assert_eq!(view.active_filter_count, 0);
}

#[test]
fn most_funded_desc_puts_larger_amount_first() {
    let catalog = catalog();
    let mut smaller = catalog[0].clone();
    smaller.id = "smaller".into();
    smaller.current_amount = 950_000.0;
    let mut larger = catalog[1].clone();
    larger.id = "larger".into();
    larger.current_amount = 3_250_000.0;
    let records = vec![smaller, larger];
    let filtered = records.iter().collect::<Vec<_>>();

    let sort = SortState {
        sort_by: SortKey::MostFunded,
        direction: SortDirection::Desc,
    };
    assert_eq!(ids(&sort_campaigns(&filtered, sort, now())), vec!["larger", "smaller"]);
}

#[test]
fn expired_campaigns_sort_last_regardless_of_direction() {
    let catalog = catalog();
    let mut expired = catalog[0].clone();
    expired.id = "expired".into();
    expired.end_date = now() - Duration::days(3);
    let mut open = catalog[1].clone();
    open.id = "open".into();
    open.end_date = now() + Duration::days(10);
    let records = vec![expired, open];
    let filtered = records.iter().collect::<Vec<_>>();

    for direction in [SortDirection::Asc, SortDirection::Desc] {
        let sort = SortState {
            sort_by: SortKey::EndingSoon,
            direction,
        };
        assert_eq!(ids(&sort_campaigns(&filtered, sort, now())), vec!["open", "expired"]);
    }
}

#[tokio::test]
async fn rapid_load_more_stops_at_the_end_of_the_results() {
    let config = DiscoveryConfig {
        load_more_delay_ms: 25,
        ..Default::default()
    };
    let session = DiscoverySession::new(catalog(), &config);
    assert!(session.view_at(now()).await.has_more);

    let (a, b, c) = tokio::join!(session.load_more(), session.load_more(), session.load_more());
    let loaded = [a, b, c]
        .iter()
        .filter(|o| matches!(o, LoadMoreOutcome::Loaded { .. }))
        .count();
    assert_eq!(loaded, 1);
    assert_eq!(session.load_more().await, LoadMoreOutcome::Exhausted);
    assert_eq!(session.load_more().await, LoadMoreOutcome::Exhausted);

    let view = session.view_at(now()).await;
    assert_eq!(session.page().await, 2);
    assert!(!view.has_more);

    let catalog = catalog();
    let all = filter_campaigns(&catalog, &FilterState::default());
    let expected = sort_campaigns(&all, SortState::default(), now());
    assert_eq!(
        view.campaigns.iter().map(|c| c.id.clone()).collect::<Vec<_>>(),
        ids(&expected)
    );
}

#[test]
fn pipeline_is_idempotent_for_every_sort_key() {
    let catalog = catalog();
    let mut filters = FilterState::default();
    filters.toggle_status(CampaignStatus::Active);
    for key in [
        SortKey::Trending,
        SortKey::Popular,
        SortKey::EndingSoon,
        SortKey::MostFunded,
        SortKey::RecentlyLaunched,
        SortKey::Unsorted,
    ] {
        let first = compute_view(&catalog, &filters, SortState::by(key), Window::new(4, 2), now());
        let second = compute_view(&catalog, &filters, SortState::by(key), Window::new(4, 2), now());
        assert_eq!(ids(&first.displayed), ids(&second.displayed), "sort key {key}");
    }
}

#[test]
fn each_added_predicate_never_grows_the_result() {
    let catalog = catalog();
    let mut filters = FilterState::default();
    let mut previous = filter_campaigns(&catalog, &filters).len();

    let steps: Vec<Box<dyn Fn(&mut FilterState)>> = vec![
        Box::new(|f: &mut FilterState| f.toggle_status(CampaignStatus::Active)),
        Box::new(|f: &mut FilterState| f.funding_range = FundingRange::new(10_000.0, 200_000.0).unwrap()),
        Box::new(|f: &mut FilterState| f.location = "Texas".into()),
        Box::new(|f: &mut FilterState| f.toggle_category(Category::Medical)),
        Box::new(|f: &mut FilterState| f.search_query = "veteran".into()),
    ];
    for step in steps {
        step(&mut filters);
        let count = filter_campaigns(&catalog, &filters).len();
        assert!(count <= previous, "{count} > {previous} after {filters:?}");
        previous = count;
    }
    assert_eq!(previous, 1);
}

#[test]
fn results_are_exactly_the_records_passing_every_predicate() {
    let catalog = catalog();
    let mut filters = FilterState::default();
    filters.toggle_category(Category::Technology);
    filters.toggle_category(Category::Education);
    filters.funding_range = FundingRange::new(0.0, 100_000.0).unwrap();

    let matched = filter_campaigns(&catalog, &filters);
    let compiled = CompiledFilter::new(&filters);
    for campaign in catalog.iter() {
        let expected = filters.categories.contains(&campaign.category)
            && filters.funding_range.contains(campaign.funding_goal);
        let included = matched.iter().any(|m| m.id == campaign.id);
        assert_eq!(included, expected, "{}", campaign.id);
        assert_eq!(compiled.matches(campaign), expected, "{}", campaign.id);
    }
}

#[test]
fn location_filter_excludes_records_without_location() {
    let catalog = catalog();
    let mut filters = FilterState::default();
    filters.location = "Portland".into();
    assert_eq!(ids(&filter_campaigns(&catalog, &filters)), vec!["camp-004"]);

    filters.location = "Denver".into();
    assert_eq!(ids(&filter_campaigns(&catalog, &filters)), vec!["camp-006", "camp-016"]);
    assert!(filter_campaigns(&catalog, &filters)
        .iter()
        .all(|c| c.location.is_some()));
}

#[test]
fn empty_result_is_an_empty_view() {
    let catalog = catalog();
    let mut filters = FilterState::default();
    filters.search_query = "creator:nobody-by-this-name".into();
    let view = compute_view(
        &catalog,
        &filters,
        SortState::default(),
        Window::first(DEFAULT_PAGE_SIZE),
        now(),
    );
    assert!(view.displayed.is_empty());
    assert_eq!(view.total_matched, 0);
    assert!(!view.has_more);
}

#[tokio::test]
async fn every_filter_or_sort_change_returns_to_page_one() {
    let config = DiscoveryConfig {
        page_size: 4,
        load_more_delay_ms: 0,
        ..Default::default()
    };
    let session = DiscoverySession::new(catalog(), &config);

    session.load_more().await;
    session.load_more().await;
    assert_eq!(session.page().await, 3);
    session.toggle_status(CampaignStatus::Active).await;
    assert_eq!(session.page().await, 1);

    session.load_more().await;
    session.set_sort_key(SortKey::EndingSoon).await;
    assert_eq!(session.page().await, 1);

    session.load_more().await;
    session.clear_all_filters().await;
    assert_eq!(session.page().await, 1);
    assert_eq!(session.view_at(now()).await.campaigns.len(), 4);
}
