//! Per-task extraction session.
//!
//! One session owns one browser page context for the lifetime of one query:
//! navigate to the search entry point, force a usable interface through the
//! recovery machine, enumerate result listings, and pull a business record
//! out of each listing's detail view. Sessions are strictly sequential
//! internally and share no state with concurrent sessions.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::browser::{BrowserEngine, EngineError, PageHandle, PageIdentity};
use crate::classifier::{classify_page, InterfaceRecovery, RecoveryAction};
use crate::dedup::dedup_records;
use crate::record::{
    clean_hours, clean_phone, clean_text, clean_website, parse_rating, parse_review_count,
    BusinessRecord,
};
use crate::stealth::{identity_start, jitter_delay, pick_user_agent};

/// Search entry point, forced to the English locale so selectors stay stable.
const SEARCH_URL_BASE: &str = "https://www.google.com/maps/search/";

/// Result-listing anchor present once the canonical layout has results.
const LISTING_SELECTOR: &str = "a[href*=\"/maps/place/\"]";
/// Scrollable results feed; listings past the first paint load lazily.
const FEED_SELECTOR: &str = "div[role=\"feed\"]";
/// Heading that proves the detail view finished rendering.
const DETAIL_NAME_SELECTOR: &str = "h1.DUwDvf";

const DETAIL_ADDRESS_SELECTOR: &str = "button[data-item-id=\"address\"] div.fontBodyMedium";
const DETAIL_WEBSITE_SELECTOR: &str = "a[data-item-id=\"authority\"] div.fontBodyMedium";
const DETAIL_PHONE_SELECTOR: &str = "button[data-item-id^=\"phone:tel:\"] div.fontBodyMedium";
const DETAIL_CATEGORY_SELECTOR: &str = "button.DkEaL";
const DETAIL_HOURS_SELECTOR: &str = "button[data-item-id^=\"oh\"] div.fontBodyMedium";
const DETAIL_RATING_SELECTOR: &str = "div.fontBodyMedium.dmRWX span[aria-hidden]";
const DETAIL_REVIEWS_SELECTOR: &str = "div.fontBodyMedium.dmRWX span[aria-label]";
const DETAIL_PRICE_SELECTOR: &str = "div.LTs0Rc";

const LISTING_WAIT: Duration = Duration::from_secs(10);
const DETAIL_WAIT: Duration = Duration::from_secs(10);

/// Cap on feed-scroll rounds while chasing `max_results`; a scroll that
/// loads no new listings ends enumeration early as end-of-list.
const MAX_SCROLL_ROUNDS: usize = 20;
const SCROLL_STEP_PX: u32 = 1000;

/// Why a task failed. `NoResultsFound` is deliberately absent: an empty
/// listing is a successful empty outcome, not a failure.
#[derive(Debug, Error)]
pub enum ExtractionErrorKind {
    #[error("navigation timed out")]
    NavigationTimeout,

    #[error("interface never became usable within {attempts} recreate attempts")]
    InterfaceUnrecoverable { attempts: u32 },

    #[error("task cancelled")]
    Cancelled,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Task-level failure carrying the query it belongs to.
#[derive(Debug, Error)]
#[error("extraction failed for '{query}': {kind}")]
pub struct ExtractionError {
    pub kind: ExtractionErrorKind,
    pub query: String,
}

impl ExtractionError {
    pub fn new(kind: ExtractionErrorKind, query: impl Into<String>) -> Self {
        Self { kind, query: query.into() }
    }

    pub fn cancelled(query: impl Into<String>) -> Self {
        Self::new(ExtractionErrorKind::Cancelled, query)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ExtractionErrorKind::Cancelled)
    }
}

/// Session policy knobs, derived from the run configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub recreate_budget: u32,
    pub user_agents: Vec<String>,
    pub delay_min_secs: f64,
    pub delay_max_secs: f64,
    pub viewport: (u32, u32),
    pub proxy: Option<String>,
}

/// What one completed session produced.
#[derive(Debug)]
pub struct SessionReport {
    pub records: Vec<BusinessRecord>,
    /// Listings visible in the results panel before truncation.
    pub listing_total: usize,
    /// Listings whose detail view was skipped or only partially extracted.
    pub partial_entries: usize,
    /// Recreations spent getting a usable interface.
    pub recreate_attempts: u32,
}

impl SessionReport {
    pub fn is_empty(&self) -> bool {
        self.listing_total == 0
    }
}

/// Runs one query end-to-end against a browser engine.
pub struct ExtractionSession<'a> {
    engine: &'a dyn BrowserEngine,
    config: SessionConfig,
    /// Random pool offset fixed for the session; recreations walk from it.
    identity_start: usize,
    /// Page contexts created so far, used to walk the identity pool.
    rotation: u32,
}

impl<'a> ExtractionSession<'a> {
    pub fn new(engine: &'a dyn BrowserEngine, config: SessionConfig) -> Self {
        let identity_start = identity_start(config.user_agents.len());
        Self { engine, config, identity_start, rotation: 0 }
    }

    /// Execute the session. The caller bounds total wall-clock time; this
    /// method only bounds individual waits.
    pub async fn run(
        &mut self,
        query: &str,
        max_results: usize,
    ) -> Result<SessionReport, ExtractionError> {
        let url = search_url(query);
        let mut page = self.fresh_page(query).await?;
        if let Err(e) = self.navigate(page.as_mut(), &url, query).await {
            let _ = page.close().await;
            return Err(e);
        }

        // Force a usable layout or spend the recreate budget trying.
        let mut recovery = InterfaceRecovery::new(self.config.recreate_budget);
        loop {
            let verdict = match classify_page(page.as_mut()).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    let _ = page.close().await;
                    return Err(ExtractionError::new(e.into(), query));
                }
            };
            match recovery.observe(verdict) {
                RecoveryAction::Proceed => break,
                RecoveryAction::Recreate => {
                    debug!(query, attempt = recovery.attempts(), "recreating page context");
                    let _ = page.close().await;
                    jitter_delay(self.config.delay_min_secs, self.config.delay_max_secs).await;
                    page = self.fresh_page(query).await?;
                    if let Err(e) = self.navigate(page.as_mut(), &url, query).await {
                        let _ = page.close().await;
                        return Err(e);
                    }
                }
                RecoveryAction::GiveUp => {
                    let _ = page.close().await;
                    return Err(ExtractionError::new(
                        ExtractionErrorKind::InterfaceUnrecoverable {
                            attempts: recovery.attempts(),
                        },
                        query,
                    ));
                }
            }
        }

        let report = self
            .extract_listings(page.as_mut(), query, max_results, recovery.attempts())
            .await;
        let _ = page.close().await;
        report
    }

    async fn fresh_page(&mut self, query: &str) -> Result<Box<dyn PageHandle>, ExtractionError> {
        let identity = PageIdentity {
            user_agent: pick_user_agent(
                &self.config.user_agents,
                self.identity_start,
                self.rotation,
            ),
            proxy: self.config.proxy.clone(),
            viewport: self.config.viewport,
        };
        self.rotation += 1;
        self.engine
            .create_page(&identity)
            .await
            .map_err(|e| ExtractionError::new(e.into(), query))
    }

    async fn navigate(
        &self,
        page: &mut dyn PageHandle,
        url: &str,
        query: &str,
    ) -> Result<(), ExtractionError> {
        page.navigate(url).await.map_err(|e| {
            let kind = match e {
                EngineError::Navigation { .. } => ExtractionErrorKind::NavigationTimeout,
                other => other.into(),
            };
            ExtractionError::new(kind, query)
        })
    }

    async fn extract_listings(
        &self,
        page: &mut dyn PageHandle,
        query: &str,
        max_results: usize,
        recreate_attempts: u32,
    ) -> Result<SessionReport, ExtractionError> {
        let has_listings = page
            .wait_for(LISTING_SELECTOR, LISTING_WAIT)
            .await
            .map_err(|e| ExtractionError::new(e.into(), query))?;

        let mut listing_total = if has_listings {
            page.count_of(LISTING_SELECTOR)
                .await
                .map_err(|e| ExtractionError::new(e.into(), query))?
        } else {
            0
        };

        // Only the first screenful of listings renders eagerly; scroll the
        // feed until `max_results` are visible or the count stops growing.
        let mut rounds = 0;
        while listing_total > 0 && listing_total < max_results && rounds < MAX_SCROLL_ROUNDS {
            rounds += 1;
            if page.scroll_within(FEED_SELECTOR, SCROLL_STEP_PX).await.is_err() {
                // Feed may be absent on single-result serves.
                break;
            }
            jitter_delay(self.config.delay_min_secs, self.config.delay_max_secs).await;
            let count = page
                .count_of(LISTING_SELECTOR)
                .await
                .map_err(|e| ExtractionError::new(e.into(), query))?;
            if count <= listing_total {
                debug!(query, listing_total, "feed stopped growing, end of list");
                break;
            }
            listing_total = count;
        }

        if listing_total == 0 {
            // Zero listings is a successful empty result; the worker emits
            // the warning event.
            return Ok(SessionReport {
                records: Vec::new(),
                listing_total: 0,
                partial_entries: 0,
                recreate_attempts,
            });
        }

        let take = listing_total.min(max_results);
        let mut records = Vec::with_capacity(take);
        let mut partial_entries = 0;

        for index in 0..take {
            if let Err(e) = page.click_nth(LISTING_SELECTOR, index).await {
                warn!(query, index, error = %e, "listing click failed, skipping entry");
                partial_entries += 1;
                continue;
            }
            let detail_ready = page
                .wait_for(DETAIL_NAME_SELECTOR, DETAIL_WAIT)
                .await
                .map_err(|e| ExtractionError::new(e.into(), query))?;
            if !detail_ready {
                warn!(query, index, "detail view never rendered, skipping entry");
                partial_entries += 1;
                continue;
            }

            match self.extract_detail(page, query).await {
                Some((record, missing_fields)) => {
                    if missing_fields > 0 {
                        partial_entries += 1;
                    }
                    records.push(record);
                }
                None => partial_entries += 1,
            }

            jitter_delay(self.config.delay_min_secs, self.config.delay_max_secs).await;
        }

        Ok(SessionReport {
            records: dedup_records(records),
            listing_total,
            partial_entries,
            recreate_attempts,
        })
    }

    /// Read one detail view into a record. Missing optional fields are kept
    /// as explicit None; a missing name voids the entry entirely.
    async fn extract_detail(
        &self,
        page: &mut dyn PageHandle,
        query: &str,
    ) -> Option<(BusinessRecord, usize)> {
        let name = read_text(page, DETAIL_NAME_SELECTOR).await.and_then(|t| clean_text(&t))?;
        let mut record = BusinessRecord::new(name, query);
        let mut missing = 0;

        record.address = read_text(page, DETAIL_ADDRESS_SELECTOR)
            .await
            .and_then(|t| clean_text(&t));
        record.website = read_text(page, DETAIL_WEBSITE_SELECTOR)
            .await
            .and_then(|t| clean_website(&t));
        record.phone = read_text(page, DETAIL_PHONE_SELECTOR)
            .await
            .and_then(|t| clean_phone(&t));
        record.category = read_text(page, DETAIL_CATEGORY_SELECTOR)
            .await
            .and_then(|t| clean_text(&t));
        record.hours = read_text(page, DETAIL_HOURS_SELECTOR)
            .await
            .and_then(|t| clean_hours(&t));
        record.rating = read_text(page, DETAIL_RATING_SELECTOR)
            .await
            .and_then(|t| parse_rating(&t));
        record.review_count = page
            .attribute_of(DETAIL_REVIEWS_SELECTOR, "aria-label")
            .await
            .ok()
            .flatten()
            .and_then(|t| parse_review_count(&t));
        record.price_level = read_text(page, DETAIL_PRICE_SELECTOR)
            .await
            .filter(|t| t.contains('$'))
            .and_then(|t| clean_text(&t));

        for absent in [
            record.address.is_none(),
            record.phone.is_none(),
            record.category.is_none(),
            record.rating.is_none(),
        ] {
            if absent {
                missing += 1;
            }
        }

        Some((record, missing))
    }
}

async fn read_text(page: &mut dyn PageHandle, selector: &str) -> Option<String> {
    page.text_of(selector).await.ok().flatten()
}

/// Build the query-driven search entry point URL.
pub fn search_url(query: &str) -> String {
    format!("{}{}?hl=en", SEARCH_URL_BASE, urlencoding::encode(query))
}
