use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::coefficients::{CoefficientError, CoefficientLibrary};
use crate::core::distance::haversine_many;
use crate::core::filters::{
    matches_level, matches_mf, matches_subject, within_radius_and_price, OperatorSegment, PoolEntry,
};
use crate::core::panel::{render_list, render_shares, Candidate, Panel, DEDUP_RADIUS_KM};
use crate::core::regions::{subject_name, GeoError, RegionAtlas};
use crate::core::size::parse_size;
use crate::models::{AnalysisOptions, AnalysisResult, LineItem, PanelAttribute, PricingMethod, ReferenceConstruction};

/// Highest relaxation level of the non-MF search
const MAX_LEVEL: u8 = 2;

/// Levels below this one apply operator segmentation under `operator_plus`
const SEGMENTED_LEVELS: u8 = 2;

const DEFAULT_PARALLEL_THRESHOLD: usize = 64;

/// Errors that abort an analysis run or its preparation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Coefficient(#[from] CoefficientError),

    #[error(transparent)]
    Geo(#[from] GeoError),

    #[error("Pool filter start date {start} is after end date {end}")]
    InvalidPoolFilter { start: NaiveDate, end: NaiveDate },
}

/// Tunable constants of the panel search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    pub radius_step_km: f64,
    pub radius_max_km: f64,
    pub mf_radius_km: f64,
    /// Allowed price deviation relative to the row's own base price
    pub price_tolerance: f64,
    pub size_tolerance: f64,
    /// Panel size needed at level 0
    pub required_count_min: usize,
    /// Panel size needed at levels 1 and 2
    pub required_count_default: usize,
    pub dedup_radius_km: f64,
    pub decay_rate: f64,
    /// Reference rows rented for this share of a month or less are dropped
    pub min_rental_coefficient: f64,
    /// Fold shares beyond the top N values into "Other"
    pub shares_top_n: Option<usize>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            radius_step_km: 0.5,
            radius_max_km: 5.0,
            mf_radius_km: 0.1,
            price_tolerance: 0.5,
            size_tolerance: 0.15,
            required_count_min: 3,
            required_count_default: 10,
            dedup_radius_km: DEDUP_RADIUS_KM,
            decay_rate: 1.0,
            min_rental_coefficient: 0.3,
            shares_top_n: None,
        }
    }
}

impl SearchParams {
    /// Search radii from 0 to the maximum, both ends included
    ///
    /// Generated from an integer step index so the last radius is exact.
    pub fn radii(&self) -> Vec<f64> {
        if self.radius_step_km <= 0.0 || self.radius_max_km <= 0.0 {
            return vec![0.0];
        }
        let steps = (self.radius_max_km / self.radius_step_km).round() as usize;
        (0..=steps).map(|step| step as f64 * self.radius_step_km).collect()
    }

    pub fn required_count(&self, level: u8) -> usize {
        if level == 0 {
            self.required_count_min
        } else {
            self.required_count_default
        }
    }
}

/// States of the non-MF relaxation search
#[derive(Debug)]
enum SearchState<'a> {
    Level(u8),
    Radius { level: u8, step: usize },
    DoneSuccess(Panel<'a>),
    DoneEmpty,
}

/// Panel search over a reference pool for every line item of a run
///
/// # Pipeline
/// 1. Pre-pass: drop the run's own advertisers, unpriced rows and short rentals
/// 2. Per row: MF single pass, or the cascading level/radius search
/// 3. Panel statistics flattened into result columns
/// 4. Subject names for the whole result
#[derive(Debug, Clone)]
pub struct MatchingEngine {
    library: CoefficientLibrary,
    params: SearchParams,
    options: AnalysisOptions,
    parallel_threshold: usize,
}

impl MatchingEngine {
    pub fn new(library: CoefficientLibrary, options: AnalysisOptions) -> Self {
        Self {
            library,
            params: SearchParams::default(),
            options,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }

    pub fn with_params(mut self, params: SearchParams) -> Self {
        self.params = params;
        self
    }

    /// Rows processed in parallel once a run has at least this many line items
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold.max(1);
        self
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    pub fn library(&self) -> &CoefficientLibrary {
        &self.library
    }

    /// Analyze every line item against the reference pool
    ///
    /// Results keep the order of `items`.
    pub fn run(&self, items: &[LineItem], references: &[ReferenceConstruction]) -> Vec<AnalysisResult> {
        if items.is_empty() {
            info!("No line items to analyze");
            return Vec::new();
        }

        let pool = self.prepare_pool(references);
        info!(
            "Analyzing {} line items against {} of {} reference rows ({:?}, {})",
            items.len(),
            pool.len(),
            references.len(),
            self.options.pricing_method,
            self.options.aggregation_method
        );

        let analyze = |item: &LineItem| {
            let panel = self.search(item, &pool);
            self.summarize(item, &panel)
        };

        let mut results: Vec<AnalysisResult> = if items.len() >= self.parallel_threshold {
            items.par_iter().map(analyze).collect()
        } else {
            items.iter().map(analyze).collect()
        };

        attach_subject_names(&mut results);

        let matched = results.iter().filter(|r| r.is_matched()).count();
        info!("Analysis complete: {} of {} line items matched", matched, results.len());
        results
    }

    /// One-time pre-pass over the reference pool
    ///
    /// Drops unpriced rows and short rentals. Each row's own advertiser is
    /// excluded later, in [`MatchingEngine::search`].
    pub fn prepare_pool<'a>(&self, references: &'a [ReferenceConstruction]) -> Vec<PoolEntry<'a>> {
        references
            .iter()
            .filter_map(PoolEntry::new)
            .filter(|entry| {
                let r = entry.reference;
                self.library.rental_coefficient(r.date_from, r.date_to) > self.params.min_rental_coefficient
            })
            .collect()
    }

    /// Build the panel of one line item from a prepared pool
    ///
    /// The row's own advertiser never appears among its candidates.
    pub fn search<'a>(&self, item: &LineItem, pool: &[PoolEntry<'a>]) -> Panel<'a> {
        let competitors: Vec<PoolEntry<'a>> = pool
            .iter()
            .filter(|entry| entry.reference.advertiser != item.advertiser)
            .copied()
            .collect();

        if item.is_mf() {
            self.search_mf(item, &competitors)
        } else {
            self.search_non_mf(item, &competitors)
        }
    }

    fn candidates<'a>(
        &self,
        entries: &[(PoolEntry<'a>, f64)],
        radius: f64,
        row_price: f64,
    ) -> Vec<Candidate<'a>> {
        let price_tolerance = self.params.price_tolerance * row_price.abs();
        entries
            .iter()
            .filter(|(entry, distance)| {
                within_radius_and_price(*distance, radius, entry.base_price, row_price, price_tolerance)
            })
            .map(|(entry, distance)| {
                let weight = self.library.distance_coefficient(*distance, radius, self.params.decay_rate);
                Candidate::new(entry.reference, entry.base_price, *distance, weight)
            })
            .collect()
    }

    fn with_distances<'a>(item: &LineItem, entries: Vec<PoolEntry<'a>>) -> Vec<(PoolEntry<'a>, f64)> {
        let lats: Vec<f64> = entries.iter().map(|e| e.reference.latitude).collect();
        let lons: Vec<f64> = entries.iter().map(|e| e.reference.longitude).collect();
        let distances = haversine_many(item.latitude, item.longitude, &lats, &lons);
        entries.into_iter().zip(distances).collect()
    }

    /// Single pass for MF rows at the fixed MF radius
    fn search_mf<'a>(&self, item: &LineItem, pool: &[PoolEntry<'a>]) -> Panel<'a> {
        let Some(row_price) = item.base_price else {
            debug!("MF row of {} has no base price", item.advertiser);
            return Panel::default();
        };

        let mf: Vec<PoolEntry<'a>> = pool.iter().filter(|e| matches_mf(e)).copied().collect();
        if mf.is_empty() {
            return Panel::default();
        }

        let target_size = item.size.as_deref().and_then(parse_size);
        let eligible: Vec<(PoolEntry<'a>, f64)> = Self::with_distances(item, mf)
            .into_iter()
            .filter(|(entry, _)| matches_level(entry, item, target_size, self.params.size_tolerance, None))
            .collect();

        let panel = Panel::new(self.candidates(&eligible, self.params.mf_radius_km, row_price));
        debug!("MF panel for ({}, {}): {} candidates", item.latitude, item.longitude, panel.size());
        panel
    }

    /// Cascading relaxation over levels and radii; first sufficient panel wins
    fn search_non_mf<'a>(&self, item: &LineItem, pool: &[PoolEntry<'a>]) -> Panel<'a> {
        let Some(row_price) = item.base_price else {
            debug!("Row of {} has no base price", item.advertiser);
            return Panel::default();
        };

        let operator_plus = self.options.pricing_method == PricingMethod::OperatorPlus;
        let subject_code = item.subject_code.as_deref();

        let base: Vec<PoolEntry<'a>> = pool
            .iter()
            .filter(|e| !operator_plus || matches_subject(e, subject_code))
            .copied()
            .collect();
        if base.is_empty() {
            return Panel::default();
        }
        let base = Self::with_distances(item, base);

        let target_size = item.size.as_deref().and_then(parse_size);
        let top_operators = subject_code
            .map(|code| self.library.tables().top_operators(code))
            .unwrap_or(&[]);
        let segment = OperatorSegment::for_item(item.operator.as_deref(), top_operators);
        let radii = self.params.radii();

        let mut level_set: Vec<(PoolEntry<'a>, f64)> = Vec::new();
        let mut state = SearchState::Level(0);

        loop {
            state = match state {
                SearchState::Level(level) if level > MAX_LEVEL => SearchState::DoneEmpty,
                SearchState::Level(level) => {
                    let segment = (operator_plus && level < SEGMENTED_LEVELS).then_some(&segment);
                    level_set = base
                        .iter()
                        .filter(|(entry, _)| {
                            matches_level(entry, item, target_size, self.params.size_tolerance, segment)
                        })
                        .copied()
                        .collect();

                    if level_set.is_empty() {
                        debug!("Level {}: no candidates after level filters", level);
                        SearchState::Level(level + 1)
                    } else {
                        SearchState::Radius { level, step: 0 }
                    }
                }
                SearchState::Radius { level, step } if step >= radii.len() => SearchState::Level(level + 1),
                SearchState::Radius { level, step } => {
                    let radius = radii[step];
                    match self.try_radius(&level_set, level, radius, row_price) {
                        Some(panel) => {
                            debug!("Panel accepted at level {}, radius {} km: {} candidates", level, radius, panel.size());
                            SearchState::DoneSuccess(panel)
                        }
                        None => SearchState::Radius { level, step: step + 1 },
                    }
                }
                SearchState::DoneSuccess(panel) => return panel,
                SearchState::DoneEmpty => return Panel::default(),
            };
        }
    }

    fn try_radius<'a>(
        &self,
        level_set: &[(PoolEntry<'a>, f64)],
        level: u8,
        radius: f64,
        row_price: f64,
    ) -> Option<Panel<'a>> {
        let candidates = self.candidates(level_set, radius, row_price);
        if candidates.is_empty() {
            return None;
        }

        let mut panel = Panel::new(candidates);
        if level == 0 {
            panel.dedup_by_proximity(self.params.dedup_radius_km);
            if panel.is_empty() {
                return None;
            }
        }

        (panel.size() >= self.params.required_count(level)).then_some(panel)
    }

    /// Flatten a panel into the row's result columns
    fn summarize(&self, item: &LineItem, panel: &Panel) -> AnalysisResult {
        if panel.is_empty() {
            return AnalysisResult::unmatched(item.clone());
        }

        let top_n = self.params.shares_top_n;
        AnalysisResult {
            item: item.clone(),
            panel_base_price: Some(panel.aggregate_price(self.options.aggregation_method).round()),
            advertisers: Some(render_list(&panel.composition(PanelAttribute::Advertiser, None))),
            operators: Some(render_list(&panel.composition(PanelAttribute::Operator, None))),
            constructions: Some(render_list(&panel.constructions())),
            advertiser_shares: Some(render_shares(&panel.shares(PanelAttribute::Advertiser, top_n))),
            operator_shares: Some(render_shares(&panel.shares(PanelAttribute::Operator, top_n))),
            subject_name: None,
        }
    }
}

/// Fill `subject_name` for every result; rows without a subject code stay null
fn attach_subject_names(results: &mut [AnalysisResult]) {
    for result in results.iter_mut() {
        result.subject_name = result.item.subject_code.as_deref().map(|code| subject_name(code).to_string());
    }
}

/// Fill missing subject codes of line items from region outlines
///
/// Returns how many rows got a code. In strict mode the first miss aborts.
pub fn assign_subjects(
    items: &mut [LineItem],
    atlas: &RegionAtlas,
    tolerance_m: f64,
    strict: bool,
) -> Result<usize, EngineError> {
    let mut assigned = 0;
    for item in items.iter_mut().filter(|item| item.subject_code.is_none()) {
        if let Some(code) = atlas.locate_subject(item.latitude, item.longitude, tolerance_m, strict)? {
            item.subject_code = Some(code);
            assigned += 1;
        }
    }
    Ok(assigned)
}
