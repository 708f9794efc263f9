//! Panels of comparable placements and the statistics drawn from them.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

use crate::core::distance::is_close;
use crate::models::{AggregationMethod, PanelAttribute, ReferenceConstruction};

/// Two same-advertiser candidates closer than this (km) are one site
pub const DEDUP_RADIUS_KM: f64 = 0.01;

/// Share of prices cut from each tail by the trimmed mean
const TRIM_PROPORTION: f64 = 0.1;

/// Bucket that collects values beyond the top-N
pub const OTHER_BUCKET: &str = "Other";

/// Errors raised by panel statistics
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PanelError {
    #[error("Unsupported aggregation method: {0}")]
    UnknownMethod(String),

    #[error("Unsupported panel attribute: {0}")]
    UnknownAttribute(String),
}

/// A reference construction matched for one line item
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub reference: &'a ReferenceConstruction,
    pub base_price: f64,
    pub distance_km: f64,
    pub weight: f64,
}

impl<'a> Candidate<'a> {
    pub fn new(reference: &'a ReferenceConstruction, base_price: f64, distance_km: f64, weight: f64) -> Self {
        Self {
            reference,
            base_price,
            distance_km,
            weight,
        }
    }

    /// Short "{format} {size}" label, with `-` for an unknown size
    pub fn describe(&self) -> String {
        let size = self.reference.size.as_deref().unwrap_or("-");
        format!("{} {}", self.reference.format, size)
    }

    fn attribute(&self, attribute: PanelAttribute) -> Option<&'a str> {
        let reference: &'a ReferenceConstruction = self.reference;
        match attribute {
            PanelAttribute::Advertiser => Some(reference.advertiser.as_str()),
            PanelAttribute::Operator => reference.operator.as_deref(),
        }
    }
}

/// Ordered set of candidates selected for one line item
#[derive(Debug, Clone, Default)]
pub struct Panel<'a> {
    candidates: Vec<Candidate<'a>>,
}

impl<'a> Panel<'a> {
    pub fn new(candidates: Vec<Candidate<'a>>) -> Self {
        Self { candidates }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn size(&self) -> usize {
        self.candidates.len()
    }

    pub fn candidates(&self) -> &[Candidate<'a>] {
        &self.candidates
    }

    /// Drop candidates that repeat an earlier one's advertiser within `radius_km`
    ///
    /// The first occurrence of each site wins. The engine passes
    /// [`DEDUP_RADIUS_KM`] unless configured otherwise.
    pub fn dedup_by_proximity(&mut self, radius_km: f64) {
        let mut kept: Vec<Candidate<'a>> = Vec::with_capacity(self.candidates.len());

        for candidate in self.candidates.drain(..) {
            let duplicate = kept.iter().any(|unique| {
                unique.reference.advertiser == candidate.reference.advertiser
                    && is_close(
                        candidate.reference.latitude,
                        candidate.reference.longitude,
                        unique.reference.latitude,
                        unique.reference.longitude,
                        radius_km,
                    )
            });
            if !duplicate {
                kept.push(candidate);
            }
        }

        self.candidates = kept;
    }

    fn prices(&self) -> Vec<f64> {
        self.candidates.iter().map(|c| c.base_price).collect()
    }

    fn mean_price(&self) -> f64 {
        mean(&self.prices())
    }

    fn weighted_mean_price(&self) -> f64 {
        let total_weight: f64 = self.candidates.iter().map(|c| c.weight).sum();
        if total_weight <= 0.0 {
            return self.mean_price();
        }
        let weighted: f64 = self.candidates.iter().map(|c| c.base_price * c.weight).sum();
        weighted / total_weight
    }

    fn trimmed_mean_price(&self) -> f64 {
        let mut prices = self.prices();
        prices.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let cut = (TRIM_PROPORTION * prices.len() as f64).floor() as usize;
        mean(&prices[cut..prices.len() - cut])
    }

    fn median_price(&self) -> f64 {
        let mut prices = self.prices();
        prices.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let mid = prices.len() / 2;
        if prices.len() % 2 == 0 {
            (prices[mid - 1] + prices[mid]) / 2.0
        } else {
            prices[mid]
        }
    }

    /// Collapse the panel's base prices into one benchmark; 0.0 when empty
    pub fn aggregate_price(&self, method: AggregationMethod) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        match method {
            AggregationMethod::Mean => self.mean_price(),
            AggregationMethod::WeightedMean => self.weighted_mean_price(),
            AggregationMethod::TrimmedMean => self.trimmed_mean_price(),
            AggregationMethod::Median => self.median_price(),
        }
    }

    /// Same as [`Panel::aggregate_price`] for a method given by name
    pub fn aggregate_price_by_name(&self, method: &str) -> Result<f64, PanelError> {
        Ok(self.aggregate_price(method.parse()?))
    }

    /// Values of an attribute with their counts, most frequent first
    ///
    /// Ties keep the order in which values first appear.
    fn ranked_counts(&self, attribute: PanelAttribute) -> Vec<(&'a str, usize)> {
        let mut order: Vec<&'a str> = Vec::new();
        let mut counts: HashMap<&'a str, usize> = HashMap::new();

        for value in self.candidates.iter().filter_map(|c| c.attribute(attribute)) {
            let count = counts.entry(value).or_insert_with(|| {
                order.push(value);
                0
            });
            *count += 1;
        }

        let mut ranked: Vec<(&'a str, usize)> = order.into_iter().map(|v| (v, counts[v])).collect();
        // Stable sort preserves first-seen order among equal counts
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
    }

    fn fold_top_n(ranked: Vec<(&'a str, usize)>, top_n: Option<usize>) -> Vec<(String, usize)> {
        match top_n {
            Some(n) if n < ranked.len() => {
                let rest: usize = ranked[n..].iter().map(|(_, count)| count).sum();
                let mut folded: Vec<(String, usize)> =
                    ranked[..n].iter().map(|(v, c)| (v.to_string(), *c)).collect();
                if rest > 0 {
                    folded.push((OTHER_BUCKET.to_string(), rest));
                }
                folded
            }
            _ => ranked.into_iter().map(|(v, c)| (v.to_string(), c)).collect(),
        }
    }

    /// Sorted unique values of an attribute
    ///
    /// With `top_n`, only the most frequent values are listed and the rest
    /// appear as a single [`OTHER_BUCKET`] entry.
    pub fn composition(&self, attribute: PanelAttribute, top_n: Option<usize>) -> Vec<String> {
        let ranked = self.ranked_counts(attribute);
        let has_rest = matches!(top_n, Some(n) if n < ranked.len());

        let mut values: Vec<String> = Self::fold_top_n(ranked, top_n)
            .into_iter()
            .map(|(value, _)| value)
            .filter(|value| !(has_rest && value == OTHER_BUCKET))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if has_rest {
            values.push(OTHER_BUCKET.to_string());
        }
        values
    }

    /// Percentage of candidates carrying each attribute value
    ///
    /// Candidates without the attribute are left out of the denominator.
    /// Percentages are rounded to two decimals, most frequent first.
    pub fn shares(&self, attribute: PanelAttribute, top_n: Option<usize>) -> Vec<(String, f64)> {
        let ranked = self.ranked_counts(attribute);
        let total: usize = ranked.iter().map(|(_, count)| count).sum();
        if total == 0 {
            return Vec::new();
        }

        Self::fold_top_n(ranked, top_n)
            .into_iter()
            .map(|(value, count)| {
                let share = (count as f64 / total as f64) * 100.0;
                (value, (share * 100.0).round() / 100.0)
            })
            .collect()
    }

    /// Sorted unique construction descriptions
    pub fn constructions(&self) -> Vec<String> {
        self.candidates
            .iter()
            .map(Candidate::describe)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Join a list of values the way reports show them
pub fn render_list(values: &[String]) -> String {
    values.join(", ")
}

/// Render shares as `"name: 12.50%"` entries
pub fn render_shares(shares: &[(String, f64)]) -> String {
    shares
        .iter()
        .map(|(name, share)| format!("{}: {:.2}%", name, share))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn reference(advertiser: &str, operator: Option<&str>, lat: f64, lon: f64) -> ReferenceConstruction {
        ReferenceConstruction {
            advertiser: advertiser.to_string(),
            operator: operator.map(str::to_string),
            format: "BB".to_string(),
            size: Some("3x6".to_string()),
            side: Some("A".to_string()),
            latitude: lat,
            longitude: lon,
            subject_code: Some("RU-MOW".to_string()),
            date_from: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            date_to: NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            hours_per_day: None,
            spot_duration: None,
            spots_per_block: None,
            block_duration: None,
            placement_price: None,
            base_price: Some(100.0),
        }
    }

    fn panel_of<'a>(refs: &'a [ReferenceConstruction], prices: &[f64]) -> Panel<'a> {
        Panel::new(
            refs.iter()
                .zip(prices)
                .map(|(r, p)| Candidate::new(r, *p, 0.0, 1.0))
                .collect(),
        )
    }

    #[test]
    fn test_empty_panel_aggregates_to_zero() {
        let panel = Panel::default();
        for method in [
            AggregationMethod::Mean,
            AggregationMethod::WeightedMean,
            AggregationMethod::TrimmedMean,
            AggregationMethod::Median,
        ] {
            assert_eq!(panel.aggregate_price(method), 0.0);
        }
        assert!(panel.shares(PanelAttribute::Advertiser, None).is_empty());
    }

    #[test]
    fn test_single_candidate_all_methods_agree() {
        let refs = vec![reference("A", Some("Russ"), 55.75, 37.61)];
        let panel = panel_of(&refs, &[1234.5]);
        for method in ["mean", "weighted_mean", "trimmed_mean", "median"] {
            assert_eq!(panel.aggregate_price_by_name(method).unwrap(), 1234.5);
        }
        assert_eq!(
            panel.aggregate_price_by_name("mode"),
            Err(PanelError::UnknownMethod("mode".to_string()))
        );
    }

    #[test]
    fn test_aggregation_methods() {
        let refs: Vec<_> = (0..10).map(|i| reference("A", None, 55.0 + i as f64, 37.0)).collect();
        let prices = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 1000.0];
        let panel = panel_of(&refs, &prices);

        assert!((panel.aggregate_price(AggregationMethod::Mean) - 104.5).abs() < 1e-9);
        assert!((panel.aggregate_price(AggregationMethod::Median) - 5.5).abs() < 1e-9);
        // One value cut from each tail: mean of 2..=9
        assert!((panel.aggregate_price(AggregationMethod::TrimmedMean) - 5.5).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_mean() {
        let refs = vec![reference("A", None, 55.0, 37.0), reference("B", None, 56.0, 37.0)];
        let panel = Panel::new(vec![
            Candidate::new(&refs[0], 100.0, 0.0, 1.0),
            Candidate::new(&refs[1], 200.0, 1.0, 0.25),
        ]);
        assert!((panel.aggregate_price(AggregationMethod::WeightedMean) - 120.0).abs() < 1e-9);

        let zero = Panel::new(vec![
            Candidate::new(&refs[0], 100.0, 0.0, 0.0),
            Candidate::new(&refs[1], 200.0, 1.0, 0.0),
        ]);
        assert_eq!(zero.aggregate_price(AggregationMethod::WeightedMean), 150.0);
    }

    #[test]
    fn test_dedup_by_proximity() {
        let refs = vec![
            reference("A", None, 55.75, 37.61),
            reference("A", None, 55.75003, 37.61), // ~3 m away, same advertiser
            reference("B", None, 55.75003, 37.61), // same spot, other advertiser
            reference("A", None, 55.76, 37.61),    // ~1 km away
        ];
        let mut panel = panel_of(&refs, &[1.0, 2.0, 3.0, 4.0]);
        panel.dedup_by_proximity(DEDUP_RADIUS_KM);

        let kept: Vec<f64> = panel.candidates().iter().map(|c| c.base_price).collect();
        assert_eq!(kept, vec![1.0, 3.0, 4.0]);
    }

    #[test]
    fn test_composition_sorted_unique() {
        let refs = vec![
            reference("Zeta", Some("Russ"), 55.0, 37.0),
            reference("Alpha", None, 55.1, 37.0),
            reference("Zeta", Some("Gallery"), 55.2, 37.0),
        ];
        let panel = panel_of(&refs, &[1.0, 1.0, 1.0]);

        assert_eq!(panel.composition(PanelAttribute::Advertiser, None), vec!["Alpha", "Zeta"]);
        assert_eq!(panel.composition(PanelAttribute::Operator, None), vec!["Gallery", "Russ"]);
        assert_eq!(panel.composition(PanelAttribute::Advertiser, Some(1)), vec!["Zeta", OTHER_BUCKET]);
        assert_eq!(panel.constructions(), vec!["BB 3x6"]);
    }

    #[test]
    fn test_shares_exclude_nulls_and_sum_to_hundred() {
        let refs = vec![
            reference("A", Some("Russ"), 55.0, 37.0),
            reference("B", Some("Russ"), 55.1, 37.0),
            reference("C", Some("Gallery"), 55.2, 37.0),
            reference("D", None, 55.3, 37.0),
        ];
        let panel = panel_of(&refs, &[1.0; 4]);

        let operators = panel.shares(PanelAttribute::Operator, None);
        assert_eq!(operators[0].0, "Russ");
        assert!((operators[0].1 - 66.67).abs() < 1e-9);
        assert!((operators[1].1 - 33.33).abs() < 1e-9);

        let advertisers = panel.shares(PanelAttribute::Advertiser, Some(2));
        assert_eq!(advertisers.len(), 3);
        assert_eq!(advertisers[2].0, OTHER_BUCKET);
        let total: f64 = advertisers.iter().map(|(_, s)| s).sum();
        assert!((total - 100.0).abs() < 0.05);

        assert_eq!(render_shares(&operators), "Russ: 66.67%, Gallery: 33.33%");
    }

    #[test]
    fn test_empty_operator_is_a_value_not_a_null() {
        let refs = vec![
            reference("A", Some("Russ"), 55.0, 37.0),
            reference("B", Some(""), 55.1, 37.0),
            reference("C", None, 55.2, 37.0),
        ];
        let panel = panel_of(&refs, &[1.0; 3]);

        let operators = panel.shares(PanelAttribute::Operator, None);
        assert_eq!(operators, vec![("Russ".to_string(), 50.0), (String::new(), 50.0)]);
        assert_eq!(panel.composition(PanelAttribute::Operator, None), vec!["", "Russ"]);
    }

    #[test]
    fn test_describe_without_size() {
        let mut r = reference("A", None, 55.0, 37.0);
        r.size = None;
        let candidate = Candidate::new(&r, 1.0, 0.0, 1.0);
        assert_eq!(candidate.describe(), "BB -");
        assert_eq!(render_list(&["a".to_string(), "b".to_string()]), "a, b");
    }
}
