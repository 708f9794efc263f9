use crate::core::size::{dimensions_within, parse_size};
use crate::models::{LineItem, ReferenceConstruction};

/// A reference row that survived the pre-pass, with its derived columns
#[derive(Debug, Clone, Copy)]
pub struct PoolEntry<'a> {
    pub reference: &'a ReferenceConstruction,
    pub base_price: f64,
    /// Parsed `(width, height)`, `None` when the size is absent or unparsable
    pub dimensions: Option<(f64, f64)>,
    pub is_digital: bool,
}

impl<'a> PoolEntry<'a> {
    /// Wrap a reference row; `None` when it has no usable base price
    pub fn new(reference: &'a ReferenceConstruction) -> Option<Self> {
        let base_price = reference.base_price.filter(|p| *p > 0.0 && p.is_finite())?;
        Some(Self {
            reference,
            base_price,
            dimensions: reference.size.as_deref().and_then(parse_size),
            is_digital: reference.is_digital(),
        })
    }
}

/// How the pool is segmented by operator for one line item
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatorSegment<'a> {
    /// No top operators configured for the subject
    Any,
    /// The row's operator is a top operator: keep only that operator
    Only(&'a str),
    /// The row's operator is not a top operator: drop every top operator
    ExcludeTop(&'a [String]),
}

impl<'a> OperatorSegment<'a> {
    pub fn for_item(operator: Option<&'a str>, top_operators: &'a [String]) -> Self {
        if top_operators.is_empty() {
            return Self::Any;
        }
        match operator {
            Some(op) if top_operators.iter().any(|top| top == op) => Self::Only(op),
            _ => Self::ExcludeTop(top_operators),
        }
    }
}

/// Check the candidate's digital flag against the row's
#[inline]
pub fn matches_digital(entry: &PoolEntry, is_digital: bool) -> bool {
    entry.is_digital == is_digital
}

/// Check the candidate's size against the row's parsed size
///
/// A row without a parseable size accepts every candidate. Otherwise the
/// candidate needs a parsed size within `tolerance` on both dimensions.
#[inline]
pub fn matches_size(entry: &PoolEntry, target: Option<(f64, f64)>, tolerance: f64) -> bool {
    match target {
        None => true,
        Some(target) => entry
            .dimensions
            .map(|candidate| dimensions_within(target, candidate, tolerance))
            .unwrap_or(false),
    }
}

/// Check the candidate's operator against the row's segment
///
/// Candidates without an operator never pass an active segment.
#[inline]
pub fn matches_operator(entry: &PoolEntry, segment: &OperatorSegment) -> bool {
    let operator = entry.reference.operator.as_deref();
    match segment {
        OperatorSegment::Any => true,
        OperatorSegment::Only(target) => operator == Some(*target),
        OperatorSegment::ExcludeTop(top) => match operator {
            Some(op) => !top.iter().any(|t| t == op),
            None => false,
        },
    }
}

/// Check the candidate lies in the row's subject
///
/// A row without a subject code matches nothing.
#[inline]
pub fn matches_subject(entry: &PoolEntry, subject_code: Option<&str>) -> bool {
    match subject_code {
        Some(code) => entry.reference.subject_code.as_deref() == Some(code),
        None => false,
    }
}

#[inline]
pub fn matches_mf(entry: &PoolEntry) -> bool {
    entry.reference.is_mf()
}

/// Check the radius and the absolute price tolerance together
#[inline]
pub fn within_radius_and_price(
    distance_km: f64,
    radius_km: f64,
    candidate_price: f64,
    row_price: f64,
    price_tolerance_abs: f64,
) -> bool {
    distance_km <= radius_km && (candidate_price - row_price).abs() <= price_tolerance_abs
}

/// Level filters shared by every search pass: digital flag, size, and
/// the optional operator segment
pub fn matches_level(
    entry: &PoolEntry,
    item: &LineItem,
    target_size: Option<(f64, f64)>,
    size_tolerance: f64,
    segment: Option<&OperatorSegment>,
) -> bool {
    if !matches_digital(entry, item.is_digital()) {
        return false;
    }
    if !matches_size(entry, target_size, size_tolerance) {
        return false;
    }
    match segment {
        Some(segment) => matches_operator(entry, segment),
        None => true,
    }
}
