//! Attribute filters applied to viewport results.

use std::collections::BTreeSet;

use parcel_map_parcel_models::{OpportunityTag, Parcel, PropertyType};

use crate::ViewportError;

/// Attribute criteria a parcel must meet to count toward a viewport
/// result. Every field is optional; the default filter accepts all.
///
/// Value and acreage bounds are inclusive. A parcel with no market value
/// or no acreage passes the corresponding range, since an unknown value
/// is not evidence against it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewportFilter {
    /// Accepted property types. Empty accepts every type.
    pub property_types: BTreeSet<PropertyType>,
    /// Tags the parcel must carry, all of them.
    pub tags: BTreeSet<OpportunityTag>,
    /// Minimum market value.
    pub min_market_value: Option<f64>,
    /// Maximum market value.
    pub max_market_value: Option<f64>,
    /// Minimum lot size in acres.
    pub min_acres: Option<f64>,
    /// Maximum lot size in acres.
    pub max_acres: Option<f64>,
    /// Require (or exclude) tax-delinquent parcels.
    pub tax_delinquent: Option<bool>,
    /// Require (or exclude) absentee-owned parcels.
    pub absentee: Option<bool>,
    /// Only parcels that are tax delinquent or vacant.
    pub distressed: bool,
    /// Minimum motivation score.
    pub min_score: Option<u8>,
    /// ZIP code, matched against the site ZIP or, failing that, the
    /// owner's mailing address.
    pub zip: Option<String>,
}

impl ViewportFilter {
    /// Whether this filter accepts every parcel.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Rejects non-finite or negative bounds and inverted ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ViewportError::InvalidQuery`] naming the bad range.
    pub fn validate(&self) -> Result<(), ViewportError> {
        check_range("market value", self.min_market_value, self.max_market_value)?;
        check_range("acres", self.min_acres, self.max_acres)?;
        if self.zip.as_deref().is_some_and(|z| z.trim().is_empty()) {
            return Err(ViewportError::invalid("zip filter must not be blank"));
        }
        Ok(())
    }

    /// Whether `parcel` meets every criterion.
    #[must_use]
    pub fn matches(&self, parcel: &Parcel) -> bool {
        let attrs = &parcel.attributes;
        let derived = &parcel.derived;

        if !self.property_types.is_empty() && !self.property_types.contains(&derived.property_type) {
            return false;
        }
        if !self.tags.is_subset(&derived.opportunity_tags) {
            return false;
        }
        if !within(attrs.market_value, self.min_market_value, self.max_market_value)
            || !within(attrs.acres, self.min_acres, self.max_acres)
        {
            return false;
        }
        if self.tax_delinquent.is_some_and(|want| want != derived.is_tax_delinquent)
            || self.absentee.is_some_and(|want| want != derived.is_absentee)
        {
            return false;
        }
        if self.distressed && !(derived.is_tax_delinquent || derived.is_vacant) {
            return false;
        }
        if self.min_score.is_some_and(|min| derived.motivation_score < min) {
            return false;
        }

        self.zip.as_deref().is_none_or(|zip| {
            let zip = zip.trim();
            match attrs.site.as_ref().and_then(|s| s.zip.as_deref()) {
                Some(site_zip) => site_zip.starts_with(zip),
                None => attrs.mailing_address.as_deref().is_some_and(|m| m.contains(zip)),
            }
        })
    }
}

fn within(value: Option<f64>, min: Option<f64>, max: Option<f64>) -> bool {
    let Some(value) = value else {
        return true;
    };
    min.is_none_or(|min| value >= min) && max.is_none_or(|max| value <= max)
}

fn check_range(name: &str, min: Option<f64>, max: Option<f64>) -> Result<(), ViewportError> {
    for bound in [min, max].into_iter().flatten() {
        if !bound.is_finite() || bound < 0.0 {
            return Err(ViewportError::invalid(format!(
                "{name} bound {bound} must be a finite, non-negative number"
            )));
        }
    }
    if let (Some(min), Some(max)) = (min, max)
        && min > max
    {
        return Err(ViewportError::invalid(format!(
            "{name} range {min}..{max} is inverted"
        )));
    }
    Ok(())
}
