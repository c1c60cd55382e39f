#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Derived attribute engine.
//!
//! Pure functions from [`ParcelAttributes`] to [`DerivedAttributes`]: a
//! property type, a 0-100 motivated-seller score, and the set of
//! opportunity tags. No I/O and no state, so derived values can be
//! recomputed whenever tabular attributes change.

pub mod property_type;
pub mod signals;

use parcel_map_config::ScoringConfig;
use parcel_map_parcel_models::{DerivedAttributes, OpportunityTag, ParcelAttributes};

pub use property_type::classify_property_type;
pub use signals::Signals;

/// Score every parcel starts from.
pub const BASE_SCORE: i32 = 50;

/// Additive score weight of each signal.
#[must_use]
pub const fn weight(tag: OpportunityTag) -> i32 {
    match tag {
        OpportunityTag::TaxDelinquent => 25,
        OpportunityTag::AbsenteeOwner => 15,
        OpportunityTag::VacantLand | OpportunityTag::PotentiallyUndervalued => 10,
        OpportunityTag::LargeLot | OpportunityTag::EntityOwned => 5,
    }
}

/// A signal that contributed to a score, for explaining it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreFactor {
    /// The signal.
    pub tag: OpportunityTag,
    /// Points it added.
    pub points: i32,
}

/// Score plus the factors that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreBreakdown {
    /// Starting score.
    pub base: i32,
    /// Every signal that fired, in tag order.
    pub factors: Vec<ScoreFactor>,
    /// Final clamped score.
    pub score: u8,
}

/// Scores a parcel and reports which signals contributed.
#[must_use]
pub fn explain_score(attrs: &ParcelAttributes, config: &ScoringConfig) -> ScoreBreakdown {
    let signals = Signals::evaluate(attrs, config);
    let factors: Vec<ScoreFactor> = signals
        .tags()
        .map(|tag| ScoreFactor {
            tag,
            points: weight(tag),
        })
        .collect();

    ScoreBreakdown {
        base: BASE_SCORE,
        score: clamp_score(BASE_SCORE + factors.iter().map(|f| f.points).sum::<i32>()),
        factors,
    }
}

/// Motivated-seller score in `0..=100`.
#[must_use]
pub fn motivation_score(signals: Signals) -> u8 {
    clamp_score(BASE_SCORE + signals.tags().map(weight).sum::<i32>())
}

fn clamp_score(raw: i32) -> u8 {
    u8::try_from(raw.clamp(0, 100)).unwrap_or(100)
}

/// Computes every derived attribute for a parcel.
#[must_use]
pub fn derive(attrs: &ParcelAttributes, config: &ScoringConfig) -> DerivedAttributes {
    let signals = Signals::evaluate(attrs, config);
    let property_type = classify_property_type(attrs);

    log::trace!("Derived {property_type} with signals {signals:?}");

    DerivedAttributes {
        property_type,
        motivation_score: motivation_score(signals),
        opportunity_tags: signals.tags().collect(),
        is_vacant: signals.vacant_land,
        is_absentee: signals.absentee_owner,
        is_tax_delinquent: signals.tax_delinquent,
    }
}
