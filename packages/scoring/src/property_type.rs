//! Property use classification.
//!
//! An assessor state code, when present and recognized, decides the type
//! from its first letter. Otherwise a rule cascade runs in fixed priority
//! order: no improvement value means vacant land, then legal description
//! keywords, then residential.

use parcel_map_parcel_models::{ParcelAttributes, PropertyType};

/// Classifies a parcel from its tabular attributes.
#[must_use]
pub fn classify_property_type(attrs: &ParcelAttributes) -> PropertyType {
    if let Some(property_type) = attrs.state_code.as_deref().and_then(from_state_code) {
        return property_type;
    }

    if !has_improvements(attrs) {
        return PropertyType::VacantLand;
    }

    attrs
        .legal_description
        .as_deref()
        .and_then(from_legal_description)
        .unwrap_or(PropertyType::Residential)
}

/// Improvement value is present and positive.
#[must_use]
pub fn has_improvements(attrs: &ParcelAttributes) -> bool {
    attrs.improvement_value.is_some_and(|v| v > 0.0)
}

/// Maps an assessor state code by its first letter. `A0` is the
/// residential-vacant code and is grouped with `C`.
#[must_use]
pub fn from_state_code(code: &str) -> Option<PropertyType> {
    let code = code.trim().to_uppercase();
    if code == "A0" {
        return Some(PropertyType::VacantLand);
    }

    match code.chars().next()? {
        'A' => Some(PropertyType::Residential),
        'B' => Some(PropertyType::MultiFamily),
        'C' => Some(PropertyType::VacantLand),
        'D' => Some(PropertyType::Agricultural),
        'E' => Some(PropertyType::Industrial),
        'F' => Some(PropertyType::Commercial),
        'M' => Some(PropertyType::MobileHome),
        'G' | 'J' | 'L' => Some(PropertyType::SpecialPurpose),
        _ => None,
    }
}

fn from_legal_description(desc: &str) -> Option<PropertyType> {
    let upper = desc.to_uppercase();
    let words: Vec<&str> = upper
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    // ── Non-residential ─────────────────────────────────────────────
    if contains_any(&upper, &["MIXED USE", "MIXED-USE"]) {
        return Some(PropertyType::MixedUse);
    }
    if contains_any(&upper, &["COMMERCIAL", "RETAIL", "OFFICE", "SHOPPING"]) {
        return Some(PropertyType::Commercial);
    }
    if contains_any(&upper, &["INDUSTRIAL", "WAREHOUSE", "MANUFACTUR"]) {
        return Some(PropertyType::Industrial);
    }

    // ── Residential variants ────────────────────────────────────────
    if contains_any(
        &upper,
        &["MULTIFAMILY", "MULTI-FAMILY", "APARTMENT", "DUPLEX", "TRIPLEX", "FOURPLEX"],
    ) || has_word(&words, &["APTS"])
    {
        return Some(PropertyType::MultiFamily);
    }
    if upper.contains("CONDO") || has_word(&words, &["UNIT"]) {
        return Some(PropertyType::Condo);
    }
    if contains_any(&upper, &["MOBILE HOME", "MANUFACTURED HOME"]) || has_word(&words, &["MH"]) {
        return Some(PropertyType::MobileHome);
    }

    None
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

fn has_word(words: &[&str], needles: &[&str]) -> bool {
    words.iter().any(|w| needles.contains(w))
}
