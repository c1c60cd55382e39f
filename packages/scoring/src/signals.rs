//! Boolean investment signals evaluated from tabular attributes.
//!
//! Each signal is independent; the motivation score and the opportunity
//! tags are both projections of the same [`Signals`] value.

use parcel_map_config::ScoringConfig;
use parcel_map_parcel_models::{OpportunityTag, ParcelAttributes};

use crate::property_type::has_improvements;

const ENTITY_MARKERS: &[&str] = &["LLC", "TRUST", "CORP", "CORPORATION", "INC", "ESTATE"];

/// The six signals behind the score and the tags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Signals {
    /// Tax due exceeds tax billed.
    pub tax_delinquent: bool,
    /// Owner mails from outside the parcel's jurisdiction.
    pub absentee_owner: bool,
    /// No positive improvement value.
    pub vacant_land: bool,
    /// Acreage above the large-lot threshold.
    pub large_lot: bool,
    /// Owner name carries an entity marker.
    pub entity_owned: bool,
    /// Market value per acre below the undervaluation threshold.
    pub potentially_undervalued: bool,
}

impl Signals {
    /// Evaluates every signal.
    #[must_use]
    pub fn evaluate(attrs: &ParcelAttributes, config: &ScoringConfig) -> Self {
        Self {
            tax_delinquent: matches!(
                (attrs.total_due, attrs.total_tax),
                (Some(due), Some(billed)) if due > billed
            ),
            absentee_owner: is_absentee(attrs, &config.home_state),
            vacant_land: !has_improvements(attrs),
            large_lot: attrs.acres.is_some_and(|a| a > config.large_lot_acres),
            entity_owned: attrs.owner.as_deref().is_some_and(is_entity_name),
            potentially_undervalued: matches!(
                (attrs.market_value, attrs.acres),
                (Some(value), Some(acres))
                    if value > 0.0 && acres > 0.0
                        && value / acres < config.undervalued_value_per_acre
            ),
        }
    }

    /// Tags for every signal that is set.
    pub fn tags(self) -> impl Iterator<Item = OpportunityTag> {
        OpportunityTag::all()
            .iter()
            .copied()
            .filter(move |tag| self.is_set(*tag))
    }

    /// Whether the signal behind `tag` is set.
    #[must_use]
    pub const fn is_set(self, tag: OpportunityTag) -> bool {
        match tag {
            OpportunityTag::TaxDelinquent => self.tax_delinquent,
            OpportunityTag::AbsenteeOwner => self.absentee_owner,
            OpportunityTag::VacantLand => self.vacant_land,
            OpportunityTag::LargeLot => self.large_lot,
            OpportunityTag::EntityOwned => self.entity_owned,
            OpportunityTag::PotentiallyUndervalued => self.potentially_undervalued,
        }
    }
}

/// Whole-word, case-insensitive entity marker check, so `"LINCOLN"` does
/// not read as `INC`.
#[must_use]
pub fn is_entity_name(owner: &str) -> bool {
    owner
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| ENTITY_MARKERS.iter().any(|m| word.eq_ignore_ascii_case(m)))
}

/// Absentee when the mailing state differs from the site state (or the
/// home state when the site state is unknown). With no parseable mailing
/// state, falls back to comparing cities when both are known.
#[must_use]
pub fn is_absentee(attrs: &ParcelAttributes, home_state: &str) -> bool {
    let site = attrs.site.as_ref();

    if let Some(mailing_state) = attrs.mailing_address.as_deref().and_then(mailing_state) {
        let jurisdiction = site
            .and_then(|s| s.state.as_deref())
            .map_or(home_state, str::trim);
        return !mailing_state.eq_ignore_ascii_case(jurisdiction);
    }

    match (
        attrs.mailing_city.as_deref().map(str::trim),
        site.and_then(|s| s.city.as_deref()).map(str::trim),
    ) {
        (Some(mailing), Some(site)) if !mailing.is_empty() && !site.is_empty() => {
            !mailing.eq_ignore_ascii_case(site)
        }
        _ => false,
    }
}

/// Extracts a two-letter state from `"STREET, CITY, ST 12345"`-style
/// mailing addresses. Also accepts `"... CITY ST 12345"` with no comma.
#[must_use]
pub fn mailing_state(address: &str) -> Option<String> {
    let last = address.rsplit(',').next()?.trim();
    let tokens: Vec<&str> = last.split_whitespace().collect();

    let is_state = |t: &str| t.len() == 2 && t.chars().all(|c| c.is_ascii_alphabetic());
    let is_zip = |t: &str| t.len() >= 5 && t.chars().take(5).all(|c| c.is_ascii_digit());

    if address.contains(',') {
        if let Some(first) = tokens.first() {
            if is_state(first) {
                return Some(first.to_uppercase());
            }
        }
    }

    tokens
        .windows(2)
        .rev()
        .find(|pair| is_state(pair[0]) && is_zip(pair[1]))
        .map(|pair| pair[0].to_uppercase())
}

#[cfg(test)]
mod tests {
    use parcel_map_parcel_models::SiteAddress;

    use super::*;

    fn with_mailing(address: &str, site_state: Option<&str>) -> ParcelAttributes {
        ParcelAttributes {
            mailing_address: Some(address.to_string()),
            site: site_state.map(|s| SiteAddress {
                address: "1 MAIN ST".to_string(),
                state: Some(s.to_string()),
                ..SiteAddress::default()
            }),
            ..ParcelAttributes::default()
        }
    }

    #[test]
    fn parses_mailing_state() {
        assert_eq!(mailing_state("PO BOX 1, DALLAS, TX 75201").as_deref(), Some("TX"));
        assert_eq!(mailing_state("12 ELM, DENVER, co 80202-1234").as_deref(), Some("CO"));
        assert_eq!(mailing_state("12 ELM ST DENVER CO 80202").as_deref(), Some("CO"));
        assert_eq!(mailing_state("12 ELM ST"), None);
        assert_eq!(mailing_state(""), None);
    }

    #[test]
    fn out_of_state_owner_is_absentee() {
        assert!(is_absentee(&with_mailing("1 A ST, DENVER, CO 80202", None), "TX"));
        assert!(!is_absentee(&with_mailing("1 A ST, DALLAS, TX 75201", None), "TX"));
    }

    #[test]
    fn site_state_takes_precedence_over_home_state() {
        assert!(!is_absentee(&with_mailing("1 A ST, TULSA, OK 74101", Some("OK")), "TX"));
        assert!(is_absentee(&with_mailing("1 A ST, DALLAS, TX 75201", Some("OK")), "TX"));
    }

    #[test]
    fn city_fallback_when_state_is_unknown() {
        let mut attrs = ParcelAttributes {
            mailing_address: Some("PO BOX 9".to_string()),
            mailing_city: Some("Houston".to_string()),
            site: Some(SiteAddress {
                address: "1 MAIN ST".to_string(),
                city: Some("AUSTIN".to_string()),
                ..SiteAddress::default()
            }),
            ..ParcelAttributes::default()
        };
        assert!(is_absentee(&attrs, "TX"));
        attrs.mailing_city = Some("austin".to_string());
        assert!(!is_absentee(&attrs, "TX"));
        attrs.mailing_city = None;
        assert!(!is_absentee(&attrs, "TX"));
    }

    #[test]
    fn entity_markers_match_whole_words() {
        assert!(is_entity_name("Smith Family Trust"));
        assert!(is_entity_name("ACME HOLDINGS, L.L.C. / ACME LLC"));
        assert!(is_entity_name("Estate of J. Doe"));
        assert!(!is_entity_name("LINCOLN PROPERTIES"));
        assert!(!is_entity_name("TRUSTY MCTRUSTFACE"));
    }

    #[test]
    fn undervalued_requires_market_value_and_acres() {
        let config = ScoringConfig::default();
        let mut attrs = ParcelAttributes {
            market_value: Some(50_000.0),
            acres: Some(2.0),
            ..ParcelAttributes::default()
        };
        assert!(Signals::evaluate(&attrs, &config).potentially_undervalued);
        attrs.acres = Some(1.0);
        assert!(!Signals::evaluate(&attrs, &config).potentially_undervalued);
        attrs.acres = Some(0.0);
        assert!(!Signals::evaluate(&attrs, &config).potentially_undervalued);
        attrs.acres = Some(5.0);
        attrs.market_value = None;
        assert!(!Signals::evaluate(&attrs, &config).potentially_undervalued);
    }

    #[test]
    fn delinquency_needs_both_tax_amounts() {
        let config = ScoringConfig::default();
        let attrs = ParcelAttributes {
            total_due: Some(10.0),
            ..ParcelAttributes::default()
        };
        assert!(!Signals::evaluate(&attrs, &config).tax_delinquent);
    }
}
