//! Conversion between `GeoJSON` features and [`Parcel`] records.
//!
//! Source exports name the same column several ways depending on the
//! county and the export tool (`Prop_ID` vs `PROP_ID` vs `id`, `imprv_val`
//! vs `impValue`, ...). Reading accepts every known alias; writing always
//! uses the canonical camelCase keys.

use chrono::{DateTime, Utc};
use geojson::{Feature, FeatureCollection, JsonObject, JsonValue, feature::Id};
use parcel_map_parcel_models::{
    BoundingBox, DerivedAttributes, Enrichment, LngLat, Parcel, ParcelAttributes, ParcelGeometry,
    SiteAddress,
};

use crate::projection::CoordinateSystem;
use crate::{GeometryError, centroid, envelope, normalize};

const ID_KEYS: &[&str] = &["id", "parcelId", "Prop_ID", "PROP_ID", "prop_id"];
const OWNER_KEYS: &[&str] = &["owner", "OWNER_NAME", "ownerName", "py_owner_name"];
const MAILING_ADDRESS_KEYS: &[&str] = &["mailingAddress", "mailingAddr", "MAIL_ADDR", "address"];
const MAILING_CITY_KEYS: &[&str] = &["mailingCity", "MAIL_CITY", "mail_city"];
const ASSESSED_KEYS: &[&str] = &["assessedValue", "assessed_val", "ASSESSED_VAL"];
const MARKET_KEYS: &[&str] = &["marketValue", "mktValue", "market_value", "market_val"];
const LAND_KEYS: &[&str] = &["landValue", "land_val", "LAND_VAL"];
const IMPROVEMENT_KEYS: &[&str] = &["improvementValue", "impValue", "imprv_val", "IMPRV_VAL"];
const ACRES_KEYS: &[&str] = &["acres", "ACRES", "legal_acreage"];
const TOTAL_TAX_KEYS: &[&str] = &["totalTax", "total_tax"];
const TOTAL_DUE_KEYS: &[&str] = &["totalDue", "total_due"];
const LEGAL_KEYS: &[&str] = &["legalDescription", "legalDesc", "legal_desc", "LEGAL_DESC"];
const YEAR_BUILT_KEYS: &[&str] = &["yearBuilt", "year_built", "YR_BUILT"];
const STATE_CODE_KEYS: &[&str] = &["stateCode", "state_cd", "STATE_CD"];
const SITE_ADDRESS_KEYS: &[&str] = &["siteAddress", "SITUS_ADDR", "situs_address"];
const SITE_CITY_KEYS: &[&str] = &["siteCity", "SITUS_CITY", "situs_city"];
const SITE_STATE_KEYS: &[&str] = &["siteState", "SITUS_STAT", "SITUS_STATE", "situs_state"];
const SITE_ZIP_KEYS: &[&str] = &["siteZip", "SITUS_ZIP", "situs_zip"];
const CRS_KEYS: &[&str] = &["crs", "srid"];

/// A parsed feature: everything a [`Parcel`] has except the derived
/// attributes, which belong to the scoring engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ParcelFeature {
    /// Parcel identifier.
    pub id: String,
    /// Normalized WGS84 geometry.
    pub geometry: ParcelGeometry,
    /// Vertex-mean centroid.
    pub centroid: LngLat,
    /// Geometry envelope.
    pub bbox: BoundingBox,
    /// Typed tabular attributes.
    pub attributes: ParcelAttributes,
}

impl ParcelFeature {
    /// Attaches derived attributes, producing a complete [`Parcel`].
    #[must_use]
    pub fn into_parcel(self, derived: DerivedAttributes) -> Parcel {
        Parcel {
            id: self.id,
            geometry: self.geometry,
            centroid: self.centroid,
            bbox: self.bbox,
            attributes: self.attributes,
            derived,
        }
    }
}

/// Reads a collection-level CRS annotation (the `GeoJSON` 2008 `crs`
/// member), if any.
#[must_use]
pub fn collection_crs(collection: &FeatureCollection) -> Option<CoordinateSystem> {
    collection
        .foreign_members
        .as_ref()
        .and_then(|members| members.get("crs"))
        .and_then(CoordinateSystem::from_annotation)
}

/// Parses one feature into a [`ParcelFeature`].
///
/// A `crs`/`srid` property on the feature takes precedence over
/// `collection_crs`. Attribute values that cannot be interpreted become
/// `None`; only identity and geometry problems are errors.
///
/// # Errors
///
/// * [`GeometryError::MissingId`] if neither the feature id nor any id
///   property is usable
/// * [`GeometryError::MalformedGeometry`] if the geometry is missing,
///   unsupported, or invalid after normalization
pub fn parse_feature(
    feature: &Feature,
    collection_crs: Option<CoordinateSystem>,
) -> Result<ParcelFeature, GeometryError> {
    let empty = JsonObject::new();
    let props = feature.properties.as_ref().unwrap_or(&empty);

    let id = feature
        .id
        .as_ref()
        .and_then(|id| match id {
            Id::String(s) => non_blank(s),
            Id::Number(n) => Some(n.to_string()),
        })
        .or_else(|| text(props, ID_KEYS))
        .ok_or(GeometryError::MissingId)?;

    let Some(source_geometry) = feature.geometry.as_ref() else {
        return Err(GeometryError::MalformedGeometry {
            parcel_id: id,
            message: "feature has no geometry".to_string(),
        });
    };

    let raw: geo::Geometry<f64> =
        source_geometry
            .clone()
            .try_into()
            .map_err(|e: geojson::Error| GeometryError::MalformedGeometry {
                parcel_id: id.clone(),
                message: e.to_string(),
            })?;

    let crs = first(props, CRS_KEYS)
        .and_then(CoordinateSystem::from_annotation)
        .or(collection_crs);

    let geometry = normalize(&id, raw, crs)?;
    let attributes = parse_attributes(&id, props);

    Ok(ParcelFeature {
        centroid: centroid(&geometry),
        bbox: envelope(&geometry),
        id,
        geometry,
        attributes,
    })
}

fn parse_attributes(id: &str, props: &JsonObject) -> ParcelAttributes {
    let site = text(props, SITE_ADDRESS_KEYS).map(|address| SiteAddress {
        address,
        city: text(props, SITE_CITY_KEYS),
        state: text(props, SITE_STATE_KEYS).map(|s| s.to_uppercase()),
        zip: text(props, SITE_ZIP_KEYS),
    });

    let enrichment = match (
        text(props, &["enrichedAt"]),
        text(props, &["enrichmentSource"]),
    ) {
        (Some(at), Some(source)) => match DateTime::parse_from_rfc3339(&at) {
            Ok(at) => Some(Enrichment {
                enriched_at: at.with_timezone(&Utc),
                source,
            }),
            Err(e) => {
                log::debug!("Parcel {id}: ignoring enrichedAt {at:?}: {e}");
                None
            }
        },
        _ => None,
    };

    let year_built = number(id, props, YEAR_BUILT_KEYS)
        .filter(|y| *y >= 1.0 && *y <= 9999.0)
        .map(|y| {
            #[allow(clippy::cast_possible_truncation)]
            let y = y as i32;
            y
        });

    ParcelAttributes {
        owner: text(props, OWNER_KEYS),
        mailing_address: text(props, MAILING_ADDRESS_KEYS),
        mailing_city: text(props, MAILING_CITY_KEYS),
        site,
        assessed_value: number(id, props, ASSESSED_KEYS),
        market_value: number(id, props, MARKET_KEYS),
        land_value: number(id, props, LAND_KEYS),
        improvement_value: number(id, props, IMPROVEMENT_KEYS),
        acres: number(id, props, ACRES_KEYS),
        total_tax: number(id, props, TOTAL_TAX_KEYS),
        total_due: number(id, props, TOTAL_DUE_KEYS),
        legal_description: text(props, LEGAL_KEYS),
        year_built,
        state_code: text(props, STATE_CODE_KEYS).map(|s| s.to_uppercase()),
        enrichment,
    }
}

/// First non-null value under any of `keys`.
fn first<'a>(props: &'a JsonObject, keys: &[&str]) -> Option<&'a JsonValue> {
    keys.iter()
        .filter_map(|key| props.get(*key))
        .find(|value| !value.is_null())
}

fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn text(props: &JsonObject, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| props.get(*key))
        .find_map(|value| match value {
            JsonValue::String(s) => non_blank(s),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// Reads a numeric attribute. Strings such as `"$1,250,000"` are
/// accepted; anything else that fails to parse is dropped.
fn number(id: &str, props: &JsonObject, keys: &[&str]) -> Option<f64> {
    let value = first(props, keys)?;
    let parsed = match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| !matches!(c, ',' | '$' | ' '))
                .collect();
            if cleaned.is_empty() {
                return None;
            }
            cleaned.parse::<f64>().ok()
        }
        _ => None,
    };

    match parsed {
        Some(v) if v.is_finite() => Some(v),
        _ => {
            log::debug!("Parcel {id}: unparseable numeric value {value} for {keys:?}");
            None
        }
    }
}

/// Serializes a parcel as a `GeoJSON` feature with canonical property
/// names. Derived attributes are written for consumers but are never read
/// back as truth.
#[must_use]
pub fn parcel_to_feature(parcel: &Parcel) -> Feature {
    let geometry = match &parcel.geometry {
        ParcelGeometry::Polygon(multi) if multi.0.len() == 1 => {
            geojson::Value::from(&multi.0[0])
        }
        ParcelGeometry::Polygon(multi) => geojson::Value::from(multi),
        ParcelGeometry::Point(point) => geojson::Value::from(point),
    };

    let a = &parcel.attributes;
    let mut props = JsonObject::new();
    put(&mut props, "owner", a.owner.clone());
    put(&mut props, "mailingAddress", a.mailing_address.clone());
    put(&mut props, "mailingCity", a.mailing_city.clone());
    if let Some(site) = &a.site {
        put(&mut props, "siteAddress", Some(site.address.clone()));
        put(&mut props, "siteCity", site.city.clone());
        put(&mut props, "siteState", site.state.clone());
        put(&mut props, "siteZip", site.zip.clone());
    }
    put(&mut props, "assessedValue", a.assessed_value);
    put(&mut props, "marketValue", a.market_value);
    put(&mut props, "landValue", a.land_value);
    put(&mut props, "improvementValue", a.improvement_value);
    put(&mut props, "acres", a.acres);
    put(&mut props, "totalTax", a.total_tax);
    put(&mut props, "totalDue", a.total_due);
    put(&mut props, "legalDescription", a.legal_description.clone());
    put(&mut props, "yearBuilt", a.year_built);
    put(&mut props, "stateCode", a.state_code.clone());
    if let Some(enrichment) = &a.enrichment {
        put(&mut props, "enrichedAt", Some(enrichment.enriched_at.to_rfc3339()));
        put(&mut props, "enrichmentSource", Some(enrichment.source.clone()));
    }

    props.insert(
        "centroid".to_string(),
        serde_json::json!([parcel.centroid.lng, parcel.centroid.lat]),
    );

    let d = &parcel.derived;
    props.insert(
        "propertyType".to_string(),
        JsonValue::String(d.property_type.to_string()),
    );
    props.insert("motivationScore".to_string(), d.motivation_score.into());
    props.insert(
        "opportunityTags".to_string(),
        JsonValue::Array(
            d.opportunity_tags
                .iter()
                .map(|t| JsonValue::String(t.to_string()))
                .collect(),
        ),
    );
    props.insert("isVacant".to_string(), d.is_vacant.into());
    props.insert("isAbsentee".to_string(), d.is_absentee.into());
    props.insert("isTaxDelinquent".to_string(), d.is_tax_delinquent.into());

    let b = parcel.bbox;
    Feature {
        bbox: b.is_well_formed().then(|| vec![b.west, b.south, b.east, b.north]),
        geometry: Some(geojson::Geometry::new(geometry)),
        id: Some(Id::String(parcel.id.clone())),
        properties: Some(props),
        foreign_members: None,
    }
}

fn put<T: Into<JsonValue>>(props: &mut JsonObject, key: &str, value: Option<T>) {
    if let Some(value) = value {
        props.insert(key.to_string(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use parcel_map_parcel_models::{OpportunityTag, PropertyType};
    use serde_json::json;

    use super::*;
    use crate::projection::to_web_mercator;

    fn feature(value: serde_json::Value) -> Feature {
        serde_json::from_value(value).unwrap()
    }

    fn derived() -> DerivedAttributes {
        DerivedAttributes {
            property_type: PropertyType::VacantLand,
            motivation_score: 95,
            opportunity_tags: BTreeSet::from([OpportunityTag::VacantLand, OpportunityTag::LargeLot]),
            is_vacant: true,
            is_absentee: false,
            is_tax_delinquent: true,
        }
    }

    fn square_coords() -> serde_json::Value {
        json!([[[-97.75, 30.25], [-97.74, 30.25], [-97.74, 30.26], [-97.75, 30.26], [-97.75, 30.25]]])
    }

    #[test]
    fn parses_county_export_aliases() {
        let parsed = parse_feature(
            &feature(json!({
                "type": "Feature",
                "geometry": { "type": "Polygon", "coordinates": square_coords() },
                "properties": {
                    "PROP_ID": 123_456,
                    "OWNER_NAME": "SMITH FAMILY TRUST",
                    "MAIL_ADDR": "PO BOX 1, DALLAS, TX 75201",
                    "imprv_val": "0",
                    "market_val": "1,250,000",
                    "land_val": null,
                    "state_cd": "c1",
                    "SITUS_ADDR": "100 MAIN ST",
                    "SITUS_CITY": "AUSTIN",
                    "yearBuilt": 0
                }
            })),
            None,
        )
        .unwrap();

        assert_eq!(parsed.id, "123456");
        let a = &parsed.attributes;
        assert_eq!(a.owner.as_deref(), Some("SMITH FAMILY TRUST"));
        assert_eq!(a.mailing_address.as_deref(), Some("PO BOX 1, DALLAS, TX 75201"));
        assert_eq!(a.improvement_value, Some(0.0));
        assert_eq!(a.market_value, Some(1_250_000.0));
        assert_eq!(a.land_value, None);
        assert_eq!(a.state_code.as_deref(), Some("C1"));
        assert_eq!(a.year_built, None);
        let site = a.site.as_ref().unwrap();
        assert_eq!(site.address, "100 MAIN ST");
        assert_eq!(site.city.as_deref(), Some("AUSTIN"));
        assert!((parsed.centroid.lng - -97.745).abs() < 1e-9);
    }

    #[test]
    fn unparseable_numbers_become_none() {
        let parsed = parse_feature(
            &feature(json!({
                "type": "Feature",
                "id": "p1",
                "geometry": { "type": "Point", "coordinates": [-97.7, 30.3] },
                "properties": { "acres": "about two", "totalDue": "" }
            })),
            None,
        )
        .unwrap();
        assert_eq!(parsed.attributes.acres, None);
        assert_eq!(parsed.attributes.total_due, None);
    }

    #[test]
    fn missing_id_is_an_error() {
        let err = parse_feature(
            &feature(json!({
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [-97.7, 30.3] },
                "properties": { "owner": "X" }
            })),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, GeometryError::MissingId));
    }

    #[test]
    fn missing_geometry_is_malformed() {
        let err = parse_feature(
            &feature(json!({
                "type": "Feature",
                "id": "p1",
                "geometry": null,
                "properties": {}
            })),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, GeometryError::MalformedGeometry { parcel_id, .. } if parcel_id == "p1"));
    }

    #[test]
    fn srid_property_triggers_reprojection() {
        let (x, y) = to_web_mercator(LngLat::new(-97.7, 30.3));
        let parsed = parse_feature(
            &feature(json!({
                "type": "Feature",
                "id": "p1",
                "geometry": { "type": "Point", "coordinates": [x, y] },
                "properties": { "srid": 3857 }
            })),
            Some(CoordinateSystem::Geographic),
        )
        .unwrap();
        assert!((parsed.centroid.lng - -97.7).abs() < 1e-9);
        assert!((parsed.centroid.lat - 30.3).abs() < 1e-9);
    }

    #[test]
    fn written_feature_reads_back_with_same_attributes() {
        let mut parsed = parse_feature(
            &feature(json!({
                "type": "Feature",
                "id": "p1",
                "geometry": { "type": "Polygon", "coordinates": square_coords() },
                "properties": {
                    "owner": "Smith Family Trust",
                    "totalDue": 500,
                    "totalTax": 300,
                    "acres": 2.0,
                    "SITUS_STAT": "tx",
                    "SITUS_ADDR": "1 ELM ST"
                }
            })),
            None,
        )
        .unwrap();
        parsed.attributes.enrichment = Some(Enrichment {
            enriched_at: DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
                .unwrap()
                .with_timezone(&Utc),
            source: "ADDRESS_POINTS".to_string(),
        });

        let parcel = parsed.clone().into_parcel(derived());
        let written = parcel_to_feature(&parcel);

        assert!(matches!(
            written.geometry.as_ref().unwrap().value,
            geojson::Value::Polygon(_)
        ));
        let props = written.properties.as_ref().unwrap();
        assert_eq!(props["motivationScore"], json!(95));
        assert_eq!(props["opportunityTags"], json!(["vacant-land", "large-lot"]));
        assert_eq!(props["siteState"], json!("TX"));

        let reread = parse_feature(&written, None).unwrap();
        assert_eq!(reread, parsed);
    }

    #[test]
    fn reads_collection_crs_member() {
        let collection: FeatureCollection = serde_json::from_value(json!({
            "type": "FeatureCollection",
            "crs": { "type": "name", "properties": { "name": "EPSG:3857" } },
            "features": []
        }))
        .unwrap();
        assert_eq!(collection_crs(&collection), Some(CoordinateSystem::WebMercator));
    }
}
