use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseFailure;

/// Joins `source` and `source_id` into a listing id.
pub const ID_SEPARATOR: char = '-';

/// Stable identifier for an upstream listing. The same `(source, source_id)`
/// pair always yields the same id, whichever acquisition path produced it.
pub fn listing_id(source: &str, source_id: &str) -> String {
    format!("{source}{ID_SEPARATOR}{source_id}")
}

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListingType {
    Sale,
    Rent,
    NewBuilding,
}

impl ListingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingType::Sale => "sale",
            ListingType::Rent => "rent",
            ListingType::NewBuilding => "new-building",
        }
    }
}

impl fmt::Display for ListingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sale" => Ok(ListingType::Sale),
            "rent" => Ok(ListingType::Rent),
            "new-building" | "new_building" => Ok(ListingType::NewBuilding),
            other => Err(format!(
                "unknown listing type '{other}' (expected sale, rent, or new-building)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubCategory {
    Apartment,
    House,
    Commerce,
    Plot,
}

impl SubCategory {
    /// Guess the property kind from keywords in a title (Spanish or English).
    pub fn guess(title: &str) -> Option<Self> {
        const APARTMENT: &[&str] = &[
            "piso", "apartamento", "ático", "atico", "estudio", "dúplex", "duplex",
            "apartment", "flat", "penthouse", "studio",
        ];
        const HOUSE: &[&str] = &[
            "casa", "chalet", "villa", "adosado", "pareado", "finca", "house", "bungalow",
        ];
        const COMMERCE: &[&str] = &[
            "local", "oficina", "nave", "comercial", "office", "shop", "commercial",
        ];
        const PLOT: &[&str] = &["terreno", "parcela", "solar", "plot", "land"];

        let title = title.to_lowercase();
        let matches = |words: &[&str]| words.iter().any(|w| title.contains(w));

        if matches(APARTMENT) {
            Some(SubCategory::Apartment)
        } else if matches(HOUSE) {
            Some(SubCategory::House)
        } else if matches(COMMERCE) {
            Some(SubCategory::Commerce)
        } else if matches(PLOT) {
            Some(SubCategory::Plot)
        } else {
            None
        }
    }
}

/// Market status of a listing. Only active listings are ever acquired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    #[default]
    Available,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Available => "available",
        }
    }
}

// --- Geo ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Returns `None` unless both coordinates are finite and within WGS84 bounds.
    pub fn checked(lat: f64, lng: f64) -> Option<Self> {
        let valid = lat.is_finite()
            && lng.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lng);
        valid.then_some(Self { lat, lng })
    }
}

// --- Raw fields ---

/// Price as observed in a raw payload.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum RawPrice {
    /// The payload never mentioned a price.
    #[default]
    Missing,
    /// The payload explicitly reports no price ("price on request").
    Unlisted,
    Amount(f64),
}

/// Loosely-typed listing attributes as a parser collected them.
///
/// `Listing::build` validates these into a `Listing`. Malformed optional values
/// become absent; only the required fields can fail the build.
#[derive(Debug, Clone, Default)]
pub struct ListingFields {
    pub source: String,
    pub source_id: Option<String>,
    pub listing_type: Option<ListingType>,
    pub price: RawPrice,
    pub detail_url: Option<String>,

    pub title: Option<String>,
    pub sub_category: Option<SubCategory>,
    pub description: Option<String>,

    pub location: Option<String>,
    pub region: Option<String>,
    pub province: Option<String>,
    pub municipality: Option<String>,
    pub neighborhood: Option<String>,
    pub postal_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    pub area_m2: Option<f64>,
    pub rooms: Option<i64>,
    pub bathrooms: Option<i64>,

    pub images: Vec<String>,
    pub specs: BTreeMap<String, String>,
    pub features: Vec<String>,
}

// --- Listing ---

/// The canonical listing record.
///
/// Fields are private: a `Listing` only comes out of `Listing::build` or
/// `Listing::merged_with`, so `id` always matches `(source, source_id)` and
/// no field can be changed after construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listing {
    id: String,
    source: String,
    source_id: String,
    listing_type: ListingType,
    sub_category: Option<SubCategory>,
    title: Option<String>,
    description: Option<String>,
    price: Option<f64>,
    location: Option<String>,
    region: Option<String>,
    province: Option<String>,
    municipality: Option<String>,
    neighborhood: Option<String>,
    postal_code: Option<String>,
    coordinates: Option<GeoPoint>,
    area_m2: Option<f64>,
    rooms: Option<u32>,
    bathrooms: Option<u32>,
    images: Vec<String>,
    specs: BTreeMap<String, String>,
    features: Vec<String>,
    detail_url: String,
    status: ListingStatus,
    /// Set once a detail page has been merged in.
    enriched: bool,
    fetched_at: DateTime<Utc>,
}

impl Listing {
    /// Validate raw fields into a listing stamped with `fetched_at`.
    pub fn build(fields: ListingFields, fetched_at: DateTime<Utc>) -> Result<Self, ParseFailure> {
        let source = required_text(fields.source, "source")?;
        let source_id = required_text(fields.source_id.unwrap_or_default(), "source_id")?;
        let listing_type = fields
            .listing_type
            .ok_or_else(|| ParseFailure::missing("listing_type"))?;

        let price = match fields.price {
            RawPrice::Missing => return Err(ParseFailure::missing("price")),
            RawPrice::Unlisted => None,
            RawPrice::Amount(v) if !v.is_finite() => return Err(ParseFailure::invalid("price")),
            RawPrice::Amount(v) if v < 0.0 => return Err(ParseFailure::out_of_range("price")),
            RawPrice::Amount(v) => Some(v),
        };

        let detail_url = required_text(fields.detail_url.unwrap_or_default(), "detail_url")?;

        let title = clean_text(fields.title);
        let sub_category = fields
            .sub_category
            .or_else(|| title.as_deref().and_then(SubCategory::guess));

        let coordinates = match (fields.latitude, fields.longitude) {
            (Some(lat), Some(lng)) => GeoPoint::checked(lat, lng),
            _ => None,
        };

        let specs = fields
            .specs
            .into_iter()
            .filter_map(|(k, v)| {
                let k = k.trim().to_string();
                (!k.is_empty()).then(|| (k, v.trim().to_string()))
            })
            .collect();

        Ok(Self {
            id: listing_id(&source, &source_id),
            source,
            source_id,
            listing_type,
            sub_category,
            title,
            description: clean_text(fields.description),
            price,
            location: clean_text(fields.location),
            region: clean_text(fields.region),
            province: clean_text(fields.province),
            municipality: clean_text(fields.municipality),
            neighborhood: clean_text(fields.neighborhood),
            postal_code: clean_text(fields.postal_code),
            coordinates,
            area_m2: fields.area_m2.filter(|a| a.is_finite() && *a >= 0.0),
            rooms: fields.rooms.and_then(|n| u32::try_from(n).ok()),
            bathrooms: fields.bathrooms.and_then(|n| u32::try_from(n).ok()),
            images: dedup_text(fields.images),
            specs,
            features: dedup_text(fields.features),
            detail_url,
            status: ListingStatus::default(),
            enriched: false,
            fetched_at,
        })
    }

    /// Combine this listing with one parsed from its detail page.
    ///
    /// Identity, price, detail URL, status, the `enriched` flag and `fetched_at`
    /// come from `self`, so merging a listing with itself returns it unchanged;
    /// see `into_enriched`. Rich fields
    /// come from `detail` when it has them, otherwise from `self`, so a populated
    /// field never becomes absent. The larger image set wins; specs and features
    /// are unioned with `self` first.
    pub fn merged_with(&self, detail: &Listing) -> Listing {
        let pick = |d: &Option<String>, b: &Option<String>| d.clone().or_else(|| b.clone());

        let title = pick(&detail.title, &self.title);
        let sub_category = detail.sub_category.or(self.sub_category);

        let images = if detail.images.len() > self.images.len() {
            detail.images.clone()
        } else {
            self.images.clone()
        };

        let mut specs = self.specs.clone();
        for (k, v) in &detail.specs {
            specs.entry(k.clone()).or_insert_with(|| v.clone());
        }

        let mut features = self.features.clone();
        for f in &detail.features {
            if !features.contains(f) {
                features.push(f.clone());
            }
        }

        Listing {
            id: self.id.clone(),
            source: self.source.clone(),
            source_id: self.source_id.clone(),
            listing_type: self.listing_type,
            sub_category,
            title,
            description: pick(&detail.description, &self.description),
            price: self.price.or(detail.price),
            location: pick(&detail.location, &self.location),
            region: pick(&detail.region, &self.region),
            province: pick(&detail.province, &self.province),
            municipality: pick(&detail.municipality, &self.municipality),
            neighborhood: pick(&detail.neighborhood, &self.neighborhood),
            postal_code: pick(&detail.postal_code, &self.postal_code),
            coordinates: detail.coordinates.or(self.coordinates),
            area_m2: detail.area_m2.or(self.area_m2),
            rooms: detail.rooms.or(self.rooms),
            bathrooms: detail.bathrooms.or(self.bathrooms),
            images,
            specs,
            features,
            detail_url: self.detail_url.clone(),
            status: self.status,
            enriched: self.enriched,
            fetched_at: self.fetched_at,
        }
    }

    /// Mark this listing as carrying detail-page fields.
    pub fn into_enriched(mut self) -> Listing {
        self.enriched = true;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn listing_type(&self) -> ListingType {
        self.listing_type
    }

    pub fn sub_category(&self) -> Option<SubCategory> {
        self.sub_category
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn price(&self) -> Option<f64> {
        self.price
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn province(&self) -> Option<&str> {
        self.province.as_deref()
    }

    pub fn municipality(&self) -> Option<&str> {
        self.municipality.as_deref()
    }

    pub fn neighborhood(&self) -> Option<&str> {
        self.neighborhood.as_deref()
    }

    pub fn postal_code(&self) -> Option<&str> {
        self.postal_code.as_deref()
    }

    pub fn coordinates(&self) -> Option<GeoPoint> {
        self.coordinates
    }

    pub fn area_m2(&self) -> Option<f64> {
        self.area_m2
    }

    pub fn rooms(&self) -> Option<u32> {
        self.rooms
    }

    pub fn bathrooms(&self) -> Option<u32> {
        self.bathrooms
    }

    pub fn images(&self) -> &[String] {
        &self.images
    }

    pub fn specs(&self) -> &BTreeMap<String, String> {
        &self.specs
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn detail_url(&self) -> &str {
        &self.detail_url
    }

    pub fn status(&self) -> ListingStatus {
        self.status
    }

    pub fn enriched(&self) -> bool {
        self.enriched
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

fn required_text(value: String, field: &str) -> Result<String, ParseFailure> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ParseFailure::missing(field));
    }
    Ok(trimmed.to_string())
}

fn clean_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn dedup_text(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for v in values {
        let v = v.trim().to_string();
        if !v.is_empty() && !out.contains(&v) {
            out.push(v);
        }
    }
    out
}
