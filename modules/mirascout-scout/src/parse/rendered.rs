//! Rendered detail documents.
//!
//! Listing data lives partly in embedded script variables (`adDetail`,
//! `mortgagesConfig`, `adMultimediasInfo`, `utag_data`) and partly in the DOM.
//! A document only yields a listing when it demonstrably describes
//! `expected_id`; error pages and interstitials fail instead of producing a
//! half-empty record.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use mirascout_common::{Listing, ListingFields, ParseFailure, RawPrice};
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;

use super::features::{parse_feature_groups, parse_feature_strings, split_labelled};
use super::script::js_var_json;
use super::{element_text, id_from_detail_link, parse_spanish_price, ParseContext};

const MAX_IMAGES: usize = 10;

static SEL_PRICE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".info-data-price").unwrap());
static SEL_H1: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static SEL_FEATURES: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".details-property_features li").unwrap());
static SEL_HEADER_MAP: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#headerMap li").unwrap());
static SEL_COMMENT: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".comment").unwrap());
static SEL_COMMENT_ALT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#details-content .adCommentsLanguage").unwrap());
static SEL_GEO: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[data-latitude]").unwrap());
static SEL_DATA_ADID: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[data-adid]").unwrap());
static SEL_CANONICAL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"link[rel="canonical"]"#).unwrap());

static RE_POSTAL_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\d{5})\b").unwrap());
static RE_LATITUDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""latitude"\s*:\s*"?(-?\d+(?:\.\d+)?)"#).unwrap());
static RE_LONGITUDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""longitude"\s*:\s*"?(-?\d+(?:\.\d+)?)"#).unwrap());

/// Parse a detail document for `expected_id`.
pub fn parse_rendered_document(
    markup: &str,
    expected_id: &str,
    ctx: &ParseContext<'_>,
) -> Result<Listing, ParseFailure> {
    let doc = Html::parse_document(markup);
    let ad_detail = js_var_json(markup, "adDetail");
    let utag = js_var_json(markup, "utag_data");

    check_identity(&doc, ad_detail.as_ref(), utag.as_ref(), expected_id)?;

    let multimedia = js_var_json(markup, "adMultimediasInfo");

    let mut fields = ctx.base_fields();
    fields.source_id = Some(expected_id.to_string());
    fields.detail_url = Some(ctx.detail_url(expected_id));
    fields.price = extract_price(&doc, markup);

    fields.title = ad_detail
        .as_ref()
        .and_then(|d| d.get("headerTitle"))
        .and_then(Value::as_str)
        .map(String::from)
        .or_else(|| doc.select(&SEL_H1).next().map(element_text))
        .filter(|t| !t.is_empty());

    fields.images = multimedia
        .as_ref()
        .map(gallery_images)
        .unwrap_or_default()
        .into_iter()
        .map(|src| ctx.absolute_url(&src))
        .collect();

    let mut specs = BTreeMap::new();
    if let Some(groups) = multimedia
        .as_ref()
        .and_then(|m| m.get("features"))
        .and_then(Value::as_array)
    {
        parse_feature_groups(groups, &mut specs);
    }
    if let Some(groups) = ad_detail
        .as_ref()
        .and_then(|d| d.get("headerFeatures"))
        .and_then(Value::as_array)
    {
        parse_feature_groups(groups, &mut specs);
    }

    for text in doc.select(&SEL_FEATURES).map(element_text) {
        if text.is_empty() {
            continue;
        }
        if let Some((k, v)) = split_labelled(&text) {
            specs.entry(k).or_insert(v);
            continue;
        }
        let summary = parse_feature_strings(&[text.as_str()]);
        if summary.rooms.is_some() || summary.bathrooms.is_some() || summary.area_m2.is_some() {
            fields.rooms = fields.rooms.or(summary.rooms);
            fields.bathrooms = fields.bathrooms.or(summary.bathrooms);
            fields.area_m2 = fields.area_m2.or(summary.area_m2);
            for (k, v) in summary.specs {
                specs.entry(k).or_insert(v);
            }
        }
        fields.features.push(text);
    }
    fields.specs = specs;

    apply_location(&doc, &mut fields);

    fields.description = doc
        .select(&SEL_COMMENT)
        .next()
        .or_else(|| doc.select(&SEL_COMMENT_ALT).next())
        .map(element_text);

    let (lat, lng) = extract_coordinates(&doc, markup);
    fields.latitude = lat;
    fields.longitude = lng;

    ctx.build(fields)
}

/// The id the document describes, by authority: `adDetail.adId`, then
/// `utag_data.adId`, then the canonical link, then a `data-adid` attribute
/// when the page carries exactly one distinct value. Related-ad cards also
/// carry `data-adid`, so several distinct values identify nothing.
fn document_id(doc: &Html, ad_detail: Option<&Value>, utag: Option<&Value>) -> Option<String> {
    let from_script = [ad_detail, utag]
        .into_iter()
        .flatten()
        .find_map(|data| match data.get("adId") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        });
    if from_script.is_some() {
        return from_script;
    }

    let canonical = doc
        .select(&SEL_CANONICAL)
        .filter_map(|el| el.value().attr("href"))
        .find_map(id_from_detail_link);
    if let Some(id) = canonical {
        return Some(id.to_string());
    }

    let mut attrs = doc
        .select(&SEL_DATA_ADID)
        .filter_map(|el| el.value().attr("data-adid"))
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let first = attrs.next()?;
    attrs.all(|id| id == first).then(|| first.to_string())
}

fn check_identity(
    doc: &Html,
    ad_detail: Option<&Value>,
    utag: Option<&Value>,
    expected_id: &str,
) -> Result<(), ParseFailure> {
    match document_id(doc, ad_detail, utag) {
        Some(found) if found == expected_id => Ok(()),
        Some(found) => Err(ParseFailure::identity_mismatch(expected_id, &found)),
        None => Err(ParseFailure::missing("source_id")),
    }
}

fn extract_price(doc: &Html, markup: &str) -> RawPrice {
    let from_config = js_var_json(markup, "mortgagesConfig")
        .and_then(|c| c.get("initialPrice").cloned())
        .and_then(|p| match p {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => parse_spanish_price(&s),
            _ => None,
        })
        .filter(|p| *p > 0.0);
    if let Some(price) = from_config {
        return RawPrice::Amount(price);
    }

    match doc.select(&SEL_PRICE).next().map(element_text) {
        Some(text) => match parse_spanish_price(&text) {
            Some(price) => RawPrice::Amount(price),
            // Price block present but without digits ("A consultar")
            None => RawPrice::Unlisted,
        },
        None => RawPrice::Missing,
    }
}

fn gallery_images(multimedia: &Value) -> Vec<String> {
    let Some(pics) = multimedia
        .get("fullScreenGalleryPics")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    pics.iter()
        .filter(|pic| !pic.get("isPlan").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|pic| {
            pic.get("src")
                .or_else(|| pic.get("url"))
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(String::from)
        })
        .take(MAX_IMAGES)
        .collect()
}

/// `#headerMap` lists the address from most to least specific:
/// `[street,] neighborhood, municipality, province`.
fn apply_location(doc: &Html, fields: &mut ListingFields) {
    let texts: Vec<String> = doc
        .select(&SEL_HEADER_MAP)
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect();
    if texts.is_empty() {
        return;
    }

    fields.location = Some(texts.join(", "));
    fields.postal_code = texts
        .iter()
        .filter_map(|t| RE_POSTAL_CODE.captures(t))
        .last()
        .map(|caps| caps[1].to_string());

    let n = texts.len();
    match n {
        1 => fields.municipality = Some(texts[0].clone()),
        2 => {
            fields.municipality = Some(texts[0].clone());
            fields.province = Some(texts[1].clone());
        }
        _ => {
            fields.neighborhood = Some(texts[n - 3].clone());
            fields.municipality = Some(texts[n - 2].clone());
            fields.province = Some(texts[n - 1].clone());
        }
    }
}

fn extract_coordinates(doc: &Html, markup: &str) -> (Option<f64>, Option<f64>) {
    if let Some(el) = doc.select(&SEL_GEO).next() {
        let lat = el.value().attr("data-latitude").and_then(|s| s.trim().parse().ok());
        let lng = el.value().attr("data-longitude").and_then(|s| s.trim().parse().ok());
        if lat.is_some() && lng.is_some() {
            return (lat, lng);
        }
    }

    let lat = RE_LATITUDE.captures(markup).and_then(|c| c[1].parse().ok());
    let lng = RE_LONGITUDE.captures(markup).and_then(|c| c[1].parse().ok());
    match (lat, lng) {
        (Some(lat), Some(lng)) => (Some(lat), Some(lng)),
        _ => (None, None),
    }
}
