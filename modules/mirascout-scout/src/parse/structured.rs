//! Items from the structured listing endpoint.

use mirascout_common::{Listing, ListingType, ParseFailure, RawPrice};
use serde_json::Value;

use super::features::parse_feature_strings;
use super::{parse_spanish_price, ParseContext};

const NEW_BUILDING_RIBBON: &str = "obra nueva";

/// Unwrap the response envelope (`{"body": {"ads": [...]}}` or `{"ads": [...]}`)
/// into its item list.
///
/// A JSON body without an `ads` array is malformed; an empty array is a valid
/// empty result.
pub fn parse_structured_response(body: &str) -> Result<Vec<Value>, ParseFailure> {
    let root: Value = serde_json::from_str(body)
        .map_err(|e| ParseFailure::malformed(format!("response body is not JSON ({e})")))?;

    let envelope = root.get("body").filter(|b| b.is_object()).unwrap_or(&root);
    match envelope.get("ads") {
        Some(Value::Array(ads)) => Ok(ads.clone()),
        Some(_) => Err(ParseFailure::invalid("ads")),
        None => Err(ParseFailure::malformed("response has no ads array")),
    }
}

/// Map one ad object to a listing. Unknown keys are ignored and optional
/// keys may be absent or of the wrong type without failing the item.
pub fn parse_structured_item(item: &Value, ctx: &ParseContext<'_>) -> Result<Listing, ParseFailure> {
    let obj = item
        .as_object()
        .ok_or_else(|| ParseFailure::invalid("ad"))?;

    let source_id = match obj.get("adId") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        None | Some(Value::Null) => return Err(ParseFailure::missing("adId")),
        Some(_) => return Err(ParseFailure::invalid("adId")),
    };

    let price = match obj.get("price") {
        None => RawPrice::Missing,
        Some(Value::Null) => RawPrice::Unlisted,
        Some(Value::Number(n)) => match n.as_f64() {
            Some(v) if v == 0.0 => RawPrice::Unlisted,
            Some(v) => RawPrice::Amount(v),
            None => return Err(ParseFailure::invalid("price")),
        },
        Some(Value::String(s)) => match machine_price(s).or_else(|| parse_spanish_price(s)) {
            Some(v) if v == 0.0 => RawPrice::Unlisted,
            Some(v) => RawPrice::Amount(v),
            None => return Err(ParseFailure::invalid("price")),
        },
        Some(_) => return Err(ParseFailure::invalid("price")),
    };

    let address = str_field(item, "address");
    let feature_strings: Vec<String> = obj
        .get("features")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default();
    let summary = parse_feature_strings(feature_strings.as_slice());

    let thumbnail = item
        .pointer("/thumbnails/thumbnail")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty());

    let detail_url = match str_field(item, "detailUrl") {
        Some(href) => ctx.absolute_url(&href),
        None => ctx.detail_url(&source_id),
    };

    let mut fields = ctx.base_fields();
    if has_new_building_ribbon(obj.get("ribbons")) {
        fields.listing_type = Some(ListingType::NewBuilding);
    }
    fields.source_id = Some(source_id);
    fields.price = price;
    fields.detail_url = Some(detail_url);
    fields.title = address.clone();
    fields.location = address;
    fields.latitude = obj.get("latitude").and_then(number);
    fields.longitude = obj.get("longitude").and_then(number);
    fields.area_m2 = summary.area_m2;
    fields.rooms = summary.rooms;
    fields.bathrooms = obj
        .get("bathrooms")
        .and_then(Value::as_i64)
        .or(summary.bathrooms);
    fields.images = thumbnail.map(|t| vec![ctx.absolute_url(t)]).unwrap_or_default();
    fields.specs = summary.specs;
    fields.features = feature_strings;

    ctx.build(fields)
}

/// A plain decimal such as "185000" or "185000.5". "185.000" is left to the
/// Spanish reading, where the dot groups thousands.
fn machine_price(s: &str) -> Option<f64> {
    let s = s.trim();
    let (int, frac) = s.split_once('.').unwrap_or((s, ""));
    let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if int.is_empty() || !digits(int) || !digits(frac) || frac.len() > 2 {
        return None;
    }
    s.parse().ok()
}

fn str_field(item: &Value, key: &str) -> Option<String> {
    item.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Numbers may arrive as JSON numbers or numeric strings.
fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn has_new_building_ribbon(ribbons: Option<&Value>) -> bool {
    let Some(Value::Array(ribbons)) = ribbons else {
        return false;
    };
    ribbons.iter().any(|r| {
        let text = match r {
            Value::String(s) => s.as_str(),
            Value::Object(o) => o.get("text").and_then(Value::as_str).unwrap_or_default(),
            _ => "",
        };
        text.to_lowercase().contains(NEW_BUILDING_RIBBON)
    })
}
