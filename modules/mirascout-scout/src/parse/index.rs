//! Rendered index (search result) pages used by the slow path.

use std::collections::HashMap;
use std::sync::LazyLock;

use mirascout_common::{Listing, ParseFailure, RawPrice};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

use super::features::parse_feature_strings;
use super::script::js_var_json;
use super::{element_text, id_from_detail_link, parse_spanish_price, ParseContext};

static SEL_ARTICLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("article.item").unwrap());
static SEL_LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a.item-link").unwrap());
static SEL_PRICE: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".item-price").unwrap());
static SEL_DETAIL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".item-detail").unwrap());
static SEL_DESCRIPTION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".item-description").unwrap());
static SEL_IMG: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").unwrap());
static SEL_PAGINATION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".pagination li a, .pagination-list li a").unwrap());

/// One parsed index page.
#[derive(Debug)]
pub struct IndexPage {
    /// One entry per listing summary, in page order. Entries that could not
    /// be turned into a listing carry their failure.
    pub listings: Vec<Result<Listing, ParseFailure>>,
    /// Highest page number the pagination block links to. `None` when the page
    /// has no pagination at all.
    pub total_pages: Option<u32>,
}

impl IndexPage {
    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}

/// Parse one index page.
///
/// `utag_data.adIds` is the page's own list of results and sets the order.
/// Each id takes its `article.item` summary when one exists, otherwise an
/// id-only listing that enrichment can fill in. Articles the id list does not
/// mention follow in page order.
pub fn parse_index_page(markup: &str, ctx: &ParseContext<'_>) -> IndexPage {
    let doc = Html::parse_document(markup);

    let articles: Vec<Result<Listing, ParseFailure>> = doc
        .select(&SEL_ARTICLE)
        .map(|article| parse_summary(article, ctx))
        .collect();
    let listings = order_by_ad_ids(articles, &tracked_ad_ids(markup), ctx);

    let total_pages = doc
        .select(&SEL_PAGINATION)
        .filter_map(|a| element_text(a).parse::<u32>().ok())
        .max();

    IndexPage {
        listings,
        total_pages,
    }
}

/// `utag_data.adIds`, given either as a comma-separated string or a list.
fn tracked_ad_ids(markup: &str) -> Vec<String> {
    let Some(utag) = js_var_json(markup, "utag_data") else {
        return Vec::new();
    };
    let ids: Vec<String> = match utag.get("adIds") {
        Some(Value::String(s)) => s.split(',').map(|id| id.trim().to_string()).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    let mut unique = Vec::with_capacity(ids.len());
    for id in ids {
        if !id.is_empty() && !unique.contains(&id) {
            unique.push(id);
        }
    }
    unique
}

fn order_by_ad_ids(
    articles: Vec<Result<Listing, ParseFailure>>,
    ad_ids: &[String],
    ctx: &ParseContext<'_>,
) -> Vec<Result<Listing, ParseFailure>> {
    if ad_ids.is_empty() {
        return articles;
    }

    let mut by_id: HashMap<String, Listing> = HashMap::new();
    let mut rest = Vec::new();
    for article in articles {
        match article {
            Ok(listing) if ad_ids.iter().any(|id| id == listing.source_id()) => {
                by_id.insert(listing.source_id().to_string(), listing);
            }
            other => rest.push(other),
        }
    }

    let mut ordered: Vec<Result<Listing, ParseFailure>> = ad_ids
        .iter()
        .map(|id| match by_id.remove(id) {
            Some(listing) => Ok(listing),
            None => id_only_summary(id, ctx),
        })
        .collect();
    ordered.extend(rest);
    ordered
}

/// A listing known only by id. Its price is unknown rather than missing.
fn id_only_summary(source_id: &str, ctx: &ParseContext<'_>) -> Result<Listing, ParseFailure> {
    let mut fields = ctx.base_fields();
    fields.source_id = Some(source_id.to_string());
    fields.detail_url = Some(ctx.detail_url(source_id));
    fields.price = RawPrice::Unlisted;
    ctx.build(fields)
}

fn parse_summary(article: ElementRef<'_>, ctx: &ParseContext<'_>) -> Result<Listing, ParseFailure> {
    let link = article.select(&SEL_LINK).next();
    let href = link.and_then(|a| a.value().attr("href"));

    let source_id = article
        .value()
        .attr("data-adid")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| href.and_then(id_from_detail_link))
        .ok_or_else(|| ParseFailure::missing("source_id"))?
        .to_string();

    let price = match article.select(&SEL_PRICE).next().map(element_text) {
        Some(text) => match parse_spanish_price(&text) {
            Some(v) => RawPrice::Amount(v),
            None => RawPrice::Unlisted,
        },
        None => RawPrice::Missing,
    };

    let details: Vec<String> = article
        .select(&SEL_DETAIL)
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect();
    let summary = parse_feature_strings(details.as_slice());

    let image = article.select(&SEL_IMG).find_map(|img| {
        let attrs = img.value();
        attrs
            .attr("data-ondemand-img")
            .or_else(|| attrs.attr("data-src"))
            .or_else(|| attrs.attr("src"))
            .filter(|s| !s.trim().is_empty() && !s.starts_with("data:"))
    });

    let mut fields = ctx.base_fields();
    fields.detail_url = Some(match href {
        Some(h) => ctx.absolute_url(h),
        None => ctx.detail_url(&source_id),
    });
    fields.source_id = Some(source_id);
    fields.price = price;
    fields.title = link
        .and_then(|a| a.value().attr("title").map(String::from))
        .or_else(|| link.map(element_text));
    fields.location = fields.title.clone();
    fields.description = article.select(&SEL_DESCRIPTION).next().map(element_text);
    fields.rooms = summary.rooms;
    fields.bathrooms = summary.bathrooms;
    fields.area_m2 = summary.area_m2;
    fields.images = image.map(|src| vec![ctx.absolute_url(src)]).unwrap_or_default();
    fields.specs = summary.specs;
    fields.features = details;

    ctx.build(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::SearchArea;
    use chrono::Utc;
    use mirascout_common::ListingType;

    fn parse(markup: &str) -> IndexPage {
        let area = SearchArea::valencia();
        let ctx = ParseContext {
            source: "idealista",
            base_url: "https://www.idealista.com",
            listing_type: ListingType::Rent,
            area: &area,
            fetched_at: Utc::now(),
        };
        parse_index_page(markup, &ctx)
    }

    #[test]
    fn parses_articles_and_pagination() {
        let page = parse(
            r#"<html><body>
            <article class="item" data-adid="111">
                <img src="https://img.idealista.com/111.jpg">
                <a class="item-link" href="/inmueble/111/" title="Piso en Ruzafa, Valencia">Piso en Ruzafa</a>
                <span class="item-price">1.100<span>€/mes</span></span>
                <span class="item-detail">2 hab.</span>
                <span class="item-detail">70 m²</span>
                <div class="item-description">Reformado</div>
            </article>
            <article class="item">
                <a class="item-link" href="/inmueble/222/">Casa en Godella</a>
                <span class="item-price">A consultar</span>
            </article>
            <article class="item"><span>advert</span></article>
            <div class="pagination"><ul>
                <li><a href="/pagina-2.htm">2</a></li>
                <li><a href="/pagina-7.htm">7</a></li>
                <li><a href="/pagina-2.htm">Siguiente</a></li>
            </ul></div>
            </body></html>"#,
        );

        assert_eq!(page.listings.len(), 3);
        assert_eq!(page.total_pages, Some(7));

        let first = page.listings[0].as_ref().unwrap();
        assert_eq!(first.id(), "idealista-111");
        assert_eq!(first.price(), Some(1100.0));
        assert_eq!(first.rooms(), Some(2));
        assert_eq!(first.area_m2(), Some(70.0));
        assert_eq!(first.title(), Some("Piso en Ruzafa, Valencia"));
        assert_eq!(first.images(), ["https://img.idealista.com/111.jpg"]);
        assert_eq!(first.listing_type(), ListingType::Rent);

        let second = page.listings[1].as_ref().unwrap();
        assert_eq!(second.source_id(), "222");
        assert_eq!(second.price(), None);
        assert_eq!(second.detail_url(), "https://www.idealista.com/inmueble/222/");

        assert_eq!(
            page.listings[2].as_ref().unwrap_err(),
            &ParseFailure::missing("source_id")
        );
    }

    #[test]
    fn pagination_list_variant() {
        let page = parse(
            r#"<div class="pagination-list"><ul><li><a>1</a></li><li><a>3</a></li></ul></div>"#,
        );
        assert!(page.is_empty());
        assert_eq!(page.total_pages, Some(3));
    }

    #[test]
    fn no_pagination() {
        let page = parse(r#"<article class="item" data-adid="9"><span class="item-price">90.000 €</span></article>"#);
        assert_eq!(page.listings.len(), 1);
        assert_eq!(page.total_pages, None);
    }

    #[test]
    fn tracked_ids_cover_pages_without_articles() {
        let page = parse(
            r#"<html><body>
            <script>
                var utag_data = {
                    adIds: "12345,67890,11111",
                    page_number: "1"
                };
            </script>
            <div class="pagination-list">
                <ul><li><a href="/p-1">1</a></li><li><a href="/p-5">5</a></li></ul>
            </div>
            </body></html>"#,
        );
        assert!(!page.is_empty());
        assert_eq!(page.total_pages, Some(5));
        let ids: Vec<_> = page
            .listings
            .iter()
            .map(|l| l.as_ref().unwrap().source_id().to_string())
            .collect();
        assert_eq!(ids, ["12345", "67890", "11111"]);
        let first = page.listings[0].as_ref().unwrap();
        assert_eq!(first.detail_url(), "https://www.idealista.com/inmueble/12345/");
        assert_eq!(first.price(), None);
    }

    #[test]
    fn tracked_ids_order_and_prefer_article_summaries() {
        let page = parse(
            r#"<html><body>
            <script>var utag_data = {adIds: [222, "111"]};</script>
            <article class="item" data-adid="111">
                <a class="item-link" href="/inmueble/111/">Piso 111</a>
                <span class="item-price">90.000 €</span>
            </article>
            <article class="item" data-adid="333">
                <span class="item-price">70.000 €</span>
            </article>
            </body></html>"#,
        );
        let listings: Vec<_> = page.listings.iter().map(|l| l.as_ref().unwrap()).collect();
        let ids: Vec<_> = listings.iter().map(|l| l.source_id()).collect();
        assert_eq!(ids, ["222", "111", "333"]);
        assert_eq!(listings[0].price(), None);
        assert_eq!(listings[1].price(), Some(90_000.0));
        assert_eq!(listings[1].title(), Some("Piso 111"));
    }
}
