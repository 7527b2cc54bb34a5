use crate::config::Config;
use crate::error::ApiError;
use crate::metrics::{
    CATALOG_PRODUCTS, FALLBACKS_TOTAL, FILTER_WARNINGS_TOTAL, OPS_TOTAL, OP_DURATION,
};
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use futures::FutureExt;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use storefront_core::util::blake3_hex;
use storefront_core::{
    filters::keys, normalize_with_warnings, remove_params, set_param, toggle_array_param,
    CartLine, FacetValue, FilterOptions, FilterWarning, NewProduct, NormalizedProductFilters,
    PriceBounds, ProductPage, ProductSummary, QueryMap, TaxonomyKind, Term,
};
use storefront_storage::{CartBackend, CartStore, Catalog};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn Catalog>,
    pub carts: Arc<dyn CartBackend>,
    pub config: Arc<Config>,
}

/// Run `fut`, substituting `fallback` if it errors or panics.
pub async fn supervise<F, T>(op: &'static str, fut: F, fallback: T) -> T
where
    F: Future<Output = storefront_core::Result<T>>,
{
    let err = match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(v)) => return v,
        Ok(Err(e)) => e.to_string(),
        Err(_) => "panicked".to_string(),
    };
    warn!(op, error = %err, "falling back");
    FALLBACKS_TOTAL.with_label_values(&[op]).inc();
    fallback
}

fn normalize_request(
    search: &str,
    config: &Config,
) -> (NormalizedProductFilters, Vec<FilterWarning>) {
    let (filters, warnings) =
        normalize_with_warnings(&QueryMap::parse(search), &config.normalize_options());
    for w in &warnings {
        debug!(warning = %w, "filter input dropped");
        FILTER_WARNINGS_TOTAL.with_label_values(&[w.kind()]).inc();
    }
    (filters, warnings)
}

fn query_of(url: &str) -> &str {
    url.split_once('?').map(|(_, q)| q).unwrap_or("")
}

#[derive(Debug, Serialize)]
pub struct PageLinks {
    #[serde(rename = "self")]
    pub current: String,
    pub next: Option<String>,
    pub prev: Option<String>,
    pub clear: Option<String>,
}

impl PageLinks {
    pub fn build(
        path: &str,
        search: &str,
        filters: &NormalizedProductFilters,
        has_more: bool,
    ) -> Self {
        let next = has_more.then(|| {
            let page = filters.page.saturating_add(1).to_string();
            set_param(path, search, keys::PAGE, &page)
        });
        let prev = match filters.page {
            1 => None,
            2 => Some(remove_params(path, search, &[keys::PAGE])),
            n => Some(set_param(path, search, keys::PAGE, &(n - 1).to_string())),
        };
        let clear = filters.has_active_filters().then(|| {
            let mut stale: Vec<&str> = keys::FILTERS.to_vec();
            stale.push(keys::PAGE);
            remove_params(path, search, &stale)
        });
        Self {
            current: QueryMap::parse(search).href(path),
            next,
            prev,
            clear,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FacetLink {
    #[serde(flatten)]
    pub value: FacetValue,
    /// URL that toggles this value and returns to the first page.
    pub href: String,
}

#[derive(Debug, Serialize)]
pub struct OptionsView {
    pub facets: BTreeMap<&'static str, Vec<FacetLink>>,
    pub price: Option<PriceBounds>,
}

impl OptionsView {
    pub fn build(path: &str, search: &str, options: FilterOptions) -> Self {
        let mut facets = BTreeMap::new();
        for kind in TaxonomyKind::ALL {
            let links = options
                .facet(kind)
                .iter()
                .map(|value| {
                    let toggled = toggle_array_param(path, search, kind.query_key(), &value.slug);
                    FacetLink {
                        value: value.clone(),
                        href: remove_params(path, query_of(&toggled), &[keys::PAGE]),
                    }
                })
                .collect();
            facets.insert(kind.as_str(), links);
        }
        Self {
            facets,
            price: options.price,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListingResponse {
    filters: NormalizedProductFilters,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<FilterWarning>,
    products: Vec<ProductSummary>,
    total_count: u64,
    page: u32,
    limit: u32,
    has_more: bool,
    options: OptionsView,
    links: PageLinks,
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn metrics() -> impl IntoResponse {
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buf) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buf,
    )
        .into_response()
}

/// Product listing plus filter options for one page view. Both fetches share
/// one normalized filter snapshot; the options side degrades to empty.
pub async fn list_products(State(app): State<AppState>, uri: Uri) -> Result<Response, ApiError> {
    let _timer = OP_DURATION.with_label_values(&["list_products"]).start_timer();
    let search = uri.query().unwrap_or("");
    let (filters, warnings) = normalize_request(search, &app.config);
    let etag = listing_etag(&filters, app.catalog.revision());

    let (page, options) = tokio::join!(
        app.catalog.list_products(&filters),
        supervise(
            "filter_options",
            app.catalog.filter_options(&filters),
            FilterOptions::default()
        ),
    );
    let ProductPage {
        products,
        total_count,
        page,
        limit,
        has_more,
    } = page?;

    let path = app.config.listing_path.as_str();
    let links = PageLinks::build(path, search, &filters, has_more);
    let options = OptionsView::build(path, search, options);
    OPS_TOTAL.with_label_values(&["list_products"]).inc();

    let body = ListingResponse {
        filters,
        warnings,
        products,
        total_count,
        page,
        limit,
        has_more,
        options,
        links,
    };
    Ok(([(header::ETAG, etag)], Json(body)).into_response())
}

/// Weak validator over the normalized filters and the catalog revision.
fn listing_etag(filters: &NormalizedProductFilters, revision: u64) -> String {
    let tag = blake3_hex(format!("{}:{}", filters.fingerprint(), revision).as_bytes());
    format!("W/\"{}\"", tag)
}

pub async fn filter_options(
    State(app): State<AppState>,
    uri: Uri,
) -> Result<Json<OptionsView>, ApiError> {
    let _timer = OP_DURATION.with_label_values(&["filter_options"]).start_timer();
    let search = uri.query().unwrap_or("");
    let (filters, _) = normalize_request(search, &app.config);
    let options = app.catalog.filter_options(&filters).await?;
    OPS_TOTAL.with_label_values(&["filter_options"]).inc();
    Ok(Json(OptionsView::build(
        &app.config.listing_path,
        search,
        options,
    )))
}

fn enforce_admin(headers: &HeaderMap, config: &Config) -> Result<(), ApiError> {
    let Some(expected) = config.admin_token.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented == Some(expected) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

pub async fn get_product(
    State(app): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let product = app.catalog.get_product(&key).await?;
    OPS_TOTAL.with_label_values(&["get_product"]).inc();
    Ok(Json(product))
}

pub async fn put_product(
    State(app): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NewProduct>,
) -> Result<impl IntoResponse, ApiError> {
    enforce_admin(&headers, &app.config)?;
    let product = app.catalog.put_product(req).await?;
    CATALOG_PRODUCTS.set(app.catalog.product_count() as i64);
    OPS_TOTAL.with_label_values(&["put_product"]).inc();
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn delete_product(
    State(app): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    enforce_admin(&headers, &app.config)?;
    app.catalog.delete_product(&key).await?;
    CATALOG_PRODUCTS.set(app.catalog.product_count() as i64);
    OPS_TOTAL.with_label_values(&["delete_product"]).inc();
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_terms(
    State(app): State<AppState>,
    Path(kind): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let kind: TaxonomyKind = kind.parse()?;
    Ok(Json(app.catalog.list_terms(kind).await?))
}

pub async fn put_term(
    State(app): State<AppState>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    Json(term): Json<Term>,
) -> Result<impl IntoResponse, ApiError> {
    enforce_admin(&headers, &app.config)?;
    let kind: TaxonomyKind = kind.parse()?;
    let term = app.catalog.put_term(kind, term).await?;
    OPS_TOTAL.with_label_values(&["put_term"]).inc();
    Ok((StatusCode::CREATED, Json(term)))
}

pub async fn delete_term(
    State(app): State<AppState>,
    Path((kind, slug)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    enforce_admin(&headers, &app.config)?;
    let kind: TaxonomyKind = kind.parse()?;
    app.catalog.delete_term(kind, &slug).await?;
    OPS_TOTAL.with_label_values(&["delete_term"]).inc();
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_cart(
    State(app): State<AppState>,
    Path(owner): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(app.carts.fetch_cart(&owner).await?))
}

pub async fn sync_cart(
    State(app): State<AppState>,
    Path(owner): Path<String>,
    Json(local): Json<Vec<CartLine>>,
) -> Result<impl IntoResponse, ApiError> {
    let cart = CartStore::with_lines(owner, local);
    let merged = cart.sync_with_server(app.carts.as_ref()).await?;
    OPS_TOTAL.with_label_values(&["sync_cart"]).inc();
    Ok(Json(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use storefront_core::{normalize_search, NormalizeOptions};

    fn filters(q: &str) -> NormalizedProductFilters {
        normalize_search(q, &NormalizeOptions::default())
    }

    #[test]
    fn page_links_preserve_other_keys() {
        let search = "color[]=red&page=3&utm=x";
        let links = PageLinks::build("/products", search, &filters(search), true);
        assert_eq!(links.current, "/products?color[]=red&page=3&utm=x");
        assert_eq!(links.next.as_deref(), Some("/products?color[]=red&page=4&utm=x"));
        assert_eq!(links.prev.as_deref(), Some("/products?color[]=red&page=2&utm=x"));
        assert_eq!(links.clear.as_deref(), Some("/products?utm=x"));
    }

    #[test]
    fn page_links_drop_page_when_returning_to_first() {
        let links = PageLinks::build("/products", "page=2", &filters("page=2"), false);
        assert_eq!(links.prev.as_deref(), Some("/products"));
        assert!(links.next.is_none());
        assert!(links.clear.is_none());
    }

    #[test]
    fn facet_links_toggle_and_reset_page() {
        let mut options = FilterOptions::default();
        options.colors = vec![
            FacetValue {
                slug: "red".into(),
                name: "Red".into(),
                count: 2,
                selected: true,
            },
            FacetValue {
                slug: "blue".into(),
                name: "Blue".into(),
                count: 1,
                selected: false,
            },
        ];
        let view = OptionsView::build("/products", "color[]=red&page=5&sort=newest", options);
        let colors = &view.facets["color"];
        assert_eq!(colors[0].href, "/products?sort=newest");
        assert_eq!(colors[1].href, "/products?color[]=red&color[]=blue&sort=newest");
        assert!(view.facets["brand"].is_empty());
    }

    #[test]
    fn listing_etag_tracks_filters_and_revision() {
        let f = filters("color[]=red");
        assert_eq!(listing_etag(&f, 3), listing_etag(&f, 3));
        assert_ne!(listing_etag(&f, 3), listing_etag(&f, 4));
        assert_ne!(listing_etag(&f, 3), listing_etag(&filters("color[]=blue"), 3));
        assert!(listing_etag(&f, 0).starts_with("W/\""));
    }

    #[tokio::test]
    async fn supervise_substitutes_fallback_on_error_and_panic() {
        let ok = supervise("t", async { Ok::<_, storefront_core::StorefrontError>(1) }, 0).await;
        assert_eq!(ok, 1);
        let failed = supervise(
            "t",
            async { Err(storefront_core::StorefrontError::Internal("down".into())) },
            7,
        )
        .await;
        assert_eq!(failed, 7);
        let panicked = supervise(
            "t",
            async {
                if true {
                    panic!("boom");
                }
                Ok(1)
            },
            9,
        )
        .await;
        assert_eq!(panicked, 9);
    }
}
