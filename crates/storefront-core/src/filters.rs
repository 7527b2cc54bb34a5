//! Product filter normalization.
//!
//! [`normalize`] maps a loosely-typed [`QueryMap`] onto the canonical
//! [`NormalizedProductFilters`] that both the product listing and the
//! filter-options fetch consume. Every malformed or missing input degrades to a
//! default; [`normalize_with_warnings`] reports what was dropped.
//!
//! Price filtering combines the continuous `priceMin`/`priceMax` pair with the
//! discrete `price[]` buckets by intersection: a price must satisfy the bounds
//! and, when buckets are present, fall inside at least one of them.

use crate::errors::{Result, StorefrontError};
use crate::model::TaxonomyKind;
use crate::query::{QueryMap, QueryValue};
use crate::util::blake3_hex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 24;

pub mod keys {
    pub const SEARCH: &str = "search";
    pub const PRICE_MIN: &str = "priceMin";
    pub const PRICE_MAX: &str = "priceMax";
    pub const PRICE_RANGES: &str = "price";
    pub const SORT: &str = "sort";
    pub const PAGE: &str = "page";
    pub const LIMIT: &str = "limit";

    /// Every key that narrows the result set (sort and paging excluded).
    pub const FILTERS: [&str; 9] = [
        SEARCH,
        "gender",
        "size",
        "color",
        "brand",
        "category",
        PRICE_MIN,
        PRICE_MAX,
        PRICE_RANGES,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOption {
    #[default]
    Featured,
    Newest,
    PriceAsc,
    PriceDesc,
}

impl SortOption {
    pub const ALL: [SortOption; 4] = [
        SortOption::Featured,
        SortOption::Newest,
        SortOption::PriceAsc,
        SortOption::PriceDesc,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            SortOption::Featured => "featured",
            SortOption::Newest => "newest",
            SortOption::PriceAsc => "price_asc",
            SortOption::PriceDesc => "price_desc",
        }
    }
}

impl FromStr for SortOption {
    type Err = StorefrontError;

    fn from_str(s: &str) -> Result<Self> {
        SortOption::ALL
            .into_iter()
            .find(|opt| opt.as_str() == s)
            .ok_or_else(|| StorefrontError::Invalid(format!("unsupported sort: {}", s)))
    }
}

impl fmt::Display for SortOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discrete price bucket; either bound may be open. Bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl PriceRange {
    /// Parse a `min-max`, `min-` or `-max` token.
    pub fn parse_token(token: &str) -> Option<Self> {
        let (lo, hi) = token.trim().split_once('-')?;
        let min = parse_bound(lo)?;
        let max = parse_bound(hi)?;
        if min.is_none() && max.is_none() {
            return None;
        }
        Some(Self { min, max })
    }

    pub fn token(&self) -> String {
        let fmt_bound = |b: Option<f64>| b.map(format_number).unwrap_or_default();
        format!("{}-{}", fmt_bound(self.min), fmt_bound(self.max))
    }

    pub fn contains(&self, price: f64) -> bool {
        self.min.map_or(true, |min| price >= min) && self.max.map_or(true, |max| price <= max)
    }
}

// Some(None) for an open bound, None for garbage.
fn parse_bound(raw: &str) -> Option<Option<f64>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(None);
    }
    parse_price(raw).map(Some)
}

fn parse_price(raw: &str) -> Option<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(f64::abs)
}

fn format_number(v: f64) -> String {
    format!("{}", v)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeOptions {
    pub default_limit: u32,
    /// Larger requested limits are clamped down to this.
    pub max_limit: Option<u32>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_PAGE_SIZE,
            max_limit: None,
        }
    }
}

/// Input that normalization dropped or replaced with a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterWarning {
    InvalidNumber { key: String, value: String },
    InvalidPriceRange { value: String },
    UnknownSort { value: String },
    LimitClamped { requested: u32, max: u32 },
}

impl FilterWarning {
    pub fn kind(&self) -> &'static str {
        match self {
            FilterWarning::InvalidNumber { .. } => "invalid_number",
            FilterWarning::InvalidPriceRange { .. } => "invalid_price_range",
            FilterWarning::UnknownSort { .. } => "unknown_sort",
            FilterWarning::LimitClamped { .. } => "limit_clamped",
        }
    }
}

impl fmt::Display for FilterWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterWarning::InvalidNumber { key, value } => {
                write!(f, "ignored non-numeric {}={:?}", key, value)
            }
            FilterWarning::InvalidPriceRange { value } => {
                write!(f, "ignored malformed price range {:?}", value)
            }
            FilterWarning::UnknownSort { value } => {
                write!(f, "unknown sort {:?}, using featured", value)
            }
            FilterWarning::LimitClamped { requested, max } => {
                write!(f, "limit {} clamped to {}", requested, max)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedProductFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender_slugs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_slugs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_slugs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_slugs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_slugs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_ranges: Option<Vec<PriceRange>>,
    #[serde(default)]
    pub sort: SortOption,
    pub page: u32,
    pub limit: u32,
}

impl Default for NormalizedProductFilters {
    fn default() -> Self {
        Self {
            search: None,
            gender_slugs: None,
            size_slugs: None,
            color_slugs: None,
            brand_slugs: None,
            category_slugs: None,
            price_min: None,
            price_max: None,
            price_ranges: None,
            sort: SortOption::Featured,
            page: DEFAULT_PAGE,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl NormalizedProductFilters {
    pub fn slugs(&self, kind: TaxonomyKind) -> Option<&[String]> {
        let field = match kind {
            TaxonomyKind::Gender => &self.gender_slugs,
            TaxonomyKind::Size => &self.size_slugs,
            TaxonomyKind::Color => &self.color_slugs,
            TaxonomyKind::Brand => &self.brand_slugs,
            TaxonomyKind::Category => &self.category_slugs,
        };
        field.as_deref()
    }

    fn slugs_mut(&mut self, kind: TaxonomyKind) -> &mut Option<Vec<String>> {
        match kind {
            TaxonomyKind::Gender => &mut self.gender_slugs,
            TaxonomyKind::Size => &mut self.size_slugs,
            TaxonomyKind::Color => &mut self.color_slugs,
            TaxonomyKind::Brand => &mut self.brand_slugs,
            TaxonomyKind::Category => &mut self.category_slugs,
        }
    }

    /// Copy with one slug dimension lifted; used for disjunctive facet counts.
    pub fn without(&self, kind: TaxonomyKind) -> Self {
        let mut out = self.clone();
        *out.slugs_mut(kind) = None;
        out
    }

    /// Copy with every price constraint lifted.
    pub fn without_price(&self) -> Self {
        Self {
            price_min: None,
            price_max: None,
            price_ranges: None,
            ..self.clone()
        }
    }

    /// True when any of `candidates` is selected, or nothing is selected for `kind`.
    pub fn admits_any(&self, kind: TaxonomyKind, candidates: &[String]) -> bool {
        match self.slugs(kind) {
            None => true,
            Some(selected) => candidates.iter().any(|c| selected.contains(c)),
        }
    }

    pub fn admits_price(&self, price: f64) -> bool {
        if self.price_min.is_some_and(|min| price < min) {
            return false;
        }
        if self.price_max.is_some_and(|max| price > max) {
            return false;
        }
        match &self.price_ranges {
            None => true,
            Some(ranges) => ranges.iter().any(|r| r.contains(price)),
        }
    }

    pub fn has_active_filters(&self) -> bool {
        self.search.is_some()
            || TaxonomyKind::ALL.iter().any(|k| self.slugs(*k).is_some())
            || self.price_min.is_some()
            || self.price_max.is_some()
            || self.price_ranges.is_some()
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }

    /// Re-encode as a query map. Default sort, page and limit are left out.
    pub fn to_query_map(&self, opts: &NormalizeOptions) -> QueryMap {
        let mut map = QueryMap::new();
        if let Some(search) = &self.search {
            map.set(keys::SEARCH, search.as_str());
        }
        for kind in TaxonomyKind::ALL {
            if let Some(slugs) = self.slugs(kind) {
                map.set(kind.query_key(), QueryValue::List(slugs.to_vec()));
            }
        }
        if let Some(min) = self.price_min {
            map.set(keys::PRICE_MIN, format_number(min));
        }
        if let Some(max) = self.price_max {
            map.set(keys::PRICE_MAX, format_number(max));
        }
        if let Some(ranges) = &self.price_ranges {
            map.set(
                keys::PRICE_RANGES,
                QueryValue::List(ranges.iter().map(PriceRange::token).collect()),
            );
        }
        if self.sort != SortOption::Featured {
            map.set(keys::SORT, self.sort.as_str());
        }
        if self.page != DEFAULT_PAGE {
            map.set(keys::PAGE, self.page.to_string());
        }
        if self.limit != opts.default_limit {
            map.set(keys::LIMIT, self.limit.to_string());
        }
        map
    }

    pub fn to_query_string(&self, opts: &NormalizeOptions) -> String {
        self.to_query_map(opts).to_query_string()
    }

    /// Stable digest of the whole filter state.
    pub fn fingerprint(&self) -> String {
        blake3_hex(&serde_json::to_vec(self).unwrap_or_default())
    }
}

pub fn normalize(map: &QueryMap, opts: &NormalizeOptions) -> NormalizedProductFilters {
    normalize_with_warnings(map, opts).0
}

/// Convenience wrapper: parse a raw query string, then normalize it.
pub fn normalize_search(search: &str, opts: &NormalizeOptions) -> NormalizedProductFilters {
    normalize(&QueryMap::parse(search), opts)
}

pub fn normalize_with_warnings(
    map: &QueryMap,
    opts: &NormalizeOptions,
) -> (NormalizedProductFilters, Vec<FilterWarning>) {
    let mut warnings = Vec::new();
    let mut out = NormalizedProductFilters {
        limit: opts.default_limit.max(1),
        ..Default::default()
    };

    for kind in TaxonomyKind::ALL {
        *out.slugs_mut(kind) = slug_set(map.get_array(kind.query_key()));
    }

    out.search = scalar(map, keys::SEARCH);

    out.price_min = price_bound(map, keys::PRICE_MIN, &mut warnings);
    out.price_max = price_bound(map, keys::PRICE_MAX, &mut warnings);

    let mut ranges = Vec::new();
    for token in map.get_array(keys::PRICE_RANGES) {
        if token.trim().is_empty() {
            continue;
        }
        match PriceRange::parse_token(&token) {
            Some(range) => ranges.push(range),
            None => warnings.push(FilterWarning::InvalidPriceRange { value: token }),
        }
    }
    if !ranges.is_empty() {
        out.price_ranges = Some(ranges);
    }

    if let Some(raw) = scalar(map, keys::SORT) {
        match raw.parse::<SortOption>() {
            Ok(sort) => out.sort = sort,
            Err(_) => warnings.push(FilterWarning::UnknownSort { value: raw }),
        }
    }

    if let Some(page) = positive_int(map, keys::PAGE, &mut warnings) {
        out.page = page;
    }
    if let Some(limit) = positive_int(map, keys::LIMIT, &mut warnings) {
        out.limit = match opts.max_limit.map(|max| max.max(1)) {
            Some(max) if limit > max => {
                warnings.push(FilterWarning::LimitClamped {
                    requested: limit,
                    max,
                });
                max
            }
            _ => limit,
        };
    }

    (out, warnings)
}

fn scalar(map: &QueryMap, key: &str) -> Option<String> {
    map.get_string(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn slug_set(values: Vec<String>) -> Option<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for v in values {
        let v = v.trim();
        if !v.is_empty() && !out.iter().any(|seen| seen == v) {
            out.push(v.to_string());
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn price_bound(map: &QueryMap, key: &str, warnings: &mut Vec<FilterWarning>) -> Option<f64> {
    let raw = scalar(map, key)?;
    let parsed = parse_price(&raw);
    if parsed.is_none() {
        warnings.push(FilterWarning::InvalidNumber {
            key: key.to_string(),
            value: raw,
        });
    }
    parsed
}

fn positive_int(map: &QueryMap, key: &str, warnings: &mut Vec<FilterWarning>) -> Option<u32> {
    let raw = scalar(map, key)?;
    match raw.parse::<u32>() {
        Ok(v) if v > 0 => Some(v),
        _ => {
            warnings.push(FilterWarning::InvalidNumber {
                key: key.to_string(),
                value: raw,
            });
            None
        }
    }
}
