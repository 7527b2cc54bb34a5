use crate::errors::{Result, StorefrontError};
use crate::util::slugify;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use ulid::Ulid;

pub type ProductId = String; // ULID string
pub type Slug = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxonomyKind {
    Gender,
    Size,
    Color,
    Brand,
    Category,
}

impl TaxonomyKind {
    pub const ALL: [TaxonomyKind; 5] = [
        TaxonomyKind::Gender,
        TaxonomyKind::Size,
        TaxonomyKind::Color,
        TaxonomyKind::Brand,
        TaxonomyKind::Category,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            TaxonomyKind::Gender => "gender",
            TaxonomyKind::Size => "size",
            TaxonomyKind::Color => "color",
            TaxonomyKind::Brand => "brand",
            TaxonomyKind::Category => "category",
        }
    }

    /// Query-string key carrying the multi-select filter for this dimension.
    pub const fn query_key(self) -> &'static str {
        self.as_str()
    }
}

impl FromStr for TaxonomyKind {
    type Err = StorefrontError;

    // accepts the plural route form too (`/taxonomy/brands`)
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gender" | "genders" => Ok(TaxonomyKind::Gender),
            "size" | "sizes" => Ok(TaxonomyKind::Size),
            "color" | "colors" => Ok(TaxonomyKind::Color),
            "brand" | "brands" => Ok(TaxonomyKind::Brand),
            "category" | "categories" => Ok(TaxonomyKind::Category),
            other => Err(StorefrontError::Invalid(format!(
                "unknown taxonomy: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub slug: Slug,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub slug: Slug,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub brand: Slug,
    pub category: Slug,
    pub gender: Slug,
    #[serde(default)]
    pub colors: Vec<Slug>,
    #[serde(default)]
    pub sizes: Vec<Slug>,
    pub price: f64,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub featured: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NewProduct {
    #[serde(default)]
    pub id: Option<ProductId>,
    #[serde(default)]
    pub slug: Option<Slug>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub brand: Slug,
    pub category: Slug,
    pub gender: Slug,
    #[serde(default)]
    pub colors: Vec<Slug>,
    #[serde(default)]
    pub sizes: Vec<Slug>,
    pub price: f64,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub featured: bool,
}

impl NewProduct {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(StorefrontError::Invalid("product name is required".into()));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(StorefrontError::Invalid(format!(
                "invalid price: {}",
                self.price
            )));
        }
        for (field, value) in [
            ("brand", &self.brand),
            ("category", &self.category),
            ("gender", &self.gender),
        ] {
            if value.trim().is_empty() {
                return Err(StorefrontError::Invalid(format!("{} is required", field)));
            }
        }
        Ok(())
    }
}

impl Product {
    /// Build a product from a request. A missing id gets a fresh ULID and a
    /// missing slug is derived from the name.
    pub fn from_request(mut req: NewProduct) -> Self {
        let id = req.id.take().unwrap_or_else(|| Ulid::new().to_string());
        let slug = req
            .slug
            .take()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| slugify(&req.name));
        Self {
            id,
            slug,
            name: req.name,
            description: req.description,
            brand: req.brand,
            category: req.category,
            gender: req.gender,
            colors: req.colors,
            sizes: req.sizes,
            price: req.price,
            image_url: req.image_url,
            featured: req.featured,
            created_at: Utc::now(),
        }
    }

    /// Slugs this product carries for a filter dimension.
    pub fn slugs(&self, kind: TaxonomyKind) -> &[Slug] {
        match kind {
            TaxonomyKind::Gender => std::slice::from_ref(&self.gender),
            TaxonomyKind::Brand => std::slice::from_ref(&self.brand),
            TaxonomyKind::Category => std::slice::from_ref(&self.category),
            TaxonomyKind::Color => &self.colors,
            TaxonomyKind::Size => &self.sizes,
        }
    }

    pub fn summary(&self) -> ProductSummary {
        ProductSummary {
            id: self.id.clone(),
            slug: self.slug.clone(),
            name: self.name.clone(),
            brand: self.brand.clone(),
            category: self.category.clone(),
            price: self.price,
            image_url: self.image_url.clone(),
            featured: self.featured,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSummary {
    pub id: ProductId,
    pub slug: Slug,
    pub name: String,
    pub brand: Slug,
    pub category: Slug,
    pub price: f64,
    pub image_url: Option<String>,
    pub featured: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPage {
    pub products: Vec<ProductSummary>,
    pub total_count: u64,
    pub page: u32,
    pub limit: u32,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetValue {
    pub slug: Slug,
    pub name: String,
    pub count: u64,
    pub selected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBounds {
    pub min: f64,
    pub max: f64,
}

/// Facet values still reachable under the current filters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterOptions {
    pub genders: Vec<FacetValue>,
    pub sizes: Vec<FacetValue>,
    pub colors: Vec<FacetValue>,
    pub brands: Vec<FacetValue>,
    pub categories: Vec<FacetValue>,
    pub price: Option<PriceBounds>,
}

impl FilterOptions {
    pub fn facet(&self, kind: TaxonomyKind) -> &[FacetValue] {
        match kind {
            TaxonomyKind::Gender => &self.genders,
            TaxonomyKind::Size => &self.sizes,
            TaxonomyKind::Color => &self.colors,
            TaxonomyKind::Brand => &self.brands,
            TaxonomyKind::Category => &self.categories,
        }
    }

    pub fn facet_mut(&mut self, kind: TaxonomyKind) -> &mut Vec<FacetValue> {
        match kind {
            TaxonomyKind::Gender => &mut self.genders,
            TaxonomyKind::Size => &mut self.sizes,
            TaxonomyKind::Color => &mut self.colors,
            TaxonomyKind::Brand => &mut self.brands,
            TaxonomyKind::Category => &mut self.categories,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    #[serde(default)]
    pub size: Option<Slug>,
    pub quantity: u32,
}

impl CartLine {
    /// Lines with the same product and size are the same cart entry.
    pub fn key(&self) -> (&str, Option<&str>) {
        (self.product_id.as_str(), self.size.as_deref())
    }
}
