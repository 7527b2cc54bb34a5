use crate::traits::Catalog;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use storefront_core::util::slugify;
use storefront_core::{
    FacetValue, FilterOptions, NewProduct, NormalizedProductFilters, PriceBounds, Product,
    ProductId, ProductPage, ProductSummary, Result, Slug, SortOption, StorefrontError,
    TaxonomyKind, Term,
};
use tracing::{debug, warn};

#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    products: HashMap<ProductId, Product>,
    // slug -> id
    by_slug: HashMap<Slug, ProductId>,
    terms: BTreeMap<(TaxonomyKind, Slug), Term>,
    // bumped on every back-office write
    revision: u64,
}

impl Inner {
    /// Display name for a slug; the slug itself when no term is registered.
    fn label(&self, kind: TaxonomyKind, slug: &str) -> String {
        self.terms
            .get(&(kind, slug.to_string()))
            .map(|t| t.name.clone())
            .unwrap_or_else(|| slug.to_string())
    }

    fn matches(&self, p: &Product, f: &NormalizedProductFilters) -> bool {
        if !TaxonomyKind::ALL
            .iter()
            .all(|kind| f.admits_any(*kind, p.slugs(*kind)))
        {
            return false;
        }
        if !f.admits_price(p.price) {
            return false;
        }
        if let Some(q) = &f.search {
            let needle = q.to_lowercase();
            let brand = self.label(TaxonomyKind::Brand, &p.brand);
            let found = [p.name.as_str(), p.description.as_str(), brand.as_str()]
                .iter()
                .any(|hay| hay.to_lowercase().contains(&needle));
            if !found {
                return false;
            }
        }
        true
    }

    fn matching<'a>(
        &'a self,
        f: &'a NormalizedProductFilters,
    ) -> impl Iterator<Item = &'a Product> + 'a {
        self.products.values().filter(move |p| self.matches(p, f))
    }
}

fn sort_products(items: &mut [&Product], sort: SortOption) {
    items.sort_by(|a, b| {
        let primary = match sort {
            SortOption::Featured => b
                .featured
                .cmp(&a.featured)
                .then(b.created_at.cmp(&a.created_at)),
            SortOption::Newest => b.created_at.cmp(&a.created_at),
            SortOption::PriceAsc => a.price.total_cmp(&b.price),
            SortOption::PriceDesc => b.price.total_cmp(&a.price),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    });
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a product as-is (snapshot load); no validation, `created_at` kept.
    ///
    /// Returns `false` and keeps the existing product when the slug already
    /// belongs to a different id.
    pub fn replay_product(&self, product: Product) -> bool {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        if let Some(owner) = inner.by_slug.get(&product.slug) {
            if *owner != product.id {
                warn!(
                    id = %product.id,
                    slug = %product.slug,
                    owner = %owner,
                    "slug already taken, skipping product"
                );
                return false;
            }
        }
        if let Some(prev) = inner.products.get(&product.id) {
            inner.by_slug.remove(&prev.slug);
        }
        inner
            .by_slug
            .insert(product.slug.clone(), product.id.clone());
        inner.products.insert(product.id.clone(), product);
        true
    }

    pub fn replay_term(&self, kind: TaxonomyKind, term: Term) {
        self.inner
            .write()
            .terms
            .insert((kind, term.slug.clone()), term);
    }

    pub fn len(&self) -> usize {
        self.inner.read().products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl Catalog for InMemoryCatalog {
    async fn list_products(&self, filters: &NormalizedProductFilters) -> Result<ProductPage> {
        let inner = self.inner.read();
        let mut hits: Vec<&Product> = inner.matching(filters).collect();
        sort_products(&mut hits, filters.sort);
        let total_count = hits.len() as u64;
        let offset = filters.offset();
        let products: Vec<ProductSummary> = hits
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(filters.limit as usize)
            .map(Product::summary)
            .collect();
        let has_more = offset + (products.len() as u64) < total_count;
        Ok(ProductPage {
            products,
            total_count,
            page: filters.page,
            limit: filters.limit,
            has_more,
        })
    }

    // Each dimension is counted with its own selection lifted, so sibling
    // values stay visible while one of them is selected.
    async fn filter_options(&self, filters: &NormalizedProductFilters) -> Result<FilterOptions> {
        let inner = self.inner.read();
        let mut out = FilterOptions::default();
        for kind in TaxonomyKind::ALL {
            let scope = filters.without(kind);
            let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
            for p in inner.matching(&scope) {
                let mut seen: Vec<&str> = Vec::new();
                for slug in p.slugs(kind) {
                    if !seen.contains(&slug.as_str()) {
                        seen.push(slug.as_str());
                        *counts.entry(slug.as_str()).or_default() += 1;
                    }
                }
            }
            let selected = filters.slugs(kind).unwrap_or_default();
            for slug in selected {
                counts.entry(slug.as_str()).or_insert(0);
            }
            let mut values: Vec<FacetValue> = counts
                .into_iter()
                .map(|(slug, count)| FacetValue {
                    slug: slug.to_string(),
                    name: inner.label(kind, slug),
                    count,
                    selected: selected.iter().any(|s| s == slug),
                })
                .collect();
            values.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.slug.cmp(&b.slug)));
            *out.facet_mut(kind) = values;
        }

        let price_scope = filters.without_price();
        out.price = inner
            .matching(&price_scope)
            .map(|p| p.price)
            .fold(None, |acc: Option<PriceBounds>, price| {
                Some(match acc {
                    None => PriceBounds {
                        min: price,
                        max: price,
                    },
                    Some(b) => PriceBounds {
                        min: b.min.min(price),
                        max: b.max.max(price),
                    },
                })
            });
        Ok(out)
    }

    async fn get_product(&self, slug: &str) -> Result<Product> {
        let inner = self.inner.read();
        inner
            .by_slug
            .get(slug)
            .and_then(|id| inner.products.get(id))
            .or_else(|| inner.products.get(slug))
            .cloned()
            .ok_or_else(|| StorefrontError::NotFound(format!("product {}", slug)))
    }

    async fn put_product(&self, req: NewProduct) -> Result<Product> {
        req.validate()?;
        let mut product = Product::from_request(req);
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        if let Some(owner) = inner.by_slug.get(&product.slug) {
            if *owner != product.id {
                return Err(StorefrontError::Conflict(format!(
                    "slug {} already in use",
                    product.slug
                )));
            }
        }
        if let Some(prev) = inner.products.get(&product.id) {
            product.created_at = prev.created_at;
            inner.by_slug.remove(&prev.slug);
        }
        inner
            .by_slug
            .insert(product.slug.clone(), product.id.clone());
        inner.products.insert(product.id.clone(), product.clone());
        inner.revision += 1;
        debug!(id = %product.id, slug = %product.slug, "product stored");
        Ok(product)
    }

    async fn delete_product(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.products.remove(id) {
            Some(p) => {
                inner.by_slug.remove(&p.slug);
                inner.revision += 1;
                debug!(id, "product deleted");
                Ok(())
            }
            None => Err(StorefrontError::NotFound(format!("product {}", id))),
        }
    }

    async fn list_terms(&self, kind: TaxonomyKind) -> Result<Vec<Term>> {
        let inner = self.inner.read();
        let mut terms: Vec<Term> = inner
            .terms
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, t)| t.clone())
            .collect();
        terms.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(terms)
    }

    async fn put_term(&self, kind: TaxonomyKind, mut term: Term) -> Result<Term> {
        if term.name.trim().is_empty() {
            return Err(StorefrontError::Invalid(format!(
                "{} name is required",
                kind.as_str()
            )));
        }
        if term.slug.trim().is_empty() {
            term.slug = slugify(&term.name);
        }
        let mut inner = self.inner.write();
        inner.terms.insert((kind, term.slug.clone()), term.clone());
        inner.revision += 1;
        drop(inner);
        debug!(kind = kind.as_str(), slug = %term.slug, "term stored");
        Ok(term)
    }

    async fn delete_term(&self, kind: TaxonomyKind, slug: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let in_use = inner
            .products
            .values()
            .filter(|p| p.slugs(kind).iter().any(|s| s == slug))
            .count();
        if in_use > 0 {
            return Err(StorefrontError::Conflict(format!(
                "{} {} is used by {} product(s)",
                kind.as_str(),
                slug,
                in_use
            )));
        }
        inner
            .terms
            .remove(&(kind, slug.to_string()))
            .ok_or_else(|| StorefrontError::NotFound(format!("{} {}", kind.as_str(), slug)))?;
        inner.revision += 1;
        Ok(())
    }

    fn revision(&self) -> u64 {
        self.inner.read().revision
    }

    fn product_count(&self) -> usize {
        self.len()
    }

    fn all_products(&self) -> Vec<Product> {
        let inner = self.inner.read();
        let mut out: Vec<Product> = inner.products.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    fn all_terms(&self) -> Vec<(TaxonomyKind, Term)> {
        let inner = self.inner.read();
        inner
            .terms
            .iter()
            .map(|((kind, _), term)| (*kind, term.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use storefront_core::{normalize_search, NormalizeOptions};

    fn product(id: &str, brand: &str, colors: &[&str], price: f64, age_days: i64) -> Product {
        Product {
            id: id.to_string(),
            slug: format!("shoe-{}", id),
            name: format!("Shoe {}", id),
            description: String::new(),
            brand: brand.to_string(),
            category: "shoes".to_string(),
            gender: "unisex".to_string(),
            colors: colors.iter().map(|c| c.to_string()).collect(),
            sizes: vec!["9".to_string()],
            price,
            image_url: None,
            featured: false,
            created_at: Utc::now() - Duration::days(age_days),
        }
    }

    fn catalog() -> InMemoryCatalog {
        let c = InMemoryCatalog::new();
        c.replay_term(
            TaxonomyKind::Brand,
            Term {
                slug: "nike".into(),
                name: "Nike".into(),
            },
        );
        c.replay_term(
            TaxonomyKind::Brand,
            Term {
                slug: "puma".into(),
                name: "Puma".into(),
            },
        );
        c.replay_product(product("a", "nike", &["red"], 50.0, 3));
        c.replay_product(product("b", "nike", &["blue", "red"], 120.0, 1));
        c.replay_product(product("c", "puma", &["red"], 80.0, 2));
        c.replay_product(product("d", "puma", &["green"], 20.0, 10));
        c
    }

    fn filters(q: &str) -> NormalizedProductFilters {
        normalize_search(q, &NormalizeOptions::default())
    }

    fn ids(page: &ProductPage) -> Vec<&str> {
        page.products.iter().map(|p| p.id.as_str()).collect()
    }

    #[tokio::test]
    async fn lists_with_or_within_and_across_dimensions() {
        let c = catalog();
        let page = c
            .list_products(&filters("color[]=red&color[]=green&brand[]=puma&sort=price_asc"))
            .await
            .unwrap();
        assert_eq!(ids(&page), vec!["d", "c"]);
        assert_eq!(page.total_count, 2);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn sorts_and_paginates() {
        let c = catalog();
        let page = c
            .list_products(&filters("sort=newest&limit=2&page=2"))
            .await
            .unwrap();
        assert_eq!(ids(&page), vec!["a", "d"]);
        assert_eq!(page.total_count, 4);
        assert!(!page.has_more);

        let page = c
            .list_products(&filters("sort=price_desc&limit=1"))
            .await
            .unwrap();
        assert_eq!(ids(&page), vec!["b"]);
        assert!(page.has_more);

        let past_end = c.list_products(&filters("page=99")).await.unwrap();
        assert!(past_end.products.is_empty());
        assert_eq!(past_end.total_count, 4);
    }

    #[tokio::test]
    async fn featured_products_lead() {
        let c = catalog();
        let mut p = product("z", "puma", &["red"], 10.0, 30);
        p.featured = true;
        c.replay_product(p);
        let page = c.list_products(&filters("")).await.unwrap();
        assert_eq!(ids(&page), vec!["z", "b", "c", "a", "d"]);
    }

    #[tokio::test]
    async fn search_matches_brand_label() {
        let c = catalog();
        let page = c.list_products(&filters("search=PUMA")).await.unwrap();
        assert_eq!(page.total_count, 2);
    }

    #[tokio::test]
    async fn price_filter_intersects_bounds_and_ranges() {
        let c = catalog();
        let page = c
            .list_products(&filters("priceMin=30&price[]=0-60&price[]=100-&sort=price_asc"))
            .await
            .unwrap();
        assert_eq!(ids(&page), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn facets_are_disjunctive() {
        let c = catalog();
        let opts = c
            .filter_options(&filters("brand[]=nike&color[]=blue"))
            .await
            .unwrap();
        // brands counted ignoring the brand selection but honouring color=blue
        let brands: Vec<(&str, u64, bool)> = opts
            .brands
            .iter()
            .map(|v| (v.slug.as_str(), v.count, v.selected))
            .collect();
        assert_eq!(brands, vec![("nike", 1, true)]);
        // colors counted over nike products only
        let colors: Vec<(&str, u64)> = opts
            .colors
            .iter()
            .map(|v| (v.slug.as_str(), v.count))
            .collect();
        assert_eq!(colors, vec![("blue", 1), ("red", 2)]);
        assert_eq!(opts.brands[0].name, "Nike");
    }

    #[tokio::test]
    async fn selected_values_survive_with_zero_count() {
        let c = catalog();
        let opts = c
            .filter_options(&filters("brand[]=puma&color[]=blue"))
            .await
            .unwrap();
        let blue = opts.colors.iter().find(|v| v.slug == "blue").unwrap();
        assert_eq!(blue.count, 0);
        assert!(blue.selected);
    }

    #[tokio::test]
    async fn price_bounds_ignore_price_filters() {
        let c = catalog();
        let opts = c
            .filter_options(&filters("priceMax=30&brand[]=nike"))
            .await
            .unwrap();
        assert_eq!(
            opts.price,
            Some(PriceBounds {
                min: 50.0,
                max: 120.0
            })
        );
        let none = c.filter_options(&filters("brand[]=adidas")).await.unwrap();
        assert_eq!(none.price, None);
    }

    #[tokio::test]
    async fn put_product_upserts_and_guards_slugs() {
        let c = catalog();
        let created = c
            .put_product(NewProduct {
                name: "Court Vision".into(),
                brand: "nike".into(),
                category: "shoes".into(),
                gender: "men".into(),
                price: 75.0,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(c.get_product("court-vision").await.unwrap().id, created.id);

        let dup = c
            .put_product(NewProduct {
                slug: Some("court-vision".into()),
                name: "Other".into(),
                brand: "puma".into(),
                category: "shoes".into(),
                gender: "men".into(),
                price: 1.0,
                ..Default::default()
            })
            .await;
        assert!(matches!(dup, Err(StorefrontError::Conflict(_))));

        let renamed = c
            .put_product(NewProduct {
                id: Some(created.id.clone()),
                slug: Some("court-vision-lo".into()),
                name: "Court Vision Lo".into(),
                brand: "nike".into(),
                category: "shoes".into(),
                gender: "men".into(),
                price: 70.0,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(renamed.created_at, created.created_at);
        assert!(c.get_product("court-vision").await.is_err());
        assert_eq!(c.len(), 5);
    }

    #[tokio::test]
    async fn delete_term_refuses_while_referenced() {
        let c = catalog();
        let err = c.delete_term(TaxonomyKind::Brand, "nike").await;
        assert!(matches!(err, Err(StorefrontError::Conflict(_))));
        c.delete_product("a").await.unwrap();
        c.delete_product("b").await.unwrap();
        c.delete_term(TaxonomyKind::Brand, "nike").await.unwrap();
        assert!(matches!(
            c.delete_term(TaxonomyKind::Brand, "nike").await,
            Err(StorefrontError::NotFound(_))
        ));
        assert!(matches!(
            c.delete_product("a").await,
            Err(StorefrontError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn put_term_derives_slug() {
        let c = InMemoryCatalog::new();
        let t = c
            .put_term(
                TaxonomyKind::Category,
                Term {
                    slug: String::new(),
                    name: "Trail Running".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(t.slug, "trail-running");
        assert_eq!(c.list_terms(TaxonomyKind::Category).await.unwrap(), vec![t]);
        assert!(c.list_terms(TaxonomyKind::Brand).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn writes_bump_revision_and_failed_writes_do_not() {
        let c = catalog();
        let start = c.revision();
        assert_eq!(c.product_count(), 4);

        c.put_product(NewProduct {
            name: "Court Low".into(),
            brand: "nike".into(),
            category: "shoes".into(),
            gender: "unisex".into(),
            price: 60.0,
            ..Default::default()
        })
        .await
        .unwrap();
        let after_put = c.revision();
        assert!(after_put > start);
        assert_eq!(c.product_count(), 5);

        assert!(c.delete_term(TaxonomyKind::Brand, "nike").await.is_err());
        assert!(c.delete_product("missing").await.is_err());
        assert_eq!(c.revision(), after_put);

        c.delete_product("d").await.unwrap();
        assert!(c.revision() > after_put);
    }

    #[test]
    fn replay_keeps_first_owner_of_a_slug() {
        let c = catalog();
        let mut clash = product("z", "puma", &["red"], 10.0, 0);
        clash.slug = "shoe-a".into();
        assert!(!c.replay_product(clash));
        assert_eq!(c.len(), 4);

        let mut renamed = product("a", "nike", &["red"], 55.0, 3);
        renamed.slug = "shoe-a-v2".into();
        assert!(c.replay_product(renamed));
        let inner = c.inner.read();
        assert_eq!(inner.by_slug.get("shoe-a-v2").map(String::as_str), Some("a"));
        assert!(!inner.by_slug.contains_key("shoe-a"));
    }
}
