use storefront_core::{
    CartLine, FilterOptions, NewProduct, NormalizedProductFilters, Product, ProductPage, Result,
    TaxonomyKind, Term,
};

/// Product catalog backing the storefront listing and the back-office.
///
/// `list_products` and `filter_options` are always handed the same
/// normalized filters for a page view, so they observe one filter snapshot.
#[async_trait::async_trait]
pub trait Catalog: Send + Sync + 'static {
    async fn list_products(&self, filters: &NormalizedProductFilters) -> Result<ProductPage>;
    async fn filter_options(&self, filters: &NormalizedProductFilters) -> Result<FilterOptions>;

    async fn get_product(&self, slug: &str) -> Result<Product>;
    async fn put_product(&self, req: NewProduct) -> Result<Product>;
    async fn delete_product(&self, id: &str) -> Result<()>;

    // Back-office taxonomy (brands, categories, colors, sizes, genders)
    async fn list_terms(&self, kind: TaxonomyKind) -> Result<Vec<Term>>;
    async fn put_term(&self, kind: TaxonomyKind, term: Term) -> Result<Term>;
    async fn delete_term(&self, kind: TaxonomyKind, slug: &str) -> Result<()>;

    /// Changes whenever a write may have changed listing or facet output.
    fn revision(&self) -> u64 {
        0
    }

    fn product_count(&self) -> usize {
        self.all_products().len()
    }

    // Export (for snapshot dumps)
    fn all_products(&self) -> Vec<Product> {
        Vec::new()
    }

    fn all_terms(&self) -> Vec<(TaxonomyKind, Term)> {
        Vec::new()
    }
}

/// Server-side cart persistence that a [`crate::CartStore`] syncs against.
#[async_trait::async_trait]
pub trait CartBackend: Send + Sync {
    async fn fetch_cart(&self, owner: &str) -> Result<Vec<CartLine>>;
    async fn save_cart(&self, owner: &str, lines: Vec<CartLine>) -> Result<()>;

    /// Merge `local` into the stored cart and persist the result.
    ///
    /// The default is fetch, merge, save. Backends that can do this in one
    /// step should override it, otherwise concurrent merges for one owner can
    /// drop each other's lines.
    async fn merge_cart(&self, owner: &str, local: Vec<CartLine>) -> Result<Vec<CartLine>> {
        let remote = self.fetch_cart(owner).await?;
        let merged = crate::cart::merge_lines(remote, local);
        self.save_cart(owner, merged.clone()).await?;
        Ok(merged)
    }
}
