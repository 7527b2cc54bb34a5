use crate::traits::CartBackend;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use storefront_core::{CartLine, Result};
use tracing::info;

/// Client-side cart state for one owner.
///
/// Constructed and passed around explicitly; call [`CartStore::sync_with_server`]
/// once at startup to reconcile with the persisted cart.
pub struct CartStore {
    owner: String,
    lines: RwLock<Vec<CartLine>>,
    synced: AtomicBool,
}

impl CartStore {
    pub fn new(owner: impl Into<String>) -> Self {
        Self::with_lines(owner, Vec::new())
    }

    pub fn with_lines(owner: impl Into<String>, lines: Vec<CartLine>) -> Self {
        Self {
            owner: owner.into(),
            lines: RwLock::new(merge_lines(Vec::new(), lines)),
            synced: AtomicBool::new(false),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn lines(&self) -> Vec<CartLine> {
        self.lines.read().clone()
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    pub fn item_count(&self) -> u64 {
        self.lines.read().iter().map(|l| u64::from(l.quantity)).sum()
    }

    pub fn add_item(&self, product_id: &str, size: Option<&str>, quantity: u32) {
        if quantity == 0 {
            return;
        }
        let mut lines = self.lines.write();
        match lines.iter_mut().find(|l| l.key() == (product_id, size)) {
            Some(line) => line.quantity = line.quantity.saturating_add(quantity),
            None => lines.push(CartLine {
                product_id: product_id.to_string(),
                size: size.map(str::to_string),
                quantity,
            }),
        }
    }

    /// Zero removes the line.
    pub fn set_quantity(&self, product_id: &str, size: Option<&str>, quantity: u32) {
        if quantity == 0 {
            self.remove_item(product_id, size);
            return;
        }
        let mut lines = self.lines.write();
        if let Some(line) = lines.iter_mut().find(|l| l.key() == (product_id, size)) {
            line.quantity = quantity;
        }
    }

    pub fn remove_item(&self, product_id: &str, size: Option<&str>) {
        self.lines.write().retain(|l| l.key() != (product_id, size));
    }

    pub fn clear(&self) {
        self.lines.write().clear();
    }

    /// Merge local and server lines, persist the result, and adopt it locally.
    ///
    /// Lines added while the backend call is in flight are merged back in
    /// rather than overwritten; they reach the server on the next sync.
    pub async fn sync_with_server(&self, backend: &dyn CartBackend) -> Result<Vec<CartLine>> {
        let merged = backend.merge_cart(&self.owner, self.lines()).await?;
        let adopted = {
            let mut lines = self.lines.write();
            *lines = merge_lines(merged, std::mem::take(&mut *lines));
            lines.clone()
        };
        self.synced.store(true, Ordering::SeqCst);
        info!(owner = %self.owner, lines = adopted.len(), "cart synced");
        Ok(adopted)
    }
}

/// Union by `(product_id, size)`, keeping the larger quantity. Server order
/// first, then lines only present locally. Zero-quantity lines are dropped.
pub fn merge_lines(server: Vec<CartLine>, local: Vec<CartLine>) -> Vec<CartLine> {
    let mut out: Vec<CartLine> = Vec::with_capacity(server.len() + local.len());
    for line in server.into_iter().chain(local) {
        if line.quantity == 0 {
            continue;
        }
        match out.iter_mut().find(|l| l.key() == line.key()) {
            Some(existing) => existing.quantity = existing.quantity.max(line.quantity),
            None => out.push(line),
        }
    }
    out
}

#[derive(Clone, Default)]
pub struct MemoryCartBackend {
    carts: Arc<RwLock<HashMap<String, Vec<CartLine>>>>,
}

impl MemoryCartBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CartBackend for MemoryCartBackend {
    async fn fetch_cart(&self, owner: &str) -> Result<Vec<CartLine>> {
        Ok(self.carts.read().get(owner).cloned().unwrap_or_default())
    }

    async fn save_cart(&self, owner: &str, lines: Vec<CartLine>) -> Result<()> {
        self.carts.write().insert(owner.to_string(), lines);
        Ok(())
    }

    async fn merge_cart(&self, owner: &str, local: Vec<CartLine>) -> Result<Vec<CartLine>> {
        let mut carts = self.carts.write();
        let stored = carts.entry(owner.to_string()).or_default();
        *stored = merge_lines(std::mem::take(stored), local);
        Ok(stored.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(id: &str, size: Option<&str>, quantity: u32) -> CartLine {
        CartLine {
            product_id: id.to_string(),
            size: size.map(str::to_string),
            quantity,
        }
    }

    #[test]
    fn add_merges_same_product_and_size() {
        let cart = CartStore::new("u1");
        cart.add_item("p1", Some("9"), 1);
        cart.add_item("p1", Some("9"), 2);
        cart.add_item("p1", Some("10"), 1);
        cart.add_item("p2", None, 0);
        assert_eq!(
            cart.lines(),
            vec![line("p1", Some("9"), 3), line("p1", Some("10"), 1)]
        );
        assert_eq!(cart.item_count(), 4);
        cart.set_quantity("p1", Some("9"), 0);
        assert_eq!(cart.lines(), vec![line("p1", Some("10"), 1)]);
        cart.clear();
        assert_eq!(cart.item_count(), 0);
    }

    #[test]
    fn merge_keeps_larger_quantity() {
        let merged = merge_lines(
            vec![line("a", None, 2), line("b", Some("m"), 1)],
            vec![line("b", Some("m"), 4), line("c", None, 1), line("a", None, 1)],
        );
        assert_eq!(
            merged,
            vec![line("a", None, 2), line("b", Some("m"), 4), line("c", None, 1)]
        );
    }

    /// Store whose writes race with a local `add_item`.
    struct RacingBackend {
        store: MemoryCartBackend,
        cart: Arc<CartStore>,
    }

    #[async_trait::async_trait]
    impl CartBackend for RacingBackend {
        async fn fetch_cart(&self, owner: &str) -> Result<Vec<CartLine>> {
            self.store.fetch_cart(owner).await
        }

        async fn save_cart(&self, owner: &str, lines: Vec<CartLine>) -> Result<()> {
            self.cart.add_item("added-during-sync", None, 1);
            self.cart.add_item("before", None, 2);
            self.store.save_cart(owner, lines).await
        }
    }

    #[tokio::test]
    async fn sync_keeps_items_added_while_saving() {
        let cart = Arc::new(CartStore::new("u1"));
        cart.add_item("before", None, 1);
        let backend = RacingBackend {
            store: MemoryCartBackend::new(),
            cart: cart.clone(),
        };

        let adopted = cart.sync_with_server(&backend).await.unwrap();
        assert_eq!(
            cart.lines(),
            vec![line("before", None, 3), line("added-during-sync", None, 1)]
        );
        assert_eq!(adopted, cart.lines());
        // the server copy is what was saved before the race
        assert_eq!(
            backend.store.fetch_cart("u1").await.unwrap(),
            vec![line("before", None, 1)]
        );
    }

    #[tokio::test]
    async fn concurrent_merges_for_one_owner_keep_every_line() {
        let backend = MemoryCartBackend::new();
        let (a, b) = tokio::join!(
            backend.merge_cart("u1", vec![line("a", None, 1)]),
            backend.merge_cart("u1", vec![line("b", None, 2)]),
        );
        a.unwrap();
        b.unwrap();
        let mut stored = backend.fetch_cart("u1").await.unwrap();
        stored.sort_by(|x, y| x.product_id.cmp(&y.product_id));
        assert_eq!(stored, vec![line("a", None, 1), line("b", None, 2)]);
    }

    #[tokio::test]
    async fn sync_with_server_reconciles_both_sides() {
        let backend = MemoryCartBackend::new();
        backend
            .save_cart("u1", vec![line("server-only", None, 1)])
            .await
            .unwrap();

        let cart = CartStore::new("u1");
        cart.add_item("local-only", Some("s"), 2);
        assert!(!cart.is_synced());

        let merged = cart.sync_with_server(&backend).await.unwrap();
        assert!(cart.is_synced());
        assert_eq!(merged.len(), 2);
        assert_eq!(cart.lines(), merged);
        assert_eq!(backend.fetch_cart("u1").await.unwrap(), merged);
        assert!(backend.fetch_cart("u2").await.unwrap().is_empty());
    }
}
