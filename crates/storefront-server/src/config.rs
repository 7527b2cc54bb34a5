use std::{env, fmt::Display, net::SocketAddr, path::PathBuf, str::FromStr};
use storefront_core::{NormalizeOptions, DEFAULT_PAGE_SIZE};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub http_addr: SocketAddr,
    /// JSON-lines catalog snapshot loaded at startup.
    pub catalog_path: Option<PathBuf>,
    /// Storefront page that generated links point at.
    pub listing_path: String,
    pub page_size: u32,
    pub max_page_size: u32,
    /// When set, back-office routes require `Authorization: Bearer <token>`.
    pub admin_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            catalog_path: None,
            listing_path: "/products".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            max_page_size: 100,
            admin_token: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            http_addr: try_load(&lookup, "HTTP_ADDR", defaults.http_addr),
            catalog_path: non_empty("CATALOG_PATH").map(PathBuf::from),
            listing_path: non_empty("LISTING_PATH").unwrap_or(defaults.listing_path),
            page_size: positive(&lookup, "PAGE_SIZE", defaults.page_size),
            max_page_size: positive(&lookup, "MAX_PAGE_SIZE", defaults.max_page_size),
            admin_token: non_empty("ADMIN_TOKEN"),
        }
    }

    pub fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            default_limit: self.page_size,
            max_limit: Some(self.max_page_size.max(self.page_size)),
        }
    }
}

fn try_load<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        None => {
            info!("{key} not set, using default: {default}");
            default
        }
        Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
            default
        }),
    }
}

fn positive(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u32) -> u32 {
    match try_load(lookup, key, default) {
        0 => {
            warn!("{key} must be positive, using default: {default}");
            default
        }
        v => v,
    }
}
