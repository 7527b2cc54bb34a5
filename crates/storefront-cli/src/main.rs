use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::executor::block_on;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use storefront_core::{
    normalize_with_warnings, remove_params, set_param, toggle_array_param, NormalizeOptions,
    QueryMap, TaxonomyKind,
};
use storefront_storage::{snapshot::read_snapshot, Catalog, InMemoryCatalog};

#[derive(Parser)]
#[command(name = "storefront")]
#[command(about = "Storefront catalog and query tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the normalized filters for a query string.
    Normalize {
        query: String,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        max_limit: Option<u32>,
    },
    /// Rewrite a storefront URL.
    Url {
        #[command(subcommand)]
        op: UrlOp,
    },
    Catalog {
        #[command(subcommand)]
        op: CatalogOp,
    },
}

#[derive(Subcommand)]
enum UrlOp {
    Toggle { url: String, key: String, value: String },
    Set { url: String, key: String, value: String },
    Remove {
        url: String,
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

#[derive(Subcommand)]
enum CatalogOp {
    /// Validate a snapshot and write a JSON report.
    Check {
        path: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
        /// Write the loaded catalog back out (e.g. to recompress as .zst).
        #[arg(long)]
        rewrite: Option<PathBuf>,
    },
    /// Run a listing query against a snapshot.
    Query { path: PathBuf, query: String },
}

fn split_url(url: &str) -> (&str, &str) {
    url.split_once('?').unwrap_or((url, ""))
}

fn rewrite_url(op: &UrlOp) -> String {
    match op {
        UrlOp::Toggle { url, key, value } => {
            let (path, search) = split_url(url);
            toggle_array_param(path, search, key, value)
        }
        UrlOp::Set { url, key, value } => {
            let (path, search) = split_url(url);
            set_param(path, search, key, value)
        }
        UrlOp::Remove { url, keys } => {
            let (path, search) = split_url(url);
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            remove_params(path, search, &keys)
        }
    }
}

fn normalize_report(query: &str, opts: &NormalizeOptions) -> serde_json::Value {
    let (filters, warnings) = normalize_with_warnings(&QueryMap::parse(query), opts);
    json!({
        "canonical": filters.to_query_string(opts),
        "fingerprint": filters.fingerprint(),
        "filters": filters,
        "warnings": warnings,
    })
}

/// Product references with no matching taxonomy term.
fn missing_terms(catalog: &InMemoryCatalog) -> Vec<serde_json::Value> {
    let known: BTreeSet<(TaxonomyKind, String)> = catalog
        .all_terms()
        .into_iter()
        .map(|(kind, term)| (kind, term.slug))
        .collect();
    let mut missing = BTreeSet::new();
    for p in catalog.all_products() {
        for kind in TaxonomyKind::ALL {
            for slug in p.slugs(kind) {
                if !known.contains(&(kind, slug.clone())) {
                    missing.insert((kind, slug.clone()));
                }
            }
        }
    }
    missing
        .into_iter()
        .map(|(kind, slug)| json!({ "kind": kind, "slug": slug }))
        .collect()
}

fn check_catalog(path: &Path) -> Result<(InMemoryCatalog, serde_json::Value)> {
    let contents =
        read_snapshot(path).with_context(|| format!("reading {}", path.display()))?;
    let records = contents.records.len();
    let catalog = InMemoryCatalog::from_records(contents.records);
    let missing = missing_terms(&catalog);
    let report = json!({
        "records": records,
        "skipped": contents.skipped,
        "products": catalog.len(),
        "terms": catalog.all_terms().len(),
        "missing_terms": missing,
        "ok": contents.skipped == 0 && missing.is_empty(),
    });
    Ok((catalog, report))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Normalize {
            query,
            limit,
            max_limit,
        } => {
            let mut opts = NormalizeOptions::default();
            if let Some(limit) = limit {
                opts.default_limit = limit;
            }
            if max_limit.is_some() {
                opts.max_limit = max_limit;
            }
            let report = normalize_report(&query, &opts);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Cmd::Url { op } => println!("{}", rewrite_url(&op)),
        Cmd::Catalog { op } => match op {
            CatalogOp::Check { path, out, rewrite } => {
                let (catalog, report) = check_catalog(&path)?;
                if let Some(dest) = rewrite {
                    let written = catalog
                        .write_snapshot(dest.clone())
                        .with_context(|| format!("writing {}", dest.display()))?;
                    eprintln!("wrote {} records to {}", written, dest.display());
                }
                let body = serde_json::to_vec_pretty(&report)?;
                match out {
                    Some(out) => std::fs::write(out, body)?,
                    None => println!("{}", String::from_utf8_lossy(&body)),
                }
            }
            CatalogOp::Query { path, query } => {
                let (catalog, skipped) = InMemoryCatalog::load(&path)
                    .with_context(|| format!("loading {}", path.display()))?;
                if skipped > 0 {
                    eprintln!("skipped {} unreadable lines", skipped);
                }
                let opts = NormalizeOptions::default();
                let (filters, _) = normalize_with_warnings(&QueryMap::parse(&query), &opts);
                let page = block_on(catalog.list_products(&filters))?;
                println!("{}", serde_json::to_string_pretty(&page)?);
            }
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_ops_keep_unrelated_keys() {
        let toggled = rewrite_url(&UrlOp::Toggle {
            url: "/products?color[]=red&sort=newest".into(),
            key: "color".into(),
            value: "blue".into(),
        });
        assert_eq!(toggled, "/products?color[]=red&color[]=blue&sort=newest");

        let removed = rewrite_url(&UrlOp::Remove {
            url: toggled,
            keys: vec!["color".into()],
        });
        assert_eq!(removed, "/products?sort=newest");

        let set = rewrite_url(&UrlOp::Set {
            url: "/products".into(),
            key: "page".into(),
            value: "2".into(),
        });
        assert_eq!(set, "/products?page=2");
    }

    #[test]
    fn normalize_report_lists_dropped_input() {
        let report = normalize_report("sort=cheap&brand[]=nike", &NormalizeOptions::default());
        assert_eq!(report["canonical"], "brand[]=nike");
        assert_eq!(report["filters"]["brandSlugs"][0], "nike");
        assert_eq!(report["warnings"][0]["kind"], "unknown_sort");
    }

    #[test]
    fn check_flags_unknown_terms_and_bad_lines() {
        let path = std::env::temp_dir().join(format!("storefront-cli-{}.jsonl", std::process::id()));
        std::fs::write(
            &path,
            concat!(
                "{\"kind\":\"term\",\"taxonomy\":\"brand\",\"slug\":\"nike\",\"name\":\"Nike\"}\n",
                "{\"kind\":\"product\",\"id\":\"p1\",\"slug\":\"air\",\"name\":\"Air\",",
                "\"brand\":\"nike\",\"category\":\"running\",\"gender\":\"men\",",
                "\"price\":120.0,\"created_at\":\"2024-01-01T00:00:00Z\"}\n",
                "garbage\n"
            ),
        )
        .unwrap();
        let (catalog, report) = check_catalog(&path).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(report["skipped"], 1);
        assert_eq!(report["ok"], false);
        let missing = report["missing_terms"].as_array().unwrap();
        assert_eq!(missing.len(), 2);
        assert_eq!(missing[0], json!({"kind": "gender", "slug": "men"}));
        std::fs::remove_file(&path).ok();
    }
}
