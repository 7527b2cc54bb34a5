use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounterVec, IntGauge,
};

pub static OPS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("storefront_ops_total", "Completed operations", &["op"]).unwrap()
});

pub static OP_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "storefront_op_duration_seconds",
        "Operation durations",
        &["op"],
        vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25]
    )
    .unwrap()
});

pub static FILTER_WARNINGS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "storefront_filter_warnings_total",
        "Query inputs dropped or defaulted during normalization",
        &["kind"]
    )
    .unwrap()
});

pub static FALLBACKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "storefront_fallbacks_total",
        "Supervised operations replaced by their fallback",
        &["op"]
    )
    .unwrap()
});

pub static CATALOG_PRODUCTS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("storefront_catalog_products", "Products in the catalog").unwrap()
});
