pub mod errors;
pub mod filters;
pub mod model;
pub mod query;
pub mod util;

pub use errors::*;
pub use filters::*;
pub use model::*;
pub use query::*;
