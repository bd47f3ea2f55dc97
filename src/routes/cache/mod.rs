mod handler;
mod model;

pub use handler::{cache_metrics, invalidate};
