mod handler;
mod model;

pub use handler::{check_policy, rate_limit_metrics};
