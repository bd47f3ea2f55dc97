mod handler;
mod model;

pub use handler::{
    audit_anomalies, audit_metrics, audit_stats, create_event, get_event, list_events,
    purge_events, verify_event, warm_audit_stats,
};
