//! Traffic manager (§4.5): billing-period accounting over counter deltas reported through
//! live-state samples, grounded in the teacher's `db::duckdb_service::vps_traffic_service`.

mod manager;

pub use manager::{Manager, ManagerHandle};
