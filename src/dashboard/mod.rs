//! Dashboard fan-out (§4.3): a pre-serialized snapshot refreshed on a cadence, plus a
//! streaming delta channel per viewer built on the same registry idiom as ingestion.

mod broadcaster;
mod handler;
mod protocol;
mod snapshot;

pub use broadcaster::{Broadcaster, BroadcasterHandle};
pub use handler::{ws_handler, DashboardState};
pub use protocol::{ServerSummary, StreamDelta, StreamFrame};
pub use snapshot::{SnapshotCache, SnapshotCacheHandle};
