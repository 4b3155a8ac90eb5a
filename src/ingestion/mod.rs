//! Ingestion fabric (§4.1): a persistent bidirectional JSON-frame WebSocket stream per agent.

pub mod handler;
mod protocol;
mod registry;

pub use handler::{ws_handler, IngestionState};
pub use protocol::{ClientFrame, ServerFrame};
pub use registry::{AgentRegistry, AgentRegistryHandle};
