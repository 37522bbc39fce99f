//! Storage node: chunk storage, bandwidth accounting, and the TCP
//! server that answers STORE_CHUNK / GET_CHUNK / REPLICATE_CHUNK /
//! GET_STATUS requests.

pub mod bandwidth;
pub mod chunk_store;
pub mod heartbeat;
pub mod server;

pub use chunk_store::ChunkStore;
pub use server::{NodeState, run as run_server};
