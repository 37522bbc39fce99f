//! Shared wire protocol, chunking, and configuration types for the cluster.

pub mod chunker;
pub mod client;
pub mod config;
pub mod placement;
pub mod wire;

pub use config::ClusterConfig;
pub use placement::{select as select_placement, PlacementCandidate};
pub use wire::{read_frame, write_frame, Envelope, Frame, MessageType, WireError, WireErrorCode};
