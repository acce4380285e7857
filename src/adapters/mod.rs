//! Adapters
//!
//! Concrete bindings for the ports in [`crate::ports`].

mod connectivity;
mod file_store;
mod http_origin;
mod memory;
mod ws_transport;

pub use connectivity::{probe_address, spawn_connectivity_probe};
pub use file_store::FileDurableStore;
pub use http_origin::HttpOrigin;
pub use memory::{
    ChannelTransport, ManualClock, MemoryDurableStore, MemoryOrigin, PeerConnection, SystemClock,
    WatchNetworkStatus,
};
pub use ws_transport::WsTransport;
