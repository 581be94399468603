//! LAN radio: host endpoints, tuning client, peer discovery, clock sync.

pub mod client;
pub mod clock;
pub mod host;
pub mod scanner;
pub mod wire;

pub use client::RadioClient;
pub use host::{DEFAULT_PORT, RadioHost};
pub use scanner::{PeerInfo, PeerScanner, local_ipv4};
pub use wire::{PeerStatus, parse_status, render_status};
