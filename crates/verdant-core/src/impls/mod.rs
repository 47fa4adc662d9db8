//! Concrete adapters for the ports.

pub mod file_kv;
pub mod inmem_kv;
pub mod network;

pub use self::file_kv::FileKeyValueStore;
pub use self::inmem_kv::InMemoryKeyValueStore;
pub use self::network::NetworkMonitor;
