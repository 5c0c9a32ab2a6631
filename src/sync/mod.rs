pub mod color;
pub mod controller;
pub mod coordinator;
pub mod device;
pub mod locks;
pub mod master;
pub mod runtime;
pub mod sync_mode;
pub mod throttle;
pub mod transport;
