pub mod discovery;
pub mod rest;

/// Port the panels announce over mDNS unless told otherwise.
pub const DEFAULT_PORT: u16 = 9123;
