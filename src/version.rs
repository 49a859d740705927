// fleetwatch build identity, served by GET /version and `fleetwatch --version`

/// Crate version baked in at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name, "fleetwatch".
pub const NAME: &str = env!("CARGO_PKG_NAME");
