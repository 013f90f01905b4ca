pub mod cache;
pub mod client;
pub mod namespaces;
pub mod resources;

/// Default user agent for `kubemirror` - automatically uses the package version
///
/// All clients should be created with `client::new(Some(USER_AGENT), context)`.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
