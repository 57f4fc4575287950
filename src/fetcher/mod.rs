//! Turning a source URL into a catalog record
//!
//! - [`transport`] — Conditional GET with `If-None-Match` / `If-Modified-Since`
//! - [`extract`] — Unpacking archives with `unsquashfs`
//! - [`manifest`] — Reading `[Desktop Entry]` manifests and their icons
//! - [`builder`] — The [`RecordBuilder`] tying the three together

pub mod builder;
pub mod extract;
pub mod manifest;
pub mod transport;

pub use builder::RecordBuilder;
pub use extract::{PackageExtractor, UnsquashfsExtractor};
pub use manifest::DesktopEntry;
pub use transport::{ConditionalGetter, FetchResponse, HttpGetter};
