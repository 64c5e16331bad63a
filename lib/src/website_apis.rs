pub mod derived;
pub mod website;

pub use derived::DerivedKind;
pub use website::{WatchEvent, WatchEventType, Website, WebsiteMetadata, WebsiteSpec};
