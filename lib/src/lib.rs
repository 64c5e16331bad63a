pub mod config;
pub mod control_plane;
pub mod controller;
pub mod error;
pub mod reconciler;
pub mod template;
pub mod watch;
pub mod website_apis;

pub use config::Config;
pub use control_plane::{ControlPlane, ControlPlaneClient, ControlPlaneError};
pub use controller::Controller;
pub use error::{Classify, ErrorClass};
pub use reconciler::{Action, ReconcileError, Reconciler};
pub use template::{Template, TemplateError};
pub use watch::{DecodeError, EventDecoder, WatchStream};
pub use website_apis::{DerivedKind, WatchEvent, WatchEventType, Website};
