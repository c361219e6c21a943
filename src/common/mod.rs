//! Common utilities and types shared by the dispatcher, handlers and outbound dialers.

pub mod error;
pub mod buffer;
pub mod headers;
pub mod net;
pub mod upstream_url;

pub use error::{Error, Result};
pub use headers::HeaderList;
pub use upstream_url::{UpstreamScheme, UpstreamUrl};
