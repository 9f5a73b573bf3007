// forecourt-link: Versioned line-protocol links to forecourt devices over TCP

pub mod error;
pub mod link;
pub mod registry;
pub mod wire;

pub use error::Error;
pub use link::Link;
pub use registry::{DeviceEndpoint, DeviceKind, Registry};
pub use wire::{Reply, ReplyKind, Request, Verb};
