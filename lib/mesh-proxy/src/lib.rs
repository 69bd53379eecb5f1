//! Authorized HTTP forwarding between registered services
pub mod error;
pub mod forwarder;
pub mod path;
pub mod policy;
pub mod server;
pub mod service;
pub mod upstream;

pub use error::MeshError;
pub use forwarder::{AuthorizedForwarder, ProxyRequest, CALLER_ID_HEADER};
pub use policy::ForwardPolicy;
pub use server::serve;
pub use service::MeshService;
pub use upstream::{DispatchError, RequestForwarder, Upstream};
