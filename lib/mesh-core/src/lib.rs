//! Core service directory functionality
//!
//! This library provides:
//! - Service records and the closed set of capability scopes
//! - Service registry for registering and looking up services by id

pub mod error;
pub mod record;
pub mod registry;

pub use error::{CoreError, Result};
pub use record::{Scope, ServiceRecord};
pub use registry::ServiceRegistry;
