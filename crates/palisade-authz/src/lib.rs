#![forbid(unsafe_code)]

//! Tenant-scoped permission groups and authorization checks.
//!
//! [`GroupRepository`] owns the durable group definitions, one settings
//! record per tenant, persisted through [`palisade_store::KeyedStore`].
//! [`AuthorizationResolver`] answers `check` calls from a TTL cache and keeps
//! that cache honest by subscribing to repository mutations. [`CommandGate`]
//! is the thin all-or-any combinator command handlers call.

mod cache;
mod errors;
mod gate;
mod repository;
mod resolver;

pub use cache::{Clock, SystemClock, DEFAULT_CACHE_TTL_SECS};
pub use errors::GroupError;
pub use gate::{CommandGate, Requirement};
pub use repository::{GroupChangeObserver, GroupRepository};
pub use resolver::AuthorizationResolver;
