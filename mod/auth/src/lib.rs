//! Credential & authorization subsystem.
//!
//! # Resources
//!
//! - **Account** — local identity, human or service (machine) kind
//! - **Session token** — short-lived signed JWT (access + refresh pair)
//! - **Service token** — long-lived opaque machine credential, stored
//!   as a digest, with scopes / usage caps / IP and user-agent limits
//! - **External identity** — link between a provider-asserted identity
//!   and a local account
//! - **Role / permission graph** — roles assigned to accounts, flattened
//!   into the per-request permission set
//!
//! # Usage
//!
//! ```ignore
//! use verisafe_auth::{api, service::{AuthConfig, AuthService}};
//!
//! let svc = AuthService::new(sql, events, AuthConfig::default())?;
//! let router = api::build_router(svc.clone()); // mounts under /auth
//! ```

pub mod api;
pub mod model;
pub mod service;

pub use service::{AuthConfig, AuthError, AuthService};
