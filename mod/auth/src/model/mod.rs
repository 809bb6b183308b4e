mod account;
mod claims;
mod context;
mod identity;
mod service_token;

pub use account::*;
pub use claims::*;
pub use context::*;
pub use identity::*;
pub use service_token::*;
