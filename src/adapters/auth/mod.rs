//! Authentication adapters implementing the `SessionValidator` port.
//!
//! - `jwt` - HS256 access tokens signed with a shared secret
//! - `mock` - fixed token table for tests

mod jwt;
mod mock;

pub use jwt::{JwtConfig, JwtSessionValidator, SessionClaims};
pub use mock::MockSessionValidator;
