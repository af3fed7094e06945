//! Stateless token authentication.
//!
//! [`TokenAuthenticator`] turns a subject and role into a signed, time-bounded
//! credential and turns a presented credential back into [`Claims`], or
//! rejects it with an [`AuthError`].
//!
//! Refresh is a policy decision left to the request pipeline: the
//! authenticator exposes [`TokenAuthenticator::verify_for_refresh`] and the
//! claim timestamps, but never reissues on its own.

mod claims;
mod error;
mod token;

pub use claims::{ANONYMOUS_ROLE, CLAIMS_VERSION, Claims};
pub use error::{AuthError, AuthResult};
pub use token::{DEFAULT_MAX_REFRESH, DEFAULT_TIMEOUT, IssuedToken, JwtSettings, TokenAuthenticator};
