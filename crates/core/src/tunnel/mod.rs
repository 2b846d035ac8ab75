//! One-shot helpers built on the engine's dial primitive.

mod fetch;
mod resolve;

pub use self::fetch::{FETCH_DIAL_TIMEOUT, FetchResponse};
pub(crate) use self::fetch::{TlsSlot, fetch, prepare};
pub use self::resolve::RESOLVE_TIMEOUT;
pub(crate) use self::resolve::{LocalApiSlot, resolve, validate as validate_hostname};
