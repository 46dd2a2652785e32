/// Upstream API clients.
///
/// Each submodule wraps one service: URL construction, response structs and
/// a reshaping step into crate types. Shared retry plumbing lives in `http`.

pub mod gridstatus;
pub mod http;
pub mod nwps;
pub mod openmeteo;
pub mod snapshot;
