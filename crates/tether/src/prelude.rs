//! Convenience re-exports for the common request path.
//!
//! ```
//! use tether::prelude::*;
//!
//! let spec = RequestSpec::get("http://example.test").expect(ResponseKind::Json);
//! assert_eq!(spec.response_kind(), ResponseKind::Json);
//! ```
//!
//! Transport internals (prepared requests, outcomes, the wire format) are
//! left out; import those from their modules.

// ── Client ──────────────────────────────────────────────────────────
pub use crate::{ClientOptions, ExecutionMode, HttpClient};

// ── Requests and responses ──────────────────────────────────────────
pub use crate::cancel::CancelSignal;
pub use crate::request::{RequestBody, RequestSpec, ResponseKind};
pub use crate::response::{ByteStream, HttpResponse, ResponseData};

// ── Failures ────────────────────────────────────────────────────────
pub use crate::error::{ErrorCause, FailureKind, HttpException};
