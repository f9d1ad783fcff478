//! Resource access: what a conversion may load, and loading it.
//!
//! ```text
//!   engine ──fetch(raw)──▶ ResourceFetcher ──parse──▶ ResourceRef
//!                               │
//!                               ├── decide(ref, ctx) ─ Allow / Deny
//!                               │        ▲
//!                               │        └── again for every redirect hop
//!                               ▼
//!                     data: decode │ file: read │ http(s): GET
//! ```
//!
//! [`policy::decide`] is the single decision point. [`fetch::ResourceFetcher`]
//! is the only component that performs I/O on behalf of an engine.

pub mod fetch;
pub mod policy;
pub mod resource;

pub use fetch::{ResourceFetcher, HTTP_TIMEOUT, MAX_REDIRECTS};
pub use policy::{decide, AccessContext, Decision};
pub use resource::{decode_data_uri, ResourceRef, Scheme};
