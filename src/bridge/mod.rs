//! Wire layer shared by the parent-side channel and the worker loop.
//!
//! - **protocol**: frame types (`WireRequest` / `WireResponse`)
//! - **codec**: length-prefixed JSON framing over AsyncRead/AsyncWrite

pub mod codec;
pub mod protocol;
