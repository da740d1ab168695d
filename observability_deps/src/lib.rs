//! This crate exists to add a layer of indirection between the tracing
//! ecosystem and the rest of the workspace, so that the version of `tracing`
//! in use can be updated in one place.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub use tracing;
