//! Object storage backends.
//!
//! The [`backend::ObjectStore`] trait abstracts over where file bytes
//! physically live.  Implementations cover process memory, local disk
//! and AWS S3.

pub mod aws;
pub mod backend;
pub mod local;
pub mod memory;
