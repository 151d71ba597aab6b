//! Layered-archive plumbing.
//!
//! # Scope
//! Sequential tar reading/writing and gzip sniffing used to materialize and
//! scan package images. Scanner-oriented: streaming only, no seeks, no
//! general extraction features.

pub mod gzip;
pub mod tar;

pub use gzip::{decompress, is_gzip_magic, GZIP_MAGIC};
pub use tar::{TarEntryMeta, TarReader, TarWriter, TAR_BLOCK_LEN};
