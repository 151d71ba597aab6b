//! Package image extraction.
//!
//! # Flow
//! `reference -> fetch -> layer archive (temp) -> per-layer decompress (temp)
//! -> tar scan for the embedded manifest`. The first layer containing
//! `package.yaml` wins; later layers are never read.
//!
//! # Resource discipline
//! Every temporary resource is owned by this call and released on every exit
//! path — success, found-on-a-later-layer, not-found, and mid-scan error:
//! - the working directory and the materialized archive are drop guards
//!   (`TempDir` / `NamedTempFile`);
//! - per-layer scratch files are anonymous `tempfile`s scoped to one loop
//!   iteration, so a many-layer image never accumulates open handles.
//!
//! A leak here is a correctness defect: a run may perform thousands of
//! extractions under high concurrency.

use crate::archive::{decompress, TarReader};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::fetch::{ImageFetcher, ImageRef};

use std::env;
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

/// Name of the embedded manifest entry inside a package layer.
pub const PACKAGE_MANIFEST_NAME: &str = "package.yaml";

/// Extracts the embedded package manifest from a remote image.
pub struct Unpacker {
    fetcher: Arc<dyn ImageFetcher>,
    /// Override for the temp-file root. Tests inject a scratch directory and
    /// assert it is empty afterwards.
    temp_root: Option<PathBuf>,
}

impl Unpacker {
    pub fn new(fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self {
            fetcher,
            temp_root: None,
        }
    }

    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    fn temp_base(&self) -> PathBuf {
        self.temp_root.clone().unwrap_or_else(env::temp_dir)
    }

    /// Retrieve the image behind `package` and return the contents of the
    /// first `package.yaml` found across its layers, in declared order.
    ///
    /// Fails with [`Error::ManifestNotFound`] when no layer carries the
    /// entry; any other failure is corruption or I/O, not absence.
    pub fn unpack(&self, package: &str, token: &CancelToken) -> Result<Vec<u8>> {
        let image: ImageRef = package.parse()?;

        token.check()?;

        let base = self.temp_base();
        // The working directory is never written into; it exists so that any
        // future spill location is already covered by a deletion guard.
        let _workdir = tempfile::Builder::new().prefix("xpkg").tempdir_in(&base)?;
        let mut archive = tempfile::Builder::new()
            .prefix("image")
            .tempfile_in(&base)?;

        tracing::info!(image = %image, "fetching package image");
        let descriptor = self.fetcher.fetch(&image, archive.as_file_mut())?;

        archive.as_file_mut().seek(SeekFrom::Start(0))?;
        let mut layers = TarReader::new(archive.as_file_mut());

        let mut index = 0usize;
        while let Some(layer_meta) = layers.next_entry()? {
            token.check()?;

            // Scoped to this iteration: closed and reclaimed before the next
            // layer is touched, on the error path included.
            let mut layer = tempfile::tempfile_in(&base)?;
            layers.with_entry(&layer_meta, |entry| {
                decompress(entry, &mut layer).map(|_| ())
            })?;
            layer.seek(SeekFrom::Start(0))?;

            if let Some(manifest) = scan_layer(&mut layer)? {
                tracing::info!(
                    image = %image,
                    layer = index,
                    bytes = manifest.len(),
                    "extracted package manifest"
                );
                return Ok(manifest);
            }
            index += 1;
        }

        tracing::debug!(
            image = %image,
            layers = descriptor.layers.len(),
            "no layer carries {PACKAGE_MANIFEST_NAME}"
        );
        Err(Error::ManifestNotFound)
    }
}

/// Scan one decompressed layer as a tar stream for the manifest entry.
fn scan_layer(layer: &mut File) -> Result<Option<Vec<u8>>> {
    let mut tar = TarReader::new(BufReader::new(layer));
    while let Some(meta) = tar.next_entry()? {
        if meta.name == PACKAGE_MANIFEST_NAME {
            return Ok(Some(tar.read_entry(&meta)?));
        }
    }
    Ok(None)
}

// ============================================================================
// Tests
// ============================================================================
