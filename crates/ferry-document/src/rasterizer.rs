//! Page-to-image conversion.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use image::DynamicImage;
use tokio::process::Command;
use tracing::debug;

use crate::error::{DocumentError, Result};

/// Converts every page of a document to an image, in page order.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn rasterize(&self, document: &[u8], dpi: u32) -> Result<Vec<DynamicImage>>;
}

/// Rasterizer backed by poppler's `pdftoppm`.
#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    program: PathBuf,
    timeout: Duration,
}

impl Default for PdftoppmRasterizer {
    fn default() -> Self {
        Self {
            program: PathBuf::from("pdftoppm"),
            timeout: Duration::from_secs(120),
        }
    }
}

impl PdftoppmRasterizer {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    async fn run(&self, document: &[u8], dpi: u32) -> anyhow::Result<Vec<DynamicImage>> {
        let dir = tempfile::tempdir().context("creating scratch directory")?;
        let input = dir.path().join("input.pdf");
        let prefix = dir.path().join("page");
        tokio::fs::write(&input, document)
            .await
            .context("writing document to scratch directory")?;

        let mut command = Command::new(&self.program);
        command
            .arg("-png")
            .arg("-r")
            .arg(dpi.to_string())
            .arg(&input)
            .arg(&prefix)
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| anyhow!("timed out after {:?}", self.timeout))?
            .with_context(|| format!("spawning {}", self.program.display()))?;
        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let pages = page_files(dir.path())?;
        debug!(pages = pages.len(), dpi, "document rasterized");

        // Decoding is CPU bound.
        tokio::task::spawn_blocking(move || {
            let images = pages
                .iter()
                .map(|path| {
                    image::open(path).with_context(|| format!("decoding {}", path.display()))
                })
                .collect::<anyhow::Result<Vec<_>>>();
            drop(dir);
            images
        })
        .await
        .context("decoder task panicked")?
    }
}

#[async_trait]
impl Rasterizer for PdftoppmRasterizer {
    async fn rasterize(&self, document: &[u8], dpi: u32) -> Result<Vec<DynamicImage>> {
        self.run(document, dpi)
            .await
            .map_err(|e| DocumentError::Rasterize(format!("{e:#}")))
    }
}

/// `page-N.png` files in `dir`, ordered by N.
///
/// pdftoppm zero-pads N to the width of the page count, so a plain name
/// sort is not enough.
fn page_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut numbered = Vec::new();
    for entry in std::fs::read_dir(dir).context("listing rasterizer output")? {
        let path = entry?.path();
        if let Some(n) = page_number(&path) {
            numbered.push((n, path));
        }
    }
    numbered.sort_by_key(|(n, _)| *n);
    Ok(numbered.into_iter().map(|(_, p)| p).collect())
}

fn page_number(path: &Path) -> Option<u32> {
    if path.extension()? != "png" {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix("page-")?
        .parse()
        .ok()
}
