//! Still images: one file, or every supported image in a directory.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::{extension_of, Read, IMAGE_EXTENSIONS};

pub(crate) struct StillSource {
    pending: VecDeque<PathBuf>,
    /// A folder skips unreadable entries; a single image reports them.
    skip_unreadable: bool,
}

impl StillSource {
    pub(crate) fn single(path: &Path) -> Self {
        Self {
            pending: VecDeque::from([path.to_path_buf()]),
            skip_unreadable: false,
        }
    }

    /// Enumerates supported images in `dir`, sorted by path.
    pub(crate) fn folder(dir: &Path) -> Result<Self> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("failed to list image folder {}", dir.display()))?
        {
            let path = entry?.path();
            if path.is_file() && IMAGE_EXTENSIONS.contains(&extension_of(&path).as_str()) {
                paths.push(path);
            }
        }
        paths.sort();
        log::debug!("StillSource: {} images in {}", paths.len(), dir.display());
        Ok(Self {
            pending: paths.into(),
            skip_unreadable: true,
        })
    }

    pub(crate) fn next_image(&mut self) -> Read {
        while let Some(path) = self.pending.pop_front() {
            match image::open(&path) {
                Ok(decoded) => return Read::Frame(decoded.to_rgb8()),
                Err(err) if self.skip_unreadable => {
                    log::warn!("StillSource: skipping {}: {}", path.display(), err);
                }
                Err(err) => {
                    return Read::Failed(
                        anyhow::Error::new(err)
                            .context(format!("failed to decode image {}", path.display())),
                    )
                }
            }
        }
        Read::End
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn folder_yields_sorted_images_and_skips_broken_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        RgbImage::from_pixel(4, 2, Rgb([200, 0, 0])).save(dir.path().join("b.png"))?;
        RgbImage::from_pixel(2, 2, Rgb([0, 200, 0])).save(dir.path().join("a.png"))?;
        std::fs::write(dir.path().join("c.jpg"), b"not a jpeg")?;
        std::fs::write(dir.path().join("readme.txt"), b"ignored")?;

        let mut source = StillSource::folder(dir.path())?;
        let Read::Frame(first) = source.next_image() else {
            panic!("expected a.png");
        };
        assert_eq!(first.dimensions(), (2, 2));
        let Read::Frame(second) = source.next_image() else {
            panic!("expected b.png");
        };
        assert_eq!(second.dimensions(), (4, 2));
        assert!(matches!(source.next_image(), Read::End));
        Ok(())
    }

    #[test]
    fn broken_single_image_is_a_failed_read() -> Result<()> {
        let file = tempfile::Builder::new().suffix(".png").tempfile()?;
        let mut source = StillSource::single(file.path());
        assert!(matches!(source.next_image(), Read::Failed(_)));
        assert!(matches!(source.next_image(), Read::End));
        Ok(())
    }
}
