// SPDX-License-Identifier: CEPL-1.0
//! Binary PPM (P6) decoding into RGBA8, with a built-in checkerboard fallback.

use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PixmapError {
    #[error("not a binary PPM (expected P6 magic)")]
    BadMagic,
    #[error("bad {field} in PPM header")]
    BadHeader { field: &'static str },
    #[error("unsupported maxval {0}, only 255 is accepted")]
    UnsupportedMaxval(u32),
    #[error("pixel data truncated: need {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pixmap {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8, row-major, top row first.
    pub rgba: Vec<u8>,
}

impl Pixmap {
    /// 2×2 white/dark-grey checkerboard.
    pub fn checkerboard() -> Self {
        const WHITE: [u8; 4] = [255, 255, 255, 255];
        const GREY: [u8; 4] = [50, 50, 50, 255];
        Self {
            width: 2,
            height: 2,
            rgba: [WHITE, GREY, GREY, WHITE].concat(),
        }
    }
}

struct Header<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Header<'_> {
    fn skip_space_and_comments(&mut self) {
        while let Some(&b) = self.bytes.get(self.pos) {
            if b == b'#' {
                while self.bytes.get(self.pos).is_some_and(|&c| c != b'\n') {
                    self.pos += 1;
                }
            } else if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn number(&mut self, field: &'static str) -> Result<u32, PixmapError> {
        self.skip_space_and_comments();
        let start = self.pos;
        while self.bytes.get(self.pos).is_some_and(u8::is_ascii_digit) {
            self.pos += 1;
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(PixmapError::BadHeader { field })
    }
}

pub fn parse_ppm(bytes: &[u8]) -> Result<Pixmap, PixmapError> {
    if !bytes.starts_with(b"P6") {
        return Err(PixmapError::BadMagic);
    }
    let mut header = Header { bytes, pos: 2 };
    let width = header.number("width")?;
    let height = header.number("height")?;
    let maxval = header.number("maxval")?;
    if width == 0 {
        return Err(PixmapError::BadHeader { field: "width" });
    }
    if height == 0 {
        return Err(PixmapError::BadHeader { field: "height" });
    }
    if maxval != 255 {
        return Err(PixmapError::UnsupportedMaxval(maxval));
    }
    // Exactly one whitespace byte separates the header from the raster.
    match bytes.get(header.pos) {
        Some(b) if b.is_ascii_whitespace() => header.pos += 1,
        _ => return Err(PixmapError::BadHeader { field: "separator" }),
    }

    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(3))
        .ok_or(PixmapError::BadHeader { field: "size" })?;
    let raster = &bytes[header.pos..];
    if raster.len() < expected {
        return Err(PixmapError::Truncated {
            expected,
            found: raster.len(),
        });
    }

    let rgba = raster[..expected]
        .chunks_exact(3)
        .flat_map(|rgb| [rgb[0], rgb[1], rgb[2], 255])
        .collect();
    Ok(Pixmap {
        width,
        height,
        rgba,
    })
}

pub fn load_ppm(path: &Path) -> Result<Pixmap, PixmapError> {
    let bytes = std::fs::read(path).map_err(|source| PixmapError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_ppm(&bytes)
}

/// Texture errors never stop startup: anything short of a valid P6 file yields the checkerboard.
pub fn load_or_fallback(path: Option<&Path>) -> Pixmap {
    let Some(path) = path else {
        info!("no texture configured, using checkerboard");
        return Pixmap::checkerboard();
    };
    match load_ppm(path) {
        Ok(pixmap) => {
            info!("texture {} ({}x{})", path.display(), pixmap.width, pixmap.height);
            pixmap
        }
        Err(e) => {
            warn!("texture {}: {e}; using checkerboard", path.display());
            Pixmap::checkerboard()
        }
    }
}
