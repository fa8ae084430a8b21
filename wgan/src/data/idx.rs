use std::{fs, path::Path};

use crate::{Result, WganErr};

const IMAGES_MAGIC: u32 = 0x0000_0803;
const LABELS_MAGIC: u32 = 0x0000_0801;

/// The raw contents of an IDX3 image file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdxImages {
    pub count: usize,
    pub rows: usize,
    pub cols: usize,
    /// Every image flattened in row-major order, one after the other.
    pub pixels: Vec<u8>,
}

impl IdxImages {
    pub fn image_len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn image(&self, i: usize) -> &[u8] {
        let len = self.image_len();
        &self.pixels[i * len..(i + 1) * len]
    }
}

pub fn read_idx_images<P: AsRef<Path>>(path: P) -> Result<IdxImages> {
    parse_idx_images(&fs::read(path)?)
}

pub fn read_idx_labels<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    parse_idx_labels(&fs::read(path)?)
}

/// Parses a big-endian IDX3 `u8` image buffer.
pub fn parse_idx_images(bytes: &[u8]) -> Result<IdxImages> {
    let mut header = Header::new(bytes);
    header.magic(IMAGES_MAGIC)?;
    let count = header.dim()?;
    let rows = header.dim()?;
    let cols = header.dim()?;

    let len = count
        .checked_mul(rows)
        .and_then(|n| n.checked_mul(cols))
        .ok_or_else(|| {
            WganErr::InvalidDataset(format!(
                "idx dimensions {count}x{rows}x{cols} don't fit in memory"
            ))
        })?;

    let pixels = header.body(len)?;
    Ok(IdxImages {
        count,
        rows,
        cols,
        pixels: pixels.to_vec(),
    })
}

/// Parses a big-endian IDX1 `u8` label buffer.
pub fn parse_idx_labels(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut header = Header::new(bytes);
    header.magic(LABELS_MAGIC)?;
    let count = header.dim()?;

    Ok(header.body(count)?.to_vec())
}

struct Header<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Header<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn next_u32(&mut self) -> Result<u32> {
        let end = self.offset + 4;
        let word = self.bytes.get(self.offset..end).ok_or_else(|| {
            WganErr::InvalidDataset(format!("truncated idx header at byte {}", self.offset))
        })?;

        self.offset = end;
        Ok(u32::from_be_bytes([word[0], word[1], word[2], word[3]]))
    }

    fn magic(&mut self, expected: u32) -> Result<()> {
        let magic = self.next_u32()?;
        if magic != expected {
            return Err(WganErr::InvalidDataset(format!(
                "bad idx magic number {magic:#010x}, expected {expected:#010x}"
            )));
        }

        Ok(())
    }

    fn dim(&mut self) -> Result<usize> {
        Ok(self.next_u32()? as usize)
    }

    fn body(&self, len: usize) -> Result<&'a [u8]> {
        let body = &self.bytes[self.offset..];
        if body.len() < len {
            return Err(WganErr::InvalidDataset(format!(
                "truncated idx file, expected {len} bytes of data but found {}",
                body.len()
            )));
        }

        Ok(&body[..len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn images_file(count: u32, rows: u32, cols: u32, pixels: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for word in [IMAGES_MAGIC, count, rows, cols] {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        bytes.extend_from_slice(pixels);
        bytes
    }

    #[test]
    fn parses_images() {
        let pixels: Vec<u8> = (0..12).collect();
        let images = parse_idx_images(&images_file(3, 2, 2, &pixels)).unwrap();

        assert_eq!((images.count, images.rows, images.cols), (3, 2, 2));
        assert_eq!(images.image(1), &[4, 5, 6, 7]);
    }

    #[test]
    fn parses_labels() {
        let mut bytes = LABELS_MAGIC.to_be_bytes().to_vec();
        bytes.extend_from_slice(&3u32.to_be_bytes());
        bytes.extend_from_slice(&[7, 1, 9]);

        assert_eq!(parse_idx_labels(&bytes).unwrap(), [7, 1, 9]);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = images_file(1, 1, 1, &[0]);
        bytes[3] = 0x01;

        assert!(matches!(
            parse_idx_images(&bytes),
            Err(WganErr::InvalidDataset(_))
        ));
        assert!(parse_idx_labels(&images_file(1, 1, 1, &[0])).is_err());
    }

    #[test]
    fn rejects_truncated_files() {
        let bytes = images_file(2, 2, 2, &[0; 7]);
        assert!(parse_idx_images(&bytes).is_err());
        assert!(parse_idx_images(&bytes[..10]).is_err());
    }

    #[test]
    fn rejects_overflowing_dimensions() {
        let bytes = images_file(u32::MAX, u32::MAX, u32::MAX, &[0; 4]);
        assert!(matches!(
            parse_idx_images(&bytes),
            Err(WganErr::InvalidDataset(_))
        ));
    }
}
