//! Labeled image sources

use std::io::{Cursor, Read};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::{HarnessError, Result};

/// IDX magic for unsigned-byte, 3-D data (images)
const IDX_IMAGES_MAGIC: u32 = 0x0000_0803;
/// IDX magic for unsigned-byte, 1-D data (labels)
const IDX_LABELS_MAGIC: u32 = 0x0000_0801;

/// One grayscale image with its expected class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledImage {
    pub rows: usize,
    pub cols: usize,
    /// Row-major pixel intensities
    pub pixels: Vec<u8>,
    pub label: u8,
}

/// Indexed, read-only access to labeled images
pub trait LabeledDataset {
    fn len(&self) -> usize;

    fn get(&self, index: usize) -> Result<LabeledImage>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// MNIST-style IDX image and label files held in memory
#[derive(Debug, Clone)]
pub struct IdxDataset {
    rows: usize,
    cols: usize,
    pixels: Vec<u8>,
    labels: Vec<u8>,
}

impl IdxDataset {
    /// Read an image file and its label file
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(images: P, labels: Q) -> Result<Self> {
        let images = std::fs::read(images)?;
        let labels = std::fs::read(labels)?;
        Self::from_bytes(&images, &labels)
    }

    /// Parse IDX bytes
    pub fn from_bytes(images: &[u8], labels: &[u8]) -> Result<Self> {
        let mut img = Cursor::new(images);
        let magic = img.read_u32::<BigEndian>()?;
        if magic != IDX_IMAGES_MAGIC {
            return Err(HarnessError::Dataset(format!(
                "bad image file magic {:#010x}",
                magic
            )));
        }
        let count = img.read_u32::<BigEndian>()? as usize;
        let rows = img.read_u32::<BigEndian>()? as usize;
        let cols = img.read_u32::<BigEndian>()? as usize;

        let mut lbl = Cursor::new(labels);
        let magic = lbl.read_u32::<BigEndian>()?;
        if magic != IDX_LABELS_MAGIC {
            return Err(HarnessError::Dataset(format!(
                "bad label file magic {:#010x}",
                magic
            )));
        }
        let label_count = lbl.read_u32::<BigEndian>()? as usize;
        if label_count != count {
            return Err(HarnessError::Dataset(format!(
                "{} images but {} labels",
                count, label_count
            )));
        }

        // Header fields are untrusted: size checks happen before any allocation
        let pixel_len = count
            .checked_mul(rows)
            .and_then(|n| n.checked_mul(cols))
            .ok_or_else(|| {
                HarnessError::Dataset(format!("image header {} × {} × {} overflows", count, rows, cols))
            })?;
        let image_body = images.len() - img.position() as usize;
        if pixel_len > image_body {
            return Err(HarnessError::Dataset(format!(
                "image file is truncated: header needs {} bytes, {} present",
                pixel_len, image_body
            )));
        }
        let label_body = labels.len() - lbl.position() as usize;
        if count > label_body {
            return Err(HarnessError::Dataset(format!(
                "label file is truncated: header needs {} bytes, {} present",
                count, label_body
            )));
        }

        let mut pixels = vec![0u8; pixel_len];
        img.read_exact(&mut pixels)?;
        let mut labels = vec![0u8; count];
        lbl.read_exact(&mut labels)?;

        Ok(Self {
            rows,
            cols,
            pixels,
            labels,
        })
    }

    /// Image height and width
    pub fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}

impl LabeledDataset for IdxDataset {
    fn len(&self) -> usize {
        self.labels.len()
    }

    fn get(&self, index: usize) -> Result<LabeledImage> {
        let label = *self.labels.get(index).ok_or(HarnessError::IndexOutOfRange {
            index,
            len: self.labels.len(),
        })?;
        let size = self.rows * self.cols;
        Ok(LabeledImage {
            rows: self.rows,
            cols: self.cols,
            pixels: self.pixels[index * size..(index + 1) * size].to_vec(),
            label,
        })
    }
}

/// Images built in memory, mostly for tests and tooling
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    items: Vec<LabeledImage>,
}

impl InMemoryDataset {
    pub fn new(items: Vec<LabeledImage>) -> Self {
        Self { items }
    }

    pub fn push(&mut self, item: LabeledImage) {
        self.items.push(item);
    }
}

impl LabeledDataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn get(&self, index: usize) -> Result<LabeledImage> {
        self.items
            .get(index)
            .cloned()
            .ok_or(HarnessError::IndexOutOfRange {
                index,
                len: self.items.len(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx_files(count: u32, rows: u32, cols: u32) -> (Vec<u8>, Vec<u8>) {
        let mut images = Vec::new();
        for v in [IDX_IMAGES_MAGIC, count, rows, cols] {
            images.extend_from_slice(&v.to_be_bytes());
        }
        images.extend((0..count * rows * cols).map(|i| i as u8));

        let mut labels = Vec::new();
        for v in [IDX_LABELS_MAGIC, count] {
            labels.extend_from_slice(&v.to_be_bytes());
        }
        labels.extend((0..count).map(|i| (i % 10) as u8));
        (images, labels)
    }

    #[test]
    fn test_idx_parse_and_get() {
        let (images, labels) = idx_files(3, 2, 2);
        let ds = IdxDataset::from_bytes(&images, &labels).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.dims(), (2, 2));

        let item = ds.get(2).unwrap();
        assert_eq!(item.pixels, vec![8, 9, 10, 11]);
        assert_eq!(item.label, 2);
    }

    #[test]
    fn test_idx_out_of_range() {
        let (images, labels) = idx_files(2, 1, 1);
        let ds = IdxDataset::from_bytes(&images, &labels).unwrap();
        assert!(matches!(
            ds.get(2),
            Err(HarnessError::IndexOutOfRange { index: 2, len: 2 })
        ));
    }

    #[test]
    fn test_idx_rejects_bad_files() {
        let (images, labels) = idx_files(2, 2, 2);
        assert!(IdxDataset::from_bytes(&labels, &labels).is_err());
        assert!(IdxDataset::from_bytes(&images[..images.len() - 1], &labels).is_err());

        let (_, three_labels) = idx_files(3, 2, 2);
        assert!(IdxDataset::from_bytes(&images, &three_labels).is_err());
    }

    #[test]
    fn test_oversized_header_is_dataset_error() {
        let mut images = Vec::new();
        for v in [IDX_IMAGES_MAGIC, u32::MAX, u32::MAX, u32::MAX] {
            images.extend_from_slice(&v.to_be_bytes());
        }
        let mut labels = Vec::new();
        for v in [IDX_LABELS_MAGIC, u32::MAX] {
            labels.extend_from_slice(&v.to_be_bytes());
        }
        assert!(matches!(
            IdxDataset::from_bytes(&images, &labels),
            Err(HarnessError::Dataset(_))
        ));

        // Counts that multiply fine but exceed the bytes present
        let (images, labels) = idx_files(2, 2, 2);
        let mut big = images.clone();
        big[4..8].copy_from_slice(&1_000_000u32.to_be_bytes());
        let mut big_labels = labels.clone();
        big_labels[4..8].copy_from_slice(&1_000_000u32.to_be_bytes());
        assert!(matches!(
            IdxDataset::from_bytes(&big, &big_labels),
            Err(HarnessError::Dataset(_))
        ));
    }

    #[test]
    fn test_in_memory() {
        let mut ds = InMemoryDataset::default();
        assert!(ds.is_empty());
        ds.push(LabeledImage {
            rows: 1,
            cols: 2,
            pixels: vec![0, 255],
            label: 4,
        });
        assert_eq!(ds.get(0).unwrap().label, 4);
        assert!(ds.get(1).is_err());
    }
}
