//! MIF decoding
//!
//! The reader scans line by line and keeps every `<addr> : <hex>;` entry in
//! file order. Header lines other than DEPTH and WIDTH are ignored. Entries
//! are not sorted by address; [`MifImage::verify`] reports any disorder.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::constants::WORD_WIDTH;
use crate::error::{MifError, Result};

fn content_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(\d+)\s*:\s*([0-9A-Fa-f]+)\s*;").expect("valid MIF content regex")
    })
}

fn header_field() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(DEPTH|WIDTH)\s*=\s*(\d+)\s*;").expect("valid MIF header regex")
    })
}

/// A decoded memory image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MifImage {
    /// DEPTH from the header, if present
    pub declared_depth: Option<usize>,
    /// Words in file order
    pub words: Vec<u16>,
    /// Address of each word, as written in the file
    pub addresses: Vec<usize>,
}

impl MifImage {
    /// Number of content lines decoded
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// True when no content lines were found
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Check that DEPTH matches the number of content lines
    pub fn verify_depth(&self) -> Result<()> {
        let declared = self.declared_depth.ok_or(MifError::MissingDepth)?;
        if declared != self.words.len() {
            return Err(MifError::DepthMismatch {
                declared,
                actual: self.words.len(),
            });
        }
        Ok(())
    }

    /// Check that addresses run 0, 1, 2, ... in file order
    pub fn verify_addresses(&self) -> Result<()> {
        for (expected, &got) in self.addresses.iter().enumerate() {
            if got != expected {
                return Err(MifError::AddressOutOfOrder {
                    line: expected + 1,
                    expected,
                    got,
                });
            }
        }
        Ok(())
    }

    /// Depth and address checks together
    pub fn verify(&self) -> Result<()> {
        self.verify_depth()?;
        self.verify_addresses()
    }

    /// Take the decoded words
    pub fn into_words(self) -> Vec<u16> {
        self.words
    }
}

/// Decode MIF text held in memory
pub fn decode(text: &str) -> Result<MifImage> {
    decode_reader(text.as_bytes())
}

/// Decode MIF text from any buffered reader
pub fn decode_reader<R: BufRead>(reader: R) -> Result<MifImage> {
    let mut image = MifImage::default();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = line_no + 1;

        if let Some(caps) = content_line().captures(&line) {
            let hex = &caps[2];
            let word = u16::from_str_radix(hex, 16).map_err(|_| MifError::ValueOutOfRange {
                line: line_no,
                value: hex.to_string(),
            })?;
            // The address regex only admits digits; overflow past usize is
            // treated as out of order by verify_addresses.
            let addr = caps[1].parse::<usize>().unwrap_or(usize::MAX);
            image.words.push(word);
            image.addresses.push(addr);
            continue;
        }

        if let Some(caps) = header_field().captures(&line) {
            let value: usize = caps[2].parse().unwrap_or(usize::MAX);
            match &caps[1] {
                "DEPTH" => image.declared_depth = Some(value),
                _ => {
                    if value != WORD_WIDTH as usize {
                        return Err(MifError::UnsupportedWidth(
                            u32::try_from(value).unwrap_or(u32::MAX),
                        ));
                    }
                }
            }
        }
    }

    Ok(image)
}

/// Read and decode a MIF file
pub fn read_mif<P: AsRef<Path>>(path: P) -> Result<MifImage> {
    let file = File::open(path)?;
    decode_reader(BufReader::new(file))
}
