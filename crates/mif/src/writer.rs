//! MIF encoding

use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use mifq_fixed_point::to_bits;

use crate::constants::{ADDRESS_RADIX, DATA_RADIX, WORD_WIDTH};
use crate::error::Result;

/// Encode raw words. Address `i` holds `words[i]`.
pub fn encode(words: &[u16]) -> String {
    // Header is ~80 bytes, each content line at most ~18
    let mut out = String::with_capacity(96 + words.len() * 18);
    // Writing to a String cannot fail
    let _ = writeln!(out, "DEPTH = {};", words.len());
    let _ = writeln!(out, "WIDTH = {};", WORD_WIDTH);
    let _ = writeln!(out, "ADDRESS_RADIX = {};", ADDRESS_RADIX);
    let _ = writeln!(out, "DATA_RADIX = {};", DATA_RADIX);
    out.push_str("CONTENT\nBEGIN\n");
    for (addr, word) in words.iter().enumerate() {
        let _ = writeln!(out, "  {} : {:04X};", addr, word);
    }
    out.push_str("END;\n");
    out
}

/// Encode signed values by their two's-complement bit patterns
pub fn encode_signed(values: &[i16]) -> String {
    let words: Vec<u16> = values.iter().map(|&v| to_bits(v)).collect();
    encode(&words)
}

/// Write raw words to `path`, replacing any existing file
pub fn write_mif<P: AsRef<Path>>(path: P, words: &[u16]) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    file.write_all(encode(words).as_bytes())?;
    file.flush()?;
    Ok(())
}

/// Write signed values to `path`
pub fn write_mif_signed<P: AsRef<Path>>(path: P, values: &[i16]) -> Result<()> {
    let words: Vec<u16> = values.iter().map(|&v| to_bits(v)).collect();
    write_mif(path, &words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_exact_layout() {
        let text = encode_signed(&[8192, -16384, 4096, 4096]);
        let expected = "DEPTH = 4;\n\
                        WIDTH = 16;\n\
                        ADDRESS_RADIX = DEC;\n\
                        DATA_RADIX = HEX;\n\
                        CONTENT\n\
                        BEGIN\n  \
                        0 : 2000;\n  \
                        1 : C000;\n  \
                        2 : 1000;\n  \
                        3 : 1000;\n\
                        END;\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_encode_empty() {
        let text = encode(&[]);
        assert!(text.starts_with("DEPTH = 0;\n"));
        assert!(text.ends_with("CONTENT\nBEGIN\nEND;\n"));
    }

    #[test]
    fn test_hex_is_zero_padded_uppercase() {
        let text = encode(&[0x000a, 0xabcd]);
        assert!(text.contains("  0 : 000A;\n"));
        assert!(text.contains("  1 : ABCD;\n"));
    }
}
