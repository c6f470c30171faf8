//! MIF header constants

/// Word width in bits. The only width this codec writes or accepts.
pub const WORD_WIDTH: u32 = 16;

/// Address radix written to the header
pub const ADDRESS_RADIX: &str = "DEC";

/// Data radix written to the header
pub const DATA_RADIX: &str = "HEX";

/// Digits per data word (16 bits in hex)
pub const HEX_DIGITS: usize = 4;
