//! mifq MIF Codec
//!
//! Text encoding used to preload hardware memories with an address-indexed
//! sequence of 16-bit words: decimal addresses, four uppercase hex digits per
//! word, one word per line.

mod constants;
mod error;
mod reader;
mod writer;

pub use constants::*;
pub use error::{MifError, Result};
pub use reader::{decode, decode_reader, read_mif, MifImage};
pub use writer::{encode, encode_signed, write_mif, write_mif_signed};
