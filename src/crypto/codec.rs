// TuneVault - Music Library Downloader
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Fixed-key block cipher codec
//!
//! `encrypt` and `decrypt` take the input's text encoding and the encoding
//! wanted on output, so every call site can speak the representation the
//! wire uses at that point:
//!
//! | call site          | input  | output |
//! |--------------------|--------|--------|
//! | request signing    | Raw    | Hex    |
//! | response decoding  | Hex    | Raw    |
//!
//! # Example
//! ```
//! use tunevault_core::crypto::codec::{decrypt_text, encrypt, Encoding};
//!
//! let ciphertext = encrypt(b"hello", Encoding::Raw, Encoding::Hex).unwrap();
//! let plaintext = decrypt_text(&ciphertext, Encoding::Hex).unwrap();
//! assert_eq!(plaintext, "hello");
//! ```

use crate::error::CodecError;
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyInit};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

type Aes128EcbEnc = ecb::Encryptor<aes::Aes128>;
type Aes128EcbDec = ecb::Decryptor<aes::Aes128>;

/// Shared protocol key
const EAPI_KEY: &[u8; 16] = b"e82ckenh8dichen8";

/// AES block size in bytes
const BLOCK_SIZE: usize = 16;

/// Text representation of a byte payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Bytes as-is
    Raw,
    /// Hexadecimal digits (upper-case when produced)
    Hex,
    /// Standard base64 with padding
    Base64,
}

impl Encoding {
    /// Turn text in this encoding into bytes
    pub fn decode(self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            Encoding::Raw => Ok(input.to_vec()),
            Encoding::Hex => hex::decode(trim_ascii(input)).map_err(|e| match e {
                hex::FromHexError::OddLength => CodecError::OddLength(trim_ascii(input).len()),
                hex::FromHexError::InvalidHexCharacter { c, index } => {
                    CodecError::InvalidHexCharacter { character: c, index }
                }
                hex::FromHexError::InvalidStringLength => {
                    CodecError::OddLength(trim_ascii(input).len())
                }
            }),
            Encoding::Base64 => general_purpose::STANDARD
                .decode(trim_ascii(input))
                .map_err(|e| CodecError::InvalidBase64(e.to_string())),
        }
    }

    /// Turn bytes into text in this encoding
    pub fn encode(self, bytes: &[u8]) -> Vec<u8> {
        match self {
            Encoding::Raw => bytes.to_vec(),
            Encoding::Hex => hex::encode_upper(bytes).into_bytes(),
            Encoding::Base64 => general_purpose::STANDARD.encode(bytes).into_bytes(),
        }
    }
}

/// Encrypt `input` (given in `input_encoding`) and return the ciphertext in
/// `output_encoding`
pub fn encrypt(
    input: &[u8],
    input_encoding: Encoding,
    output_encoding: Encoding,
) -> Result<Vec<u8>, CodecError> {
    let plaintext = input_encoding.decode(input)?;
    let ciphertext = Aes128EcbEnc::new(EAPI_KEY.into()).encrypt_padded_vec_mut::<Pkcs7>(&plaintext);
    Ok(output_encoding.encode(&ciphertext))
}

/// Encrypt UTF-8 text into upper-case hex, the form the request signer sends
pub fn encrypt_hex(plaintext: &str) -> String {
    let ciphertext =
        Aes128EcbEnc::new(EAPI_KEY.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
    hex::encode_upper(ciphertext)
}

/// Decrypt `input` (given in `input_encoding`) and return the plaintext in
/// `output_encoding`
pub fn decrypt(
    input: &[u8],
    input_encoding: Encoding,
    output_encoding: Encoding,
) -> Result<Vec<u8>, CodecError> {
    let ciphertext = input_encoding.decode(input)?;
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CodecError::BlockMisaligned(ciphertext.len()));
    }

    let plaintext = Aes128EcbDec::new(EAPI_KEY.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| CodecError::BadPadding)?;

    Ok(output_encoding.encode(&plaintext))
}

/// Decrypt into UTF-8 text
pub fn decrypt_text(input: &[u8], input_encoding: Encoding) -> Result<String, CodecError> {
    let plaintext = decrypt(input, input_encoding, Encoding::Raw)?;
    String::from_utf8(plaintext).map_err(|_| CodecError::InvalidUtf8)
}

fn trim_ascii(input: &[u8]) -> &[u8] {
    let start = input
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(input.len());
    let end = input
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &input[start..end]
}
