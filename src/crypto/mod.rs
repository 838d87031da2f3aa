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


//! Cryptography for the request/response protocol
//!
//! The backend only accepts request payloads encrypted with a fixed
//! process-wide AES-128 key in ECB mode and answers with payloads encrypted
//! the same way.
//!
//! # Protocol Notes
//! - **Cipher**: AES-128, ECB, PKCS#7 padding, no IV
//! - **Key**: fixed 16-byte ASCII constant shared with the backend
//! - **Text encodings**: raw bytes, hexadecimal (upper-case on output), base64
//!
//! ECB without an IV is a known weakness of the upstream protocol. It is kept
//! only for bit-compatibility with the existing backend and must not be
//! reused for anything new.

pub mod codec;

// Re-export commonly used types
pub use codec::{decrypt, decrypt_text, encrypt, encrypt_hex, Encoding};
