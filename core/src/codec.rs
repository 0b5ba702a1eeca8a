//! Wire framing: `[total_len: u32 BE][target: 8 bytes][body][checksum: u8]`.
//!
//! Grounded on `neutronium::net::channel::Channel::{write, read}` and
//! `neutronium::net::frame::Frame`, simplified down to the single payload shape the pipeline
//! needs: no separate control-frame category, no sequence numbers -- just a length-prefixed,
//! checksummed, optionally-ciphered envelope addressed by an 8-byte target tag.

use byteorder::{BigEndian, ByteOrder};
use std::fmt;

/// An 8-byte, NUL-padded routing tag carried in every frame.
pub type Target = [u8; 8];

/// A body transform applied in place. Plaintext uses a no-op; ciphers must be self-inverse
/// since the same function is registered for both encrypt and decrypt.
pub type Cipher = fn(&mut [u8]);

pub const HEADER_SIZE: usize = 12;
pub const CHECKSUM_SIZE: usize = 1;
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + CHECKSUM_SIZE;
pub const DEFAULT_FRAME_CAPACITY: usize = 4096;

/// Reserved target for the server's post-accept handshake frame.
pub const SEC_ARG: Target = *b"SEC_ARG\0";

#[derive(Debug, Eq, PartialEq)]
pub enum CodecError {
    TooShort,
    LengthMismatch,
    ChecksumFail,
    BufferTooSmall,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::TooShort => write!(f, "frame shorter than the minimum header + checksum"),
            CodecError::LengthMismatch => write!(f, "declared total_len does not match frame size"),
            CodecError::ChecksumFail => write!(f, "checksum does not match frame contents"),
            CodecError::BufferTooSmall => write!(f, "output buffer too small for this frame"),
        }
    }
}

impl std::error::Error for CodecError {}

pub struct ParsedFrame<'a> {
    pub target: Target,
    pub body: &'a [u8],
}

/// Truncates (or zero-pads) `name` into an 8-byte target tag.
pub fn target_from_str(name: &str) -> Target {
    let mut target = [0u8; 8];
    let bytes = name.as_bytes();
    let n = bytes.len().min(8);
    target[..n].copy_from_slice(&bytes[..n]);
    target
}

fn checksum8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Reads just the length prefix out of a header-sized buffer, without validating anything else.
/// Used by readers that must learn how many more bytes to pull off the wire before they can
/// call [`parse`].
pub fn peek_total_len(header: &[u8]) -> u32 {
    BigEndian::read_u32(&header[0..4])
}

/// Serializes `body` addressed to `target` into `out`, returning the number of bytes written.
pub fn serialize(
    out: &mut [u8],
    target: &Target,
    body: &[u8],
    encrypt: Option<Cipher>,
) -> Result<usize, CodecError> {
    let total = HEADER_SIZE + body.len() + CHECKSUM_SIZE;
    if total > out.len() {
        return Err(CodecError::BufferTooSmall);
    }

    BigEndian::write_u32(&mut out[0..4], total as u32);
    out[4..12].copy_from_slice(target);
    out[HEADER_SIZE..HEADER_SIZE + body.len()].copy_from_slice(body);

    if let Some(encrypt) = encrypt {
        if !body.is_empty() {
            encrypt(&mut out[HEADER_SIZE..HEADER_SIZE + body.len()]);
        }
    }

    let checksum = checksum8(&out[..total - 1]);
    out[total - 1] = checksum;
    Ok(total)
}

/// Validates and, if requested, decrypts a complete frame already sitting in `data`.
///
/// `data.len()` must equal the frame's total size exactly -- callers read `total_len` off the
/// wire first (see [`peek_total_len`]) and size their read accordingly.
pub fn parse(data: &mut [u8], decrypt: Option<Cipher>) -> Result<ParsedFrame<'_>, CodecError> {
    if data.len() < MIN_FRAME_SIZE {
        return Err(CodecError::TooShort);
    }

    let total_len = BigEndian::read_u32(&data[0..4]) as usize;
    if total_len != data.len() {
        return Err(CodecError::LengthMismatch);
    }

    let last = data.len() - 1;
    if checksum8(&data[..last]) != data[last] {
        return Err(CodecError::ChecksumFail);
    }

    let mut target = [0u8; 8];
    target.copy_from_slice(&data[4..HEADER_SIZE]);

    if let Some(decrypt) = decrypt {
        if last > HEADER_SIZE {
            decrypt(&mut data[HEADER_SIZE..last]);
        }
    }

    Ok(ParsedFrame {
        target,
        body: &data[HEADER_SIZE..last],
    })
}
