// SPDX-FileCopyrightText: 2024-2025 The kbundle developers
// SPDX-License-Identifier: GPL-3.0-only

use std::io::{self, Read};

use md5::Md5;
use sha2::{digest::Digest, Sha256};

/// Digest an entire stream, returning the lowercase hex representation.
fn hex_digest<H: Digest>(mut reader: impl Read) -> io::Result<String> {
    let mut hasher = H::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }

        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// MD5 digest of a stream as 32 lowercase hex characters.
pub fn md5_hex(reader: impl Read) -> io::Result<String> {
    hex_digest::<Md5>(reader)
}

/// SHA-256 digest of a stream as 64 lowercase hex characters.
pub fn sha256_hex(reader: impl Read) -> io::Result<String> {
    hex_digest::<Sha256>(reader)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{md5_hex, sha256_hex};

    #[test]
    fn md5_vectors() {
        assert_eq!(
            md5_hex(Cursor::new(b"")).unwrap(),
            "d41d8cd98f00b204e9800998ecf8427e",
        );
        assert_eq!(
            md5_hex(Cursor::new(b"abc")).unwrap(),
            "900150983cd24fb0d6963f7d28e17f72",
        );
    }

    #[test]
    fn sha256_vectors() {
        assert_eq!(
            sha256_hex(Cursor::new(b"")).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        );
        assert_eq!(
            sha256_hex(Cursor::new(b"abc")).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
        );
    }
}
