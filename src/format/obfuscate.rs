// SPDX-FileCopyrightText: 2024-2025 The kbundle developers
// SPDX-License-Identifier: GPL-3.0-only

//! The reversible byte obfuscation applied to bundle headers and payloads.
//!
//! The transform operates on 64-byte blocks, but carries no state beyond the
//! byte position: each byte's nibbles are swapped and XORed with 0x7A. The
//! forward and inverse directions differ only in the order of the two steps,
//! so `demunge(munge(x)) == x` and `munge(demunge(x)) == x` while the two
//! functions are not interchangeable.

use std::io::{self, Read, Write};

/// Obfuscation block size.
pub const BLOCK_SIZE: usize = 64;

const XOR_KEY: u8 = 0x7A;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Plaintext to wire form.
    Munge,
    /// Wire form to plaintext.
    Demunge,
}

#[inline]
fn swap_nibbles(b: u8) -> u8 {
    b.rotate_left(4)
}

/// Obfuscate a buffer in place.
pub fn munge(data: &mut [u8]) {
    for block in data.chunks_mut(BLOCK_SIZE) {
        for b in block {
            *b = swap_nibbles(*b) ^ XOR_KEY;
        }
    }
}

/// Recover the plaintext of an obfuscated buffer in place.
pub fn demunge(data: &mut [u8]) {
    for block in data.chunks_mut(BLOCK_SIZE) {
        for b in block {
            *b = swap_nibbles(*b ^ XOR_KEY);
        }
    }
}

/// Apply the transform for `dir` to a buffer in place.
pub fn apply(dir: Direction, data: &mut [u8]) {
    match dir {
        Direction::Munge => munge(data),
        Direction::Demunge => demunge(data),
    }
}

/// A reader wrapper that transforms data as it's being read.
pub struct MungingReader<R> {
    inner: R,
    dir: Direction,
}

impl<R: Read> MungingReader<R> {
    pub fn new(inner: R, dir: Direction) -> Self {
        Self { inner, dir }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for MungingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        apply(self.dir, &mut buf[..n]);
        Ok(n)
    }
}

/// A writer wrapper that transforms data as it's being written.
pub struct MungingWriter<W> {
    inner: W,
    dir: Direction,
}

impl<W: Write> MungingWriter<W> {
    pub fn new(inner: W, dir: Direction) -> Self {
        Self { inner, dir }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for MungingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut block = [0u8; BLOCK_SIZE];
        let mut written = 0;

        // The inner writer sees transformed bytes, so the input has to be
        // staged through a scratch block rather than modified in place.
        for chunk in buf.chunks(BLOCK_SIZE) {
            block[..chunk.len()].copy_from_slice(chunk);
            apply(self.dir, &mut block[..chunk.len()]);

            self.inner.write_all(&block[..chunk.len()])?;
            written += chunk.len();
        }

        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read, Write};

    use super::{demunge, munge, Direction, MungingReader, MungingWriter, BLOCK_SIZE};

    // munge() applied to the bytes 0x00 through 0x3F.
    const COUNTING_MUNGED: [u8; BLOCK_SIZE] = [
        0x7a, 0x6a, 0x5a, 0x4a, 0x3a, 0x2a, 0x1a, 0x0a, 0xfa, 0xea, 0xda, 0xca, 0xba, 0xaa, 0x9a,
        0x8a, 0x7b, 0x6b, 0x5b, 0x4b, 0x3b, 0x2b, 0x1b, 0x0b, 0xfb, 0xeb, 0xdb, 0xcb, 0xbb, 0xab,
        0x9b, 0x8b, 0x78, 0x68, 0x58, 0x48, 0x38, 0x28, 0x18, 0x08, 0xf8, 0xe8, 0xd8, 0xc8, 0xb8,
        0xa8, 0x98, 0x88, 0x79, 0x69, 0x59, 0x49, 0x39, 0x29, 0x19, 0x09, 0xf9, 0xe9, 0xd9, 0xc9,
        0xb9, 0xa9, 0x99, 0x89,
    ];

    fn counting_block() -> [u8; BLOCK_SIZE] {
        let mut data = [0u8; BLOCK_SIZE];
        for (i, b) in data.iter_mut().enumerate() {
            *b = i as u8;
        }
        data
    }

    #[test]
    fn munge_vector() {
        let mut data = counting_block();
        munge(&mut data);
        assert_eq!(data, COUNTING_MUNGED);

        demunge(&mut data);
        assert_eq!(data, counting_block());
    }

    #[test]
    fn round_trip_all_bytes() {
        let mut data: Vec<u8> = (0u8..=255).collect();
        let orig = data.clone();

        munge(&mut data);
        assert_ne!(data, orig);
        demunge(&mut data);
        assert_eq!(data, orig);

        // The other composition order must also be the identity.
        demunge(&mut data);
        munge(&mut data);
        assert_eq!(data, orig);
    }

    #[test]
    fn not_an_involution() {
        let mut munged = counting_block();
        munge(&mut munged);
        let mut demunged = counting_block();
        demunge(&mut demunged);

        assert_ne!(munged, demunged);
    }

    #[test]
    fn partial_trailing_block() {
        // 100 bytes: one full block plus a 36-byte tail. The tail is
        // transformed with the same per-byte rule.
        let mut data = vec![0xA5u8; 100];
        let mut by_parts = Vec::new();
        by_parts.extend_from_slice(&data[..BLOCK_SIZE]);
        munge(&mut by_parts);
        let mut tail = data[BLOCK_SIZE..].to_vec();
        munge(&mut tail);
        by_parts.extend_from_slice(&tail);

        munge(&mut data);
        assert_eq!(data, by_parts);
    }

    #[test]
    fn streaming_reader_writer() {
        let plain: Vec<u8> = (0u8..=255).cycle().take(1000).collect();
        let mut wire = plain.clone();
        munge(&mut wire);

        let mut reader = MungingReader::new(Cursor::new(&plain), Direction::Munge);
        let mut got = Vec::new();
        reader.read_to_end(&mut got).unwrap();
        assert_eq!(got, wire);

        let mut writer = MungingWriter::new(Vec::new(), Direction::Demunge);
        writer.write_all(&wire).unwrap();
        assert_eq!(writer.into_inner(), plain);
    }
}
