// SPDX-FileCopyrightText: 2024-2025 The kbundle developers
// SPDX-License-Identifier: GPL-3.0-only

//! The payload archive: a gzip-compressed tar of content files and their
//! signature records.
//!
//! When a bundle is signed, every content file is stored obfuscated and is
//! immediately followed by `<name>.sig`, a complete miniature update
//! signature bundle whose body is the RSA signature of the obfuscated
//! content bytes. OTA v2 payloads additionally carry an index file,
//! `update-filelist.dat`, appended (and signed) last.

use std::{
    collections::HashMap,
    fs,
    io::{self, Cursor, Read, Write},
    path::{Component, Path, PathBuf},
    sync::atomic::AtomicBool,
};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use md5::Md5;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{digest::Digest, Sha256};
use thiserror::Error;

use crate::{
    crypto,
    format::{
        header::{self, read_header, CertificateNumber, Header, SignatureHeader},
        obfuscate::{self, Direction, MungingReader},
    },
    stream::{self, HashingReader, HashingWriter, ReadFixedSizeExt, ToWriter},
    util,
};

/// Name of the per-file metadata index in OTA v2 payloads.
pub const INDEX_FILE_NAME: &str = "update-filelist.dat";

/// Upper bound for in-memory archive entries (signature records). Content
/// files are never buffered.
const MAX_RECORD_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unsafe path in archive: {0:?}")]
    UnsafePath(PathBuf),
    #[error("Entry {0:?} has no signature")]
    MissingSignature(String),
    #[error("Signature {0:?} does not follow a matching content entry")]
    OrphanSignature(String),
    #[error("Signature verification failed for {0:?}")]
    InvalidSignature(String),
    #[error("Signature in {name:?} is {actual} bytes; certificate {cert} requires {expected}")]
    SignatureSize {
        name: String,
        cert: CertificateNumber,
        expected: usize,
        actual: usize,
    },
    #[error("Archive entry {0:?} is too large for a record")]
    RecordTooLarge(String),
    #[error("Malformed index line: {0:?}")]
    MalformedIndex(String),
    #[error("Digest mismatch for {path:?}: expected {expected}, but have {actual}")]
    FileDigestMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("Failed to parse signature record")]
    Header(#[from] header::Error),
    #[error("Crypto error")]
    Crypto(#[from] crypto::Error),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// What the payload sink saw flow through it: the byte count and digests of
/// the final on-wire payload stream.
#[derive(Clone, Debug)]
pub struct PayloadSummary {
    pub size: u64,
    pub md5: String,
    pub sha256: String,
}

/// Terminal write stack for the payload stream: obfuscates (for the bundle
/// kinds that require it), then fans the on-wire bytes to MD5 and SHA-256
/// accumulators and the inner writer. The header digest is computed over
/// exactly these bytes.
pub struct PayloadSink<W: Write> {
    inner: HashingWriter<HashingWriter<W, Md5>, Sha256>,
    obfuscate: bool,
    written: u64,
}

impl<W: Write> PayloadSink<W> {
    pub fn new(inner: W, obfuscate: bool) -> Self {
        Self {
            inner: HashingWriter::new(HashingWriter::new(inner, Md5::new()), Sha256::new()),
            obfuscate,
            written: 0,
        }
    }

    pub fn finish(self) -> (W, PayloadSummary) {
        let (inner, sha256) = self.inner.finish();
        let (inner, md5) = inner.finish();

        let summary = PayloadSummary {
            size: self.written,
            md5: hex::encode(md5.finalize()),
            sha256: hex::encode(sha256.finalize()),
        };

        (inner, summary)
    }
}

impl<W: Write> Write for PayloadSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = if self.obfuscate {
            let mut block = [0u8; 4096];
            let n = buf.len().min(block.len());

            block[..n].copy_from_slice(&buf[..n]);
            obfuscate::munge(&mut block[..n]);
            self.inner.write_all(&block[..n])?;

            n
        } else {
            self.inner.write(buf)?
        };

        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A `.sig` archive entry: a complete update signature bundle wrapping one
/// raw RSA signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureRecord {
    pub certificate_number: CertificateNumber,
    pub signature: Vec<u8>,
}

impl SignatureRecord {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf =
            Vec::with_capacity(header::MAGIC_LEN + header::OTA_HEADER_SIZE + self.signature.len());

        Header::Signature(SignatureHeader {
            certificate_number: self.certificate_number,
        })
        .to_writer(&mut buf)?;
        buf.extend_from_slice(&self.signature);

        Ok(buf)
    }

    pub fn from_bytes(name: &str, data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let magic = cursor.read_array_exact::<4>()?;

        let Header::Signature(sig_header) = read_header(&mut cursor, magic)? else {
            return Err(Error::OrphanSignature(name.to_owned()));
        };

        let cert = sig_header.certificate_number;
        let signature = data[header::MAGIC_LEN + header::OTA_HEADER_SIZE..].to_vec();

        if signature.len() != cert.signature_size() {
            return Err(Error::SignatureSize {
                name: name.to_owned(),
                cert,
                expected: cert.signature_size(),
                actual: signature.len(),
            });
        }

        Ok(Self {
            certificate_number: cert,
            signature,
        })
    }
}

/// Per-file record in `update-filelist.dat`. Hashes cover the plaintext
/// (pre-obfuscation) content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub md5: String,
    pub sha256: String,
    pub mode: u32,
    pub path: String,
}

impl IndexEntry {
    fn to_line(&self) -> String {
        format!(
            "{} {} {:o} {}\n",
            self.md5, self.sha256, self.mode, self.path
        )
    }

    fn from_line(line: &str) -> Result<Self> {
        let mut fields = line.splitn(4, ' ');

        let (Some(md5), Some(sha256), Some(mode), Some(path)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(Error::MalformedIndex(line.to_owned()));
        };

        let mode =
            u32::from_str_radix(mode, 8).map_err(|_| Error::MalformedIndex(line.to_owned()))?;

        Ok(Self {
            md5: md5.to_owned(),
            sha256: sha256.to_owned(),
            mode,
            path: path.to_owned(),
        })
    }
}

pub fn parse_index(data: &str) -> Result<Vec<IndexEntry>> {
    data.lines().map(IndexEntry::from_line).collect()
}

struct PayloadSigner<'a> {
    key: &'a RsaPrivateKey,
    certificate_number: CertificateNumber,
}

/// A reader wrapper that polls the cancel signal on every buffer read, so
/// that large file copies driven by the tar builder stay interruptible.
struct CancellableReader<'a, R> {
    inner: R,
    cancel_signal: &'a AtomicBool,
}

impl<R: Read> Read for CancellableReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        stream::check_cancel(self.cancel_signal)?;
        self.inner.read(buf)
    }
}

/// Streams a payload archive: a gzip-compressed tar where, when signing is
/// enabled, every content file is obfuscated and followed by its signature
/// record.
pub struct PayloadWriter<'a, W: Write> {
    tar: tar::Builder<GzEncoder<W>>,
    signer: Option<PayloadSigner<'a>>,
    index: Option<Vec<IndexEntry>>,
    cancel_signal: &'a AtomicBool,
}

impl<'a, W: Write> PayloadWriter<'a, W> {
    /// `signer` enables per-entry obfuscation and signature records.
    /// `with_index` appends `update-filelist.dat` on [`Self::finish`].
    pub fn new(
        writer: W,
        signer: Option<(&'a RsaPrivateKey, CertificateNumber)>,
        with_index: bool,
        cancel_signal: &'a AtomicBool,
    ) -> Self {
        let encoder = GzEncoder::new(writer, Compression::default());

        Self {
            tar: tar::Builder::new(encoder),
            signer: signer.map(|(key, certificate_number)| PayloadSigner {
                key,
                certificate_number,
            }),
            index: with_index.then(Vec::new),
            cancel_signal,
        }
    }

    fn append_entry(
        &mut self,
        name: &str,
        mode: u32,
        mtime: u64,
        size: u64,
        reader: impl Read,
        register: bool,
    ) -> Result<()> {
        stream::check_cancel(self.cancel_signal)?;

        let mut tar_header = tar::Header::new_gnu();
        tar_header.set_entry_type(tar::EntryType::Regular);
        tar_header.set_mode(mode);
        tar_header.set_mtime(mtime);
        tar_header.set_size(size);

        let reader = CancellableReader {
            inner: reader,
            cancel_signal: self.cancel_signal,
        };

        let Some(signer) = &self.signer else {
            let mut reader = reader;
            self.tar.append_data(&mut tar_header, name, &mut reader)?;
            return Ok(());
        };

        // Plaintext digests feed the index; the digest of the obfuscated
        // bytes, which are what actually lands in the tar, is signed.
        let plain = HashingReader::new(HashingReader::new(reader, Md5::new()), Sha256::new());
        let munged = MungingReader::new(plain, Direction::Munge);
        let mut stack = HashingReader::new(munged, Sha256::new());

        self.tar.append_data(&mut tar_header, name, &mut stack)?;

        let (munged, sha256_munged) = stack.finish();
        let (plain, sha256_plain) = munged.into_inner().finish();
        let (_, md5_plain) = plain.finish();

        let record = SignatureRecord {
            certificate_number: signer.certificate_number,
            signature: crypto::sign_digest(signer.key, &sha256_munged.finalize())?,
        };
        let record_bytes = record.to_bytes()?;

        let mut sig_header = tar::Header::new_gnu();
        sig_header.set_entry_type(tar::EntryType::Regular);
        sig_header.set_mode(0o644);
        sig_header.set_mtime(mtime);
        sig_header.set_size(record_bytes.len() as u64);

        self.tar.append_data(
            &mut sig_header,
            format!("{name}.sig"),
            Cursor::new(record_bytes),
        )?;

        if register {
            if let Some(index) = &mut self.index {
                index.push(IndexEntry {
                    md5: hex::encode(md5_plain.finalize()),
                    sha256: hex::encode(sha256_plain.finalize()),
                    mode,
                    path: name.to_owned(),
                });
            }
        }

        Ok(())
    }

    /// Append one content file (and, when signing, its signature record).
    pub fn add_file(
        &mut self,
        name: &str,
        mode: u32,
        mtime: u64,
        size: u64,
        reader: impl Read,
    ) -> Result<()> {
        self.append_entry(name, mode, mtime, size, reader, true)
    }

    /// Write the index (if enabled) and flush the archive, returning the
    /// inner writer.
    pub fn finish(mut self) -> Result<W> {
        if let Some(index) = self.index.take() {
            let data: String = index.iter().map(IndexEntry::to_line).collect();

            self.append_entry(
                INDEX_FILE_NAME,
                0o644,
                0,
                data.len() as u64,
                Cursor::new(data.into_bytes()),
                false,
            )?;
        }

        let encoder = self.tar.into_inner()?;
        let writer = encoder.finish()?;

        Ok(writer)
    }
}

/// Verification policy for payload extraction.
pub struct ExtractOptions<'a> {
    /// Check signature records cryptographically with this key.
    pub verify_key: Option<&'a RsaPublicKey>,
    /// Enforce that every content entry has a signature record. Off for
    /// unsigned payloads and under the "skip verification" switch.
    pub require_signatures: bool,
    /// Recover plaintext file contents (signed payloads store them
    /// obfuscated).
    pub demunge_contents: bool,
    /// Cross-check extracted files against `update-filelist.dat` if present.
    pub check_index: bool,
}

/// One file extracted from a payload.
#[derive(Clone, Debug)]
pub struct ExtractedFile {
    pub path: String,
    pub size: u64,
    pub signed: bool,
}

fn safe_join(out_dir: &Path, name: &str) -> Result<PathBuf> {
    let rel = Path::new(name);

    if rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(Error::UnsafePath(rel.to_owned()));
    }

    Ok(out_dir.join(rel))
}

/// Copy one tar entry to `file`, returning the SHA-256 of the wire bytes
/// (what the signature record covers) and the hex MD5/SHA-256 of the
/// plaintext (what the index records).
fn drain_entry(
    entry: impl Read,
    file: impl Write,
    demunge: bool,
    cancel_signal: &AtomicBool,
) -> io::Result<([u8; 32], String, String)> {
    let wire = HashingReader::new(entry, Sha256::new());

    if demunge {
        let demunged = MungingReader::new(wire, Direction::Demunge);
        let mut plain =
            HashingReader::new(HashingReader::new(demunged, Md5::new()), Sha256::new());

        stream::copy(&mut plain, file, cancel_signal)?;

        let (inner, sha256_plain) = plain.finish();
        let (demunged, md5_plain) = inner.finish();
        let (_, sha256_wire) = demunged.into_inner().finish();

        Ok((
            sha256_wire.finalize().into(),
            hex::encode(md5_plain.finalize()),
            hex::encode(sha256_plain.finalize()),
        ))
    } else {
        let mut plain = HashingReader::new(HashingReader::new(wire, Md5::new()), Sha256::new());

        stream::copy(&mut plain, file, cancel_signal)?;

        let (inner, sha256_plain) = plain.finish();
        let (wire, md5_plain) = inner.finish();
        let (_, sha256_wire) = wire.finish();

        Ok((
            sha256_wire.finalize().into(),
            hex::encode(md5_plain.finalize()),
            hex::encode(sha256_plain.finalize()),
        ))
    }
}

struct PendingEntry {
    name: String,
    sha256_wire: [u8; 32],
    manifest_index: usize,
}

/// Extract a payload archive (the plaintext gzip stream, after any outer
/// deobfuscation) into `out_dir`, verifying signature records along the way.
/// Signature pairing is positional: a record signs the content entry
/// immediately before it.
pub fn extract_payload(
    reader: impl Read,
    out_dir: &Path,
    opts: &ExtractOptions,
    cancel_signal: &AtomicBool,
) -> Result<Vec<ExtractedFile>> {
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    let mut extracted = Vec::<ExtractedFile>::new();
    let mut pending: Option<PendingEntry> = None;
    let mut digests = HashMap::<String, (String, String)>::new();
    let mut have_index = false;

    fs::create_dir_all(out_dir)?;

    for entry in archive.entries()? {
        stream::check_cancel(cancel_signal)?;

        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        let size = entry.size();
        let out_path = safe_join(out_dir, &name)?;

        if entry.header().entry_type() == tar::EntryType::Directory {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }

        if util::FileKind::from_name(&name) == util::FileKind::Sig {
            if size > MAX_RECORD_SIZE {
                return Err(Error::RecordTooLarge(name));
            }

            let mut data = Vec::with_capacity(size as usize);
            entry.read_to_end(&mut data)?;

            let content_name = name.strip_suffix(".sig").unwrap_or(&name);

            if pending.as_ref().is_some_and(|p| p.name == content_name) {
                let pair = pending.take().unwrap();

                match SignatureRecord::from_bytes(&name, &data) {
                    Ok(record) => {
                        if let Some(key) = opts.verify_key {
                            if !crypto::verify_digest(key, &pair.sha256_wire, &record.signature)
                            {
                                return Err(Error::InvalidSignature(pair.name));
                            }
                        }

                        extracted[pair.manifest_index].signed = true;
                    }
                    // With checking disabled a broken record is still
                    // extracted, just not interpreted.
                    Err(e) => {
                        if opts.require_signatures || opts.verify_key.is_some() {
                            return Err(e);
                        }
                    }
                }
            } else if opts.require_signatures {
                return Err(Error::OrphanSignature(name));
            }

            fs::write(&out_path, &data)?;
            continue;
        }

        // A new content entry while one is still awaiting its record means
        // the record was dropped from the archive.
        if let Some(pair) = pending.take() {
            if opts.require_signatures {
                return Err(Error::MissingSignature(pair.name));
            }
        }

        let file = fs::File::create(&out_path)?;
        let (sha256_wire, md5_plain, sha256_plain) =
            drain_entry(&mut entry, file, opts.demunge_contents, cancel_signal)?;

        have_index |= name == INDEX_FILE_NAME;
        digests.insert(name.clone(), (md5_plain, sha256_plain));

        pending = Some(PendingEntry {
            name: name.clone(),
            sha256_wire,
            manifest_index: extracted.len(),
        });

        extracted.push(ExtractedFile {
            path: name,
            size,
            signed: false,
        });
    }

    if let Some(pair) = pending.take() {
        if opts.require_signatures {
            return Err(Error::MissingSignature(pair.name));
        }
    }

    if opts.check_index && have_index {
        let data = fs::read_to_string(out_dir.join(INDEX_FILE_NAME))?;

        for entry in parse_index(&data)? {
            if let Some((md5, sha256)) = digests.get(&entry.path) {
                if *md5 != entry.md5 {
                    return Err(Error::FileDigestMismatch {
                        path: entry.path,
                        expected: entry.md5,
                        actual: md5.clone(),
                    });
                }

                if *sha256 != entry.sha256 {
                    return Err(Error::FileDigestMismatch {
                        path: entry.path,
                        expected: entry.sha256,
                        actual: sha256.clone(),
                    });
                }
            }
        }
    }

    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{parse_index, safe_join, IndexEntry, PayloadSink, SignatureRecord};
    use crate::format::header::CertificateNumber;
    use crate::format::obfuscate;
    use std::io::Write;
    use std::path::Path;

    #[test]
    fn sink_digests_cover_wire_bytes() {
        let data = b"some payload bytes".to_vec();

        let mut sink = PayloadSink::new(Vec::new(), true);
        sink.write_all(&data).unwrap();
        let (wire, summary) = sink.finish();

        let mut expected = data.clone();
        obfuscate::munge(&mut expected);
        assert_eq!(wire, expected);
        assert_eq!(summary.size, data.len() as u64);
        assert_eq!(
            summary.md5,
            crate::hash::md5_hex(Cursor::new(&expected)).unwrap(),
        );
        assert_eq!(
            summary.sha256,
            crate::hash::sha256_hex(Cursor::new(&expected)).unwrap(),
        );

        // Without obfuscation the sink is a plain tee.
        let mut sink = PayloadSink::new(Vec::new(), false);
        sink.write_all(&data).unwrap();
        let (wire, summary) = sink.finish();
        assert_eq!(wire, data);
        assert_eq!(summary.md5, crate::hash::md5_hex(Cursor::new(&data)).unwrap());
    }

    #[test]
    fn signature_record_round_trip() {
        let record = SignatureRecord {
            certificate_number: CertificateNumber::Official2K,
            signature: vec![0xAB; 256],
        };

        let bytes = record.to_bytes().unwrap();
        assert_eq!(bytes.len(), 4 + 60 + 256);
        assert_eq!(&bytes[..4], b"SP01");

        let parsed = SignatureRecord::from_bytes("x.sig", &bytes).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn signature_record_length_must_match_certificate() {
        let record = SignatureRecord {
            certificate_number: CertificateNumber::Official1K,
            signature: vec![0; 256],
        };

        let bytes = record.to_bytes().unwrap();
        assert!(SignatureRecord::from_bytes("x.sig", &bytes).is_err());
    }

    #[test]
    fn index_lines_round_trip() {
        let entry = IndexEntry {
            md5: "900150983cd24fb0d6963f7d28e17f72".to_owned(),
            sha256: "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
                .to_owned(),
            mode: 0o755,
            path: "bin/update helper.sh".to_owned(),
        };

        let line = entry.to_line();
        let parsed = parse_index(&line).unwrap();
        assert_eq!(parsed, vec![entry]);

        assert!(parse_index("not an index line\n").is_err());
    }

    #[test]
    fn unsafe_paths_rejected() {
        let out = Path::new("/tmp/out");

        assert!(safe_join(out, "ok/file.bin").is_ok());
        assert!(safe_join(out, "./ok.bin").is_ok());
        assert!(safe_join(out, "../escape.bin").is_err());
        assert!(safe_join(out, "/etc/passwd").is_err());
        assert!(safe_join(out, "a/../../b").is_err());
    }
}
