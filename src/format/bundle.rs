// SPDX-FileCopyrightText: 2024-2025 The kbundle developers
// SPDX-License-Identifier: GPL-3.0-only

//! Bundle assembly and disassembly.
//!
//! Assembly is strictly ordered: the payload is fully streamed to a scratch
//! file (obfuscating, hashing, and signing on the fly) before the header can
//! be filled in, and the header is written before any payload byte reaches
//! the output. Disassembly is the mirror image: magic, header, then a single
//! streaming pass over the body that feeds the digest accumulator and the
//! archive reader at once. Output files are staged through temporary files
//! and persisted only on success, so failures never leave partial artifacts.

use std::{
    ffi::OsStr,
    fs::{self, File},
    io::{self, BufReader, BufWriter, Read, Seek, Write},
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
    time::UNIX_EPOCH,
};

use flate2::read::GzDecoder;
use md5::Md5;
use num_traits::ToPrimitive;
use rsa::{traits::PublicKeyParts, RsaPrivateKey, RsaPublicKey};
use sha2::{digest::Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    crypto, device,
    env::Env,
    format::{
        header::{
            self, read_header, BundleKind, CertificateNumber, Header, Md5Field, OtaHeader,
            OtaV2Header, RecoveryHeader, RecoveryV2Header, SignatureHeader, RECOVERY_MAGIC_1,
            RECOVERY_MAGIC_2, RECOVERY_V2_HEADER_REV,
        },
        obfuscate::{Direction, MungingReader},
        payload::{
            self, extract_payload, ExtractOptions, ExtractedFile, PayloadSink, PayloadSummary,
            PayloadWriter, INDEX_FILE_NAME,
        },
    },
    stream::{self, CountingReader, HashingReader, ReadFixedSizeExt, ToWriter},
    util::{self, FileKind},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Payload md5 mismatch: expected {expected}, but have {actual}")]
    DigestMismatch { expected: String, actual: String },
    #[error("Signing key is {key_size} bytes; certificate {cert} requires {expected}")]
    KeyCertificateMismatch {
        cert: CertificateNumber,
        key_size: usize,
        expected: usize,
    },
    #[error("Signature payload is {actual} bytes; certificate {cert} requires {expected}")]
    SignaturePayloadSize {
        cert: CertificateNumber,
        expected: usize,
        actual: usize,
    },
    #[error("Unsupported operation for {0} bundles")]
    Unsupported(BundleKind),
    #[error("Header error")]
    Header(#[from] header::Error),
    #[error("Payload error")]
    Payload(#[from] payload::Error),
    #[error("Crypto error")]
    Crypto(#[from] crypto::Error),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Targeting and versioning parameters for bundle creation. Which fields are
/// consumed depends on the bundle kind.
#[derive(Clone, Debug)]
pub struct CreateParams {
    pub kind: BundleKind,
    pub source_revision: u64,
    pub target_revision: u64,
    pub devices: Vec<u32>,
    pub optional: bool,
    pub minor: u32,
    pub platform: device::Platform,
    pub board: device::Board,
    pub certificate_number: CertificateNumber,
    pub metadata: Vec<(String, String)>,
}

#[derive(Clone, Debug)]
pub struct CreateReport {
    pub kind: BundleKind,
    pub payload: Option<PayloadSummary>,
}

/// Where a disassembled bundle goes.
pub enum OutputTarget<'a> {
    /// The payload archive, byte-for-byte after outer deobfuscation.
    Archive(&'a Path),
    /// Full extraction: entries demunged, signatures checked.
    Tree(&'a Path),
}

/// Signature checking policy for disassembly.
#[derive(Default)]
pub struct VerifyPolicy {
    pub public_key: Option<RsaPublicKey>,
    /// Skip both the structural `.sig` pairing check and the cryptographic
    /// verification.
    pub skip: bool,
}

#[derive(Debug)]
pub struct BundleReport {
    pub kind: BundleKind,
    pub header: Option<Header>,
    pub payload_size: u64,
    pub files: Vec<ExtractedFile>,
}

fn require_key<'a>(key: Option<&'a RsaPrivateKey>, kind: BundleKind) -> Result<&'a RsaPrivateKey> {
    key.ok_or_else(|| Error::InvalidArguments(format!("{kind} bundles require a signing key")))
}

fn check_key_size(key: &RsaPrivateKey, cert: CertificateNumber) -> Result<()> {
    if key.size() != cert.signature_size() {
        return Err(Error::KeyCertificateMismatch {
            cert,
            key_size: key.size(),
            expected: cert.signature_size(),
        });
    }

    Ok(())
}

fn first_device(params: &CreateParams) -> u32 {
    params.devices.first().copied().unwrap_or(0)
}

fn input_mtime(meta: &fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Feed the input files into the payload writer. A single `.tar.gz` input is
/// treated as a ready-made payload and repacked entry by entry (re-signing
/// and re-obfuscating its contents); stale signature records and index files
/// from a previous packaging are regenerated rather than copied.
fn add_inputs<W: Write>(
    writer: &mut PayloadWriter<'_, W>,
    inputs: &[PathBuf],
) -> Result<()> {
    if inputs.len() == 1 {
        let name = inputs[0]
            .file_name()
            .unwrap_or(OsStr::new(""))
            .to_string_lossy();

        if FileKind::from_name(&name).is_archive() {
            let file = File::open(&inputs[0])?;
            let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));

            for entry in archive.entries()? {
                let mut entry = entry?;

                if entry.header().entry_type() != tar::EntryType::Regular {
                    continue;
                }

                let entry_name = entry.path()?.to_string_lossy().into_owned();
                if FileKind::from_name(&entry_name) == FileKind::Sig
                    || entry_name == INDEX_FILE_NAME
                {
                    continue;
                }

                let mode = entry.header().mode().unwrap_or(0o644);
                let mtime = entry.header().mtime().unwrap_or(0);
                let size = entry.size();

                writer.add_file(&entry_name, mode, mtime, size, &mut entry)?;
            }

            return Ok(());
        }
    }

    for input in inputs {
        let name = input
            .file_name()
            .ok_or_else(|| {
                Error::InvalidArguments(format!("input has no file name: {input:?}"))
            })?
            .to_string_lossy()
            .into_owned();

        let meta = fs::metadata(input)?;
        let mode = if FileKind::from_name(&name).is_script() {
            0o755
        } else {
            0o644
        };

        let file = File::open(input)?;
        writer.add_file(
            &name,
            mode,
            input_mtime(&meta),
            meta.len(),
            BufReader::new(file),
        )?;
    }

    Ok(())
}

fn build_header(params: &CreateParams, summary: &PayloadSummary) -> Result<Header> {
    let md5 = Md5Field::from_hex(&summary.md5)?;

    let header = match params.kind {
        BundleKind::OtaV1 | BundleKind::Component => {
            let source_revision = params.source_revision.to_u32().ok_or_else(|| {
                Error::InvalidArguments("source revision does not fit in 32 bits".to_owned())
            })?;
            let target_revision = params.target_revision.to_u32().ok_or_else(|| {
                Error::InvalidArguments("target revision does not fit in 32 bits".to_owned())
            })?;
            let device = first_device(params).to_u16().ok_or_else(|| {
                Error::InvalidArguments("device code does not fit in 16 bits".to_owned())
            })?;

            let ota = OtaHeader {
                source_revision,
                target_revision,
                device,
                optional: params.optional,
                md5,
            };

            if params.kind == BundleKind::OtaV1 {
                Header::Ota(ota)
            } else {
                Header::Component(ota)
            }
        }
        BundleKind::OtaV2 => {
            let devices = params
                .devices
                .iter()
                .map(|d| {
                    d.to_u16().ok_or_else(|| {
                        Error::InvalidArguments(format!(
                            "device code 0x{d:X} does not fit in 16 bits",
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            Header::OtaV2(OtaV2Header {
                source_revision: params.source_revision,
                target_revision: params.target_revision,
                md5,
                devices,
                metadata: params.metadata.clone(),
            })
        }
        BundleKind::Recovery => Header::Recovery(RecoveryHeader {
            md5,
            magic_1: RECOVERY_MAGIC_1,
            magic_2: RECOVERY_MAGIC_2,
            minor: params.minor,
            device: first_device(params),
        }),
        BundleKind::RecoveryV2 => Header::RecoveryV2(RecoveryV2Header {
            target_revision: params.target_revision,
            md5,
            magic_1: RECOVERY_MAGIC_1,
            magic_2: RECOVERY_MAGIC_2,
            minor: params.minor,
            platform: params.platform.to_wire(),
            header_rev: RECOVERY_V2_HEADER_REV,
            board: params.board.to_wire(),
        }),
        kind => return Err(Error::Unsupported(kind)),
    };

    Ok(header)
}

/// Write `header` (if any) followed by the staged payload to `output`,
/// through a temporary file in the same directory.
fn persist_output(
    output: &Path,
    header: Option<&Header>,
    staging: &mut File,
    cancel_signal: &AtomicBool,
) -> Result<()> {
    let out_tmp = NamedTempFile::new_in(util::parent_path(output))?;

    {
        let mut writer = BufWriter::new(out_tmp.as_file());

        if let Some(header) = header {
            header.to_writer(&mut writer)?;
        }

        staging.rewind()?;
        stream::copy(staging, &mut writer, cancel_signal)?;
        writer.flush()?;
    }

    out_tmp.persist(output).map_err(|e| Error::Io(e.error))?;

    Ok(())
}

fn create_signature_bundle(
    input: &Path,
    output: &Path,
    cert: CertificateNumber,
    key: &RsaPrivateKey,
    env: &Env,
    cancel_signal: &AtomicBool,
) -> Result<()> {
    let file = File::open(input)?;
    let mut reader = HashingReader::new(BufReader::new(file), Sha256::new());

    stream::copy(&mut reader, io::sink(), cancel_signal)?;

    let (_, hasher) = reader.finish();
    let signature = crypto::sign_digest(key, &hasher.finalize())?;

    let mut staging = tempfile::tempfile_in(&env.temp_dir)?;
    staging.write_all(&signature)?;

    let header = Header::Signature(SignatureHeader {
        certificate_number: cert,
    });

    persist_output(output, Some(&header), &mut staging, cancel_signal)
}

/// Assemble a bundle from input files.
pub fn create_bundle(
    inputs: &[PathBuf],
    output: &Path,
    params: &CreateParams,
    key: Option<&RsaPrivateKey>,
    env: &Env,
    cancel_signal: &AtomicBool,
) -> Result<CreateReport> {
    if inputs.is_empty() {
        return Err(Error::InvalidArguments("no input files".to_owned()));
    }

    match params.kind {
        BundleKind::Signature => {
            if inputs.len() != 1 {
                return Err(Error::InvalidArguments(
                    "signature bundles take exactly one input file".to_owned(),
                ));
            }

            let key = require_key(key, params.kind)?;
            check_key_size(key, params.certificate_number)?;

            create_signature_bundle(
                &inputs[0],
                output,
                params.certificate_number,
                key,
                env,
                cancel_signal,
            )?;

            return Ok(CreateReport {
                kind: params.kind,
                payload: None,
            });
        }
        BundleKind::Android => {
            if inputs.len() != 1 {
                return Err(Error::InvalidArguments(
                    "Android updates take exactly one input file".to_owned(),
                ));
            }

            // The device consumes these as-is; the tool only renames them.
            let mut staging = tempfile::tempfile_in(&env.temp_dir)?;
            stream::copy(
                BufReader::new(File::open(&inputs[0])?),
                &mut staging,
                cancel_signal,
            )?;

            persist_output(output, None, &mut staging, cancel_signal)?;

            return Ok(CreateReport {
                kind: params.kind,
                payload: None,
            });
        }
        _ => {}
    }

    let signer = if params.kind == BundleKind::UserData {
        None
    } else {
        let key = require_key(key, params.kind)?;
        check_key_size(key, params.certificate_number)?;

        if params.devices.is_empty()
            && matches!(params.kind, BundleKind::OtaV1 | BundleKind::OtaV2)
        {
            return Err(Error::InvalidArguments(
                "OTA bundles require at least one target device".to_owned(),
            ));
        }

        Some((key, params.certificate_number))
    };

    let mut staging = tempfile::tempfile_in(&env.temp_dir)?;

    let summary = {
        let sink = PayloadSink::new(&mut staging, params.kind.obfuscated_payload());
        let mut writer = PayloadWriter::new(
            sink,
            signer,
            params.kind == BundleKind::OtaV2,
            cancel_signal,
        );

        add_inputs(&mut writer, inputs)?;

        let (_, summary) = writer.finish()?.finish();
        summary
    };

    debug!(
        "payload staged: {} bytes, md5 {}, sha256 {}",
        summary.size, summary.md5, summary.sha256,
    );

    let header = if params.kind == BundleKind::UserData {
        None
    } else {
        Some(build_header(params, &summary)?)
    };

    persist_output(output, header.as_ref(), &mut staging, cancel_signal)?;

    Ok(CreateReport {
        kind: params.kind,
        payload: Some(summary),
    })
}

fn check_recovery_magics(magic_1: u32, magic_2: u32) {
    // Very old bundles in the wild deviate here; the devices themselves are
    // the final judge, so mismatches only warn.
    if magic_1 != RECOVERY_MAGIC_1 || magic_2 != RECOVERY_MAGIC_2 {
        warn!(
            "unexpected recovery magics: 0x{magic_1:08X}, 0x{magic_2:08X} \
             (expected 0x{RECOVERY_MAGIC_1:08X}, 0x{RECOVERY_MAGIC_2:08X})",
        );
    }
}

fn disassemble_signature(
    mut reader: impl Read,
    sig_header: &SignatureHeader,
    target: &OutputTarget,
) -> Result<u64> {
    let cert = sig_header.certificate_number;
    let expected = cert.signature_size();

    let mut signature = Vec::with_capacity(expected);
    reader.read_to_end(&mut signature)?;

    if signature.len() != expected {
        return Err(Error::SignaturePayloadSize {
            cert,
            expected,
            actual: signature.len(),
        });
    }

    let out_path = match target {
        OutputTarget::Archive(path) => (*path).to_owned(),
        OutputTarget::Tree(dir) => {
            fs::create_dir_all(dir)?;
            dir.join("signature.bin")
        }
    };

    let out_tmp = NamedTempFile::new_in(util::parent_path(&out_path))?;
    let mut file = out_tmp.as_file();
    file.write_all(&signature)?;
    out_tmp.persist(&out_path).map_err(|e| Error::Io(e.error))?;

    Ok(signature.len() as u64)
}

fn copy_verbatim(
    reader: impl Read,
    out_path: &Path,
    cancel_signal: &AtomicBool,
) -> Result<u64> {
    let out_tmp = NamedTempFile::new_in(util::parent_path(out_path))?;
    let mut writer = BufWriter::new(out_tmp.as_file());

    let n = stream::copy(reader, &mut writer, cancel_signal)?;
    writer.flush()?;
    drop(writer);

    out_tmp.persist(out_path).map_err(|e| Error::Io(e.error))?;

    Ok(n)
}

/// Disassemble a bundle: identify it, strip and check the header, stream the
/// body through digest verification, and either re-emit the payload archive
/// or extract it.
pub fn disassemble(
    input: &Path,
    target: OutputTarget,
    verify: &VerifyPolicy,
    env: &Env,
    cancel_signal: &AtomicBool,
) -> Result<BundleReport> {
    let file = File::open(input)?;
    let mut reader = BufReader::new(file);

    let prefix = reader.read_array_exact::<4>()?;
    let kind = BundleKind::detect(&prefix).ok_or(header::Error::UnknownMagic(prefix))?;

    debug!("detected {kind} bundle");

    let report = match kind {
        BundleKind::UserData => {
            // A bare gzipped tar; the sniffed prefix is part of the stream.
            let chained = io::Cursor::new(prefix).chain(reader);
            let mut body = CountingReader::new(chained);

            let files = match &target {
                OutputTarget::Archive(path) => {
                    copy_verbatim(&mut body, path, cancel_signal)?;
                    Vec::new()
                }
                OutputTarget::Tree(dir) => {
                    let opts = ExtractOptions {
                        verify_key: None,
                        require_signatures: false,
                        demunge_contents: false,
                        check_index: false,
                    };

                    let created = !dir.exists();
                    match extract_payload(&mut body, dir, &opts, cancel_signal) {
                        Ok(files) => files,
                        Err(e) => {
                            if created {
                                let _ = fs::remove_dir_all(dir);
                            }
                            return Err(e.into());
                        }
                    }
                }
            };

            let (_, payload_size) = body.finish();

            BundleReport {
                kind,
                header: None,
                payload_size,
                files,
            }
        }
        BundleKind::Android => {
            let chained = io::Cursor::new(prefix).chain(reader);
            let mut body = CountingReader::new(chained);

            let out_path = match &target {
                OutputTarget::Archive(path) => (*path).to_owned(),
                OutputTarget::Tree(dir) => {
                    fs::create_dir_all(dir)?;
                    dir.join(input.file_name().unwrap_or(OsStr::new("update.jar")))
                }
            };

            copy_verbatim(&mut body, &out_path, cancel_signal)?;

            let (_, payload_size) = body.finish();

            BundleReport {
                kind,
                header: None,
                payload_size,
                files: Vec::new(),
            }
        }
        _ => {
            let header = read_header(&mut reader, prefix)?;
            let kind = header.kind();

            match &header {
                Header::Recovery(h) => check_recovery_magics(h.magic_1, h.magic_2),
                Header::RecoveryV2(h) => check_recovery_magics(h.magic_1, h.magic_2),
                _ => {}
            }

            if let Header::Signature(sig_header) = &header {
                let payload_size = disassemble_signature(reader, sig_header, &target)?;

                BundleReport {
                    kind,
                    header: Some(header),
                    payload_size,
                    files: Vec::new(),
                }
            } else {
                // A freshly created extraction directory is removed again if
                // anything below fails, so failures never leave partial
                // output behind.
                let tree_cleanup = match &target {
                    OutputTarget::Tree(dir) if !dir.exists() => Some(*dir),
                    _ => None,
                };

                let expected = header.payload_md5().unwrap().as_str().to_owned();

                let result = (|| -> Result<(Vec<ExtractedFile>, u64)> {
                    // Every remaining kind carries an obfuscated payload
                    // whose header digest covers the on-wire (still
                    // obfuscated) bytes.
                    let body = HashingReader::new(CountingReader::new(reader), Md5::new());
                    let mut plain = MungingReader::new(body, Direction::Demunge);

                    // In archive mode the output is staged here and
                    // persisted only after the digest check below passes.
                    let mut archive_tmp = None;

                    let (files, drained) = match &target {
                        OutputTarget::Archive(path) => {
                            let out_tmp = NamedTempFile::new_in(util::parent_path(path))?;
                            let mut writer = BufWriter::new(out_tmp.as_file());

                            let result = stream::copy(&mut plain, &mut writer, cancel_signal)
                                .map(|_| Vec::new())
                                .map_err(Error::from);
                            let flushed = writer.flush();

                            drop(writer);
                            archive_tmp = Some((out_tmp, *path));

                            (result, flushed)
                        }
                        OutputTarget::Tree(dir) => {
                            let opts = ExtractOptions {
                                verify_key: verify.public_key.as_ref(),
                                require_signatures: !verify.skip,
                                demunge_contents: true,
                                check_index: kind == BundleKind::OtaV2 && !verify.skip,
                            };

                            let result = extract_payload(&mut plain, dir, &opts, cancel_signal)
                                .map_err(Error::from);

                            // Drain whatever the archive reader left behind
                            // so the digest covers the whole body even on
                            // failure.
                            let drained = stream::copy(&mut plain, io::sink(), cancel_signal);

                            (result, drained.map(|_| ()))
                        }
                    };

                    let (body, md5) = plain.into_inner().finish();
                    let (_, payload_size) = body.finish();
                    let actual = hex::encode(md5.finalize());

                    if drained.is_ok() && actual != expected {
                        return Err(Error::DigestMismatch { expected, actual });
                    }

                    let files = files?;
                    drained?;

                    if let Some((out_tmp, path)) = archive_tmp {
                        out_tmp.persist(path).map_err(|e| Error::Io(e.error))?;
                    }

                    Ok((files, payload_size))
                })();

                let (files, payload_size) = match result {
                    Ok(v) => v,
                    Err(e) => {
                        if let Some(dir) = tree_cleanup {
                            let _ = fs::remove_dir_all(dir);
                        }
                        return Err(e);
                    }
                };

                BundleReport {
                    kind,
                    header: Some(header),
                    payload_size,
                    files,
                }
            }
        }
    };

    if let Some(dump_path) = &env.metadata_dump {
        write_metadata_dump(dump_path, input, &report)?;
    }

    Ok(report)
}

/// Write the sidecar descriptor for a converted package: one `key=value`
/// line per fact, suitable for sourcing from shell scripts.
fn write_metadata_dump(path: &Path, input: &Path, report: &BundleReport) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);

    writeln!(writer, "bundle={}", input.display())?;
    writeln!(writer, "kind={}", report.kind)?;
    writeln!(writer, "payload_size={}", report.payload_size)?;

    match &report.header {
        Some(Header::Ota(h)) | Some(Header::Component(h)) => {
            writeln!(writer, "source_revision={}", h.source_revision)?;
            writeln!(writer, "target_revision={}", h.target_revision)?;
            writeln!(writer, "device={}", device::encode_device(h.device.into()))?;
            if let Some(name) = device::device_name(h.device.into()) {
                writeln!(writer, "device_name={name}")?;
            }
            writeln!(writer, "optional={}", u8::from(h.optional))?;
            writeln!(writer, "md5={}", h.md5.as_str())?;
        }
        Some(Header::OtaV2(h)) => {
            writeln!(writer, "source_revision={}", h.source_revision)?;
            writeln!(writer, "target_revision={}", h.target_revision)?;

            let devices: Vec<String> = h
                .devices
                .iter()
                .map(|d| device::encode_device((*d).into()))
                .collect();
            writeln!(writer, "devices={}", devices.join(","))?;

            for (key, value) in &h.metadata {
                writeln!(writer, "metadata_{key}={value}")?;
            }
            writeln!(writer, "md5={}", h.md5.as_str())?;
        }
        Some(Header::Recovery(h)) => {
            writeln!(writer, "magic_1={}", h.magic_1)?;
            writeln!(writer, "magic_2={}", h.magic_2)?;
            writeln!(writer, "minor={}", h.minor)?;
            writeln!(writer, "device={}", device::encode_device(h.device))?;
            if let Some(name) = device::device_name(h.device) {
                writeln!(writer, "device_name={name}")?;
            }
            writeln!(writer, "md5={}", h.md5.as_str())?;
        }
        Some(Header::RecoveryV2(h)) => {
            writeln!(writer, "target_revision={}", h.target_revision)?;
            writeln!(writer, "magic_1={}", h.magic_1)?;
            writeln!(writer, "magic_2={}", h.magic_2)?;
            writeln!(writer, "minor={}", h.minor)?;
            match device::Platform::from_wire(h.platform) {
                Some(p) => writeln!(writer, "platform={p}")?,
                None => writeln!(writer, "platform={}", h.platform)?,
            }
            writeln!(writer, "header_rev={}", h.header_rev)?;
            match device::Board::from_wire(h.board) {
                Some(b) => writeln!(writer, "board={b}")?,
                None => writeln!(writer, "board={}", h.board)?,
            }
            writeln!(writer, "md5={}", h.md5.as_str())?;
        }
        Some(Header::Signature(h)) => {
            writeln!(writer, "certificate={}", h.certificate_number.to_wire())?;
        }
        None => {}
    }

    for file in &report.files {
        writeln!(
            writer,
            "file={} size={} signed={}",
            file.path, file.size, u8::from(file.signed),
        )?;
    }

    writer.flush()
}
