// SPDX-FileCopyrightText: 2024-2025 The kbundle developers
// SPDX-License-Identifier: GPL-3.0-only

//! On-wire header layouts for the bundle container variants.
//!
//! Every bundle starts with a 4-byte ASCII magic that selects the header
//! layout. The header region that follows is obfuscated for every kind
//! except recovery v1, whose (mostly zero) 128 KiB region is stored as
//! plaintext while only its payload is obfuscated. All integers are
//! little-endian. The recovery v2 layout is packed: fields live at fixed
//! byte offsets and are never read through a structure layout.

use std::{
    fmt,
    io::{self, Read, Write},
};

use num_traits::ToPrimitive;
use thiserror::Error;

use crate::{
    format::obfuscate::{self, Direction, MungingReader},
    stream::{ReadDiscardExt, ReadFixedSizeExt, ToWriter},
};

pub const MAGIC_LEN: usize = 4;
pub const MD5_HEX_LEN: usize = 32;

/// Size of the obfuscated header region for OTA, component, and signature
/// bundles. OTA v2 headers are logically variable-sized but padded to at
/// least this.
pub const OTA_HEADER_SIZE: usize = 60;

/// Size of the header region for recovery bundles (magic excluded). Nearly
/// all of it is zero; this is the only large fixed allocation in the tool.
pub const RECOVERY_HEADER_SIZE: usize = 131068;

pub const RECOVERY_MAGIC_1: u32 = 1;
pub const RECOVERY_MAGIC_2: u32 = 0;

/// The accepted recovery v2 header revision set is currently just this.
pub const RECOVERY_V2_HEADER_REV: u32 = 2;

/// Offset of the header revision field within the recovery header region,
/// used to tell apart the two layouts sharing the `FB02` magic.
const RECOVERY_V2_HEADER_REV_OFFSET: usize = 60;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown magic: {0:?}")]
    UnknownMagic([u8; 4]),
    #[error("Bundle kind {0} has no header")]
    NoHeader(BundleKind),
    #[error("MD5 digest field is not ASCII hex")]
    InvalidDigestField,
    #[error("Unknown certificate number: {0}")]
    UnknownCertificate(u8),
    #[error("Unsupported recovery header revision: {0}")]
    UnsupportedHeaderRev(u32),
    #[error("Too many target devices: {0}")]
    TooManyDevices(usize),
    #[error("Too many metadata records: {0}")]
    TooManyMetadata(usize),
    #[error("Metadata record too long: {0} bytes")]
    MetadataTooLong(usize),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Bundle kind, determined by the magic prefix (or, for the wrapperless
/// kinds, by sniffing the payload itself).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BundleKind {
    OtaV1,
    OtaV2,
    Recovery,
    RecoveryV2,
    Component,
    Signature,
    UserData,
    Android,
}

impl BundleKind {
    /// Identify a bundle from its first four bytes. `FB02` resolves to
    /// [`Self::Recovery`] here; [`read_header`] upgrades it to
    /// [`Self::RecoveryV2`] when the deobfuscated header revision matches.
    pub fn detect(prefix: &[u8; 4]) -> Option<Self> {
        match prefix {
            b"FC02" | b"FD03" => Some(Self::OtaV1),
            b"FC04" | b"FD04" => Some(Self::OtaV2),
            b"FB01" | b"FB02" => Some(Self::Recovery),
            b"FB03" => Some(Self::Component),
            b"SP01" => Some(Self::Signature),
            [0x1f, 0x8b, ..] => Some(Self::UserData),
            b"PK\x03\x04" => Some(Self::Android),
            _ => None,
        }
    }

    /// Magic written when creating a bundle of this kind. The wrapperless
    /// kinds have none.
    pub fn magic(self) -> Option<&'static [u8; 4]> {
        match self {
            Self::OtaV1 => Some(b"FD03"),
            Self::OtaV2 => Some(b"FD04"),
            Self::Recovery | Self::RecoveryV2 => Some(b"FB02"),
            Self::Component => Some(b"FB03"),
            Self::Signature => Some(b"SP01"),
            Self::UserData | Self::Android => None,
        }
    }

    /// Whether the header region after the magic is obfuscated.
    pub fn obfuscated_header(self) -> bool {
        matches!(
            self,
            Self::OtaV1 | Self::OtaV2 | Self::RecoveryV2 | Self::Component | Self::Signature,
        )
    }

    /// Whether the payload after the header is obfuscated.
    pub fn obfuscated_payload(self) -> bool {
        matches!(
            self,
            Self::OtaV1 | Self::OtaV2 | Self::Recovery | Self::RecoveryV2 | Self::Component,
        )
    }
}

impl fmt::Display for BundleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OtaV1 => "OTA update",
            Self::OtaV2 => "OTA update v2",
            Self::Recovery => "recovery update",
            Self::RecoveryV2 => "recovery update v2",
            Self::Component => "component update",
            Self::Signature => "update signature",
            Self::UserData => "user data package",
            Self::Android => "Android update",
        };

        write!(f, "{name}")
    }
}

/// Selector for the signing key whose public counterpart the device uses to
/// check the bundle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CertificateNumber {
    #[default]
    Developer = 0x00,
    Official1K = 0x01,
    Official2K = 0x02,
}

impl CertificateNumber {
    pub fn from_wire(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Self::Developer),
            0x01 => Ok(Self::Official1K),
            0x02 => Ok(Self::Official2K),
            v => Err(Error::UnknownCertificate(v)),
        }
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }

    /// Length in bytes of signatures made with the matching key.
    pub fn signature_size(self) -> usize {
        match self {
            Self::Developer | Self::Official1K => 128,
            Self::Official2K => 256,
        }
    }
}

impl fmt::Display for CertificateNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Developer => write!(f, "developer"),
            Self::Official1K => write!(f, "official (1K)"),
            Self::Official2K => write!(f, "official (2K)"),
        }
    }
}

/// The MD5 digest carried in a header: 32 ASCII hex characters covering the
/// payload bytes exactly as they appear after the header in the file.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Md5Field(pub [u8; MD5_HEX_LEN]);

impl Md5Field {
    pub fn from_hex(hex: &str) -> Result<Self> {
        let bytes: [u8; MD5_HEX_LEN] = hex
            .as_bytes()
            .try_into()
            .map_err(|_| Error::InvalidDigestField)?;

        Self::from_bytes(bytes)
    }

    fn from_bytes(bytes: [u8; MD5_HEX_LEN]) -> Result<Self> {
        if !bytes.iter().all(u8::is_ascii_hexdigit) {
            return Err(Error::InvalidDigestField);
        }

        Ok(Self(bytes))
    }

    pub fn as_str(&self) -> &str {
        // Checked to be ASCII hex on construction.
        std::str::from_utf8(&self.0).unwrap()
    }
}

impl fmt::Debug for Md5Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OtaHeader {
    pub source_revision: u32,
    pub target_revision: u32,
    pub device: u16,
    pub optional: bool,
    pub md5: Md5Field,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OtaV2Header {
    pub source_revision: u64,
    pub target_revision: u64,
    pub md5: Md5Field,
    pub devices: Vec<u16>,
    pub metadata: Vec<(String, String)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoveryHeader {
    pub md5: Md5Field,
    pub magic_1: u32,
    pub magic_2: u32,
    pub minor: u32,
    pub device: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoveryV2Header {
    pub target_revision: u64,
    pub md5: Md5Field,
    pub magic_1: u32,
    pub magic_2: u32,
    pub minor: u32,
    pub platform: u32,
    pub header_rev: u32,
    pub board: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureHeader {
    pub certificate_number: CertificateNumber,
}

/// A parsed bundle header. The variant is the deserialization discriminant
/// chosen from the magic (plus the header revision tie-break for `FB02`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Header {
    Ota(OtaHeader),
    OtaV2(OtaV2Header),
    Recovery(RecoveryHeader),
    RecoveryV2(RecoveryV2Header),
    Component(OtaHeader),
    Signature(SignatureHeader),
}

impl Header {
    pub fn kind(&self) -> BundleKind {
        match self {
            Self::Ota(_) => BundleKind::OtaV1,
            Self::OtaV2(_) => BundleKind::OtaV2,
            Self::Recovery(_) => BundleKind::Recovery,
            Self::RecoveryV2(_) => BundleKind::RecoveryV2,
            Self::Component(_) => BundleKind::Component,
            Self::Signature(_) => BundleKind::Signature,
        }
    }

    /// The payload digest carried by this header, if the kind has one.
    pub fn payload_md5(&self) -> Option<&Md5Field> {
        match self {
            Self::Ota(h) | Self::Component(h) => Some(&h.md5),
            Self::OtaV2(h) => Some(&h.md5),
            Self::Recovery(h) => Some(&h.md5),
            Self::RecoveryV2(h) => Some(&h.md5),
            Self::Signature(_) => None,
        }
    }
}

fn u16_le(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(buf[offset..offset + 2].try_into().unwrap())
}

fn u32_le(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

fn u64_le(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}

fn md5_at(buf: &[u8], offset: usize) -> Result<Md5Field> {
    Md5Field::from_bytes(buf[offset..offset + MD5_HEX_LEN].try_into().unwrap())
}

fn parse_ota_v1(region: &[u8; OTA_HEADER_SIZE]) -> Result<OtaHeader> {
    Ok(OtaHeader {
        source_revision: u32_le(region, 0),
        target_revision: u32_le(region, 4),
        device: u16_le(region, 8),
        optional: region[10] != 0,
        md5: md5_at(region, 12)?,
    })
}

fn read_ota_v2(reader: impl Read) -> Result<OtaV2Header> {
    // The header is logically variable-sized, so it is streamed through the
    // deobfuscation rather than read as one block. The transform is
    // stateless per byte, which makes this equivalent to deobfuscating the
    // whole region at once.
    let mut reader = MungingReader::new(reader, Direction::Demunge);
    let mut consumed = 0usize;

    let part1 = reader.read_array_exact::<18>()?;
    consumed += 18;

    let source_revision = u64_le(&part1, 0);
    let target_revision = u64_le(&part1, 8);

    let md5 = Md5Field::from_bytes(reader.read_array_exact::<MD5_HEX_LEN>()?)?;
    consumed += MD5_HEX_LEN;

    let num_metadata = u16::from_le_bytes(reader.read_array_exact::<2>()?);
    let num_devices = u16::from_le_bytes(reader.read_array_exact::<2>()?);
    consumed += 4;

    let mut devices = Vec::with_capacity(num_devices.into());
    for _ in 0..num_devices {
        devices.push(u16::from_le_bytes(reader.read_array_exact::<2>()?));
        consumed += 2;
    }

    let mut metadata = Vec::with_capacity(num_metadata.into());
    for _ in 0..num_metadata {
        let len = u16::from_le_bytes(reader.read_array_exact::<2>()?);
        let record = reader.read_vec_exact(len.into())?;
        consumed += 2 + usize::from(len);

        let record = String::from_utf8_lossy(&record);
        let (key, value) = record.split_once('=').unwrap_or((record.as_ref(), ""));
        metadata.push((key.to_owned(), value.to_owned()));
    }

    // Short headers are padded out to the fixed block size.
    if consumed < OTA_HEADER_SIZE {
        reader.read_discard_exact((OTA_HEADER_SIZE - consumed) as u64)?;
    }

    Ok(OtaV2Header {
        source_revision,
        target_revision,
        md5,
        devices,
        metadata,
    })
}

fn parse_recovery_v1(region: &[u8]) -> Result<RecoveryHeader> {
    Ok(RecoveryHeader {
        md5: md5_at(region, 12)?,
        magic_1: u32_le(region, 44),
        magic_2: u32_le(region, 48),
        minor: u32_le(region, 52),
        device: u32_le(region, 56),
    })
}

fn parse_recovery_v2(region: &[u8]) -> Result<RecoveryV2Header> {
    let header_rev = u32_le(region, RECOVERY_V2_HEADER_REV_OFFSET);
    if header_rev != RECOVERY_V2_HEADER_REV {
        return Err(Error::UnsupportedHeaderRev(header_rev));
    }

    Ok(RecoveryV2Header {
        target_revision: u64_le(region, 4),
        md5: md5_at(region, 12)?,
        magic_1: u32_le(region, 44),
        magic_2: u32_le(region, 48),
        minor: u32_le(region, 52),
        platform: u32_le(region, 56),
        header_rev,
        board: u32_le(region, 64),
    })
}

/// Read and parse the header region of a bundle whose 4-byte magic has
/// already been consumed. Obfuscated regions are deobfuscated before any
/// field is parsed. For `FB02`, the layout is chosen by deobfuscating the
/// region and testing the v2 header revision field against the known set.
pub fn read_header(mut reader: impl Read, magic: [u8; 4]) -> Result<Header> {
    let kind = BundleKind::detect(&magic).ok_or(Error::UnknownMagic(magic))?;

    match kind {
        BundleKind::OtaV1 | BundleKind::Component => {
            let mut region = reader.read_array_exact::<OTA_HEADER_SIZE>()?;
            obfuscate::demunge(&mut region);

            let header = parse_ota_v1(&region)?;

            if kind == BundleKind::OtaV1 {
                Ok(Header::Ota(header))
            } else {
                Ok(Header::Component(header))
            }
        }
        BundleKind::OtaV2 => Ok(Header::OtaV2(read_ota_v2(reader)?)),
        // detect() only ever reports Recovery for FB02; the revision probe
        // below upgrades it.
        BundleKind::Recovery | BundleKind::RecoveryV2 => {
            let region = reader.read_vec_exact(RECOVERY_HEADER_SIZE)?;

            // The legacy FB01 magic predates the v2 layout.
            if &magic == b"FB02" {
                let mut rev_probe = [0u8; 4];
                rev_probe.copy_from_slice(
                    &region
                        [RECOVERY_V2_HEADER_REV_OFFSET..RECOVERY_V2_HEADER_REV_OFFSET + 4],
                );
                obfuscate::demunge(&mut rev_probe);

                if u32::from_le_bytes(rev_probe) == RECOVERY_V2_HEADER_REV {
                    let mut region = region;
                    obfuscate::demunge(&mut region);

                    return Ok(Header::RecoveryV2(parse_recovery_v2(&region)?));
                }
            }

            Ok(Header::Recovery(parse_recovery_v1(&region)?))
        }
        BundleKind::Signature => {
            let mut region = reader.read_array_exact::<OTA_HEADER_SIZE>()?;
            obfuscate::demunge(&mut region);

            Ok(Header::Signature(SignatureHeader {
                certificate_number: CertificateNumber::from_wire(region[0])?,
            }))
        }
        BundleKind::UserData | BundleKind::Android => Err(Error::NoHeader(kind)),
    }
}

impl Header {
    fn serialize_region(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();

        match self {
            Self::Ota(h) | Self::Component(h) => {
                buf.extend_from_slice(&h.source_revision.to_le_bytes());
                buf.extend_from_slice(&h.target_revision.to_le_bytes());
                buf.extend_from_slice(&h.device.to_le_bytes());
                buf.push(h.optional.into());
                buf.push(0);
                buf.extend_from_slice(&h.md5.0);
                buf.resize(OTA_HEADER_SIZE, 0);
            }
            Self::OtaV2(h) => {
                let num_devices = h
                    .devices
                    .len()
                    .to_u16()
                    .ok_or(Error::TooManyDevices(h.devices.len()))?;
                let num_metadata = h
                    .metadata
                    .len()
                    .to_u16()
                    .ok_or(Error::TooManyMetadata(h.metadata.len()))?;

                buf.extend_from_slice(&h.source_revision.to_le_bytes());
                buf.extend_from_slice(&h.target_revision.to_le_bytes());
                buf.extend_from_slice(&0u16.to_le_bytes());
                buf.extend_from_slice(&h.md5.0);
                buf.extend_from_slice(&num_metadata.to_le_bytes());
                buf.extend_from_slice(&num_devices.to_le_bytes());

                for device in &h.devices {
                    buf.extend_from_slice(&device.to_le_bytes());
                }

                for (key, value) in &h.metadata {
                    let record = format!("{key}={value}");
                    let len = record
                        .len()
                        .to_u16()
                        .ok_or(Error::MetadataTooLong(record.len()))?;

                    buf.extend_from_slice(&len.to_le_bytes());
                    buf.extend_from_slice(record.as_bytes());
                }

                if buf.len() < OTA_HEADER_SIZE {
                    buf.resize(OTA_HEADER_SIZE, 0);
                }
            }
            Self::Recovery(h) => {
                buf.resize(RECOVERY_HEADER_SIZE, 0);
                buf[12..44].copy_from_slice(&h.md5.0);
                buf[44..48].copy_from_slice(&h.magic_1.to_le_bytes());
                buf[48..52].copy_from_slice(&h.magic_2.to_le_bytes());
                buf[52..56].copy_from_slice(&h.minor.to_le_bytes());
                buf[56..60].copy_from_slice(&h.device.to_le_bytes());
            }
            Self::RecoveryV2(h) => {
                buf.resize(RECOVERY_HEADER_SIZE, 0);
                buf[4..12].copy_from_slice(&h.target_revision.to_le_bytes());
                buf[12..44].copy_from_slice(&h.md5.0);
                buf[44..48].copy_from_slice(&h.magic_1.to_le_bytes());
                buf[48..52].copy_from_slice(&h.magic_2.to_le_bytes());
                buf[52..56].copy_from_slice(&h.minor.to_le_bytes());
                buf[56..60].copy_from_slice(&h.platform.to_le_bytes());
                buf[60..64].copy_from_slice(&h.header_rev.to_le_bytes());
                buf[64..68].copy_from_slice(&h.board.to_le_bytes());
            }
            Self::Signature(h) => {
                buf.resize(OTA_HEADER_SIZE, 0);
                buf[0] = h.certificate_number.to_wire();
            }
        }

        Ok(buf)
    }
}

impl<W: Write> ToWriter<W> for Header {
    type Error = Error;

    /// Write the magic and the (obfuscated, where required) header region.
    fn to_writer(&self, mut writer: W) -> Result<()> {
        let kind = self.kind();
        let mut region = self.serialize_region()?;

        if kind.obfuscated_header() {
            obfuscate::munge(&mut region);
        }

        // Both recovery layouts share a creation magic, so this is always
        // present for header-carrying kinds.
        writer.write_all(kind.magic().unwrap())?;
        writer.write_all(&region)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::stream::{ReadFixedSizeExt, ToWriter};

    use super::{
        read_header, BundleKind, CertificateNumber, Error, Header, Md5Field, OtaHeader,
        OtaV2Header, RecoveryHeader, RecoveryV2Header, SignatureHeader, OTA_HEADER_SIZE,
        RECOVERY_HEADER_SIZE, RECOVERY_MAGIC_1, RECOVERY_MAGIC_2, RECOVERY_V2_HEADER_REV,
    };

    fn dummy_md5() -> Md5Field {
        Md5Field::from_hex("d41d8cd98f00b204e9800998ecf8427e").unwrap()
    }

    fn round_trip(header: &Header) -> Header {
        let mut buf = Vec::new();
        header.to_writer(&mut buf).unwrap();

        let mut cursor = Cursor::new(buf);
        let magic = cursor.read_array_exact::<4>().unwrap();

        read_header(cursor, magic).unwrap()
    }

    #[test]
    fn detect_magics() {
        assert_eq!(BundleKind::detect(b"FC02"), Some(BundleKind::OtaV1));
        assert_eq!(BundleKind::detect(b"FD03"), Some(BundleKind::OtaV1));
        assert_eq!(BundleKind::detect(b"FC04"), Some(BundleKind::OtaV2));
        assert_eq!(BundleKind::detect(b"FD04"), Some(BundleKind::OtaV2));
        assert_eq!(BundleKind::detect(b"FB01"), Some(BundleKind::Recovery));
        assert_eq!(BundleKind::detect(b"FB02"), Some(BundleKind::Recovery));
        assert_eq!(BundleKind::detect(b"FB03"), Some(BundleKind::Component));
        assert_eq!(BundleKind::detect(b"SP01"), Some(BundleKind::Signature));
        assert_eq!(
            BundleKind::detect(&[0x1f, 0x8b, 0x08, 0x00]),
            Some(BundleKind::UserData),
        );
        assert_eq!(BundleKind::detect(b"PK\x03\x04"), Some(BundleKind::Android));
        assert_eq!(BundleKind::detect(b"XXXX"), None);
    }

    #[test]
    fn ota_v1_round_trip() {
        let header = Header::Ota(OtaHeader {
            source_revision: 1234,
            target_revision: 2468,
            device: 0x24,
            optional: true,
            md5: dummy_md5(),
        });

        assert_eq!(round_trip(&header), header);

        let mut buf = Vec::new();
        header.to_writer(&mut buf).unwrap();
        assert_eq!(buf.len(), 4 + OTA_HEADER_SIZE);
        assert_eq!(&buf[..4], b"FD03");
        // The region must not leak plaintext fields.
        assert_ne!(&buf[4..8], &1234u32.to_le_bytes());
    }

    #[test]
    fn ota_v2_round_trip() {
        let header = Header::OtaV2(OtaV2Header {
            source_revision: 0,
            target_revision: u64::MAX,
            md5: dummy_md5(),
            devices: vec![0x201, 0x202],
            metadata: vec![],
        });

        assert_eq!(round_trip(&header), header);

        // 18 + 32 + 4 + 4 = 58 bytes of fields, padded to 60.
        let mut buf = Vec::new();
        header.to_writer(&mut buf).unwrap();
        assert_eq!(buf.len(), 4 + OTA_HEADER_SIZE);
    }

    #[test]
    fn ota_v2_metadata_overflows_minimum_size() {
        let header = Header::OtaV2(OtaV2Header {
            source_revision: 5,
            target_revision: 6,
            md5: dummy_md5(),
            devices: vec![0x201, 0x202, 0x204, 0x205, 0x206, 0x207],
            metadata: vec![
                ("fw".to_owned(), "5.16.2.1.1".to_owned()),
                ("label".to_owned(), "nightly".to_owned()),
            ],
        });

        let mut buf = Vec::new();
        header.to_writer(&mut buf).unwrap();
        assert!(buf.len() > 4 + OTA_HEADER_SIZE);

        assert_eq!(round_trip(&header), header);
    }

    #[test]
    fn recovery_v1_round_trip() {
        let header = Header::Recovery(RecoveryHeader {
            md5: dummy_md5(),
            magic_1: RECOVERY_MAGIC_1,
            magic_2: RECOVERY_MAGIC_2,
            minor: 7,
            device: 0xD4,
        });

        assert_eq!(round_trip(&header), header);

        // The v1 region is plaintext; the digest is visible on the wire.
        let mut buf = Vec::new();
        header.to_writer(&mut buf).unwrap();
        assert_eq!(buf.len(), 4 + RECOVERY_HEADER_SIZE);
        assert_eq!(&buf[4 + 12..4 + 44], dummy_md5().0.as_slice());
    }

    #[test]
    fn recovery_v2_round_trip_and_dispatch() {
        let header = Header::RecoveryV2(RecoveryV2Header {
            target_revision: 1_000_000_000_000,
            md5: dummy_md5(),
            magic_1: RECOVERY_MAGIC_1,
            magic_2: RECOVERY_MAGIC_2,
            minor: 0,
            platform: 0x0C,
            header_rev: RECOVERY_V2_HEADER_REV,
            board: 0,
        });

        let parsed = round_trip(&header);
        assert_eq!(parsed.kind(), BundleKind::RecoveryV2);
        assert_eq!(parsed, header);

        // Same magic, v1 layout: the probe at the v2 header revision offset
        // reads obfuscated zero padding and must not match.
        let v1 = Header::Recovery(RecoveryHeader {
            md5: dummy_md5(),
            magic_1: RECOVERY_MAGIC_1,
            magic_2: RECOVERY_MAGIC_2,
            minor: 1,
            device: 0x24,
        });
        assert_eq!(round_trip(&v1).kind(), BundleKind::Recovery);
    }

    #[test]
    fn signature_round_trip() {
        for cert in [
            CertificateNumber::Developer,
            CertificateNumber::Official1K,
            CertificateNumber::Official2K,
        ] {
            let header = Header::Signature(SignatureHeader {
                certificate_number: cert,
            });

            assert_eq!(round_trip(&header), header);
        }
    }

    #[test]
    fn certificate_numbers() {
        assert_eq!(
            CertificateNumber::from_wire(0).unwrap(),
            CertificateNumber::Developer,
        );
        assert_eq!(CertificateNumber::Developer.signature_size(), 128);
        assert_eq!(CertificateNumber::Official1K.signature_size(), 128);
        assert_eq!(CertificateNumber::Official2K.signature_size(), 256);
        assert!(matches!(
            CertificateNumber::from_wire(3),
            Err(Error::UnknownCertificate(3)),
        ));
    }

    #[test]
    fn unknown_magic() {
        let err = read_header(Cursor::new([0u8; 64]), *b"ZZ99").unwrap_err();
        assert!(matches!(err, Error::UnknownMagic(_)));
    }

    #[test]
    fn truncated_header() {
        let err = read_header(Cursor::new([0u8; 10]), *b"FD03").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
