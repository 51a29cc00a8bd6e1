// SPDX-FileCopyrightText: 2024-2025 The kbundle developers
// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use clap::ValueEnum;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown device code: {0:?}")]
    UnknownDevice(String),
}

type Result<T> = std::result::Result<T, Error>;

/// Device identifiers use a variant of Crockford's base-32 with `L` and `U`
/// re-added: the digits, then the letters minus `I`, `O`, `Y` and `Z`.
const BASE32_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKLMNPQRSTUVWX";

/// One known device. Records with "Unknown" names are codes that have been
/// seen in the wild (serial prefixes, firmware file lists) without a
/// confirmed marketing name; keeping them in the table lets decoding succeed
/// on them without the relaxed policy.
pub struct DeviceRecord {
    pub code: u32,
    pub name: &'static str,
    pub platform: Option<Platform>,
}

const fn dev(code: u32, name: &'static str, platform: Option<Platform>) -> DeviceRecord {
    DeviceRecord {
        code,
        name,
        platform,
    }
}

use Platform::{
    Bellatrix, Bellatrix3, Bellatrix4, Duet, Heisenberg, Luigi, Mario, Rex, Wario, Yoshi, Yoshime,
    Zelda,
};

#[rustfmt::skip]
pub static DEVICES: &[DeviceRecord] = &[
    dev(0x00, "Unknown Kindle", None),
    dev(0x01, "Kindle 1", None),
    dev(0x02, "Kindle 2 (US)", Some(Mario)),
    dev(0x03, "Kindle 2 (International)", Some(Mario)),
    dev(0x04, "Kindle DX (US)", Some(Mario)),
    dev(0x05, "Kindle DX (International)", Some(Mario)),
    dev(0x09, "Kindle DX Graphite", Some(Mario)),
    dev(0x08, "Kindle 3 (WiFi)", Some(Luigi)),
    dev(0x06, "Kindle 3 (WiFi+3G)", Some(Luigi)),
    dev(0x0A, "Kindle 3 (WiFi+3G, Europe)", Some(Luigi)),
    dev(0x0E, "Kindle 4 (Silver)", Some(Yoshi)),
    dev(0x0F, "Kindle Touch (WiFi+3G)", Some(Yoshi)),
    dev(0x11, "Kindle Touch (WiFi)", Some(Yoshi)),
    dev(0x10, "Kindle Touch (WiFi+3G, Europe)", Some(Yoshi)),
    dev(0x12, "Kindle Touch (Unknown variant)", Some(Yoshi)),
    dev(0x23, "Kindle 4 (Black)", Some(Yoshi)),
    dev(0x24, "Kindle PaperWhite (WiFi)", Some(Yoshime)),
    dev(0x1B, "Kindle PaperWhite (WiFi+3G)", Some(Yoshime)),
    dev(0x1C, "Kindle PaperWhite (WiFi+3G, Canada)", Some(Yoshime)),
    dev(0x1D, "Kindle PaperWhite (WiFi+3G, Europe)", Some(Yoshime)),
    dev(0x1F, "Kindle PaperWhite (WiFi+3G, Japan)", Some(Yoshime)),
    dev(0x20, "Kindle PaperWhite (WiFi+3G, Brazil)", Some(Yoshime)),
    dev(0xD4, "Kindle PaperWhite 2 (WiFi)", Some(Wario)),
    dev(0x5A, "Kindle PaperWhite 2 (WiFi, Japan)", Some(Wario)),
    dev(0xD5, "Kindle PaperWhite 2 (WiFi+3G)", Some(Wario)),
    dev(0xD6, "Kindle PaperWhite 2 (WiFi+3G, Canada)", Some(Wario)),
    dev(0xD7, "Kindle PaperWhite 2 (WiFi+3G, Europe)", Some(Wario)),
    dev(0xD8, "Kindle PaperWhite 2 (WiFi+3G, Russia)", Some(Wario)),
    dev(0xF2, "Kindle PaperWhite 2 (WiFi+3G, Japan)", Some(Wario)),
    dev(0x17, "Kindle PaperWhite 2 (WiFi, 4GB, International)", Some(Wario)),
    dev(0x60, "Kindle PaperWhite 2 (WiFi+3G, 4GB, Europe)", Some(Wario)),
    dev(0xF4, "Kindle PaperWhite 2 (Unknown variant 0xF4)", Some(Wario)),
    dev(0xF9, "Kindle PaperWhite 2 (Unknown variant 0xF9)", Some(Wario)),
    dev(0x62, "Kindle PaperWhite 2 (WiFi+3G, 4GB)", Some(Wario)),
    dev(0x61, "Kindle PaperWhite 2 (WiFi+3G, 4GB, Brazil)", Some(Wario)),
    dev(0x5F, "Kindle PaperWhite 2 (WiFi+3G, 4GB, Canada)", Some(Wario)),
    dev(0xC6, "Kindle Basic", Some(Wario)),
    dev(0x13, "Kindle Voyage (WiFi)", Some(Wario)),
    dev(0x16, "Unknown Kindle (0x16)", None),
    dev(0x21, "Unknown Kindle (0x21)", None),
    dev(0x54, "Kindle Voyage (WiFi+3G)", Some(Wario)),
    dev(0x2A, "Kindle Voyage (WiFi+3G, Japan)", Some(Wario)),
    dev(0x4F, "Kindle Voyage (WiFi+3G, variant 0x4F)", Some(Wario)),
    dev(0x52, "Kindle Voyage (WiFi+3G, Mexico)", Some(Wario)),
    dev(0x53, "Kindle Voyage (WiFi+3G, Europe)", Some(Wario)),
    dev(0x07, "Unknown Kindle (0x07)", None),
    dev(0x0B, "Unknown Kindle (0x0B)", None),
    dev(0x0C, "Unknown Kindle (0x0C)", None),
    dev(0x0D, "Unknown Kindle (0x0D)", None),
    dev(0x99, "Unknown Kindle (0x99)", None),
    dev(0xDD, "Kindle Basic (Kiwi)", Some(Wario)),
    dev(0x201, "Kindle PaperWhite 3 (WiFi)", Some(Wario)),
    dev(0x202, "Kindle PaperWhite 3 (WiFi+3G)", Some(Wario)),
    dev(0x204, "Kindle PaperWhite 3 (WiFi+3G, Mexico)", Some(Wario)),
    dev(0x205, "Kindle PaperWhite 3 (WiFi+3G, Europe)", Some(Wario)),
    dev(0x206, "Kindle PaperWhite 3 (WiFi+3G, Canada)", Some(Wario)),
    dev(0x207, "Kindle PaperWhite 3 (WiFi+3G, Japan)", Some(Wario)),
    dev(0x26B, "Kindle PaperWhite 3 (White, WiFi)", Some(Wario)),
    dev(0x26C, "Kindle PaperWhite 3 (White, WiFi+3G, Japan)", Some(Wario)),
    dev(0x26D, "Unknown Kindle PaperWhite 3 (White, 0KD?)", Some(Wario)),
    dev(0x26E, "Kindle PaperWhite 3 (White, WiFi+3G, International)", Some(Wario)),
    dev(0x26F, "Kindle PaperWhite 3 (White, WiFi+3G, International bis)", Some(Wario)),
    dev(0x270, "Unknown Kindle PaperWhite 3 (White, 0KG?)", Some(Wario)),
    dev(0x293, "Kindle PaperWhite 3 (Black, WiFi, 32GB, Japan)", Some(Wario)),
    dev(0x294, "Kindle PaperWhite 3 (White, WiFi, 32GB, Japan)", Some(Wario)),
    dev(0x6F7B, "Unknown Kindle PaperWhite 3 (TTT?)", Some(Wario)),
    dev(0x20C, "Kindle Oasis (WiFi)", Some(Duet)),
    dev(0x20D, "Kindle Oasis (WiFi+3G)", Some(Duet)),
    dev(0x219, "Kindle Oasis (WiFi+3G, International)", Some(Duet)),
    dev(0x21A, "Unknown Kindle Oasis (0GS?)", Some(Duet)),
    dev(0x21B, "Kindle Oasis (WiFi+3G, China)", Some(Duet)),
    dev(0x21C, "Kindle Oasis (WiFi+3G, Europe)", Some(Duet)),
    dev(0x1BC, "Unknown Kindle Basic 2 (0DU?)", Some(Heisenberg)),
    dev(0x269, "Kindle Basic 2 (Black)", Some(Heisenberg)),
    dev(0x26A, "Kindle Basic 2 (White)", Some(Heisenberg)),
    dev(0x295, "Unknown Kindle Oasis 2 (0LM?)", Some(Zelda)),
    dev(0x296, "Unknown Kindle Oasis 2 (0LN?)", Some(Zelda)),
    dev(0x297, "Unknown Kindle Oasis 2 (0LP?)", Some(Zelda)),
    dev(0x298, "Unknown Kindle Oasis 2 (0LQ?)", Some(Zelda)),
    dev(0x2E1, "Kindle Oasis 2 (WiFi, 32GB, Champagne)", Some(Zelda)),
    dev(0x2E2, "Unknown Kindle Oasis 2 (0P2?)", Some(Zelda)),
    dev(0x2E6, "Unknown Kindle Oasis 2 (0P6?)", Some(Zelda)),
    dev(0x2E7, "Unknown Kindle Oasis 2 (0P7?)", Some(Zelda)),
    dev(0x2E8, "Kindle Oasis 2 (WiFi, 8GB)", Some(Zelda)),
    dev(0x341, "Kindle Oasis 2 (WiFi+3G, 32GB)", Some(Zelda)),
    dev(0x342, "Kindle Oasis 2 (WiFi+3G, 32GB, Europe)", Some(Zelda)),
    dev(0x343, "Unknown Kindle Oasis 2 (0S3?)", Some(Zelda)),
    dev(0x344, "Unknown Kindle Oasis 2 (0S4?)", Some(Zelda)),
    dev(0x347, "Unknown Kindle Oasis 2 (0S7?)", Some(Zelda)),
    dev(0x34A, "Kindle Oasis 2 (WiFi, 32GB)", Some(Zelda)),
    dev(0x2F7, "Kindle PaperWhite 4 (WiFi, 8GB)", Some(Rex)),
    dev(0x361, "Kindle PaperWhite 4 (WiFi+4G, 32GB)", Some(Rex)),
    dev(0x362, "Kindle PaperWhite 4 (WiFi+4G, 32GB, Europe)", Some(Rex)),
    dev(0x363, "Kindle PaperWhite 4 (WiFi+4G, 32GB, Japan)", Some(Rex)),
    dev(0x364, "Unknown Kindle PaperWhite 4 (0T4?)", Some(Rex)),
    dev(0x365, "Unknown Kindle PaperWhite 4 (0T5?)", Some(Rex)),
    dev(0x366, "Kindle PaperWhite 4 (WiFi, 32GB)", Some(Rex)),
    dev(0x367, "Unknown Kindle PaperWhite 4 (0T7?)", Some(Rex)),
    dev(0x372, "Unknown Kindle PaperWhite 4 (0TJ?)", Some(Rex)),
    dev(0x373, "Unknown Kindle PaperWhite 4 (0TK?)", Some(Rex)),
    dev(0x374, "Unknown Kindle PaperWhite 4 (0TL?)", Some(Rex)),
    dev(0x375, "Unknown Kindle PaperWhite 4 (0TM?)", Some(Rex)),
    dev(0x376, "Unknown Kindle PaperWhite 4 (0TN?)", Some(Rex)),
    dev(0x402, "Kindle PaperWhite 4 (WiFi, 8GB, India)", Some(Rex)),
    dev(0x403, "Kindle PaperWhite 4 (WiFi, 32GB, India)", Some(Rex)),
    dev(0x4D8, "Kindle PaperWhite 4 (WiFi, 32GB, Twilight Blue)", Some(Rex)),
    dev(0x4D9, "Kindle PaperWhite 4 (WiFi, 32GB, Plum)", Some(Rex)),
    dev(0x4DA, "Kindle PaperWhite 4 (WiFi, 32GB, Sage)", Some(Rex)),
    dev(0x4DB, "Kindle PaperWhite 4 (WiFi, 8GB, Twilight Blue)", Some(Rex)),
    dev(0x4DC, "Kindle PaperWhite 4 (WiFi, 8GB, Plum)", Some(Rex)),
    dev(0x4DD, "Kindle PaperWhite 4 (WiFi, 8GB, Sage)", Some(Rex)),
    dev(0x2F4, "Unknown Kindle PaperWhite 4 (0PL?)", Some(Rex)),
    dev(0x414, "Kindle Basic 3", Some(Rex)),
    dev(0x3CF, "Kindle Basic 3 (White, 8GB)", Some(Rex)),
    dev(0x3D0, "Unknown Kindle Basic 3 (0WG?)", Some(Rex)),
    dev(0x3D1, "Kindle Basic 3 (White)", Some(Rex)),
    dev(0x3D2, "Unknown Kindle Basic 3 (0WJ?)", Some(Rex)),
    dev(0x3AB, "Kindle Basic 3 (Kids Edition)", Some(Rex)),
    dev(0x434, "Kindle Oasis 3 (WiFi, 32GB, Champagne)", Some(Zelda)),
    dev(0x3D8, "Kindle Oasis 3 (WiFi+4G, 32GB, Japan)", Some(Zelda)),
    dev(0x3D7, "Kindle Oasis 3 (WiFi+4G, 32GB, India)", Some(Zelda)),
    dev(0x3D6, "Kindle Oasis 3 (WiFi+4G, 32GB)", Some(Zelda)),
    dev(0x3D5, "Kindle Oasis 3 (WiFi, 32GB)", Some(Zelda)),
    dev(0x3D4, "Kindle Oasis 3 (WiFi, 8GB)", Some(Zelda)),
    dev(0x690, "Kindle PaperWhite 5 (Signature Edition)", Some(Bellatrix)),
    dev(0x700, "Unknown Kindle PaperWhite 5 (1Q0?)", Some(Bellatrix)),
    dev(0x6FF, "Kindle PaperWhite 5 (8GB)", Some(Bellatrix)),
    dev(0x7AD, "Unknown Kindle PaperWhite 5 (1VD?)", Some(Bellatrix)),
    dev(0x829, "Kindle PaperWhite 5 (Signature Edition, 32GB, Denim)", Some(Bellatrix)),
    dev(0x82A, "Kindle PaperWhite 5 (21A)", Some(Bellatrix)),
    dev(0x971, "Kindle PaperWhite 5 (Signature Edition, 2BH)", Some(Bellatrix)),
    dev(0x972, "Unknown Kindle PaperWhite 5 (2BJ?)", Some(Bellatrix)),
    dev(0x9B3, "Kindle PaperWhite 5 (2DK)", Some(Bellatrix)),
    dev(0x84D, "Unknown Kindle Basic 4 (22D?)", Some(Bellatrix)),
    dev(0x8BB, "Unknown Kindle Basic 4 (25T?)", Some(Bellatrix)),
    dev(0x86A, "Unknown Kindle Basic 4 (23A?)", Some(Bellatrix)),
    dev(0x958, "Kindle Basic 4 (2AQ)", Some(Bellatrix)),
    dev(0x957, "Kindle Basic 4 (2AP)", Some(Bellatrix)),
    dev(0x7F1, "Unknown Kindle Basic 4 (1XH?)", Some(Bellatrix)),
    dev(0x84C, "Unknown Kindle Basic 4 (22C?)", Some(Bellatrix)),
    dev(0x8F2, "Unknown Kindle Scribe (27J?)", Some(Bellatrix3)),
    dev(0x974, "Unknown Kindle Scribe (2BL?)", Some(Bellatrix3)),
    dev(0x8C3, "Unknown Kindle Scribe (263?)", Some(Bellatrix3)),
    dev(0x847, "Kindle Scribe (16GB, Japan)", Some(Bellatrix3)),
    dev(0x975, "Unknown Kindle Scribe (2BM?)", Some(Bellatrix3)),
    dev(0x874, "Kindle Scribe (23L)", Some(Bellatrix3)),
    dev(0x875, "Kindle Scribe (64GB)", Some(Bellatrix3)),
    dev(0x8E0, "Unknown Kindle Scribe (270?)", Some(Bellatrix3)),
    dev(0xE85, "Unknown Kindle Basic 5 (3L5?)", None),
    dev(0xE86, "Unknown Kindle Basic 5 (3L6?)", None),
    dev(0xE84, "Unknown Kindle Basic 5 (3L4?)", None),
    dev(0xE83, "Unknown Kindle Basic 5 (3L3?)", None),
    dev(0x2909, "Unknown Kindle Basic 5 (A89?)", None),
    dev(0xE82, "Unknown Kindle Basic 5 (3L2?)", None),
    dev(0xE75, "Kindle Basic 5 (3KM)", None),
    dev(0xC89, "Unknown Kindle PaperWhite 6 (349?)", Some(Bellatrix4)),
    dev(0xC86, "Unknown Kindle PaperWhite 6 (346?)", Some(Bellatrix4)),
    dev(0xC7F, "Kindle PaperWhite 6 (33X)", Some(Bellatrix4)),
    dev(0xC7E, "Unknown Kindle PaperWhite 6 (33W?)", Some(Bellatrix4)),
    dev(0xE2A, "Unknown Kindle PaperWhite 6 (3HA?)", Some(Bellatrix4)),
    dev(0xE25, "Unknown Kindle PaperWhite 6 (3H5?)", Some(Bellatrix4)),
    dev(0xE23, "Unknown Kindle PaperWhite 6 (3H3?)", Some(Bellatrix4)),
    dev(0xE28, "Unknown Kindle PaperWhite 6 (3H8?)", Some(Bellatrix4)),
    dev(0xE45, "Unknown Kindle PaperWhite 6 (3J5?)", Some(Bellatrix4)),
    dev(0xE5A, "Unknown Kindle PaperWhite 6 (3JS?)", Some(Bellatrix4)),
    dev(0xFA0, "Unknown Kindle Scribe 2 (3V0?)", Some(Bellatrix3)),
    dev(0xFA1, "Unknown Kindle Scribe 2 (3V1?)", Some(Bellatrix3)),
    dev(0xFE5, "Unknown Kindle Scribe 2 (3X5?)", Some(Bellatrix3)),
    dev(0xF9D, "Unknown Kindle Scribe 2 (3UV?)", Some(Bellatrix3)),
    dev(0xFE4, "Unknown Kindle Scribe 2 (3X4?)", Some(Bellatrix3)),
    dev(0xFE3, "Unknown Kindle Scribe 2 (3X3?)", Some(Bellatrix3)),
    dev(0x102E, "Unknown Kindle Scribe 2 (41E?)", Some(Bellatrix3)),
    dev(0x102D, "Unknown Kindle Scribe 2 (41D?)", Some(Bellatrix3)),
    dev(0xE29, "Unknown Kindle ColorSoft (3H9?)", Some(Bellatrix4)),
    dev(0xE24, "Unknown Kindle ColorSoft (3H4?)", Some(Bellatrix4)),
    dev(0xE2B, "Unknown Kindle ColorSoft (3HB?)", Some(Bellatrix4)),
    dev(0xE26, "Unknown Kindle ColorSoft (3H6?)", Some(Bellatrix4)),
    dev(0xE22, "Unknown Kindle ColorSoft (3H2?)", Some(Bellatrix4)),
    dev(0xC9F, "Unknown Kindle ColorSoft (34X?)", Some(Bellatrix4)),
    dev(0xE27, "Kindle ColorSoft (3H7)", Some(Bellatrix4)),
    dev(0xE5B, "Unknown Kindle ColorSoft (3JT?)", Some(Bellatrix4)),
    dev(0xE46, "Unknown Kindle ColorSoft (3J6?)", Some(Bellatrix4)),
    dev(0x10A6, "Unknown Kindle ColorSoft (456?)", Some(Bellatrix4)),
    dev(0x10A5, "Unknown Kindle ColorSoft (455?)", Some(Bellatrix4)),
    dev(0x11D7, "Unknown Kindle ColorSoft (4EP?)", Some(Bellatrix4)),
];

/// SoC family targeted by recovery bundles. The wire value is the discriminant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Platform {
    #[default]
    Unspecified = 0x00,
    Mario = 0x01,
    Luigi = 0x02,
    Banjo = 0x03,
    Yoshi = 0x04,
    YoshimeProto = 0x05,
    Yoshime = 0x06,
    Wario = 0x07,
    Duet = 0x08,
    Heisenberg = 0x09,
    Zelda = 0x0A,
    Rex = 0x0B,
    Bellatrix = 0x0C,
    Bellatrix3 = 0x0D,
    Bellatrix4 = 0x0E,
}

impl Platform {
    pub fn to_wire(self) -> u32 {
        self as u32
    }

    pub fn from_wire(value: u32) -> Option<Self> {
        Self::value_variants()
            .iter()
            .copied()
            .find(|p| p.to_wire() == value)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ValueEnum guarantees a name for every non-skipped variant.
        write!(f, "{}", self.to_possible_value().unwrap().get_name())
    }
}

/// Hardware revision targeted by recovery bundles. Board checks were only
/// ever enforced on the two boards below; everything since skips them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Board {
    #[default]
    Unspecified = 0x00,
    Tequila = 0x03,
    Whitney = 0x05,
}

impl Board {
    pub fn to_wire(self) -> u32 {
        self as u32
    }

    pub fn from_wire(value: u32) -> Option<Self> {
        Self::value_variants()
            .iter()
            .copied()
            .find(|b| b.to_wire() == value)
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_possible_value().unwrap().get_name())
    }
}

/// Look up a device record by wire code.
pub fn lookup(code: u32) -> Option<&'static DeviceRecord> {
    DEVICES.iter().find(|d| d.code == code)
}

/// Human-readable name for a device code, if known.
pub fn device_name(code: u32) -> Option<&'static str> {
    lookup(code).map(|d| d.name)
}

fn from_base32(token: &str) -> Option<u32> {
    let mut value: u32 = 0;

    for c in token.bytes() {
        let digit = BASE32_ALPHABET
            .iter()
            .position(|&a| a == c.to_ascii_uppercase())?;

        value = value.checked_mul(32)?.checked_add(digit as u32)?;
    }

    Some(value)
}

fn to_base32(mut value: u32) -> String {
    let mut digits = Vec::new();

    while value != 0 {
        digits.push(BASE32_ALPHABET[(value % 32) as usize]);
        value /= 32;
    }

    // Serial number prefixes are at least three characters wide.
    while digits.len() < 3 {
        digits.push(b'0');
    }

    digits.reverse();

    String::from_utf8(digits).unwrap()
}

/// Decode a device token to its wire code.
///
/// Two-character tokens that parse as a known legacy one-byte code take that
/// value; everything else is read as base-32. Codes absent from the device
/// table are rejected unless `accept_unknown` is set, in which case any
/// token is accepted (tokens with characters outside the alphabet fold to 0,
/// matching the historical tools).
pub fn decode_device(token: &str, accept_unknown: bool) -> Result<u32> {
    if token.len() == 2 {
        if let Ok(code) = u32::from_str_radix(token, 16) {
            if code <= 0xFF && lookup(code).is_some() {
                return Ok(code);
            }
        }
    }

    match from_base32(token) {
        Some(code) if accept_unknown || lookup(code).is_some() => Ok(code),
        None if accept_unknown => Ok(0),
        _ => Err(Error::UnknownDevice(token.to_owned())),
    }
}

/// Encode a device wire code as a token. Known legacy one-byte codes use the
/// two-digit hex form; everything else uses base-32, minimum three digits.
pub fn encode_device(code: u32) -> String {
    if code <= 0xFF && lookup(code).is_some() {
        format!("{code:02X}")
    } else {
        to_base32(code)
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_device, encode_device, lookup, Board, Error, Platform, DEVICES};

    #[test]
    fn decode_known_tokens() {
        assert_eq!(decode_device("0GC", false).unwrap(), 0x20C);
        assert_eq!(decode_device("01", false).unwrap(), 0x01);
        assert_eq!(decode_device("3HA", false).unwrap(), 0xE2A);
        // Case-insensitive on decode.
        assert_eq!(decode_device("0gc", false).unwrap(), 0x20C);
        // Longer than three characters.
        assert_eq!(decode_device("TTT", false).unwrap(), 0x6F7B);
        assert_eq!(decode_device("A89", false).unwrap(), 0x2909);
    }

    #[test]
    fn decode_unknown_tokens() {
        assert!(matches!(
            decode_device("ZZZ", false),
            Err(Error::UnknownDevice(_)),
        ));
        // Characters outside the alphabet fold to 0 under the relaxed policy.
        assert_eq!(decode_device("ZZZ", true).unwrap(), 0);

        // Well-formed but not in the table.
        assert!(matches!(
            decode_device("XXX", false),
            Err(Error::UnknownDevice(_)),
        ));
        assert_eq!(decode_device("XXX", true).unwrap(), 31 * 1024 + 31 * 32 + 31);
    }

    #[test]
    fn legacy_hex_vs_base32() {
        // "D4" is a known legacy code, so the hex interpretation wins.
        assert_eq!(decode_device("D4", false).unwrap(), 0xD4);
        // "AB" is valid hex but not a known legacy code, so it is base-32.
        assert_eq!(decode_device("AB", true).unwrap(), 10 * 32 + 11);
    }

    #[test]
    fn encode_forms() {
        assert_eq!(encode_device(0x01), "01");
        assert_eq!(encode_device(0xD4), "D4");
        assert_eq!(encode_device(0x20C), "0GC");
        assert_eq!(encode_device(0xE2A), "3HA");
        assert_eq!(encode_device(0x6F7B), "TTT");
        assert_eq!(encode_device(0x100), "080");
    }

    #[test]
    fn round_trip_table() {
        for record in DEVICES {
            let token = encode_device(record.code);
            assert_eq!(
                decode_device(&token, false).unwrap(),
                record.code,
                "token {token:?}",
            );

            if record.code >= 0x100 {
                assert!(token.len() >= 3);
                assert!(token
                    .bytes()
                    .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
            }
        }
    }

    #[test]
    fn encode_injective() {
        let mut tokens: Vec<String> = DEVICES.iter().map(|d| encode_device(d.code)).collect();
        let total = tokens.len();

        tokens.sort();
        tokens.dedup();

        assert_eq!(tokens.len(), total);
    }

    #[test]
    fn platform_and_board_wire() {
        assert_eq!(Platform::Wario.to_wire(), 0x07);
        assert_eq!(Platform::from_wire(0x0E), Some(Platform::Bellatrix4));
        assert_eq!(Platform::from_wire(0xFF), None);
        assert_eq!(Board::Whitney.to_wire(), 0x05);
        assert_eq!(Board::from_wire(0x03), Some(Board::Tequila));
    }

    #[test]
    fn table_lookup() {
        assert_eq!(lookup(0x20C).unwrap().name, "Kindle Oasis (WiFi)");
        assert_eq!(lookup(0x1BC).unwrap().platform, Some(Platform::Heisenberg));
        assert!(lookup(0xFFFF_FFFF).is_none());
    }
}
