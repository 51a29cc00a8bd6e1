// SPDX-FileCopyrightText: 2024-2025 The kbundle developers
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use crate::{
    cli::{
        args::UsageError,
        status, warning,
    },
    crypto::{self, PassphraseSource},
    device,
    env::Env,
    format::{
        bundle::{
            create_bundle, disassemble, BundleReport, CreateParams, CreateReport, OutputTarget,
            VerifyPolicy,
        },
        header::{BundleKind, CertificateNumber, Header},
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum KindArg {
    #[value(name = "ota")]
    Ota,
    #[value(name = "ota2")]
    Ota2,
    #[value(name = "recovery")]
    Recovery,
    #[value(name = "recovery2")]
    Recovery2,
    #[value(name = "sig")]
    Sig,
    #[value(name = "ota_update_data")]
    OtaUpdateData,
    #[value(name = "userdata")]
    UserData,
    #[value(name = "android")]
    Android,
}

impl KindArg {
    fn to_kind(self) -> BundleKind {
        match self {
            Self::Ota => BundleKind::OtaV1,
            Self::Ota2 => BundleKind::OtaV2,
            Self::Recovery => BundleKind::Recovery,
            Self::Recovery2 => BundleKind::RecoveryV2,
            Self::Sig => BundleKind::Signature,
            Self::OtaUpdateData => BundleKind::Component,
            Self::UserData => BundleKind::UserData,
            Self::Android => BundleKind::Android,
        }
    }
}

fn load_verify_policy(
    key: Option<&Path>,
    pass_file: Option<&Path>,
    pass_env_var: Option<&OsString>,
    skip: bool,
) -> Result<VerifyPolicy> {
    let public_key = match key {
        Some(path) => {
            let source = PassphraseSource::new(path, pass_file, pass_env_var.map(|v| v.as_os_str()));
            let key = crypto::read_pem_verify_key_file(path, &source)
                .with_context(|| format!("Failed to load key: {path:?}"))?;

            Some(key.to_public_key())
        }
        None => None,
    };

    Ok(VerifyPolicy {
        public_key,
        skip,
    })
}

fn print_header(header: &Header) {
    match header {
        Header::Ota(h) | Header::Component(h) => {
            status!("Source revision: {}", h.source_revision);
            status!("Target revision: {}", h.target_revision);

            let device = u32::from(h.device);
            match device::device_name(device) {
                Some(name) => status!(
                    "Device:          {} ({name})",
                    device::encode_device(device),
                ),
                None => status!("Device:          {}", device::encode_device(device)),
            }

            status!("Optional:        {}", h.optional);
            status!("Payload MD5:     {}", h.md5.as_str());
        }
        Header::OtaV2(h) => {
            status!("Source revision: {}", h.source_revision);
            status!("Target revision: {}", h.target_revision);

            for device in &h.devices {
                let device = u32::from(*device);
                match device::device_name(device) {
                    Some(name) => status!(
                        "Device:          {} ({name})",
                        device::encode_device(device),
                    ),
                    None => status!("Device:          {}", device::encode_device(device)),
                }
            }

            for (key, value) in &h.metadata {
                status!("Metadata:        {key}={value}");
            }

            status!("Payload MD5:     {}", h.md5.as_str());
        }
        Header::Recovery(h) => {
            status!("Magics:          {}, {}", h.magic_1, h.magic_2);
            status!("Minor:           {}", h.minor);

            match device::device_name(h.device) {
                Some(name) => status!(
                    "Device:          {} ({name})",
                    device::encode_device(h.device),
                ),
                None => status!("Device:          {}", device::encode_device(h.device)),
            }

            status!("Payload MD5:     {}", h.md5.as_str());
        }
        Header::RecoveryV2(h) => {
            status!("Target revision: {}", h.target_revision);
            status!("Magics:          {}, {}", h.magic_1, h.magic_2);
            status!("Minor:           {}", h.minor);

            match device::Platform::from_wire(h.platform) {
                Some(p) => status!("Platform:        {p}"),
                None => status!("Platform:        {:#04x}", h.platform),
            }

            match device::Board::from_wire(h.board) {
                Some(b) => status!("Board:           {b}"),
                None => status!("Board:           {:#04x}", h.board),
            }

            status!("Header revision: {}", h.header_rev);
            status!("Payload MD5:     {}", h.md5.as_str());
        }
        Header::Signature(h) => {
            status!("Certificate:     {}", h.certificate_number);
        }
    }
}

fn print_report(report: &BundleReport) {
    status!("Bundle kind:     {}", report.kind);

    if let Some(header) = &report.header {
        print_header(header);
    }

    status!("Payload size:    {} bytes", report.payload_size);

    for file in &report.files {
        if file.signed {
            status!("Extracted:       {} ({} bytes, signed)", file.path, file.size);
        } else {
            status!("Extracted:       {} ({} bytes)", file.path, file.size);
        }
    }
}

pub fn convert_main(cli: &ConvertCli, env: &Env, cancel_signal: &AtomicBool) -> Result<()> {
    let policy = load_verify_policy(
        cli.key.as_deref(),
        cli.pass_file.as_deref(),
        cli.pass_env_var.as_ref(),
        cli.no_verify,
    )?;

    let report = if cli.archive {
        let output = cli
            .output
            .clone()
            .unwrap_or_else(|| cli.input.with_extension("tar.gz"));

        status!("Converting {:?} to {output:?}", cli.input);

        disassemble(
            &cli.input,
            OutputTarget::Archive(&output),
            &policy,
            env,
            cancel_signal,
        )?
    } else {
        let output = cli.output.clone().unwrap_or_else(|| {
            let stripped = cli.input.with_extension("");
            if stripped == cli.input {
                cli.input.with_extension("extracted")
            } else {
                stripped
            }
        });

        status!("Extracting {:?} to {output:?}", cli.input);

        disassemble(
            &cli.input,
            OutputTarget::Tree(&output),
            &policy,
            env,
            cancel_signal,
        )?
    };

    print_report(&report);

    Ok(())
}

pub fn extract_main(cli: &ExtractCli, env: &Env, cancel_signal: &AtomicBool) -> Result<()> {
    let policy = load_verify_policy(
        cli.key.as_deref(),
        cli.pass_file.as_deref(),
        cli.pass_env_var.as_ref(),
        cli.no_verify,
    )?;

    status!("Extracting {:?} to {:?}", cli.input, cli.output_dir);

    let report = disassemble(
        &cli.input,
        OutputTarget::Tree(&cli.output_dir),
        &policy,
        env,
        cancel_signal,
    )?;

    print_report(&report);

    Ok(())
}

fn parse_metadata(records: &[String]) -> Result<Vec<(String, String)>> {
    records
        .iter()
        .map(|record| {
            let (key, value) = record.split_once('=').ok_or_else(|| {
                UsageError(format!("metadata record is not KEY=VALUE: {record:?}"))
            })?;

            Ok((key.to_owned(), value.to_owned()))
        })
        .collect()
}

fn decode_devices(tokens: &[String], env: &Env) -> Result<Vec<u32>> {
    tokens
        .iter()
        .map(|token| {
            let code = device::decode_device(token, env.unknown_devcodes)
                .with_context(|| format!("Failed to decode device: {token:?}"))?;

            if device::lookup(code).is_none() {
                warning!("Unknown device code {token:?} (0x{code:X})");
            }

            Ok(code)
        })
        .collect()
}

pub fn create_main(cli: &CreateCli, env: &Env, cancel_signal: &AtomicBool) -> Result<()> {
    if cli.paths.len() < 2 {
        return Err(UsageError(
            "create needs at least one input file and an output path".to_owned(),
        )
        .into());
    }

    let (output, inputs) = cli.paths.split_last().unwrap();

    let kind = cli.kind.to_kind();
    let devices = decode_devices(&cli.devices, env)?;
    let metadata = parse_metadata(&cli.metadata)?;

    let certificate_number = CertificateNumber::from_wire(cli.cert)
        .map_err(|_| UsageError(format!("invalid certificate number: {}", cli.cert)))?;

    let key = match &cli.key {
        Some(path) => {
            let source = PassphraseSource::new(
                path,
                cli.pass_file.as_deref(),
                cli.pass_env_var.as_ref().map(|v| v.as_os_str()),
            );
            let key = crypto::read_pem_key_file(path, &source)
                .with_context(|| format!("Failed to load key: {path:?}"))?;

            Some(key)
        }
        None => None,
    };

    let source_revision = cli
        .legacy_source_revision
        .map(u64::from)
        .unwrap_or(cli.source_revision);

    let params = CreateParams {
        kind,
        source_revision,
        target_revision: cli.target_revision,
        devices,
        optional: cli.optional,
        minor: cli.minor.into(),
        platform: cli.platform,
        board: cli.board,
        certificate_number,
        metadata,
    };

    status!("Creating {kind} bundle {output:?}");

    let CreateReport { payload, .. } = create_bundle(
        inputs,
        output,
        &params,
        key.as_ref(),
        env,
        cancel_signal,
    )?;

    if let Some(payload) = payload {
        status!("Payload size:    {} bytes", payload.size);
        status!("Payload MD5:     {}", payload.md5);
        status!("Payload SHA256:  {}", payload.sha256);
    }

    Ok(())
}

/// Disassemble a bundle into its payload archive (-c) or a directory tree.
///
/// In archive mode the payload is written exactly as it exists inside the
/// bundle (after outer deobfuscation), signature records included. In tree
/// mode the files are fully recovered and signature records are checked
/// against the preceding entry.
#[derive(Debug, Parser)]
pub struct ConvertCli {
    /// Path to input bundle.
    pub input: PathBuf,

    /// Private or public key for signature checks.
    #[arg(short, long, value_name = "FILE")]
    pub key: Option<PathBuf>,

    /// Path to output archive or directory.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Write the payload archive instead of extracting it.
    #[arg(short = 'c', long)]
    pub archive: bool,

    /// Skip signature checks.
    #[arg(short = 'w', long)]
    pub no_verify: bool,

    /// File containing the key passphrase.
    #[arg(long, value_name = "FILE")]
    pub pass_file: Option<PathBuf>,

    /// Environment variable containing the key passphrase.
    #[arg(long, value_name = "ENV_VAR")]
    pub pass_env_var: Option<OsString>,
}

/// Explode a bundle's payload into a directory.
#[derive(Debug, Parser)]
pub struct ExtractCli {
    /// Path to input bundle.
    pub input: PathBuf,

    /// Path to output directory.
    pub output_dir: PathBuf,

    /// Private or public key for signature checks.
    #[arg(short, long, value_name = "FILE")]
    pub key: Option<PathBuf>,

    /// Skip signature checks.
    #[arg(short = 'w', long)]
    pub no_verify: bool,

    /// File containing the key passphrase.
    #[arg(long, value_name = "FILE")]
    pub pass_file: Option<PathBuf>,

    /// Environment variable containing the key passphrase.
    #[arg(long, value_name = "ENV_VAR")]
    pub pass_env_var: Option<OsString>,
}

/// Assemble a bundle from input files.
///
/// The last path is the output bundle; everything before it is an input. A
/// single .tar.gz input is used as the payload archive directly.
#[derive(Debug, Parser)]
pub struct CreateCli {
    /// Bundle kind to assemble.
    #[arg(value_enum)]
    kind: KindArg,

    /// Target device code (repeatable).
    #[arg(short = 'd', long = "device", value_name = "DEVICE")]
    pub devices: Vec<String>,

    /// Private key for signing.
    #[arg(short, long, value_name = "FILE")]
    pub key: Option<PathBuf>,

    /// Source revision.
    #[arg(short, long, value_name = "REV", default_value_t = 0)]
    pub source_revision: u64,

    /// Target revision.
    #[arg(short, long, value_name = "REV", default_value_t = 0)]
    pub target_revision: u64,

    /// Minor version (recovery bundles).
    #[arg(short, long, value_name = "NUM", default_value_t = 0)]
    pub minor: u8,

    /// Target platform (recovery v2 bundles).
    #[arg(short, long, value_enum, default_value_t)]
    pub platform: device::Platform,

    /// Target board (recovery v2 bundles).
    #[arg(short, long, value_enum, default_value_t)]
    pub board: device::Board,

    /// Certificate number (0=dev, 1=1K, 2=2K).
    #[arg(short, long, value_name = "NUM", default_value_t = 0)]
    pub cert: u8,

    /// Mark the update as optional.
    #[arg(short = 'O', long)]
    pub optional: bool,

    /// Add a metadata record (OTA v2, repeatable).
    #[arg(short = 'x', long = "meta", value_name = "KEY=VALUE")]
    pub metadata: Vec<String>,

    /// Legacy 32-bit source revision; overrides -s.
    #[arg(short = 'r', long, value_name = "REV")]
    pub legacy_source_revision: Option<u32>,

    /// File containing the key passphrase.
    #[arg(long, value_name = "FILE")]
    pub pass_file: Option<PathBuf>,

    /// Environment variable containing the key passphrase.
    #[arg(long, value_name = "ENV_VAR")]
    pub pass_env_var: Option<OsString>,

    /// Input files followed by the output bundle path.
    #[arg(required = true, value_name = "PATHS")]
    pub paths: Vec<PathBuf>,
}
