// SPDX-FileCopyrightText: 2024-2025 The kbundle developers
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    io,
    process::ExitCode,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::error;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

use crate::{
    cli::bundle,
    crypto, device,
    env::Env,
    format::{bundle as bundle_format, header, payload},
};

/// Exit codes defined by the tool's external interface.
pub const EXIT_USAGE: u8 = 1;
pub const EXIT_IO: u8 = 2;
pub const EXIT_FORMAT: u8 = 3;
pub const EXIT_INTEGRITY: u8 = 4;

/// A command-layer validation failure (bad flag combinations, unparsable
/// values). Distinct from the library errors so it can map to the usage exit
/// code.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct UsageError(pub String);

#[derive(Debug, Subcommand)]
pub enum Command {
    Convert(bundle::ConvertCli),
    Extract(bundle::ExtractCli),
    Create(bundle::CreateCli),
}

#[derive(Debug, Parser)]
#[command(version, about = "Package, sign, inspect, and unpack e-reader firmware update bundles")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Map an error chain onto the documented exit codes. Wrapper variants defer
/// to their underlying cause.
fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if cause.downcast_ref::<UsageError>().is_some() {
            return EXIT_USAGE;
        }

        if let Some(e) = cause.downcast_ref::<bundle_format::Error>() {
            match e {
                bundle_format::Error::InvalidArguments(_) => return EXIT_USAGE,
                bundle_format::Error::DigestMismatch { .. }
                | bundle_format::Error::KeyCertificateMismatch { .. }
                | bundle_format::Error::SignaturePayloadSize { .. } => return EXIT_INTEGRITY,
                bundle_format::Error::Unsupported(_) => return EXIT_FORMAT,
                // Classified by the wrapped cause on the next iterations.
                bundle_format::Error::Header(_)
                | bundle_format::Error::Payload(_)
                | bundle_format::Error::Crypto(_)
                | bundle_format::Error::Io(_) => {}
            }
        }

        if let Some(e) = cause.downcast_ref::<payload::Error>() {
            match e {
                payload::Error::MissingSignature(_)
                | payload::Error::OrphanSignature(_)
                | payload::Error::InvalidSignature(_)
                | payload::Error::SignatureSize { .. }
                | payload::Error::FileDigestMismatch { .. } => return EXIT_INTEGRITY,
                payload::Error::UnsafePath(_)
                | payload::Error::RecordTooLarge(_)
                | payload::Error::MalformedIndex(_) => return EXIT_FORMAT,
                payload::Error::Header(_)
                | payload::Error::Crypto(_)
                | payload::Error::Io(_) => {}
            }
        }

        if let Some(e) = cause.downcast_ref::<header::Error>() {
            return match e {
                header::Error::Io(_) => EXIT_IO,
                _ => EXIT_FORMAT,
            };
        }

        if cause.downcast_ref::<device::Error>().is_some() {
            return EXIT_USAGE;
        }

        if let Some(e) = cause.downcast_ref::<crypto::Error>() {
            return match e {
                crypto::Error::Io(_) => EXIT_IO,
                _ => EXIT_INTEGRITY,
            };
        }

        if cause.downcast_ref::<io::Error>().is_some() {
            return EXIT_IO;
        }
    }

    EXIT_IO
}

pub fn run(logging_initialized: &AtomicBool, cancel_signal: &Arc<AtomicBool>) -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(EXIT_USAGE);
        }
    };

    init_logging();
    logging_initialized.store(true, Ordering::SeqCst);

    let env = Env::from_system();

    let result = match cli.command {
        Command::Convert(c) => bundle::convert_main(&c, &env, cancel_signal),
        Command::Extract(c) => bundle::extract_main(&c, &env, cancel_signal),
        Command::Create(c) => bundle::create_main(&c, &env, cancel_signal),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:?}");
            ExitCode::from(exit_code(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{exit_code, EXIT_FORMAT, EXIT_INTEGRITY, EXIT_IO, EXIT_USAGE};
    use crate::format::{bundle, header, payload};

    #[test]
    fn classify_errors() {
        let err = anyhow::Error::new(bundle::Error::InvalidArguments("x".to_owned()));
        assert_eq!(exit_code(&err), EXIT_USAGE);

        let err = anyhow::Error::new(bundle::Error::DigestMismatch {
            expected: "a".to_owned(),
            actual: "b".to_owned(),
        });
        assert_eq!(exit_code(&err), EXIT_INTEGRITY);

        let err = anyhow::Error::new(bundle::Error::Header(header::Error::UnknownMagic(
            *b"XXXX",
        )));
        assert_eq!(exit_code(&err), EXIT_FORMAT);

        let err = anyhow::Error::new(bundle::Error::Payload(payload::Error::MissingSignature(
            "file.bin".to_owned(),
        )));
        assert_eq!(exit_code(&err), EXIT_INTEGRITY);

        let err = anyhow::Error::new(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(exit_code(&err), EXIT_IO);

        let err = anyhow::anyhow!("unclassified");
        assert_eq!(exit_code(&err), EXIT_IO);
    }
}
