//! Command-line interface for elkfs.
//!
//! Each subcommand maps to exactly one core operation. Remote arguments use
//! the `DEVICE/PATH` shape: everything before the first `/` names the device
//! (a discovery index or a port-name substring), the rest is the path on the
//! device's storage. Exit status is 0 on success and 1 on any failure.

use std::io::Write as _;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use elkfs::{discover_devices, proto, Connection};

#[derive(Parser)]
#[command(name = "elkfs", about = "File management for Elektron samplers over MIDI SysEx")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List attached devices
    Ld,
    /// Show a device's identity
    Info {
        /// Device index or port-name substring
        device: String,
    },
    /// List a remote directory
    Ls {
        /// Remote directory as DEVICE/PATH
        remote: String,
    },
    /// Create a remote directory
    Mkdir {
        /// Remote directory as DEVICE/PATH
        remote: String,
    },
    /// Remove a remote directory
    Rmdir {
        /// Remote directory as DEVICE/PATH
        remote: String,
    },
    /// Remove a remote file
    Rm {
        /// Remote file as DEVICE/PATH
        remote: String,
    },
    /// Move or rename on the device
    Mv {
        /// Source as DEVICE/PATH
        source: String,
        /// Destination as DEVICE/PATH (same device)
        dest: String,
    },
    /// Download a remote file
    Download {
        /// Remote file as DEVICE/PATH
        remote: String,
        /// Local destination; defaults to the remote basename
        local: Option<PathBuf>,
    },
    /// Upload a local file
    Upload {
        /// Local source file
        local: PathBuf,
        /// Remote destination as DEVICE/PATH
        remote: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    elkfs::tracing::init_journald_or_stdout();
    let cli = Cli::parse();

    match cli.command {
        Command::Ld => {
            for (index, device) in discover_devices().await?.iter().enumerate() {
                println!("{index} {device}");
            }
            Ok(())
        }
        Command::Info { device } => {
            let conn = Connection::open(&device).await?;
            println!("{} ({})", conn.device_name(), conn.device_info());
            conn.close().await?;
            Ok(())
        }
        Command::Ls { remote } => {
            let (device, path) = split_remote(&remote)?;
            let conn = Connection::open(device).await?;
            let listing = conn.read_dir(path).await;
            let result = match listing {
                Ok(entries) => {
                    let mut outcome = Ok(());
                    for entry in entries {
                        match entry {
                            Ok(e) => println!(
                                "{} {:.2} {:08x} {}",
                                e.kind.as_char(),
                                e.size as f64 / (1024.0 * 1024.0),
                                e.checksum,
                                e.name
                            ),
                            Err(e) => {
                                outcome = Err(e.into());
                                break;
                            }
                        }
                    }
                    outcome
                }
                Err(e) => Err(e.into()),
            };
            conn.close().await?;
            result
        }
        Command::Mkdir { remote } => {
            let (device, path) = split_remote(&remote)?;
            let conn = Connection::open(device).await?;
            let result = conn.create_dir(path).await;
            conn.close().await?;
            Ok(result?)
        }
        Command::Rmdir { remote } => {
            let (device, path) = split_remote(&remote)?;
            let conn = Connection::open(device).await?;
            let result = conn.delete_dir(path).await;
            conn.close().await?;
            Ok(result?)
        }
        Command::Rm { remote } => {
            let (device, path) = split_remote(&remote)?;
            let conn = Connection::open(device).await?;
            let result = conn.delete_file(path).await;
            conn.close().await?;
            Ok(result?)
        }
        Command::Mv { source, dest } => {
            let (device, old) = split_remote(&source)?;
            let (dest_device, new) = split_remote(&dest)?;
            if device != dest_device {
                bail!("mv stays on one device: {device} vs {dest_device}");
            }
            let conn = Connection::open(device).await?;
            let result = conn.rename(old, new).await;
            conn.close().await?;
            Ok(result?)
        }
        Command::Download { remote, local } => {
            let (device, path) = split_remote(&remote)?;
            let local = local.unwrap_or_else(|| PathBuf::from(basename(path)));
            let conn = Connection::open(device).await?;
            let token = cancel_on_ctrl_c();
            let result = conn.download(path, &token, print_progress).await;
            conn.close().await?;
            let payload = result?;
            finish_progress();
            if let Ok(header) = proto::decode_sample_header(&payload) {
                eprintln!(
                    "{} frames @ {} Hz, {} channel(s), {} bit",
                    header.frames, header.rate, header.channels, header.bits
                );
            }
            tokio::fs::write(&local, &payload)
                .await
                .with_context(|| format!("writing {}", local.display()))?;
            Ok(())
        }
        Command::Upload { local, remote } => {
            let (device, path) = split_remote(&remote)?;
            let data = tokio::fs::read(&local)
                .await
                .with_context(|| format!("reading {}", local.display()))?;
            let conn = Connection::open(device).await?;
            let token = cancel_on_ctrl_c();
            let result = conn.upload(&data, path, &token, print_progress).await;
            conn.close().await?;
            let sent = result?;
            finish_progress();
            eprintln!("{sent} bytes uploaded");
            Ok(())
        }
    }
}

/// Split `DEVICE/PATH` at the first slash. The path keeps its leading slash.
fn split_remote(remote: &str) -> Result<(&str, &str)> {
    match remote.find('/') {
        Some(0) | None => bail!("remote argument must look like DEVICE/PATH: {remote}"),
        Some(at) => Ok((&remote[..at], &remote[at..])),
    }
}

/// Final component of a remote path, for default local filenames.
fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let handle = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });
    token
}

fn print_progress(fraction: f64) {
    eprint!("\r{:5.1}%", fraction * 100.0);
    let _ = std::io::stderr().flush();
}

fn finish_progress() {
    eprintln!();
}
