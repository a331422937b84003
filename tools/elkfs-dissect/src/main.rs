//! Offline dissector for elkfs SysEx captures.
//!
//! Reads a text capture, one frame per line: a `>`/`<` direction marker
//! followed by hex bytes. Prints each frame's decoded meaning. Lines
//! that are blank, comments, or not SysEx are skipped.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

mod dissect;

#[derive(Parser)]
#[command(name = "elkfs-dissect", about = "Dissect elkfs SysEx captures")]
struct Cli {
    /// Capture file: `> hex...` for host-to-device, `< hex...` for
    /// device-to-host
    capture: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let text = std::fs::read_to_string(&cli.capture)
        .with_context(|| format!("reading {}", cli.capture.display()))?;

    for (lineno, line) in text.lines().enumerate() {
        let Some((direction, bytes)) = dissect::parse_line(line) else {
            continue;
        };
        let frame = dissect::dissect_frame(direction, &bytes);
        println!("{:4} {frame}", lineno + 1);
    }
    Ok(())
}
