//! MIDI port management: discovery, open/close, and the raw io seam.
//!
//! A device presents one input and one output port with the same display
//! name; both must be open for a conversation. The OS MIDI stack delivers
//! inbound traffic through a callback on its own thread, so the input side
//! of the seam is a channel of byte chunks: the callback forwards every
//! chunk it sees and the transport reassembles frames from them. The output
//! side is the [`SysexOutput`] trait, letting tests and tools substitute an
//! in-process device for real hardware.

use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use tokio::sync::mpsc;
use tokio::time;

use crate::error::{Error, Result};
use crate::proto::DeviceInfo;
use crate::tracing::prelude::*;

/// Client name registered with the OS MIDI stack.
const CLIENT_NAME: &str = "elkfs";

/// How long discovery waits on each candidate port pair.
const INQUIRY_TIMEOUT: time::Duration = time::Duration::from_millis(500);

/// Sink for outbound SysEx bytes.
///
/// Real hardware writes go through [`MidiOutputConnection`]; emulated
/// devices capture the bytes instead.
pub trait SysexOutput: Send {
    /// Write `bytes` to the device. Partial frames are allowed; the device
    /// (or emulator) reassembles on the end delimiter.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;
}

struct MidiOut(MidiOutputConnection);

impl SysexOutput for MidiOut {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.0.send(bytes)?;
        Ok(())
    }
}

/// An open input/output byte-stream pair.
///
/// Owns the output sink, the inbound chunk channel, and (for real hardware)
/// the input connection whose callback feeds that channel. Dropping the
/// `PortIo` releases the handles.
pub struct PortIo {
    pub(crate) output: Box<dyn SysexOutput>,
    pub(crate) input: mpsc::UnboundedReceiver<Vec<u8>>,
    _reader: Option<MidiInputConnection<()>>,
}

impl PortIo {
    /// Assemble an io pair from arbitrary parts. This is the seam used by
    /// the loopback tests and by anything that is not real hardware.
    pub fn new(output: Box<dyn SysexOutput>, input: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            output,
            input,
            _reader: None,
        }
    }

    /// Open the hardware port pair matching `hardware_id` and return the io
    /// alongside the port's display name.
    ///
    /// `hardware_id` is either a decimal index into the current port-pair
    /// enumeration or a case-insensitive substring of the port name.
    pub fn open_midi(hardware_id: &str) -> Result<(Self, String)> {
        let pairs = port_pairs()?;
        let index = resolve(&pairs, hardware_id)?;
        let name = pairs[index].clone();
        let io = open_pair(&name)?;
        debug!(port = %name, "Opened MIDI port pair");
        Ok((io, name))
    }
}

/// One discovered device: the identifier to open it with plus the identity
/// it reported.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    /// Hardware identifier, suitable for [`crate::Connection::open`].
    pub id: String,
    /// Identity from the device-inquiry reply.
    pub info: DeviceInfo,
}

impl std::fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.id, self.info)
    }
}

/// Probe every port pair on the host with a device inquiry and collect the
/// ones that answer with our manufacturer id.
///
/// A host with no matching device yields an empty vector, not an error.
/// This is a bounded linear probe: each candidate gets one inquiry and a
/// short wait.
pub async fn discover_devices() -> Result<Vec<DeviceDescriptor>> {
    let mut found = Vec::new();
    for name in port_pairs()? {
        let mut io = match open_pair(&name) {
            Ok(io) => io,
            Err(e) => {
                // Another client may hold the port; that only rules out this
                // candidate.
                debug!(port = %name, error = %e, "Skipping unopenable port");
                continue;
            }
        };
        match probe(&mut io).await {
            Some(info) => {
                debug!(port = %name, identity = %info, "Device inquiry answered");
                found.push(DeviceDescriptor { id: name, info });
            }
            None => trace!(port = %name, "No inquiry reply"),
        }
    }
    Ok(found)
}

/// Send one device inquiry on an open io pair and wait briefly for a
/// matching reply.
async fn probe(io: &mut PortIo) -> Option<DeviceInfo> {
    crate::session::inquire(io, INQUIRY_TIMEOUT).await.ok()
}

/// Display names of every port that exposes both an input and an output.
fn port_pairs() -> Result<Vec<String>> {
    let midi_in = MidiInput::new(CLIENT_NAME)?;
    let midi_out = MidiOutput::new(CLIENT_NAME)?;

    let mut in_names = Vec::new();
    for port in midi_in.ports() {
        in_names.push(midi_in.port_name(&port)?);
    }

    let mut pairs = Vec::new();
    for port in midi_out.ports() {
        let name = midi_out.port_name(&port)?;
        if in_names.contains(&name) {
            pairs.push(name);
        }
    }
    Ok(pairs)
}

/// Resolve a hardware id against the enumerated pairs.
fn resolve(pairs: &[String], hardware_id: &str) -> Result<usize> {
    if let Ok(index) = hardware_id.parse::<usize>() {
        if index < pairs.len() {
            return Ok(index);
        }
        return Err(Error::NoDevice(hardware_id.into()));
    }
    let wanted = hardware_id.to_lowercase();
    pairs
        .iter()
        .position(|name| name.to_lowercase().contains(&wanted))
        .ok_or_else(|| Error::NoDevice(hardware_id.into()))
}

/// Open both directions of the named port.
fn open_pair(name: &str) -> Result<PortIo> {
    let mut midi_in = MidiInput::new(CLIENT_NAME)?;
    // SysEx is filtered out by default.
    midi_in.ignore(Ignore::None);
    let in_port = midi_in
        .ports()
        .into_iter()
        .find(|p| midi_in.port_name(p).is_ok_and(|n| n == name))
        .ok_or_else(|| Error::NoDevice(name.into()))?;

    let midi_out = MidiOutput::new(CLIENT_NAME)?;
    let out_port = midi_out
        .ports()
        .into_iter()
        .find(|p| midi_out.port_name(p).is_ok_and(|n| n == name))
        .ok_or_else(|| Error::NoDevice(name.into()))?;

    let (tx, rx) = mpsc::unbounded_channel();
    let reader = midi_in
        .connect(
            &in_port,
            CLIENT_NAME,
            move |_timestamp, chunk, _| {
                // Dropped receiver means the connection is closing; nothing
                // useful to do with the chunk.
                let _ = tx.send(chunk.to_vec());
            },
            (),
        )
        .map_err(|e| Error::MidiConnect(e.to_string()))?;

    let output = midi_out
        .connect(&out_port, CLIENT_NAME)
        .map_err(|e| Error::MidiConnect(e.to_string()))?;

    Ok(PortIo {
        output: Box::new(MidiOut(output)),
        input: rx,
        _reader: Some(reader),
    })
}
