// MIDI transport and device session for the DEQ2496.
//
// The unit hangs off a MIDI interface; we find the interface's in/out ports by
// substring match on the port name. midir delivers inbound messages on its own
// thread, so the input callback forwards each one into a tokio channel and the
// session awaits replies from there under a timeout.

use std::time::Duration;

use midir::{Ignore, MidiIO, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::display::ScreenDump;
use crate::error::DeqError;
use crate::protocol::{
    self, CMD_IDENTIFY_REPLY, CMD_SCREEN_DUMP_REPLY, MANUFACTURER_ID, MODEL_ID, ParameterEntry,
    SYSEX_START, SysExCodec, format_hex,
};

const CLIENT_NAME: &str = "deq2496-cli";

/// Raw byte pipe to the device.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn send_raw(&mut self, data: &[u8]) -> Result<(), DeqError>;

    /// Next inbound message. Blocks until one arrives; callers bound the wait.
    async fn receive_raw(&mut self) -> Result<Vec<u8>, DeqError>;
}

// ── Port discovery ──

/// Index of the port to use: an exact name match wins, otherwise the first
/// name containing `pattern` (case-sensitive).
pub fn select_port(names: &[String], pattern: &str) -> Option<usize> {
    names
        .iter()
        .position(|name| name == pattern)
        .or_else(|| names.iter().position(|name| name.contains(pattern)))
}

fn find_port<T: MidiIO>(io: &T, pattern: &str) -> Result<(T::Port, String), DeqError> {
    let mut ports: Vec<(T::Port, String)> = io
        .ports()
        .into_iter()
        .filter_map(|port| io.port_name(&port).ok().map(|name| (port, name)))
        .collect();
    let names: Vec<String> = ports.iter().map(|(_, name)| name.clone()).collect();

    match select_port(&names, pattern) {
        Some(idx) => {
            debug!("Port '{}' matches '{}'", names[idx], pattern);
            Ok(ports.swap_remove(idx))
        }
        None => Err(DeqError::DeviceNotFound {
            pattern: pattern.to_string(),
            available: names,
        }),
    }
}

fn port_names<T: MidiIO>(io: &T) -> Vec<String> {
    io.ports()
        .iter()
        .filter_map(|port| io.port_name(port).ok())
        .collect()
}

/// Names of all MIDI input and output ports on this host.
pub fn list_ports() -> Result<(Vec<String>, Vec<String>), DeqError> {
    let midi_in = MidiInput::new(CLIENT_NAME).map_err(|e| DeqError::Transport(e.to_string()))?;
    let midi_out = MidiOutput::new(CLIENT_NAME).map_err(|e| DeqError::Transport(e.to_string()))?;
    Ok((port_names(&midi_in), port_names(&midi_out)))
}

// ── midir transport ──

pub struct MidiTransport {
    _input: MidiInputConnection<()>,
    output: MidiOutputConnection,
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MidiTransport {
    /// Connect to the first input and output ports matching `pattern`.
    pub fn open(pattern: &str) -> Result<Self, DeqError> {
        if pattern.is_empty() {
            warn!("No midi_device configured, using the first available port");
        }

        let mut midi_in =
            MidiInput::new(CLIENT_NAME).map_err(|e| DeqError::Transport(e.to_string()))?;
        // Replies arrive as SysEx; keep every message type and filter later.
        midi_in.ignore(Ignore::None);
        let midi_out =
            MidiOutput::new(CLIENT_NAME).map_err(|e| DeqError::Transport(e.to_string()))?;

        let (in_port, in_name) = find_port(&midi_in, pattern)?;
        let (out_port, out_name) = find_port(&midi_out, pattern)?;

        let (tx, inbound) = mpsc::unbounded_channel();
        let input = midi_in
            .connect(
                &in_port,
                "deq2496-in",
                move |_timestamp, data, _| {
                    // Receiver gone means we're shutting down.
                    let _ = tx.send(data.to_vec());
                },
                (),
            )
            .map_err(|e| DeqError::Transport(format!("cannot open input '{}': {}", in_name, e)))?;
        info!("Connected to input port: {}", in_name);

        let output = midi_out
            .connect(&out_port, "deq2496-out")
            .map_err(|e| DeqError::Transport(format!("cannot open output '{}': {}", out_name, e)))?;
        info!("Connected to output port: {}", out_name);

        Ok(MidiTransport {
            _input: input,
            output,
            inbound,
        })
    }
}

impl Transport for MidiTransport {
    async fn send_raw(&mut self, data: &[u8]) -> Result<(), DeqError> {
        self.output
            .send(data)
            .map_err(|e| DeqError::Transport(e.to_string()))
    }

    async fn receive_raw(&mut self) -> Result<Vec<u8>, DeqError> {
        self.inbound
            .recv()
            .await
            .ok_or_else(|| DeqError::Transport("input port closed".into()))
    }
}

/// Prints frames instead of sending them.
pub struct DryRunTransport;

impl Transport for DryRunTransport {
    async fn send_raw(&mut self, data: &[u8]) -> Result<(), DeqError> {
        match protocol::decode_write_value(data) {
            Ok(entry) => println!(
                "{}    module {} {:?} offset {} len {} value {}",
                format_hex(data),
                entry.module(),
                entry.channel_mode(),
                entry.offset(),
                entry.data_length() as u8,
                entry.value()
            ),
            Err(_) => println!("{}", format_hex(data)),
        }
        Ok(())
    }

    async fn receive_raw(&mut self) -> Result<Vec<u8>, DeqError> {
        Err(DeqError::Transport("dry run: the device cannot reply".into()))
    }
}

// ── Session ──

pub struct DeviceSession<T> {
    transport: T,
    codec: SysExCodec,
    timeout: Duration,
}

impl<T: Transport> DeviceSession<T> {
    pub fn new(transport: T, codec: SysExCodec, timeout: Duration) -> Self {
        DeviceSession {
            transport,
            codec,
            timeout,
        }
    }

    pub async fn send_raw(&mut self, data: &[u8]) -> Result<(), DeqError> {
        debug!("Sent: {}", format_hex(data));
        self.transport.send_raw(data).await
    }

    pub async fn receive_raw(&mut self) -> Result<Vec<u8>, DeqError> {
        let data = self.transport.receive_raw().await?;
        debug!("Received {} bytes: {}", data.len(), format_hex(&data[..data.len().min(16)]));
        Ok(data)
    }

    pub async fn write_parameter(&mut self, entry: &ParameterEntry) -> Result<(), DeqError> {
        let frame = self.codec.encode_write_value(entry);
        self.send_raw(&frame).await
    }

    /// Product and firmware string reported by the unit.
    pub async fn identify(&mut self) -> Result<String, DeqError> {
        let request = self.codec.encode_identify_request();
        self.send_raw(&request).await?;
        let payload = self.receive_reply(CMD_IDENTIFY_REPLY).await?;
        Ok(protocol::parse_identity(&payload))
    }

    pub async fn dump_screen(&mut self) -> Result<ScreenDump, DeqError> {
        let request = self.codec.encode_screen_dump_request();
        self.send_raw(&request).await?;
        let payload = self.receive_reply(CMD_SCREEN_DUMP_REPLY).await?;
        ScreenDump::new(payload)
    }

    async fn receive_reply(&mut self, expected: u8) -> Result<Vec<u8>, DeqError> {
        let timeout = self.timeout;
        tokio::time::timeout(timeout, self.read_reply(expected))
            .await
            .map_err(|_| DeqError::ResponseTimeout(timeout))?
    }

    /// Wait for the DEQ2496's reply to a request, skipping traffic from other
    /// sources (clock, active sensing, other vendors' SysEx).
    async fn read_reply(&mut self, expected: u8) -> Result<Vec<u8>, DeqError> {
        loop {
            let raw = self.receive_raw().await?;
            if !is_deq_sysex(&raw) {
                debug!("Skipping unrelated message: {}", format_hex(&raw[..raw.len().min(8)]));
                continue;
            }

            let response = protocol::decode_response(&raw)?;
            if response.device_id != self.codec.device_id() {
                debug!(
                    "Skipping reply from device id {} (talking to {})",
                    response.device_id,
                    self.codec.device_id()
                );
                continue;
            }
            if response.command != expected {
                return Err(DeqError::UnexpectedResponse {
                    expected,
                    got: response.command,
                });
            }
            return Ok(response.payload);
        }
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

fn is_deq_sysex(raw: &[u8]) -> bool {
    raw.first() == Some(&SYSEX_START)
        && raw.get(1..4) == Some(&MANUFACTURER_ID[..])
        && raw.get(5) == Some(&MODEL_ID)
}
