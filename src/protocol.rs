// SysEx protocol for the Behringer DEQ2496.
//
// Every message, in both directions, is framed as
//   [0xF0] [0x00 0x20 0x32] [device id] [model id] [command] payload... [0xF7]
// Reference: DEQ2496 MIDI Implementation v1.4, "write single value" table.

use serde::{Deserialize, Serialize};

use crate::error::DeqError;

// ── Constants ──

pub const SYSEX_START: u8 = 0xF0;
pub const SYSEX_END: u8 = 0xF7;
pub const MANUFACTURER_ID: [u8; 3] = [0x00, 0x20, 0x32];
pub const MODEL_ID: u8 = 0x12;
pub const DEFAULT_DEVICE_ID: u8 = 0x00;

/// Start marker + manufacturer + device id + model id + command byte.
pub const HEADER_LEN: usize = 7;

pub const CMD_IDENTIFY: u8 = 0x01;
pub const CMD_IDENTIFY_REPLY: u8 = 0x02;
pub const CMD_WRITE_SINGLE_VALUE: u8 = 0x22;
pub const CMD_SCREEN_DUMP: u8 = 0x76;
pub const CMD_SCREEN_DUMP_REPLY: u8 = 0x36;

/// Pseudo module used by the firmware to switch the active screen.
pub const SCREEN_SELECT_MODULE: u8 = 127;
pub const MAX_MODULE: u8 = 12;
pub const CONTRAST_MODULE: u8 = 8;

const MAX_DATA_BYTE: u16 = 0x7F;
const MAX_TWO_BYTE_VALUE: u16 = 0x3FFF;

// ── Parameter entries ──

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelMode {
    DualMono = 0,
    Stereo = 1,
}

impl TryFrom<u8> for ChannelMode {
    type Error = DeqError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ChannelMode::DualMono),
            1 => Ok(ChannelMode::Stereo),
            other => Err(DeqError::InvalidParameter(format!(
                "channel mode must be 0 or 1, got {}",
                other
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataLength {
    One = 1,
    Two = 2,
}

impl DataLength {
    /// Width needed on the wire for `value`. SysEx data bytes carry 7 bits,
    /// so anything above 0x7F takes the two-byte form.
    pub fn for_value(value: u16) -> Self {
        if value <= MAX_DATA_BYTE { DataLength::One } else { DataLength::Two }
    }
}

/// One row of the "write single value" table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParameterEntry {
    module: u8,
    channel_mode: ChannelMode,
    offset: u8,
    data_length: DataLength,
    value: u16,
}

impl ParameterEntry {
    pub fn new(
        module: u8,
        channel_mode: u8,
        offset: u8,
        data_length: u8,
        value: u16,
    ) -> Result<Self, DeqError> {
        if module > MAX_MODULE && module != SCREEN_SELECT_MODULE {
            return Err(DeqError::InvalidParameter(format!(
                "module must be 0-{} or {}, got {}",
                MAX_MODULE, SCREEN_SELECT_MODULE, module
            )));
        }
        if offset > 0x7F {
            return Err(DeqError::InvalidParameter(format!(
                "offset {} does not fit a data byte",
                offset
            )));
        }
        if value > MAX_TWO_BYTE_VALUE {
            return Err(DeqError::InvalidParameter(format!(
                "value {} exceeds {}",
                value, MAX_TWO_BYTE_VALUE
            )));
        }

        let required = DataLength::for_value(value);
        if data_length != required as u8 {
            return Err(DeqError::InvalidParameter(format!(
                "value {} needs data length {}, got {}",
                value, required as u8, data_length
            )));
        }

        Ok(ParameterEntry {
            module,
            channel_mode: ChannelMode::try_from(channel_mode)?,
            offset,
            data_length: required,
            value,
        })
    }

    /// Copy of this entry carrying a different value. The data length follows
    /// the new value.
    pub fn with_value(&self, value: u16) -> Result<Self, DeqError> {
        ParameterEntry::new(
            self.module,
            self.channel_mode as u8,
            self.offset,
            DataLength::for_value(value) as u8,
            value,
        )
    }

    pub fn module(&self) -> u8 {
        self.module
    }

    pub fn channel_mode(&self) -> ChannelMode {
        self.channel_mode
    }

    pub fn offset(&self) -> u8 {
        self.offset
    }

    pub fn data_length(&self) -> DataLength {
        self.data_length
    }

    pub fn value(&self) -> u16 {
        self.value
    }

    fn value_bytes(&self) -> Vec<u8> {
        match self.data_length {
            DataLength::One => vec![self.value as u8],
            DataLength::Two => vec![((self.value >> 7) & 0x7F) as u8, (self.value & 0x7F) as u8],
        }
    }
}

// ── Parameter table ──

// (name, module, channel mode, offset, data length, value)
const PARAMETER_TABLE: &[(&str, u8, u8, u8, u8, u16)] = &[
    ("rta", SCREEN_SELECT_MODULE, 0, 0, 1, 9),
    ("rta_page3_fullscreen", 9, 0, 0, 1, 3),
    ("rta_channel_l", 9, 0, 1, 1, 0),
    ("rta_channel_r", 9, 0, 1, 1, 1),
    ("rta_channel_l+r", 9, 0, 1, 1, 2),
    ("rta_max-5dB", 9, 0, 2, 1, 1),
    ("rta_range_60dB", 9, 0, 4, 1, 2),
    ("rta_rate_mid", 9, 0, 9, 1, 1),
    ("rta_peak_mid", 9, 0, 10, 1, 2),
    ("meter", SCREEN_SELECT_MODULE, 0, 0, 1, 12),
    ("meter_page1_peak_rms", 12, 0, 0, 1, 1),
    ("meter_page2_spl", 12, 0, 0, 1, 2),
    ("meter_page3_vumeter", 12, 0, 0, 1, 3),
    ("contrast", CONTRAST_MODULE, 0, 1, 1, 8),
];

/// Look up a named preset. The returned entry is a template: override its
/// value with [`ParameterEntry::with_value`] where needed.
pub fn lookup(name: &str) -> Result<ParameterEntry, DeqError> {
    let &(_, module, channel_mode, offset, data_length, value) = PARAMETER_TABLE
        .iter()
        .find(|(n, ..)| *n == name)
        .ok_or_else(|| DeqError::UnknownParameter(name.to_string()))?;

    ParameterEntry::new(module, channel_mode, offset, data_length, value)
}

// ── Screens ──

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Screen {
    Rta,
    Peak,
    Vu,
}

impl Screen {
    /// Rotation order.
    pub const CYCLE: [Screen; 3] = [Screen::Rta, Screen::Peak, Screen::Vu];

    pub fn next(self) -> Screen {
        let idx = Self::CYCLE.iter().position(|s| *s == self).unwrap_or(0);
        Self::CYCLE[(idx + 1) % Self::CYCLE.len()]
    }

    /// Table entries written, in order, to bring this screen up.
    pub fn parameter_sequence(self) -> &'static [&'static str] {
        match self {
            Screen::Rta => &[
                "rta",
                "rta_channel_l+r",
                "rta_max-5dB",
                "rta_range_60dB",
                "rta_rate_mid",
                "rta_peak_mid",
                "rta_page3_fullscreen",
            ],
            Screen::Vu => &["meter", "meter_page3_vumeter"],
            Screen::Peak => &["meter", "meter_page1_peak_rms"],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Screen::Rta => "rta",
            Screen::Peak => "peak",
            Screen::Vu => "vu",
        }
    }
}

impl std::fmt::Display for Screen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Codec ──

/// Builds outbound frames for one device id.
#[derive(Clone, Copy, Debug)]
pub struct SysExCodec {
    device_id: u8,
}

impl Default for SysExCodec {
    fn default() -> Self {
        SysExCodec::new(DEFAULT_DEVICE_ID)
    }
}

impl SysExCodec {
    pub fn new(device_id: u8) -> Self {
        SysExCodec { device_id }
    }

    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    pub fn wrap(&self, command: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + 1);
        frame.push(SYSEX_START);
        frame.extend_from_slice(&MANUFACTURER_ID);
        frame.push(self.device_id);
        frame.push(MODEL_ID);
        frame.push(command);
        frame.extend_from_slice(payload);
        frame.push(SYSEX_END);
        frame
    }

    pub fn encode_write_value(&self, entry: &ParameterEntry) -> Vec<u8> {
        let mut payload = vec![
            entry.module,
            entry.channel_mode as u8,
            entry.offset,
            entry.data_length as u8,
        ];
        payload.extend(entry.value_bytes());
        self.wrap(CMD_WRITE_SINGLE_VALUE, &payload)
    }

    pub fn encode_identify_request(&self) -> Vec<u8> {
        self.wrap(CMD_IDENTIFY, &[])
    }

    pub fn encode_screen_dump_request(&self) -> Vec<u8> {
        self.wrap(CMD_SCREEN_DUMP, &[])
    }
}

/// A framed message from the device, header checked and stripped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub device_id: u8,
    pub command: u8,
    pub payload: Vec<u8>,
}

pub fn decode_response(raw: &[u8]) -> Result<Response, DeqError> {
    if raw.len() < HEADER_LEN + 1 {
        return Err(DeqError::MalformedResponse(format!(
            "{} bytes is shorter than a SysEx header",
            raw.len()
        )));
    }
    if raw[0] != SYSEX_START {
        return Err(DeqError::MalformedResponse(format!(
            "starts with 0x{:02X}, not SysEx",
            raw[0]
        )));
    }
    if raw[raw.len() - 1] != SYSEX_END {
        return Err(DeqError::MalformedResponse("missing 0xF7 terminator".into()));
    }
    if raw[1..4] != MANUFACTURER_ID || raw[5] != MODEL_ID {
        return Err(DeqError::MalformedResponse(format!(
            "not a DEQ2496 message: {}",
            format_hex(&raw[..HEADER_LEN])
        )));
    }

    Ok(Response {
        device_id: raw[4],
        command: raw[6],
        payload: raw[HEADER_LEN..raw.len() - 1].to_vec(),
    })
}

pub fn decode_response_payload(raw: &[u8]) -> Result<Vec<u8>, DeqError> {
    decode_response(raw).map(|r| r.payload)
}

/// Inverse of [`SysExCodec::encode_write_value`].
pub fn decode_write_value(raw: &[u8]) -> Result<ParameterEntry, DeqError> {
    let response = decode_response(raw)?;
    if response.command != CMD_WRITE_SINGLE_VALUE {
        return Err(DeqError::UnexpectedResponse {
            expected: CMD_WRITE_SINGLE_VALUE,
            got: response.command,
        });
    }

    let p = &response.payload;
    let value = match p.len() {
        5 => p[4] as u16,
        6 => ((p[4] as u16) << 7) | p[5] as u16,
        n => {
            return Err(DeqError::MalformedResponse(format!(
                "write-value payload of {} bytes",
                n
            )));
        }
    };
    ParameterEntry::new(p[0], p[1], p[2], p[3], value)
}

/// Interpret an identify reply payload: ASCII with an optional trailing NUL.
pub fn parse_identity(payload: &[u8]) -> String {
    let text = payload.strip_suffix(&[0x00]).unwrap_or(payload);
    text.iter().map(|&b| b as char).collect()
}

pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_table_entry_is_valid() {
        for (name, ..) in PARAMETER_TABLE {
            assert!(lookup(name).is_ok(), "{} failed validation", name);
        }
    }

    #[test]
    fn unknown_parameter() {
        assert!(matches!(
            lookup("eq_page9"),
            Err(DeqError::UnknownParameter(name)) if name == "eq_page9"
        ));
    }

    #[test]
    fn data_length_must_match_value() {
        assert!(ParameterEntry::new(9, 0, 1, 2, 5).is_err());
        assert!(ParameterEntry::new(9, 0, 1, 1, 300).is_err());
        assert!(ParameterEntry::new(9, 0, 1, 2, 300).is_ok());
        assert!(ParameterEntry::new(9, 0, 1, 1, 200).is_err());
        assert!(ParameterEntry::new(9, 0, 1, 2, 200).is_ok());
        assert!(ParameterEntry::new(9, 0, 1, 2, 0x4000).is_err());
        assert!(ParameterEntry::new(13, 0, 1, 1, 0).is_err());
        assert!(ParameterEntry::new(9, 2, 1, 1, 0).is_err());
    }

    #[test]
    fn with_value_tracks_data_length() {
        let entry = lookup("contrast").unwrap().with_value(1000).unwrap();
        assert_eq!(entry.data_length(), DataLength::Two);
        assert_eq!(entry.module(), CONTRAST_MODULE);
    }

    #[test]
    fn write_value_frame_layout() {
        let frame = SysExCodec::default().encode_write_value(&lookup("rta_range_60dB").unwrap());
        assert_eq!(
            frame,
            vec![0xF0, 0x00, 0x20, 0x32, 0x00, 0x12, 0x22, 9, 0, 4, 1, 2, 0xF7]
        );
    }

    #[test]
    fn contrast_write_decodes_back() {
        let codec = SysExCodec::default();
        let template = lookup("contrast").unwrap();
        for c in 0..=15u16 {
            let frame = codec.encode_write_value(&template.with_value(c).unwrap());
            let entry = decode_write_value(&frame).unwrap();
            assert_eq!(entry.module(), 8);
            assert_eq!(entry.offset(), 1);
            assert_eq!(entry.data_length(), DataLength::One);
            assert_eq!(entry.value(), c);
        }
    }

    #[test]
    fn write_value_body_is_seven_bit() {
        let codec = SysExCodec::default();
        for value in [0x7F, 0x80, 0xC8, 0xFF, 0x3FFF] {
            let entry = ParameterEntry::new(9, 0, 1, DataLength::for_value(value) as u8, value).unwrap();
            let frame = codec.encode_write_value(&entry);
            let body = &frame[1..frame.len() - 1];
            assert!(
                body.iter().all(|&b| b <= 0x7F),
                "value {}: {}",
                value,
                format_hex(&frame)
            );
            assert_eq!(decode_write_value(&frame).unwrap().value(), value);
        }
        assert_eq!(DataLength::for_value(0x7F), DataLength::One);
        assert_eq!(DataLength::for_value(0x80), DataLength::Two);

        let frame = codec.encode_write_value(&ParameterEntry::new(9, 0, 1, 2, 200).unwrap());
        assert_eq!(&frame[7..frame.len() - 1], &[9, 0, 1, 2, 0x01, 0x48]);
    }

    #[test]
    fn two_byte_value_decodes_back() {
        let codec = SysExCodec::default();
        let entry = ParameterEntry::new(3, 1, 7, 2, 0x1234).unwrap();
        assert_eq!(decode_write_value(&codec.encode_write_value(&entry)).unwrap(), entry);
    }

    #[test]
    fn wrap_frames_payload() {
        let codec = SysExCodec::new(0x03);
        for payload in [vec![], vec![0x10], vec![1, 2, 3, 4, 5, 6, 7, 8]] {
            let frame = codec.wrap(0x22, &payload);
            assert_eq!(frame[0], SYSEX_START);
            assert_eq!(*frame.last().unwrap(), SYSEX_END);
            // command byte + payload, plus 7 framing bytes
            assert_eq!(frame.len(), 1 + payload.len() + 7);
            assert_eq!(frame[4], 0x03);
        }
    }

    #[test]
    fn request_frames() {
        let codec = SysExCodec::default();
        assert_eq!(
            codec.encode_identify_request(),
            vec![0xF0, 0x00, 0x20, 0x32, 0x00, 0x12, 0x01, 0xF7]
        );
        assert_eq!(
            codec.encode_screen_dump_request(),
            vec![0xF0, 0x00, 0x20, 0x32, 0x00, 0x12, 0x76, 0xF7]
        );
    }

    #[test]
    fn payload_survives_framing() {
        let codec = SysExCodec::default();
        let payload: Vec<u8> = (0..0x7F).collect();
        let frame = codec.wrap(CMD_SCREEN_DUMP_REPLY, &payload);
        assert_eq!(decode_response_payload(&frame).unwrap(), payload);

        let response = decode_response(&frame).unwrap();
        assert_eq!(response.command, CMD_SCREEN_DUMP_REPLY);
    }

    #[test]
    fn rejects_short_or_unterminated() {
        assert!(matches!(
            decode_response_payload(&[0xF0, 0x00, 0x20, 0x32, 0x00, 0x12, 0xF7]),
            Err(DeqError::MalformedResponse(_))
        ));
        assert!(matches!(
            decode_response_payload(&[0xF0, 0x00, 0x20, 0x32, 0x00, 0x12, 0x02, 0x41]),
            Err(DeqError::MalformedResponse(_))
        ));
    }

    #[test]
    fn rejects_foreign_manufacturer() {
        let frame = [0xF0, 0x00, 0x21, 0x09, 0x00, 0x12, 0x02, 0x41, 0xF7];
        assert!(matches!(
            decode_response(&frame),
            Err(DeqError::MalformedResponse(_))
        ));
    }

    #[test]
    fn identity_drops_trailing_nul() {
        assert_eq!(parse_identity(b"DEQ2496 V1.4\0"), "DEQ2496 V1.4");
        assert_eq!(parse_identity(b"DEQ2496"), "DEQ2496");
    }

    #[test]
    fn screen_cycle() {
        let mut screen = Screen::Rta;
        screen = screen.next();
        assert_eq!(screen, Screen::Peak);
        screen = screen.next();
        assert_eq!(screen, Screen::Vu);
        screen = screen.next();
        assert_eq!(screen, Screen::Rta);
    }

    #[test]
    fn screen_sequences_resolve() {
        assert_eq!(Screen::Rta.parameter_sequence().len(), 7);
        assert_eq!(Screen::Vu.parameter_sequence().len(), 2);
        assert_eq!(Screen::Peak.parameter_sequence().len(), 2);
        for screen in Screen::CYCLE {
            for name in screen.parameter_sequence() {
                assert!(lookup(name).is_ok());
            }
        }
    }
}
