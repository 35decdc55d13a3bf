use byteorder::{BigEndian, ByteOrder};
use rand::Rng;

use crate::support::{Error, NetResult};
use crate::ws::{WS_CLOSE, WS_FIN};

/// Frame opcode, RFC 6455 §5.2.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl OpCode {
    #[inline]
    pub fn parse(value: u8) -> Option<OpCode> {
        match value {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    #[inline]
    pub fn is_control(self) -> bool {
        (self as u8) & 0x8 != 0
    }
}

/// One decoded logical frame, payload already unmasked.
#[derive(Debug, Eq, PartialEq)]
pub struct WsFrame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

/// Applies the 32 bit masking key in place. Masking and unmasking are the
/// same operation.
#[inline]
pub fn mask_payload(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

/// Encodes one frame. `header` combines the FIN flag with the opcode bits
/// (`WS_FIN | WS_TEXT` and friends). Client side frames are masked with a
/// fresh key each; a CLOSE status code prefixes the payload in network
/// order. The encoder picks the smallest length field that fits.
pub fn prepare_frame(header: u8, mask: bool, payload: &[u8], status: Option<u16>) -> Vec<u8> {
    let status_size = match (header & 0x0F) == (WS_CLOSE & 0x0F) && status.is_some() {
        true => 2,
        false => 0,
    };
    let size = status_size + payload.len();

    let mut frame = Vec::with_capacity(2 + 8 + 4 + size);
    frame.push(header);

    let mask_bit = ember::choose!(mask => 0x80u8, 0x00u8);

    if size < 126 {
        frame.push(mask_bit | size as u8);
    } else if size <= u16::max_value() as usize {
        frame.push(mask_bit | 126);
        let mut length = [0u8; 2];
        BigEndian::write_u16(&mut length, size as u16);
        frame.extend_from_slice(&length);
    } else {
        frame.push(mask_bit | 127);
        let mut length = [0u8; 8];
        BigEndian::write_u64(&mut length, size as u64);
        frame.extend_from_slice(&length);
    }

    let body_index = frame.len() + ember::choose!(mask => 4, 0);

    if mask {
        let key: [u8; 4] = rand::thread_rng().gen();
        frame.extend_from_slice(&key);
    }

    if let Some(status) = status {
        if status_size > 0 {
            let mut code = [0u8; 2];
            BigEndian::write_u16(&mut code, status);
            frame.extend_from_slice(&code);
        }
    }
    frame.extend_from_slice(payload);

    if mask {
        let mut key = [0u8; 4];
        key.copy_from_slice(&frame[body_index - 4..body_index]);
        mask_payload(&mut frame[body_index..], key);
    }

    frame
}

/// Incremental frame decoder: buffers input bytes and peels complete
/// frames off the front, header first, validating as it goes.
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    #[inline]
    pub fn new() -> FrameDecoder {
        FrameDecoder { buffer: Vec::new() }
    }

    /// Appends raw bytes from the transport.
    #[inline]
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet consumed by a complete frame.
    #[inline]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Decodes the next complete frame, unmasking its payload. `Ok(None)`
    /// means more bytes are needed; protocol violations are fatal for the
    /// connection.
    pub fn decode(&mut self) -> NetResult<Option<WsFrame>> {
        if self.buffer.len() < 2 {
            return Ok(None);
        }

        let first = self.buffer[0];
        let second = self.buffer[1];

        if first & 0x70 != 0 {
            return Err(Error::Protocol("Reserved frame bits set"));
        }

        let opcode = match OpCode::parse(first & 0x0F) {
            Some(opcode) => opcode,
            None => return Err(Error::Protocol("Unknown frame opcode")),
        };
        let fin = first & WS_FIN != 0;

        let masked = second & 0x80 != 0;
        let length_code = second & 0x7F;

        let extra = match length_code {
            126 => 2,
            127 => 8,
            _ => 0,
        };

        if self.buffer.len() < 2 + extra {
            return Ok(None);
        }

        let length = match extra {
            2 => BigEndian::read_u16(&self.buffer[2..4]) as usize,
            8 => BigEndian::read_u64(&self.buffer[2..10]) as usize,
            _ => length_code as usize,
        };

        if opcode.is_control() {
            if !fin {
                return Err(Error::Protocol("Fragmented control frame"));
            }
            if length > 125 {
                return Err(Error::Protocol("Control frame payload too large"));
            }
        }

        let mask_size = ember::choose!(masked => 4, 0);
        let payload_index = 2 + extra + mask_size;
        let total = payload_index + length;

        if self.buffer.len() < total {
            return Ok(None);
        }

        let mut payload = self.buffer[payload_index..total].to_vec();

        if masked {
            let mut key = [0u8; 4];
            key.copy_from_slice(&self.buffer[2 + extra..2 + extra + 4]);
            mask_payload(&mut payload, key);
        }

        self.buffer.drain(..total);

        Ok(Some(WsFrame { fin, opcode, payload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::{WS_BINARY, WS_PING, WS_TEXT};

    fn round_trip(header: u8, mask: bool, payload: &[u8]) -> WsFrame {
        let wire = prepare_frame(header, mask, payload, None);

        let mut decoder = FrameDecoder::new();
        decoder.feed(&wire);

        let frame = decoder.decode().unwrap().unwrap();
        assert_eq!(decoder.buffered(), 0);
        frame
    }

    #[test]
    fn test_round_trip_unmasked() {
        let frame = round_trip(WS_FIN | WS_TEXT, false, b"test");

        assert!(frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload, b"test");
    }

    #[test]
    fn test_round_trip_masked() {
        let frame = round_trip(WS_FIN | WS_BINARY, true, b"test");

        assert_eq!(frame.opcode, OpCode::Binary);
        assert_eq!(frame.payload, b"test");
    }

    #[test]
    fn test_masked_payload_differs_on_wire() {
        let wire = prepare_frame(WS_FIN | WS_TEXT, true, b"test", None);

        // 2 header bytes + 4 mask key bytes, then the masked payload
        assert_eq!(wire.len(), 2 + 4 + 4);
        assert_ne!(&wire[6..], b"test");
    }

    #[test]
    fn test_length_fields() {
        let short = prepare_frame(WS_FIN | WS_BINARY, false, &[0u8; 125], None);
        assert_eq!(short[1], 125);

        let medium = prepare_frame(WS_FIN | WS_BINARY, false, &[0u8; 126], None);
        assert_eq!(medium[1], 126);
        assert_eq!(BigEndian::read_u16(&medium[2..4]), 126);

        let long = prepare_frame(WS_FIN | WS_BINARY, false, &[0u8; 65536], None);
        assert_eq!(long[1], 127);
        assert_eq!(BigEndian::read_u64(&long[2..10]), 65536);
    }

    #[test]
    fn test_round_trip_length_boundaries() {
        for &size in &[0usize, 125, 126, 65535, 65536] {
            let payload = vec![0xABu8; size];

            for &mask in &[false, true] {
                let frame = round_trip(WS_FIN | WS_BINARY, mask, &payload);
                assert_eq!(frame.payload.len(), size);
                assert_eq!(frame.payload, payload);
            }
        }
    }

    #[test]
    fn test_close_status_prefixes_payload() {
        let wire = prepare_frame(WS_FIN | crate::ws::WS_CLOSE, false, b"bye", Some(1000));

        let mut decoder = FrameDecoder::new();
        decoder.feed(&wire);
        let frame = decoder.decode().unwrap().unwrap();

        assert_eq!(frame.opcode, OpCode::Close);
        assert_eq!(BigEndian::read_u16(&frame.payload[..2]), 1000);
        assert_eq!(&frame.payload[2..], b"bye");
    }

    #[test]
    fn test_decode_byte_at_a_time() {
        let wire = prepare_frame(WS_FIN | WS_TEXT, true, b"incremental", None);

        let mut decoder = FrameDecoder::new();
        for &byte in &wire[..wire.len() - 1] {
            decoder.feed(&[byte]);
            assert_eq!(decoder.decode().unwrap(), None);
        }

        decoder.feed(&wire[wire.len() - 1..]);
        let frame = decoder.decode().unwrap().unwrap();
        assert_eq!(frame.payload, b"incremental");
    }

    #[test]
    fn test_two_frames_in_one_feed() {
        let mut wire = prepare_frame(WS_FIN | WS_TEXT, false, b"one", None);
        wire.extend(prepare_frame(WS_FIN | WS_TEXT, false, b"two", None));

        let mut decoder = FrameDecoder::new();
        decoder.feed(&wire);

        assert_eq!(decoder.decode().unwrap().unwrap().payload, b"one");
        assert_eq!(decoder.decode().unwrap().unwrap().payload, b"two");
        assert_eq!(decoder.decode().unwrap(), None);
    }

    #[test]
    fn test_reserved_bits_rejected() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&[WS_FIN | 0x40 | WS_TEXT, 0]);

        assert_eq!(decoder.decode().unwrap_err(), Error::Protocol("Reserved frame bits set"));
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&[WS_FIN | 0x3, 0]);

        assert_eq!(decoder.decode().unwrap_err(), Error::Protocol("Unknown frame opcode"));
    }

    #[test]
    fn test_oversized_control_frame_rejected() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&prepare_frame(WS_FIN | WS_PING, false, &[0u8; 126], None));

        assert_eq!(
            decoder.decode().unwrap_err(),
            Error::Protocol("Control frame payload too large")
        );
    }

    #[test]
    fn test_fragmented_control_frame_rejected() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&prepare_frame(WS_PING, false, b"x", None));

        assert_eq!(decoder.decode().unwrap_err(), Error::Protocol("Fragmented control frame"));
    }
}
