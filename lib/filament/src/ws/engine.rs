use byteorder::{BigEndian, ByteOrder};

use crate::support::Error;
use crate::ws::frame::{FrameDecoder, OpCode};

/// Events surfaced by the receive state machine.
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum WsEvent {
    /// A complete data message, reassembled across fragments if needed.
    Message(OpCode, Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    /// Peer sent CLOSE with the given status code.
    CloseReceived(u16, Vec<u8>),
    /// Protocol violation; the connection must be torn down with 1002.
    Error(&'static str),
}

/// Per-connection receive state machine: drives the frame decoder, applies
/// the control-frame rules and reassembles fragmented data messages.
pub(crate) struct WsEngine {
    decoder: FrameDecoder,
    assembly_opcode: Option<OpCode>,
    assembly: Vec<u8>,
    /// Set once CLOSE was seen; everything after it is discarded.
    closed: bool,
}

impl WsEngine {
    pub fn new() -> WsEngine {
        WsEngine {
            decoder: FrameDecoder::new(),
            assembly_opcode: None,
            assembly: Vec::new(),
            closed: false,
        }
    }

    pub fn clear(&mut self) {
        self.decoder.clear();
        self.assembly_opcode = None;
        self.assembly.clear();
        self.closed = false;
    }

    /// Consumes transport bytes and appends the resulting events. Stops at
    /// the first violation or CLOSE.
    pub fn feed(&mut self, data: &[u8], events: &mut Vec<WsEvent>) {
        if self.closed {
            return;
        }

        self.decoder.feed(data);

        loop {
            let frame = match self.decoder.decode() {
                Ok(Some(frame)) => frame,
                Ok(None) => return,
                Err(Error::Protocol(message)) => {
                    self.closed = true;
                    events.push(WsEvent::Error(message));
                    return;
                }
                Err(_) => return,
            };

            match frame.opcode {
                OpCode::Ping => events.push(WsEvent::Ping(frame.payload)),
                OpCode::Pong => events.push(WsEvent::Pong(frame.payload)),
                OpCode::Close => {
                    self.closed = true;

                    let status = match frame.payload.len() >= 2 {
                        true => BigEndian::read_u16(&frame.payload[..2]),
                        false => crate::ws::CLOSE_STATUS_NORMAL,
                    };
                    let reason = match frame.payload.len() >= 2 {
                        true => frame.payload[2..].to_vec(),
                        false => Vec::new(),
                    };

                    events.push(WsEvent::CloseReceived(status, reason));
                    return;
                }
                OpCode::Text | OpCode::Binary => {
                    if self.assembly_opcode.is_some() {
                        self.closed = true;
                        events.push(WsEvent::Error("Interleaved data frame"));
                        return;
                    }

                    if frame.fin {
                        events.push(WsEvent::Message(frame.opcode, frame.payload));
                    } else {
                        self.assembly_opcode = Some(frame.opcode);
                        self.assembly = frame.payload;
                    }
                }
                OpCode::Continuation => {
                    let opcode = match self.assembly_opcode {
                        Some(opcode) => opcode,
                        None => {
                            self.closed = true;
                            events.push(WsEvent::Error("Continuation without initial frame"));
                            return;
                        }
                    };

                    self.assembly.extend_from_slice(&frame.payload);

                    if frame.fin {
                        let message = std::mem::replace(&mut self.assembly, Vec::new());
                        self.assembly_opcode = None;
                        events.push(WsEvent::Message(opcode, message));
                    }
                }
            }
        }
    }
}
