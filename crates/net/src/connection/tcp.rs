use crate::error::{NetError, SocketError};
use crate::message::{ByteOrder, Message};
use crate::protocol::{FRAME_HEADER_SIZE, MAX_FRAME_SIZE, MAX_PENDING_OUTBOUND, MESSAGE_CAPACITY};
use crate::socket::TcpSocket;

const LENGTH_PREFIX_SIZE: usize = 2;

/// Serializes `[u16 length][u8 type][payload]`, where `length` counts the
/// type byte plus the payload. The prefix is always little-endian.
pub fn encode_frame(message: &Message) -> Vec<u8> {
    let payload = message.payload();
    let length = (payload.len() + 1) as u16;

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.push(message.message_type());
    frame.extend_from_slice(payload);
    frame
}

/// Two-stage frame reassembly: buffer the length prefix, then the rest of
/// the frame. Never reads past the end of the current frame, so at most one
/// message is in flight. Payloads are decoded in `byte_order`.
#[derive(Debug)]
pub struct FrameAccumulator {
    buffer: Box<[u8; MAX_FRAME_SIZE]>,
    filled: usize,
    byte_order: ByteOrder,
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self::with_byte_order(ByteOrder::default())
    }

    pub fn with_byte_order(byte_order: ByteOrder) -> Self {
        Self {
            buffer: Box::new([0u8; MAX_FRAME_SIZE]),
            filled: 0,
            byte_order,
        }
    }

    /// Bytes of a partially received frame currently buffered.
    pub fn buffered(&self) -> usize {
        self.filled
    }

    fn frame_length(&self) -> usize {
        u16::from_le_bytes([self.buffer[0], self.buffer[1]]) as usize
    }

    fn target(&self) -> usize {
        if self.filled < LENGTH_PREFIX_SIZE {
            LENGTH_PREFIX_SIZE
        } else {
            LENGTH_PREFIX_SIZE + self.frame_length()
        }
    }

    /// Pulls bytes through `read` until one frame is complete or the source
    /// has nothing more right now. `read` returns `Ok(0)` when it would block.
    pub fn poll<F>(&mut self, mut read: F) -> Result<Option<Message>, NetError>
    where
        F: FnMut(&mut [u8]) -> Result<usize, SocketError>,
    {
        loop {
            let target = self.target();
            let read_count = read(&mut self.buffer[self.filled..target])?;
            if read_count == 0 {
                return Ok(None);
            }
            self.filled += read_count;

            if self.filled == LENGTH_PREFIX_SIZE {
                let length = self.frame_length();
                if length == 0 || length > MESSAGE_CAPACITY + 1 {
                    self.filled = 0;
                    return Err(NetError::InvalidFrame(length));
                }
            }

            if self.filled >= LENGTH_PREFIX_SIZE && self.filled == self.target() {
                let end = self.filled;
                self.filled = 0;
                let message_type = self.buffer[LENGTH_PREFIX_SIZE];
                let message =
                    Message::from_payload(message_type, &self.buffer[FRAME_HEADER_SIZE..end])?
                        .with_byte_order(self.byte_order);
                return Ok(Some(message));
            }
        }
    }
}

/// Length-prefixed framing over a [`TcpSocket`]. Unsent bytes are capped at
/// [`MAX_PENDING_OUTBOUND`]; a peer that stops reading past that point is
/// treated as gone.
#[derive(Debug)]
pub struct TcpLink {
    socket: TcpSocket,
    inbound: FrameAccumulator,
    outbound: Vec<u8>,
    backlogged: bool,
}

impl TcpLink {
    pub fn new(socket: TcpSocket, byte_order: ByteOrder) -> Self {
        Self {
            socket,
            inbound: FrameAccumulator::with_byte_order(byte_order),
            outbound: Vec::new(),
            backlogged: false,
        }
    }

    pub fn socket(&self) -> &TcpSocket {
        &self.socket
    }

    pub fn send(&mut self, message: &Message) -> Result<(), NetError> {
        let frame = encode_frame(message);
        if self.backlogged || self.outbound.len() + frame.len() > MAX_PENDING_OUTBOUND {
            self.backlogged = true;
            return Err(NetError::Backlogged {
                address: self.socket.peer_address(),
                pending: self.outbound.len(),
            });
        }

        self.outbound.extend_from_slice(&frame);
        self.flush()
    }

    /// Pushes any unsent bytes. A short write keeps the tail for the next
    /// flush so frames never interleave.
    pub fn flush(&mut self) -> Result<(), NetError> {
        while !self.outbound.is_empty() {
            let written = self.socket.send(&self.outbound)?;
            if written == 0 {
                log::trace!(
                    "{} bytes pending for {}",
                    self.outbound.len(),
                    self.socket.peer_address()
                );
                break;
            }
            self.outbound.drain(..written);
        }
        Ok(())
    }

    pub fn pending_bytes(&self) -> usize {
        self.outbound.len()
    }

    pub fn receive(&mut self) -> Result<Option<Message>, NetError> {
        let socket = &mut self.socket;
        self.inbound.poll(|buf| socket.receive(buf))
    }

    pub fn is_disconnected(&self) -> bool {
        self.backlogged || self.socket.is_disconnected()
    }

    pub fn close(&mut self) {
        let _ = self.flush();
        self.socket.close();
    }
}
