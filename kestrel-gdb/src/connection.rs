//! One client connection: acknowledgements, retransmission and interrupts.

use crate::packet::{self, Frame, PacketDecoder, ResponsePacket, ACK, NAK};
use log::{debug, trace, warn};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use thiserror::Error;

const READ_BUFFER_SIZE: usize = 1024;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("client closed the connection")]
    Closed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Something the client sent that the server has to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Packet(Vec<u8>),
    Interrupt,
}

#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    decoder: PacketDecoder,
    pending: VecDeque<Incoming>,
    last_sent: Option<Vec<u8>>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            peer,
            decoder: PacketDecoder::new(),
            pending: VecDeque::new(),
            last_sent: None,
        })
    }

    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Block until the client sends a packet or an interrupt.
    pub fn read(&mut self) -> Result<Incoming, ConnectionError> {
        self.stream.set_read_timeout(None)?;
        loop {
            if let Some(incoming) = self.pending.pop_front() {
                return Ok(incoming);
            }
            self.fill()?;
        }
    }

    /// Wait up to `timeout` for an interrupt. Packets that arrive meanwhile are
    /// kept for [`Connection::read`].
    pub fn poll_interrupt(&mut self, timeout: Duration) -> Result<bool, ConnectionError> {
        if self.take_interrupt() {
            return Ok(true);
        }

        self.stream.set_read_timeout(Some(timeout))?;
        match self.fill() {
            Ok(()) => Ok(self.take_interrupt()),
            Err(ConnectionError::Io(e))
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn take_interrupt(&mut self) -> bool {
        let before = self.pending.len();
        self.pending.retain(|incoming| *incoming != Incoming::Interrupt);
        self.pending.len() != before
    }

    pub fn send(&mut self, response: &ResponsePacket) -> Result<(), ConnectionError> {
        let frame = packet::encode(response.as_bytes());
        trace!("-> {}", String::from_utf8_lossy(&frame));
        self.stream.write_all(&frame)?;
        self.stream.flush()?;
        self.last_sent = Some(frame);
        Ok(())
    }

    fn fill(&mut self) -> Result<(), ConnectionError> {
        let mut buffer = [0u8; READ_BUFFER_SIZE];
        let count = self.stream.read(&mut buffer)?;
        if count == 0 {
            return Err(ConnectionError::Closed);
        }

        for &byte in &buffer[..count] {
            match self.decoder.push(byte) {
                None | Some(Frame::Ack) => {}
                Some(Frame::Nak) => self.retransmit()?,
                Some(Frame::Interrupt) => {
                    debug!("Interrupt from {}", self.peer);
                    self.pending.push_back(Incoming::Interrupt);
                }
                Some(Frame::Packet(payload)) => {
                    trace!("<- {}", String::from_utf8_lossy(&payload));
                    self.stream.write_all(&[ACK])?;
                    self.pending.push_back(Incoming::Packet(payload));
                }
                Some(Frame::Rejected(e)) => {
                    warn!("Rejecting packet from {}: {e}", self.peer);
                    self.stream.write_all(&[NAK])?;
                }
            }
        }
        Ok(())
    }

    fn retransmit(&mut self) -> Result<(), ConnectionError> {
        if let Some(frame) = &self.last_sent {
            debug!("Client asked for a retransmission");
            self.stream.write_all(frame)?;
        }
        Ok(())
    }
}
