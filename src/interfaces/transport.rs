use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("could not resolve address '{0}'")]
    AddressResolution(String),
    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },
    #[error("not connected")]
    NotConnected,
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("short response frame ({0} bytes)")]
    ShortFrame(usize),
}

/// Blocking request/response transport shared between a driver's polling
/// loop and its request handlers. One transaction is in flight at a time;
/// callers hold the surrounding lock for the full send/receive cycle.
pub trait Transport: Send {
    /// Send one request frame and block until the matching response frame
    /// has been received.
    fn send_recv(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError>;

    fn is_connected(&self) -> bool;

    fn disconnect(&mut self);
}

/// TCP transport framing responses with the Modbus MBAP length field.
///
/// The stream is (re)established lazily on the next transaction after a
/// failure; a broken connection therefore costs one failed poll cycle.
pub struct TcpTransport {
    addr: String,
    timeout: Duration,
    stream: Option<TcpStream>,
}

const MBAP_HEADER_LEN: usize = 7;

impl TcpTransport {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        TcpTransport {
            addr: format!("{host}:{port}"),
            timeout,
            stream: None,
        }
    }

    fn ensure_connected(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let sock_addr = self
            .addr
            .to_socket_addrs()
            .map_err(|_| TransportError::AddressResolution(self.addr.clone()))?
            .next()
            .ok_or_else(|| TransportError::AddressResolution(self.addr.clone()))?;
        let stream =
            TcpStream::connect_timeout(&sock_addr, self.timeout).map_err(|e| {
                TransportError::Connect {
                    addr: self.addr.clone(),
                    source: e,
                }
            })?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        log::info!("Connected to {}", self.addr);
        self.stream = Some(stream);
        Ok(())
    }

    fn transact(stream: &mut TcpStream, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        stream.write_all(request)?;

        let mut header = [0u8; MBAP_HEADER_LEN];
        stream.read_exact(&mut header)?;
        // The MBAP length field counts the unit id byte, which is part of
        // the header we already read.
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        if length < 1 {
            return Err(TransportError::ShortFrame(MBAP_HEADER_LEN));
        }
        let mut frame = vec![0u8; MBAP_HEADER_LEN + length - 1];
        frame[..MBAP_HEADER_LEN].copy_from_slice(&header);
        stream.read_exact(&mut frame[MBAP_HEADER_LEN..])?;

        log::trace!("recv frame {}", hex::encode(&frame));
        Ok(frame)
    }
}

impl Transport for TcpTransport {
    fn send_recv(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.ensure_connected()?;
        log::trace!("send frame {}", hex::encode(request));

        let result = match self.stream.as_mut() {
            Some(stream) => Self::transact(stream, request),
            None => Err(TransportError::NotConnected),
        };
        if result.is_err() {
            // Drop the dead connection; the next transaction reconnects.
            self.disconnect();
        }
        result
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            log::info!("Disconnected from {}", self.addr);
        }
    }
}
