//! Byte-level access to the radio module
//!
//! The engine only needs a non-blocking poll contract: `ready`, `read`
//! (valid only after `ready` returned true) and `send`. Two backends are
//! provided: a local serial port and a raw TCP bridge (ser2net style).

use anyhow::{anyhow, Context, Result};
use serialport::SerialPort;
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::logger::Logger;

pub trait SerialDevice {
    fn ready(&mut self) -> bool;
    fn read(&mut self) -> u8;
    fn send(&mut self, byte: u8);

    fn send_all(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.send(b);
        }
    }

    /// Last I/O failure swallowed by the poll contract, if any
    fn take_error(&mut self) -> Option<std::io::Error> {
        None
    }
}

impl<T: SerialDevice + ?Sized> SerialDevice for Box<T> {
    fn ready(&mut self) -> bool {
        (**self).ready()
    }
    fn read(&mut self) -> u8 {
        (**self).read()
    }
    fn send(&mut self, byte: u8) {
        (**self).send(byte)
    }
    fn send_all(&mut self, bytes: &[u8]) {
        (**self).send_all(bytes)
    }
    fn take_error(&mut self) -> Option<std::io::Error> {
        (**self).take_error()
    }
}

/// Read-ahead shared by both backends: the OS hands us bytes in bulk,
/// the engine consumes them one at a time.
#[derive(Default)]
struct ReadAhead {
    pending: VecDeque<u8>,
    error: Option<std::io::Error>,
}

impl ReadAhead {
    fn pop(&mut self) -> u8 {
        self.pending.pop_front().unwrap_or(0)
    }

    fn fail(&mut self, e: std::io::Error) {
        if self.error.is_none() {
            self.error = Some(e);
        }
    }
}

pub struct SerialPortDevice {
    port: Box<dyn SerialPort>,
    rx: ReadAhead,
}

impl SerialPortDevice {
    pub fn open(port_name: &str, baud_rate: u32, logger: &dyn Logger) -> Result<Self> {
        let mut builder = serialport::new(port_name, baud_rate).timeout(Duration::from_millis(10));
        // Some USB serial adapters need explicit settings
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None)
                .flow_control(serialport::FlowControl::None);
        }
        let mut port = builder
            .open()
            .map_err(|e| anyhow!("Failed to open serial port {}: {}", port_name, e))?;
        warn_on_failure(logger, "DTR", port.write_data_terminal_ready(true));
        warn_on_failure(logger, "RTS", port.write_request_to_send(true));
        Ok(Self {
            port,
            rx: ReadAhead::default(),
        })
    }
}

fn warn_on_failure(logger: &dyn Logger, line: &str, r: serialport::Result<()>) {
    if let Err(e) = r {
        logger.warn("serial", &format!("could not raise {}: {}", line, e));
    }
}

impl SerialDevice for SerialPortDevice {
    fn ready(&mut self) -> bool {
        if !self.rx.pending.is_empty() {
            return true;
        }
        let available = match self.port.bytes_to_read() {
            Ok(n) => n as usize,
            Err(e) => {
                self.rx.fail(e.into());
                return false;
            }
        };
        if available == 0 {
            return false;
        }
        let mut buf = vec![0u8; available.min(4096)];
        match self.port.read(&mut buf) {
            Ok(n) => self.rx.pending.extend(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::TimedOut => {}
            Err(e) => self.rx.fail(e),
        }
        !self.rx.pending.is_empty()
    }

    fn read(&mut self) -> u8 {
        self.rx.pop()
    }

    fn send(&mut self, byte: u8) {
        self.send_all(&[byte]);
    }

    fn send_all(&mut self, bytes: &[u8]) {
        if let Err(e) = self.port.write_all(bytes).and_then(|_| self.port.flush()) {
            self.rx.fail(e);
        }
    }

    fn take_error(&mut self) -> Option<std::io::Error> {
        self.rx.error.take()
    }
}

/// Module reached through a transparent TCP-to-serial bridge
pub struct TcpBridgeDevice {
    stream: TcpStream,
    rx: ReadAhead,
}

impl TcpBridgeDevice {
    pub fn connect(addr: &str) -> Result<Self> {
        let stream =
            TcpStream::connect(addr).with_context(|| format!("connect to bridge {}", addr))?;
        stream.set_nodelay(true).ok();
        stream
            .set_nonblocking(true)
            .context("set bridge socket non-blocking")?;
        Ok(Self {
            stream,
            rx: ReadAhead::default(),
        })
    }
}

impl SerialDevice for TcpBridgeDevice {
    fn ready(&mut self) -> bool {
        if !self.rx.pending.is_empty() {
            return true;
        }
        let mut buf = [0u8; 1024];
        match self.stream.read(&mut buf) {
            Ok(0) => self
                .rx
                .fail(std::io::Error::new(ErrorKind::UnexpectedEof, "bridge closed")),
            Ok(n) => self.rx.pending.extend(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {}
            Err(e) => self.rx.fail(e),
        }
        !self.rx.pending.is_empty()
    }

    fn read(&mut self) -> u8 {
        self.rx.pop()
    }

    fn send(&mut self, byte: u8) {
        self.send_all(&[byte]);
    }

    fn send_all(&mut self, bytes: &[u8]) {
        let mut rest = bytes;
        while !rest.is_empty() {
            match self.stream.write(rest) {
                Ok(0) => {
                    self.rx
                        .fail(std::io::Error::new(ErrorKind::WriteZero, "bridge refused bytes"));
                    return;
                }
                Ok(n) => rest = &rest[n..],
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.rx.fail(e);
                    return;
                }
            }
        }
    }

    fn take_error(&mut self) -> Option<std::io::Error> {
        self.rx.error.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::net::TcpListener;

    #[derive(Default)]
    struct Warnings(Mutex<Vec<String>>);

    impl Logger for Warnings {
        fn warn(&self, context: &str, msg: &str) {
            self.0.lock().push(format!("{}: {}", context, msg));
        }
    }

    #[test]
    fn control_line_failure_is_logged() {
        let log = Warnings::default();
        warn_on_failure(&log, "DTR", Ok(()));
        assert!(log.0.lock().is_empty());
        let err = serialport::Error::new(serialport::ErrorKind::NoDevice, "unplugged");
        warn_on_failure(&log, "RTS", Err(err));
        let lines = log.0.lock();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("serial: could not raise RTS"));
        assert!(lines[0].contains("unplugged"));
    }

    #[test]
    fn bridge_delivers_bytes_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let mut dev = TcpBridgeDevice::connect(&addr).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        dev.send_all(b"AT\r\n");
        let mut got = [0u8; 4];
        peer.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"AT\r\n");

        peer.write_all(b"OK\r\n").unwrap();
        let mut received = Vec::new();
        for _ in 0..500 {
            while dev.ready() {
                received.push(dev.read());
            }
            if received.len() == 4 {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(received, b"OK\r\n");
        assert!(dev.take_error().is_none());
    }
}
