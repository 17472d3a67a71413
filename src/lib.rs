//! modemftp library
//!
//! Interactive FTP client for hosts whose only network path is an
//! AT-command WiFi module (ESP8266 class) on a serial line. The module
//! multiplexes the FTP control connection (channel 0) and the passive data
//! connection (channel 1) over one byte stream; everything runs on a single
//! thread paced by a fixed tick.

pub mod at;
pub mod buffer;
pub mod channel;
pub mod cli;
pub mod clock;
pub mod config;
pub mod console;
pub mod demux;
pub mod error;
pub mod ftp;
pub mod link;
pub mod log;
pub mod logger;
pub mod naming;
pub mod progress;
pub mod protocol;
pub mod serial;
pub mod shell;
pub mod storage;
