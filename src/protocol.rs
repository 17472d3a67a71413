//! Shared protocol constants for the AT-command link and FTP

// Module AT command set (multi-connection mode)
pub mod at {
    pub const ESCAPE: &str = "+++";
    pub const ATTENTION: &str = "AT";
    pub const ECHO_OFF: &str = "ATE0";
    pub const SERVER_OFF: &str = "AT+CIPSERVER=0";
    pub const CLOSE_ALL: &str = "AT+CIPCLOSE=5";
    pub const MULTIPLEX_ON: &str = "AT+CIPMUX=1";
    pub const JOINED_AP: &str = "AT+CWJAP?";
    pub const STATION_IP: &str = "AT+CIFSR";

    pub const JOINED_MARK: &str = "+CWJAP:";

    pub fn start_tcp(channel: u8, host: &str, port: u16) -> String {
        format!("AT+CIPSTART={},\"TCP\",\"{}\",{}", channel, host, port)
    }

    pub fn close(channel: u8) -> String {
        format!("AT+CIPCLOSE={}", channel)
    }

    pub fn send(channel: u8, len: usize) -> String {
        format!("AT+CIPSEND={},{}", channel, len)
    }
}

// FTP reply codes the engine acts on
pub mod code {
    pub const OPENING_DATA: u16 = 150;
    pub const DATA_ALREADY_OPEN: u16 = 125;
    pub const COMMAND_OK: u16 = 200;
    pub const FILE_STATUS: u16 = 213;
    pub const READY: u16 = 220;
    pub const TRANSFER_COMPLETE: u16 = 226;
    pub const PASSIVE: u16 = 227;
    pub const LOGGED_IN: u16 = 230;
    pub const FILE_ACTION_OK: u16 = 250;
    pub const PATH_CREATED: u16 = 257;
    pub const NEED_PASSWORD: u16 = 331;
    pub const SERVICE_CLOSING: u16 = 421;
    pub const SYNTAX_ERROR: u16 = 500;
    pub const ARGUMENT_ERROR: u16 = 501;
    pub const NOT_LOGGED_IN: u16 = 530;
    pub const UNAVAILABLE: u16 = 550;
    pub const NAME_NOT_ALLOWED: u16 = 553;
}

/// Longest FTP command line accepted, terminator excluded
pub const MAX_COMMAND_LEN: usize = 250;

/// Default FTP control port
pub const FTP_PORT: u16 = 21;

// Tick budgets (1 tick = 20 ms). Busy-wait budgets bound the total wait,
// silence budgets bound the gap since the last received byte.
pub mod ticks {
    pub const SETTLE: u32 = 5;
    pub const PROBE: u32 = 50;
    pub const PROBE_ATTEMPTS: u32 = 3;
    pub const MODULE_CHECK: u32 = 150;
    pub const JOIN_CHECK: u32 = 200;
    pub const STATION_IP: u32 = 100;
    pub const CONNECT: u32 = 500;
    pub const CLOSE: u32 = 100;
    pub const SEND_SETTLE: u32 = 2;
    pub const SEND_PROMPT: u32 = 150;
    pub const DATA_RESIDUAL: u32 = 25;
    pub const BANNER: u32 = 350;
    pub const REPLY: u32 = 200;
    pub const TYPE: u32 = 50;
    pub const CWD: u32 = 250;
    pub const PASV: u32 = 250;
    pub const SIZE: u32 = 100;
    pub const LIST_START: u32 = 200;
    pub const RETR_START: u32 = 400;
    pub const LIST_SILENCE: u32 = 250;
    pub const RETR_SILENCE: u32 = 750;
    pub const COMPLETE_GRACE: u32 = 50;
    pub const NOOP: u32 = 50;
    pub const PAUSE_RISK: u32 = 90 * 50;
    pub const QUIT_GRACE: u32 = 25;
    pub const QUIT_RESIDUAL: u32 = 10;
    pub const BATCH_GAP: u32 = 25;
}
