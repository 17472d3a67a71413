use thiserror::Error;

/// Failure classes surfaced by the session engine. None of them are fatal:
/// every variant leaves the engine in a defined session state.
#[derive(Debug, Error)]
pub enum FtpError {
    #[error("Cancelled")]
    Cancelled,

    #[error("{0} timeout")]
    Timeout(&'static str),

    /// Module answered ERROR/FAIL/DNS Fail or the server refused us
    #[error("{0}")]
    Rejected(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Not connected. Use OPEN.")]
    NotConnected,

    #[error("Not logged in. Use USER.")]
    NotLoggedIn,

    #[error("Already logged in. Use QUIT first.")]
    AlreadyLoggedIn,

    #[error("Login incorrect")]
    LoginIncorrect,

    #[error("Unexpected reply {code}: {text}")]
    Unexpected { code: u16, text: String },

    #[error("{0}")]
    NotFound(&'static str),

    #[error("PASV failed")]
    PasvFailed,

    #[error("Data connection failed")]
    DataConnectFailed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Command too long")]
    CommandTooLong,

    #[error("Module not responding")]
    ModuleSilent,

    #[error("Local file error: {0:#}")]
    Storage(anyhow::Error),
}

impl FtpError {
    pub fn unexpected(code: u16, text: &str) -> Self {
        FtpError::Unexpected {
            code,
            text: text.to_string(),
        }
    }

    /// Errors after which the control connection can no longer be trusted
    pub fn is_disconnect(&self) -> bool {
        matches!(self, FtpError::ConnectionLost(_))
    }
}

pub type Result<T> = std::result::Result<T, FtpError>;
