mod support;

use modemftp::console::Console;
use modemftp::error::FtpError;
use modemftp::ftp::{SessionState, Settings};
use std::net::Ipv4Addr;
use support::*;

#[test]
fn init_joins_wifi_and_reads_station_ip() {
    let mut engine = engine(FakeModem::default());
    let mut ui = ScriptConsole::new();
    let state = engine.initialize(&mut ui).unwrap();
    assert_eq!(state, SessionState::WifiOk);
    assert_eq!(
        engine.session().station_ip,
        Some(Ipv4Addr::new(192, 168, 1, 50))
    );
    let modem = engine.link().device();
    for cmd in ["ATE0", "AT+CIPSERVER=0", "AT+CIPCLOSE=5", "AT+CIPMUX=1", "AT+CWJAP?"] {
        assert!(modem.sent(cmd), "missing {}", cmd);
    }
    assert!(ui.printed("WiFi OK"));
    assert_eq!(ui.statuses.last().map(|s| s.state), Some(SessionState::WifiOk));
}

#[test]
fn init_without_access_point_stays_offline() {
    let mut engine = engine(FakeModem::default().without_wifi());
    let mut ui = ScriptConsole::new();
    assert_eq!(engine.initialize(&mut ui).unwrap(), SessionState::Disconnected);
    assert!(ui.printed("WiFi not connected"));
}

#[test]
fn silent_module_is_reported() {
    let mut engine = engine(FakeModem::default().silent());
    let mut ui = ScriptConsole::new();
    let err = engine.initialize(&mut ui).unwrap_err();
    assert!(matches!(err, FtpError::ModuleSilent));
    assert!(ui.printed("Module not responding"));
    // three bounded probes after the failed AT check
    let probes = engine
        .link()
        .device()
        .at_log
        .iter()
        .filter(|c| c.as_str() == "AT")
        .count();
    assert_eq!(probes, 4);
}

#[test]
fn connect_login_and_pwd() {
    let (mut engine, mut ui) = logged_in(FakeModem::new(sample_server()), Settings::default());
    let s = engine.session();
    assert_eq!(s.state, SessionState::LoggedIn);
    assert_eq!(s.host, SERVER_IP);
    assert_eq!(s.user, "anonymous");
    assert_eq!(s.path, "/");
    let modem = engine.link().device();
    assert!(modem.sent("AT+CIPSTART=0,\"TCP\",\"10.0.0.2\",21"));
    assert!(modem.received("USER anonymous"));
    assert!(modem.received("PASS guest@example.com"));
    assert!(modem.received("TYPE I"));

    assert_eq!(engine.pwd(&mut ui).unwrap(), "/");
    assert!(ui.printed("/"));
}

#[test]
fn wrong_password_keeps_the_connection() {
    let mut engine = engine(FakeModem::new(sample_server()));
    let mut ui = ScriptConsole::new();
    engine.initialize(&mut ui).unwrap();
    engine.connect(&mut ui, SERVER_IP, 21).unwrap();
    let err = engine.login(&mut ui, "bob", "wrong").unwrap_err();
    assert!(matches!(err, FtpError::LoginIncorrect));
    assert_eq!(engine.state(), SessionState::FtpConnected);

    engine.login(&mut ui, "bob", "secret").unwrap();
    assert_eq!(engine.session().user, "bob");
    let err = engine.login(&mut ui, "bob", "secret").unwrap_err();
    assert!(matches!(err, FtpError::AlreadyLoggedIn));
}

#[test]
fn refused_connection_leaves_wifi_state() {
    let mut engine = engine(FakeModem::new(sample_server()).refusing_connections());
    let mut ui = ScriptConsole::new();
    engine.initialize(&mut ui).unwrap();
    let err = engine.connect(&mut ui, SERVER_IP, 21).unwrap_err();
    assert!(matches!(err, FtpError::Rejected(_)));
    assert_eq!(engine.state(), SessionState::WifiOk);
    assert!(engine.session().host.is_empty());
}

#[test]
fn busy_server_banner_is_a_rejection() {
    let mut server = sample_server();
    server.banner = vec!["421 Too many users, try later".into()];
    let mut engine = engine(FakeModem::new(server));
    let mut ui = ScriptConsole::new();
    engine.initialize(&mut ui).unwrap();
    let err = engine.connect(&mut ui, SERVER_IP, 21).unwrap_err();
    assert!(matches!(err, FtpError::Rejected(_)));
    assert_eq!(engine.state(), SessionState::WifiOk);
    assert!(engine.link().device().sent("AT+CIPCLOSE=0"));
}

#[test]
fn multi_line_banner_waits_for_the_last_line() {
    let mut server = sample_server();
    server.banner = vec![
        "220-Welcome to the archive".into(),
        "220-Be nice".into(),
        "220 Ready".into(),
    ];
    let mut engine = engine(FakeModem::new(server));
    let mut ui = ScriptConsole::new();
    engine.initialize(&mut ui).unwrap();
    engine.connect(&mut ui, SERVER_IP, 21).unwrap();
    assert!(ui.printed("220 Ready"));
    // nothing of the banner is left to be mistaken for the USER reply
    engine.login(&mut ui, "anonymous", "x").unwrap();
    assert_eq!(engine.state(), SessionState::LoggedIn);
}

#[test]
fn commands_check_the_session_state() {
    let mut engine = engine(FakeModem::new(sample_server()));
    let mut ui = ScriptConsole::new();
    engine.initialize(&mut ui).unwrap();
    assert!(matches!(engine.pwd(&mut ui), Err(FtpError::NotConnected)));
    assert!(matches!(
        engine.login(&mut ui, "anonymous", "x"),
        Err(FtpError::NotConnected)
    ));
    engine.connect(&mut ui, SERVER_IP, 21).unwrap();
    assert!(matches!(engine.pwd(&mut ui), Err(FtpError::NotLoggedIn)));
    assert!(matches!(
        engine.change_dir(&mut ui, "pub"),
        Err(FtpError::NotLoggedIn)
    ));
    assert!(!engine.link().device().received("PWD"));
}

#[test]
fn change_directory_tracks_the_server_path() {
    let (mut engine, mut ui) = logged_in(FakeModem::new(sample_server()), Settings::default());
    assert_eq!(engine.change_dir(&mut ui, "pub").unwrap(), "/pub");
    assert_eq!(engine.change_dir(&mut ui, "games").unwrap(), "/pub/games");
    assert_eq!(engine.change_dir(&mut ui, "..").unwrap(), "/pub");
    assert_eq!(engine.session().path, "/pub");

    let err = engine.change_dir(&mut ui, "nowhere").unwrap_err();
    assert!(matches!(err, FtpError::NotFound(_)));
    assert_eq!(engine.session().path, "/pub");
    assert_eq!(engine.state(), SessionState::LoggedIn);
}

#[test]
fn change_directory_decodes_escapes() {
    let (mut engine, mut ui) = logged_in(FakeModem::new(sample_server()), Settings::default());
    assert_eq!(engine.change_dir(&mut ui, "/my%20stuff").unwrap(), "/my stuff");
    assert!(engine.link().device().received("CWD /my stuff"));
}

#[test]
fn idle_monitor_reports_a_closed_socket_once() {
    let (mut engine, mut ui) = logged_in(FakeModem::new(sample_server()), Settings::default());
    assert!(!engine.poll_idle(&mut ui));

    engine.link_mut().device_mut().inject_line("0,CLOSED");
    assert!(engine.poll_idle(&mut ui));
    assert_eq!(engine.state(), SessionState::WifiOk);
    assert_eq!(ui.count("Remote host closed socket"), 1);

    assert!(!engine.poll_idle(&mut ui));
    assert_eq!(ui.count("Remote host closed socket"), 1);
}

#[test]
fn idle_timeout_reply_is_recognised() {
    let (mut engine, mut ui) = logged_in(FakeModem::new(sample_server()), Settings::default());
    engine
        .link_mut()
        .device_mut()
        .inject_reply("421 Timeout - closing control connection.");
    assert!(engine.poll_idle(&mut ui));
    assert!(ui.printed("Idle Timeout (421)"));
}

#[test]
fn stale_notice_is_not_taken_as_a_reply() {
    let (mut engine, mut ui) = logged_in(FakeModem::new(sample_server()), Settings::default());
    engine
        .link_mut()
        .device_mut()
        .inject_reply("421 Service not available, closing control connection.");
    let err = engine.pwd(&mut ui).unwrap_err();
    match err {
        FtpError::ConnectionLost(reason) => assert_eq!(reason, "Service Closing (421)"),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(engine.state(), SessionState::WifiOk);
    assert!(!engine.link().device().received("PWD"));
}

#[test]
fn quit_asks_first() {
    let (mut engine, mut ui) = logged_in(FakeModem::new(sample_server()), Settings::default());
    ui.answers.push_back(false);
    assert!(!engine.quit(&mut ui).unwrap());
    assert_eq!(engine.state(), SessionState::LoggedIn);
    assert!(!engine.link().device().received("QUIT"));

    ui.answers.push_back(true);
    assert!(engine.quit(&mut ui).unwrap());
    assert_eq!(engine.state(), SessionState::WifiOk);
    assert!(engine.session().host.is_empty());
    assert!(engine.link().device().received("QUIT"));
    assert!(engine.link().device().sent("AT+CIPCLOSE=0"));
    // our own hang-up is not reported as a lost connection later
    assert!(!engine.poll_idle(&mut ui));
}

#[test]
fn reconnect_needs_confirmation() {
    let (mut engine, mut ui) = logged_in(FakeModem::new(sample_server()), Settings::default());
    ui.answers.push_back(false);
    let err = engine.connect(&mut ui, SERVER_IP, 21).unwrap_err();
    assert!(matches!(err, FtpError::Cancelled));
    assert_eq!(engine.state(), SessionState::LoggedIn);

    ui.begin_operation();
    ui.answers.push_back(true);
    engine.connect(&mut ui, SERVER_IP, 2121).unwrap();
    assert_eq!(engine.state(), SessionState::FtpConnected);
    assert_eq!(engine.session().port, 2121);
    assert!(engine.link().device().received("QUIT"));
}

fn connected_to(server: FakeFtp) -> (TestEngine, ScriptConsole) {
    let mut engine = engine(FakeModem::new(server));
    let mut ui = ScriptConsole::new();
    engine.initialize(&mut ui).unwrap();
    engine.connect(&mut ui, SERVER_IP, 21).unwrap();
    (engine, ui)
}

#[test]
fn user_accepted_without_password() {
    let mut server = sample_server();
    server.user_code = 230;
    let (mut engine, mut ui) = connected_to(server);
    engine.login(&mut ui, "guest", "unused").unwrap();
    assert_eq!(engine.state(), SessionState::LoggedIn);
    assert_eq!(engine.session().user, "guest");
    let modem = engine.link().device();
    assert!(modem.received("USER guest"));
    assert!(!modem.ftp_log.iter().any(|c| c.starts_with("PASS")));
    assert!(modem.received("TYPE I"));
}

#[test]
fn user_refused_outright() {
    let mut server = sample_server();
    server.user_code = 530;
    let (mut engine, mut ui) = connected_to(server);
    let err = engine.login(&mut ui, "bob", "secret").unwrap_err();
    assert!(matches!(err, FtpError::LoginIncorrect));
    assert_eq!(engine.state(), SessionState::FtpConnected);
    assert!(!engine.link().device().ftp_log.iter().any(|c| c.starts_with("PASS")));
}

#[test]
fn closed_notice_split_between_drains_is_reported_once() {
    let (mut engine, mut ui) = logged_in(FakeModem::new(sample_server()), Settings::default());
    engine.link_mut().device_mut().inject_bytes(b"\r\n0,CLO");
    assert!(!engine.poll_idle(&mut ui));
    assert_eq!(engine.state(), SessionState::LoggedIn);

    engine.link_mut().device_mut().inject_bytes(b"SED\r\n");
    assert!(engine.poll_idle(&mut ui));
    assert_eq!(engine.state(), SessionState::WifiOk);
    assert!(!engine.poll_idle(&mut ui));
    assert_eq!(ui.count("Remote host closed socket"), 1);
}

#[test]
fn long_notice_is_seen_before_the_next_command() {
    let (mut engine, mut ui) = logged_in(FakeModem::new(sample_server()), Settings::default());
    // one frame well past a single responsive drain
    engine
        .link_mut()
        .device_mut()
        .inject_reply("421 Service not available, closing control connection.");
    let sends_before = engine
        .link()
        .device()
        .at_log
        .iter()
        .filter(|c| c.starts_with("AT+CIPSEND"))
        .count();
    let err = engine.change_dir(&mut ui, "zzzzzzz").unwrap_err();
    assert!(matches!(err, FtpError::ConnectionLost(_)));
    let modem = engine.link().device();
    let sends_after = modem
        .at_log
        .iter()
        .filter(|c| c.starts_with("AT+CIPSEND"))
        .count();
    assert_eq!(sends_after, sends_before);
    assert!(!modem.received("CWD zzzzzzz"));
    assert_eq!(engine.state(), SessionState::WifiOk);
}
