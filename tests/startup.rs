use std::net::TcpListener;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn taken_port_exits_with_failure_instead_of_panicking() {
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = taken.local_addr().unwrap();

    let mut child = Command::new(env!("CARGO_BIN_EXE_presence_relay"))
        .args(["--bind", &addr.to_string()])
        .env_remove("RELAY_TLS_CERT")
        .env_remove("RELAY_TLS_KEY")
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if Instant::now() > deadline {
            child.kill().unwrap();
            panic!("relay kept running on an occupied port");
        }
        thread::sleep(Duration::from_millis(50));
    };

    assert_eq!(status.code(), Some(1));
    drop(taken);
}
