//! A scripted GDB client against the server, the target controller and a
//! simulated target.

use kestrel_core::config::ServerConfig;
use kestrel_core::controller::{CommandPayload, ToolFactory};
use kestrel_core::tools::{DebugTool, SimulatedTool, SimulatorControl};
use kestrel_core::{
    ControllerHandle, EnvironmentConfig, EventKind, EventListener, EventManager, TargetController,
    TargetControllerConsole, TargetControllerState, TargetMemoryType, TargetState,
};
use kestrel_gdb::packet::{checksum, encode};
use kestrel_gdb::GdbServer;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

struct Client {
    stream: TcpStream,
}

impl Client {
    fn connect(address: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(address).expect("connect to the GDB server");
        stream
            .set_read_timeout(Some(TIMEOUT))
            .expect("set client read timeout");
        Self { stream }
    }

    fn read_byte(&mut self) -> u8 {
        let mut byte = [0u8; 1];
        self.stream.read_exact(&mut byte).expect("read from server");
        byte[0]
    }

    fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("write to server");
    }

    /// Send a packet and return the acknowledgement byte.
    fn send(&mut self, payload: &str) -> u8 {
        self.send_raw(&encode(payload.as_bytes()));
        self.read_byte()
    }

    fn receive(&mut self) -> String {
        while self.read_byte() != b'$' {}

        let mut payload = Vec::new();
        loop {
            match self.read_byte() {
                b'#' => break,
                byte => payload.push(byte),
            }
        }
        let digits = [self.read_byte(), self.read_byte()];
        let expected = u8::from_str_radix(std::str::from_utf8(&digits).expect("checksum digits"), 16)
            .expect("hex checksum");
        assert_eq!(expected, checksum(&payload), "reply checksum");

        self.send_raw(b"+");
        String::from_utf8(payload).expect("ASCII reply")
    }

    fn request(&mut self, payload: &str) -> String {
        assert_eq!(self.send(payload), b'+', "packet {payload} should be acknowledged");
        self.receive()
    }
}

struct Fixture {
    control: SimulatorControl,
    events: Arc<EventManager>,
    handle: ControllerHandle,
    controller: Option<JoinHandle<()>>,
    server: Option<JoinHandle<()>>,
    client: Client,
}

impl Fixture {
    fn start() -> Self {
        let control = SimulatorControl::default();
        let events = Arc::new(EventManager::new());

        let tool_control = control.clone();
        let factory: ToolFactory = Box::new(move |_| {
            Ok(Box::new(SimulatedTool::new(tool_control.clone())) as Box<dyn DebugTool>)
        });
        let (handle, controller) = TargetController::with_tool_factory(
            EnvironmentConfig::new("simulator", "atmega328p"),
            events.clone(),
            factory,
        )
        .with_poll_interval(Duration::from_millis(5))
        .spawn()
        .expect("controller should start against the simulator");

        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        let console = TargetControllerConsole::new(handle.clone()).with_timeout(TIMEOUT);
        let server = GdbServer::bind(&config, console, events.clone()).expect("bind an ephemeral port");
        let address = server.local_addr().expect("server address");
        let server = thread::spawn(move || server.serve_one().expect("serve one client"));

        let client = Client::connect(address);
        Self {
            control,
            events,
            handle,
            controller: Some(controller),
            server: Some(server),
            client,
        }
    }

    fn console(&self) -> TargetControllerConsole {
        TargetControllerConsole::new(self.handle.clone()).with_timeout(TIMEOUT)
    }

    /// Detach and wait for the server to wind the session down.
    fn detach(&mut self) {
        assert_eq!(self.client.request("D"), "OK");
        if let Some(server) = self.server.take() {
            server.join().expect("server thread");
        }
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = self.client.stream.shutdown(std::net::Shutdown::Both);
        if let Some(server) = self.server.take() {
            let _ = server.join();
        }
        self.handle.execute(CommandPayload::Shutdown, TIMEOUT);
        if let Some(controller) = self.controller.take() {
            let _ = controller.join();
        }
    }
}

#[test]
fn test_supported_features_are_fixed() {
    let mut fixture = Fixture::start();
    assert_eq!(
        fixture.client.request("qSupported:multiprocess+;swbreak+;hwbreak+;xmlRegisters=i386"),
        "PacketSize=1000;swbreak+;hwbreak+"
    );
    assert_eq!(fixture.client.request("qAttached"), "1");
    assert_eq!(fixture.client.request("Hg0"), "OK");
    assert_eq!(fixture.client.request("?"), "S05");
    assert_eq!(fixture.client.request("vMustReplyEmpty"), "");
}

#[test]
fn test_session_start_stops_target() {
    let mut fixture = Fixture::start();
    assert_eq!(fixture.client.request("qC"), "QC1");
    assert_eq!(fixture.control.state(), TargetState::Stopped);
}

#[test]
fn test_flash_write_without_programming_mode_fails() {
    let mut fixture = Fixture::start();

    assert_eq!(fixture.client.request("M1000,4:AABBCCDD"), "E01");
    assert_eq!(
        fixture.control.read(TargetMemoryType::Flash, 0x1000, 4),
        vec![0xFF; 4]
    );
}

#[test]
fn test_register_block_has_35_registers() {
    let mut fixture = Fixture::start();
    fixture.control.set_general_purpose_register(0, 0x11);
    fixture.control.set_general_purpose_register(31, 0x22);

    let reply = fixture.client.request("g");
    // 32 general purpose registers, SREG, SP (2 bytes) and PC (4 bytes).
    assert_eq!(reply.len(), (32 + 1 + 2 + 4) * 2);
    assert_eq!(&reply[0..2], "11");
    assert_eq!(&reply[62..64], "22");

    let program_counter = fixture.console().program_counter().expect("pc");
    let expected_pc = hex::encode(program_counter.to_le_bytes());
    assert_eq!(&reply[70..78], expected_pc);
}

#[test]
fn test_register_write_and_read_back() {
    let mut fixture = Fixture::start();

    assert_eq!(fixture.client.request("P5=a5"), "OK");
    assert_eq!(fixture.client.request("p5"), "a5");
    assert_eq!(fixture.client.request("P22=00020000"), "OK");
    assert_eq!(fixture.client.request("p22"), "00020000");
    assert_eq!(fixture.client.request("p23"), "E01");
}

#[test]
fn test_sram_and_eeprom_address_spaces() {
    let mut fixture = Fixture::start();

    assert_eq!(fixture.client.request("M800200,2:beef"), "OK");
    assert_eq!(fixture.control.read(TargetMemoryType::Ram, 0x200, 2), vec![0xBE, 0xEF]);
    assert_eq!(fixture.client.request("m800200,2"), "beef");

    // X carries raw bytes; 0x7d is sent escaped.
    assert_eq!(fixture.client.request("X810010,2:\x01}"), "OK");
    assert_eq!(
        fixture.control.read(TargetMemoryType::Eeprom, 0x10, 2),
        vec![0x01, 0x7D]
    );
    assert_eq!(fixture.client.request("m810010,2"), "017d");
}

#[test]
fn test_continue_until_breakpoint() {
    let mut fixture = Fixture::start();

    assert_eq!(fixture.client.request("Z0,100,2"), "OK");
    assert_eq!(fixture.client.request("c0"), "S05");
    assert_eq!(fixture.control.program_counter(), 0x100);
    assert_eq!(fixture.client.request("z0,100,2"), "OK");
    assert!(fixture.control.breakpoints().is_empty());
    assert_eq!(fixture.client.request("Z2,800100,1"), "");
}

#[test]
fn test_hardware_breakpoints() {
    let mut fixture = Fixture::start();
    fixture.console().set_program_counter(0).expect("move pc");

    assert_eq!(fixture.client.request("Z1,100,2"), "OK");
    assert_eq!(fixture.client.request("Z1,200,2"), "OK");
    assert_eq!(fixture.client.request("z1,100,2"), "OK");
    assert_eq!(fixture.control.breakpoints(), vec![0x200]);

    assert_eq!(fixture.client.request("c"), "S05");
    assert_eq!(fixture.control.program_counter(), 0x200);
}

#[test]
fn test_interrupt_stops_running_target() {
    let mut fixture = Fixture::start();

    // 1. Resume with no breakpoints; the target runs until interrupted.
    assert_eq!(fixture.client.send("c"), b'+');
    thread::sleep(Duration::from_millis(50));
    assert_eq!(fixture.control.state(), TargetState::Running);

    // 2. Ctrl-C.
    fixture.client.send_raw(&[0x03]);
    assert_eq!(fixture.client.receive(), "S05");
    assert_eq!(fixture.control.state(), TargetState::Stopped);
}

#[test]
fn test_step() {
    let mut fixture = Fixture::start();
    let before = fixture.control.program_counter();

    assert_eq!(fixture.client.request("s"), "S05");
    assert_ne!(fixture.control.program_counter(), before);
}

#[test]
fn test_bad_checksum_is_nacked() {
    let mut fixture = Fixture::start();

    fixture.client.send_raw(b"$qAttached#00");
    assert_eq!(fixture.client.read_byte(), b'-');
    assert_eq!(fixture.client.request("qAttached"), "1");
}

#[test]
fn test_malformed_packet_gets_error() {
    let mut fixture = Fixture::start();
    assert_eq!(fixture.client.request("mzz,4"), "E01");
    assert_eq!(fixture.client.request("M1000,4:AABB"), "E01");
}

#[test]
fn test_monitor_commands() {
    let mut fixture = Fixture::start();

    let reply = fixture.client.request(&format!("qRcmd,{}", hex::encode("version machine")));
    let json = String::from_utf8(hex::decode(reply).expect("hex reply")).expect("utf-8");
    let value: serde_json::Value = serde_json::from_str(&json).expect("json");
    assert_eq!(value["version"], env!("CARGO_PKG_VERSION"));

    let reply = fixture.client.request(&format!("qRcmd,{}", hex::encode("help")));
    let help = String::from_utf8(hex::decode(reply).expect("hex reply")).expect("utf-8");
    assert!(help.contains("reset"));

    fixture.console().set_program_counter(0x40).expect("move pc");
    let reply = fixture.client.request(&format!("qRcmd,{}", hex::encode("reset")));
    assert!(!reply.is_empty());
    assert_eq!(fixture.control.program_counter(), 0);

    assert_eq!(fixture.client.request(&format!("qRcmd,{}", hex::encode("erase"))), "");
}

#[test]
fn test_detach_ends_session_and_releases_tool() {
    let mut fixture = Fixture::start();
    let listener = Arc::new(EventListener::new("test"));
    listener.register_kind(EventKind::TargetControllerStateChanged);
    fixture.events.register_listener(listener.clone());

    fixture.detach();

    let event = listener
        .wait_for(&[EventKind::TargetControllerStateChanged], Some(TIMEOUT), None)
        .expect("controller should suspend once the session ends");
    assert_eq!(
        event.payload,
        kestrel_core::EventPayload::TargetControllerStateChanged {
            state: TargetControllerState::Suspended
        }
    );
    assert!(!fixture.control.is_session_open());
}
