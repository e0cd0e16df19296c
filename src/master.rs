use crate::codec;
use crate::config::{
    ParityBit, ReadFunction, ReadRequest, RtuConfig, TcpConfig, WriteFunction, WriteRequest,
    DEFAULT_TCP_PORT,
};
use crate::msg::{Command, ConnectionState, LogMsg, Status};
use crate::poll::Periodic;

use anyhow::anyhow;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio_modbus::client::Context;
use tokio_modbus::prelude::{Client, Reader, Slave, SlaveContext, Writer};
use tokio_serial::{DataBits, Parity, SerialStream, StopBits};

/// Fixed cadence of the liveness probe while connected.
pub const PROBE_INTERVAL_MS: u64 = 5000;

#[derive(Clone, Debug)]
pub enum Target {
    Tcp(TcpConfig),
    Rtu(RtuConfig),
}

impl Target {
    fn describe(&self) -> String {
        match self {
            Target::Tcp(config) => {
                format!("tcp://{}:{}", config.host, config.port_or(DEFAULT_TCP_PORT))
            }
            Target::Rtu(config) => format!("rtu://{}@{}", config.path, config.baud_rate),
        }
    }
}

enum Tick {
    Poll,
    Probe,
}

/// Client session over either transport. Driven by the command channel and
/// by the two internal timers (auto-poll and liveness probe), serialized
/// through one `select!` loop so the modbus context has a single user.
pub struct Master {
    target: Target,
    state: ConnectionState,
    context: Option<Context>,
    last_read: Option<ReadRequest>,
    poll: Periodic,
    probe: Periodic,
    status_send: Sender<Status>,
    command_recv: Receiver<Command>,
    log_send: Sender<LogMsg>,
    tick_send: Sender<Tick>,
    tick_recv: Receiver<Tick>,
}

impl Master {
    pub fn new(
        target: Target,
        status_send: Sender<Status>,
        command_recv: Receiver<Command>,
        log_send: Sender<LogMsg>,
    ) -> Self {
        let (tick_send, tick_recv) = channel::<Tick>(4);
        Self {
            target,
            state: ConnectionState::Disconnected,
            context: None,
            last_read: None,
            poll: Periodic::new(),
            probe: Periodic::new(),
            status_send,
            command_recv,
            log_send,
            tick_send,
            tick_recv,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.command_recv.recv() => match command {
                    Some(Command::Connect) => self.connect().await,
                    Some(Command::Disconnect) => self.disconnect().await,
                    Some(Command::Read(request)) => self.read(request).await,
                    Some(Command::Write(request)) => self.write(&request).await,
                    Some(Command::SetPollInterval(interval_ms)) => {
                        self.set_poll_interval(interval_ms).await
                    }
                    None => {
                        self.disconnect().await;
                        break;
                    }
                },
                tick = self.tick_recv.recv() => match tick {
                    Some(Tick::Poll) => {
                        if let Some(request) = self.last_read.clone() {
                            self.read(request).await;
                        }
                    }
                    Some(Tick::Probe) => self.probe().await,
                    None => break,
                },
            }
        }
    }

    async fn connect(&mut self) {
        if self.state == ConnectionState::Connected {
            return;
        }
        let result = match &self.target {
            Target::Tcp(config) => Self::connect_tcp(config).await,
            Target::Rtu(config) => Self::attach_serial(config),
        };
        match result {
            Ok(context) => {
                self.context = Some(context);
                self.state = ConnectionState::Connected;
                let _ = self
                    .status_send
                    .send(Status::Connection(ConnectionState::Connected))
                    .await;
                let _ = self
                    .log_send
                    .send(LogMsg::ok(&format!("Connected to {}.", self.target.describe())))
                    .await;
                self.start_probe();
            }
            Err(e) => {
                let _ = self
                    .log_send
                    .send(LogMsg::err(&format!(
                        "Failed to connect to {} [{}].",
                        self.target.describe(),
                        e
                    )))
                    .await;
            }
        }
    }

    async fn connect_tcp(config: &TcpConfig) -> anyhow::Result<Context> {
        let addr: SocketAddr =
            format!("{}:{}", config.host, config.port_or(DEFAULT_TCP_PORT)).parse()?;
        Ok(tokio_modbus::client::tcp::connect(addr).await?)
    }

    fn attach_serial(config: &RtuConfig) -> anyhow::Result<Context> {
        let parity = match config.parity {
            ParityBit::None => Parity::None,
            ParityBit::Even => Parity::Even,
            ParityBit::Odd => Parity::Odd,
            ParityBit::Mark | ParityBit::Space => {
                return Err(anyhow!(
                    "Parity '{}' is not supported by the serial backend.",
                    config.parity
                ))
            }
        };
        let builder = tokio_serial::new(config.path.clone(), config.baud_rate)
            .data_bits(match config.data_bits {
                7 => DataBits::Seven,
                _ => DataBits::Eight,
            })
            .stop_bits(match config.stop_bits {
                2 => StopBits::Two,
                _ => StopBits::One,
            })
            .parity(parity);
        let stream = SerialStream::open(&builder)?;
        Ok(tokio_modbus::client::rtu::attach_slave(stream, Slave(1)))
    }

    fn start_probe(&mut self) {
        let tick_send = self.tick_send.clone();
        self.probe
            .start(Duration::from_millis(PROBE_INTERVAL_MS), move || {
                let tick_send = tick_send.clone();
                async move {
                    let _ = tick_send.send(Tick::Probe).await;
                }
            });
    }

    /// Read one holding register at address 0 of unit 1. A device replying
    /// with a modbus exception still proves the link; only a transport
    /// failure drops the connection.
    async fn probe(&mut self) {
        if self.state != ConnectionState::Connected {
            return;
        }
        let alive = match self.context.as_mut() {
            Some(context) => {
                context.set_slave(Slave(1));
                context.read_holding_registers(0, 1).await.is_ok()
            }
            None => false,
        };
        if !alive {
            // The probe timer stops before the state flips, so the
            // disconnect transition happens exactly once.
            self.probe.stop();
            self.state = ConnectionState::Disconnected;
            if let Some(mut context) = self.context.take() {
                let _ = context.disconnect().await;
            }
            let _ = self
                .status_send
                .send(Status::Connection(ConnectionState::Disconnected))
                .await;
            let _ = self
                .log_send
                .send(LogMsg::err("Connection lost, liveness probe failed."))
                .await;
        }
    }

    async fn read(&mut self, request: ReadRequest) {
        self.last_read = Some(request.clone());
        let Some(context) = self.context.as_mut() else {
            let _ = self
                .log_send
                .send(LogMsg::err("Not connected to any modbus device."))
                .await;
            return;
        };
        context.set_slave(Slave(request.unit_id));
        let _ = self
            .log_send
            .send(LogMsg::info(&format!(
                "Read {}: unit {}, address {}, length {}.",
                request.function, request.unit_id, request.address, request.length
            )))
            .await;
        let outcome = match request.function {
            ReadFunction::HoldingRegisters => context
                .read_holding_registers(request.address, request.length)
                .await
                .map(|response| {
                    response.map(|words| {
                        codec::format_values(&words, request.r#type, request.endianness, request.decimals)
                    })
                }),
            ReadFunction::InputRegisters => context
                .read_input_registers(request.address, request.length)
                .await
                .map(|response| {
                    response.map(|words| {
                        codec::format_values(&words, request.r#type, request.endianness, request.decimals)
                    })
                }),
            ReadFunction::Coils => context
                .read_coils(request.address, request.length)
                .await
                .map(|response| response.map(|bits| codec::format_bits(&bits))),
            ReadFunction::DiscreteInputs => context
                .read_discrete_inputs(request.address, request.length)
                .await
                .map(|response| response.map(|bits| codec::format_bits(&bits))),
        };
        match outcome {
            Ok(Ok(data)) => {
                let _ = self
                    .log_send
                    .send(LogMsg::ok(&format!("Read successful: {}", data)))
                    .await;
            }
            Ok(Err(exception)) => {
                let _ = self
                    .log_send
                    .send(LogMsg::err(&format!("Read rejected by device [{}].", exception)))
                    .await;
            }
            Err(e) => {
                let _ = self
                    .log_send
                    .send(LogMsg::err(&format!("Read failed [{}].", e)))
                    .await;
            }
        }
    }

    async fn write(&mut self, request: &WriteRequest) {
        if !codec::validate(&request.value, request.r#type) {
            let _ = self
                .log_send
                .send(LogMsg::err(&format!(
                    "Value \"{}\" is outside the valid range of {}.",
                    request.value, request.r#type
                )))
                .await;
            return;
        }
        let words = match codec::encode(&request.value, request.r#type) {
            Ok(words) => codec::reorder(words, request.endianness),
            Err(e) => {
                let _ = self
                    .log_send
                    .send(LogMsg::err(&format!("Failed to encode value [{}].", e)))
                    .await;
                return;
            }
        };
        let Some(context) = self.context.as_mut() else {
            let _ = self
                .log_send
                .send(LogMsg::err("Not connected to any modbus device."))
                .await;
            return;
        };
        context.set_slave(Slave(request.unit_id));
        let _ = self
            .log_send
            .send(LogMsg::info(&format!(
                "Write {}: unit {}, address {}, value {}.",
                request.function, request.unit_id, request.address, request.value
            )))
            .await;
        let outcome = match request.function {
            WriteFunction::SingleRegister => {
                context
                    .write_single_register(request.address, words[0])
                    .await
            }
            WriteFunction::MultipleRegisters => {
                context
                    .write_multiple_registers(request.address, &words)
                    .await
            }
            WriteFunction::SingleCoil => {
                context
                    .write_single_coil(request.address, words[0] != 0)
                    .await
            }
            WriteFunction::MultipleCoils => {
                let bits = words.iter().map(|word| *word != 0).collect::<Vec<_>>();
                context.write_multiple_coils(request.address, &bits).await
            }
        };
        match outcome {
            Ok(Ok(())) => {
                let _ = self.log_send.send(LogMsg::ok("Write successful.")).await;
            }
            Ok(Err(exception)) => {
                let _ = self
                    .log_send
                    .send(LogMsg::err(&format!("Write rejected by device [{}].", exception)))
                    .await;
            }
            Err(e) => {
                let _ = self
                    .log_send
                    .send(LogMsg::err(&format!("Write failed [{}].", e)))
                    .await;
            }
        }
    }

    async fn set_poll_interval(&mut self, interval_ms: Option<u64>) {
        match interval_ms {
            Some(ms) => {
                if !(100..=10000).contains(&ms) {
                    let _ = self
                        .log_send
                        .send(LogMsg::err("Poll interval must be within 100..=10000 ms."))
                        .await;
                    return;
                }
                let tick_send = self.tick_send.clone();
                self.poll.start(Duration::from_millis(ms), move || {
                    let tick_send = tick_send.clone();
                    async move {
                        let _ = tick_send.send(Tick::Poll).await;
                    }
                });
                let _ = self
                    .log_send
                    .send(LogMsg::info(&format!("Polling every {} ms.", ms)))
                    .await;
            }
            None => {
                self.poll.stop();
                let _ = self.log_send.send(LogMsg::info("Polling stopped.")).await;
            }
        }
    }

    async fn disconnect(&mut self) {
        self.probe.stop();
        if let Some(mut context) = self.context.take() {
            let _ = context.disconnect().await;
        }
        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Disconnected;
            let _ = self
                .status_send
                .send(Status::Connection(ConnectionState::Disconnected))
                .await;
            let _ = self
                .log_send
                .send(LogMsg::ok(&format!(
                    "Disconnected from {}.",
                    self.target.describe()
                )))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ut_target_describe() {
        let tcp = Target::Tcp(TcpConfig {
            host: "10.0.0.2".to_owned(),
            port: Some(1502),
        });
        assert_eq!(tcp.describe(), "tcp://10.0.0.2:1502");

        let tcp = Target::Tcp(TcpConfig {
            host: "10.0.0.2".to_owned(),
            port: None,
        });
        assert_eq!(tcp.describe(), "tcp://10.0.0.2:502");

        let rtu = Target::Rtu(RtuConfig {
            path: "/dev/ttyUSB0".to_owned(),
            baud_rate: 19200,
            data_bits: 8,
            stop_bits: 1,
            parity: ParityBit::None,
        });
        assert_eq!(rtu.describe(), "rtu:///dev/ttyUSB0@19200");
    }

    #[tokio::test]
    async fn ut_read_without_connection_logs_error() {
        let (status_send, _status_recv) = channel::<Status>(4);
        let (_command_send, command_recv) = channel::<Command>(4);
        let (log_send, mut log_recv) = channel::<LogMsg>(4);
        let mut master = Master::new(
            Target::Tcp(TcpConfig {
                host: "127.0.0.1".to_owned(),
                port: None,
            }),
            status_send,
            command_recv,
            log_send,
        );

        master.read(ReadRequest::default()).await;
        match log_recv.recv().await {
            Some(LogMsg::Err(_)) => {}
            other => panic!("expected error log, got {:?}", other),
        }
        assert!(master.last_read.is_some());
    }

    #[tokio::test]
    async fn ut_write_validation_gate() {
        let (status_send, _status_recv) = channel::<Status>(4);
        let (_command_send, command_recv) = channel::<Command>(4);
        let (log_send, mut log_recv) = channel::<LogMsg>(4);
        let mut master = Master::new(
            Target::Tcp(TcpConfig {
                host: "127.0.0.1".to_owned(),
                port: None,
            }),
            status_send,
            command_recv,
            log_send,
        );

        let request = WriteRequest {
            value: "65536".to_owned(),
            ..Default::default()
        };
        master.write(&request).await;
        match log_recv.recv().await {
            Some(LogMsg::Err(msg)) => assert!(msg.message.contains("valid range")),
            other => panic!("expected error log, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn ut_poll_interval_bounds() {
        let (status_send, _status_recv) = channel::<Status>(4);
        let (_command_send, command_recv) = channel::<Command>(4);
        let (log_send, mut log_recv) = channel::<LogMsg>(4);
        let mut master = Master::new(
            Target::Tcp(TcpConfig {
                host: "127.0.0.1".to_owned(),
                port: None,
            }),
            status_send,
            command_recv,
            log_send,
        );

        master.set_poll_interval(Some(50)).await;
        assert!(matches!(log_recv.recv().await, Some(LogMsg::Err(_))));
        assert!(!master.poll.is_running());

        master.set_poll_interval(Some(100)).await;
        assert!(matches!(log_recv.recv().await, Some(LogMsg::Info(_))));
        assert!(master.poll.is_running());

        master.set_poll_interval(None).await;
        assert!(!master.poll.is_running());
    }
}
