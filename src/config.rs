use crate::codec::{DataType, Endianness};
use anyhow::anyhow;
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::fs::File;
use std::io::BufReader;

pub const DEFAULT_TCP_PORT: u16 = 502;

#[derive(Clone, Debug, Args)]
pub struct TcpConfig {
    /// The host or IP address of the remote device.
    #[arg(default_value = "127.0.0.1")]
    pub host: String,

    /// The TCP port to use. Without it the master targets port 502 and the
    /// slave listens on the `slave.port` config value.
    pub port: Option<u16>,
}

impl TcpConfig {
    pub fn port_or(&self, fallback: u16) -> u16 {
        self.port.unwrap_or(fallback)
    }
}

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParityBit {
    #[default]
    None,
    Even,
    Odd,
    Mark,
    Space,
}

impl Display for ParityBit {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParityBit::None => fmt.write_str("none"),
            ParityBit::Even => fmt.write_str("even"),
            ParityBit::Odd => fmt.write_str("odd"),
            ParityBit::Mark => fmt.write_str("mark"),
            ParityBit::Space => fmt.write_str("space"),
        }
    }
}

#[derive(Clone, Debug, Args)]
pub struct RtuConfig {
    /// The device path to use for communication.
    pub path: String,

    /// The baud rate to use for the serial connection.
    #[arg(short, long, default_value_t = 9600, value_parser = parse_baud_rate)]
    pub baud_rate: u32,

    /// The number of data bits [values: 7, 8]
    #[arg(short, long, default_value_t = 8, value_parser = parse_data_bits)]
    pub data_bits: u8,

    /// The number of stop bits [values: 1, 2]
    #[arg(short, long, default_value_t = 1, value_parser = parse_stop_bits)]
    pub stop_bits: u8,

    /// The parity bit to use.
    #[arg(short, long, value_enum, default_value_t = ParityBit::None)]
    pub parity: ParityBit,
}

fn parse_baud_rate(s: &str) -> Result<u32, String> {
    let val: u32 = s.parse().map_err(|_| format!("Invalid baud rate '{}'.", s))?;
    match val {
        9600 | 19200 | 38400 | 57600 | 115200 => Ok(val),
        _ => Err(format!("Unsupported baud rate '{}'.", val)),
    }
}

fn parse_data_bits(s: &str) -> Result<u8, String> {
    match s {
        "7" => Ok(7),
        "8" => Ok(8),
        _ => Err(format!("Unsupported data bits '{}'.", s)),
    }
}

fn parse_stop_bits(s: &str) -> Result<u8, String> {
    match s {
        "1" => Ok(1),
        "2" => Ok(2),
        _ => Err(format!("Unsupported stop bits '{}'.", s)),
    }
}

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ReadFunction {
    #[default]
    HoldingRegisters,
    InputRegisters,
    Coils,
    DiscreteInputs,
}

impl Display for ReadFunction {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadFunction::HoldingRegisters => fmt.write_str("holding registers (0x03)"),
            ReadFunction::InputRegisters => fmt.write_str("input registers (0x04)"),
            ReadFunction::Coils => fmt.write_str("coils (0x01)"),
            ReadFunction::DiscreteInputs => fmt.write_str("discrete inputs (0x02)"),
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum WriteFunction {
    #[default]
    SingleRegister,
    MultipleRegisters,
    SingleCoil,
    MultipleCoils,
}

impl Display for WriteFunction {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteFunction::SingleRegister => fmt.write_str("single register (0x06)"),
            WriteFunction::MultipleRegisters => fmt.write_str("multiple registers (0x10)"),
            WriteFunction::SingleCoil => fmt.write_str("single coil (0x05)"),
            WriteFunction::MultipleCoils => fmt.write_str("multiple coils (0x0F)"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadRequest {
    pub unit_id: u8,
    pub function: ReadFunction,
    pub address: u16,
    pub length: u16,
    pub r#type: DataType,
    pub endianness: Endianness,
    pub decimals: usize,
}

impl Default for ReadRequest {
    fn default() -> Self {
        Self {
            unit_id: 1,
            function: ReadFunction::HoldingRegisters,
            address: 0,
            length: 20,
            r#type: DataType::UInt16,
            endianness: Endianness::Big,
            decimals: 4,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteRequest {
    pub unit_id: u8,
    pub function: WriteFunction,
    pub address: u16,
    pub value: String,
    pub r#type: DataType,
    pub endianness: Endianness,
}

impl Default for WriteRequest {
    fn default() -> Self {
        Self {
            unit_id: 1,
            function: WriteFunction::SingleRegister,
            address: 0,
            value: "0".to_owned(),
            r#type: DataType::UInt16,
            endianness: Endianness::Big,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaveConfig {
    pub port: u16,
    pub unit_id: u8,
}

impl SlaveConfig {
    /// A port given on the command line wins over the config file value.
    pub fn with_port_override(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.port = port;
        }
        self
    }
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_TCP_PORT,
            unit_id: 1,
        }
    }
}

/// Register table rendered by the slave session.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub start: u16,
    pub count: u16,
    pub r#type: DataType,
    pub endianness: Endianness,
    pub decimals: usize,
    pub refresh_ms: Option<u64>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            start: 0,
            count: 20,
            r#type: DataType::UInt16,
            endianness: Endianness::Big,
            decimals: 4,
            refresh_ms: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Space {
    #[default]
    Holding,
    Input,
}

/// Value written into the slave store at startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedValue {
    pub space: Space,
    pub address: u16,
    pub r#type: DataType,
    pub value: String,
    pub endianness: Endianness,
}

impl Default for SeedValue {
    fn default() -> Self {
        Self {
            space: Space::Holding,
            address: 0,
            r#type: DataType::UInt16,
            value: "0".to_owned(),
            endianness: Endianness::Big,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub poll_ms: Option<u64>,
    pub read: Option<ReadRequest>,
    pub write: Option<WriteRequest>,
    pub slave: SlaveConfig,
    pub display: DisplayConfig,
    pub seed: Vec<SeedValue>,
}

impl AppConfig {
    /// Load a configuration file, selecting the format by extension.
    pub fn read(path: &str) -> anyhow::Result<Self> {
        if path.ends_with(".toml") {
            let content = std::fs::read_to_string(path)
                .map_err(|e| anyhow!("Failed to read TOML file [{}].", e))?;
            toml::from_str(&content).map_err(|e| anyhow!("Failed to deserialize TOML [{}].", e))
        } else {
            let file =
                File::open(path).map_err(|e| anyhow!("Failed to open JSON file [{}].", e))?;
            serde_json::from_reader(BufReader::new(file))
                .map_err(|e| anyhow!("Failed to deserialize JSON [{}].", e))
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(ms) = self.poll_ms {
            if !(100..=10000).contains(&ms) {
                return Err(anyhow!("Poll interval must be within 100..=10000 ms."));
            }
        }
        if let Some(read) = &self.read {
            if !(1..=247).contains(&read.unit_id) {
                return Err(anyhow!("Read unit id must be within 1..=247."));
            }
            if !(1..=125).contains(&read.length) {
                return Err(anyhow!("Read length must be within 1..=125."));
            }
        }
        if let Some(write) = &self.write {
            if !(1..=247).contains(&write.unit_id) {
                return Err(anyhow!("Write unit id must be within 1..=247."));
            }
        }
        if self.slave.port == 0 {
            return Err(anyhow!("Slave port must be within 1..=65535."));
        }
        if !(1..=247).contains(&self.slave.unit_id) {
            return Err(anyhow!("Slave unit id must be within 1..=247."));
        }
        Ok(())
    }
}
