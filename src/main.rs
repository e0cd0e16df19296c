mod codec;
mod config;
mod master;
mod msg;
mod poll;
mod slave;
mod store;

use crate::config::{AppConfig, RtuConfig, Space, TcpConfig};
use crate::master::{Master, Target};
use crate::msg::{Command, ConnectionState, LogMsg, Status};

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{channel, Receiver};

#[derive(Subcommand)]
enum Commands {
    /// Use TCP connection
    Tcp(TcpConfig),

    /// Use RTU connection
    Rtu(RtuConfig),
}

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the JSON/TOML configuration file providing request and display settings.
    #[arg(long)]
    config: Option<String>,

    /// Switch on verbose output.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Start as a simulated slave device instead of a master.
    #[arg(long, default_value_t = false)]
    slave: bool,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let app_config = match &args.config {
        Some(path) => AppConfig::read(path)?,
        None => AppConfig::default(),
    };
    app_config.validate()?;

    let runtime = Runtime::new().map_err(|e| anyhow!("Failed to create runtime. [{}]", e))?;
    runtime.block_on(run(args, app_config))
}

async fn run(args: Args, app_config: AppConfig) -> anyhow::Result<()> {
    let (status_sender, mut status_receiver) = channel::<Status>(10);
    let (log_sender, mut log_receiver) = channel::<LogMsg>(256);
    let (cmd_sender, cmd_receiver) = channel::<Command>(10);

    if args.slave {
        let config = match &args.command {
            Commands::Tcp(tcp) => app_config.slave.clone().with_port_override(tcp.port),
            Commands::Rtu(_) => return Err(anyhow!("Slave mode is only available over TCP.")),
        };
        let mut handle = slave::SlaveHandle::start(
            config,
            app_config.display.clone(),
            status_sender,
            log_sender.clone(),
        );
        if let Some(store) = handle.store() {
            let mut store = store.lock().unwrap();
            for seed in &app_config.seed {
                let result = match seed.space {
                    Space::Holding => {
                        store.write_typed(seed.address, seed.r#type, &seed.value, seed.endianness)
                    }
                    Space::Input => store.write_input_register(seed.address, &seed.value),
                };
                if let Err(e) = result {
                    let _ = log_sender.try_send(LogMsg::err(&format!(
                        "Seed value at address {} rejected [{}].",
                        seed.address, e
                    )));
                }
            }
        }
        print_until_interrupted(&mut log_receiver, &mut status_receiver, args.verbose).await;
        handle.stop();
    } else {
        let target = match args.command {
            Commands::Tcp(config) => Target::Tcp(config),
            Commands::Rtu(config) => Target::Rtu(config),
        };
        let master = Master::new(target, status_sender, cmd_receiver, log_sender.clone());
        let session = tokio::spawn(master.run());

        let _ = cmd_sender.send(Command::Connect).await;
        if let Some(read) = app_config.read.clone() {
            let _ = cmd_sender.send(Command::Read(read)).await;
        }
        if let Some(write) = app_config.write.clone() {
            let _ = cmd_sender.send(Command::Write(write)).await;
        }
        if let Some(ms) = app_config.poll_ms {
            let _ = cmd_sender.send(Command::SetPollInterval(Some(ms))).await;
        }

        print_until_interrupted(&mut log_receiver, &mut status_receiver, args.verbose).await;
        let _ = cmd_sender.send(Command::Disconnect).await;
        drop(cmd_sender);
        let _ = session.await;
    }
    Ok(())
}

/// Presentation loop. Prints log and status messages until Ctrl-C; info
/// entries are only shown in verbose mode.
async fn print_until_interrupted(
    log_receiver: &mut Receiver<LogMsg>,
    status_receiver: &mut Receiver<Status>,
    verbose: bool,
) {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            msg = log_receiver.recv() => match msg {
                Some(LogMsg::Info(_)) if !verbose => {}
                Some(msg) => println!("{}", msg.render()),
                None => break,
            },
            status = status_receiver.recv() => match status {
                Some(Status::Connection(ConnectionState::Connected)) => {
                    println!("* connection established");
                }
                Some(Status::Connection(ConnectionState::Disconnected)) => {
                    println!("* connection closed");
                }
                Some(Status::SlaveRunning(running)) => {
                    println!("* slave running: {}", running);
                }
                None => break,
            },
        }
    }
}
