//! Demo harness exercising every supported function code against a
//! configured RS-485 device. Not part of the library's public contract —
//! spec.md leaves the test harness unspecified, this is just a convenient
//! way to poke a real slave from the command line.

use clap::{Args, Parser, Subcommand};

use yam_modbus::{Bus, BusConfig, LoggingConfig};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct CommonArgs {
    /// Serial device, e.g. /dev/ttyUSB0
    #[arg(short, long)]
    device: String,

    /// Baud rate
    #[arg(short, long, default_value_t = 9600)]
    baud: u32,

    /// Slave address
    #[arg(short, long, default_value_t = 1)]
    slave: u8,

    /// Per-transaction timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Emit `[HH]`/`<HH>` byte traces
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Read holding registers
    ReadHolding { start: u16, count: u16 },
    /// Read input registers
    ReadInput { start: u16, count: u16 },
    /// Read coils
    ReadCoils { start: u16, count: u16 },
    /// Read discrete inputs
    ReadDiscretes { start: u16, count: u16 },
    /// Write a single holding register
    WriteRegister { addr: u16, value: u16 },
    /// Turn a single coil on or off
    WriteCoil { addr: u16, on: bool },
    /// Read the exception status byte
    ExceptionStatus,
    /// Report the slave's vendor id, run status, and extra data
    SlaveId,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    LoggingConfig::default().init_tracing().ok();

    let cli = Cli::parse();

    let config = BusConfig {
        device: cli.common.device,
        baud_rate: cli.common.baud,
        timeout_ms: cli.common.timeout_ms,
        debug: cli.common.debug,
        ..Default::default()
    };
    config.validate()?;

    let mut bus = Bus::open(&config)?;
    let addr = cli.common.slave;

    match cli.command {
        Command::ReadHolding { start, count } => {
            let mut regs = vec![0u16; count as usize];
            bus.read_holding_registers(addr, start, count, &mut regs)?;
            println!("{regs:?}");
        }
        Command::ReadInput { start, count } => {
            let mut regs = vec![0u16; count as usize];
            bus.read_input_registers(addr, start, count, &mut regs)?;
            println!("{regs:?}");
        }
        Command::ReadCoils { start, count } => {
            let mut coils = vec![0u8; count as usize];
            bus.read_coils(addr, start, count, &mut coils)?;
            println!("{:?}", coils.iter().map(|&b| b != 0).collect::<Vec<_>>());
        }
        Command::ReadDiscretes { start, count } => {
            let mut discretes = vec![0u8; count as usize];
            bus.read_discretes(addr, start, count, &mut discretes)?;
            println!("{:?}", discretes.iter().map(|&b| b != 0).collect::<Vec<_>>());
        }
        Command::WriteRegister { addr: reg_addr, value } => {
            bus.write_single_register(addr, reg_addr, value)?;
            println!("ok");
        }
        Command::WriteCoil { addr: coil_addr, on } => {
            bus.write_single_coil(addr, coil_addr, on)?;
            println!("ok");
        }
        Command::ExceptionStatus => {
            let status = bus.read_exception_status(addr)?;
            println!("{status:#010b}");
        }
        Command::SlaveId => {
            let id = bus.report_slave_id(addr)?;
            println!(
                "id={:#04x} run_status={:#04x} extra={:02x?}",
                id.id, id.run_status, id.extra
            );
        }
    }

    Ok(())
}
