// Repeated acquisitions against an electrometer
//
// Runs the same call sequence a scan engine would for each point and prints the
// currents of the four inputs.
//
//   RUST_LOG=debug cargo run --example acquire -- --address 10.0.0.42:5025 --cycles 3 --show range

use albaem_rs::{ChannelSetting, ControllerConfig, EmController, LogicalState, Outcome, TriggerMode};
use clap::Parser;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(about = "Acquire currents from an AlbaEM# electrometer")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device address, overrides the configuration
    #[arg(short, long)]
    address: Option<String>,

    /// Integration time in seconds
    #[arg(short, long, default_value_t = 0.1)]
    integration_time: f64,

    /// Number of acquisitions
    #[arg(short = 'n', long, default_value_t = 1)]
    cycles: u32,

    /// Trigger mode (software, hardware)
    #[arg(short, long)]
    trigger: Option<TriggerMode>,

    /// Print a front-end setting of every input (range, filter, inversion)
    #[arg(short, long)]
    show: Vec<ChannelSetting>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config = ControllerConfig::load(args.config.as_deref())?;
    if let Some(address) = args.address {
        config.device_address = address;
    }

    println!("AlbaEM# acquisition");
    println!("===================\n");

    let mut controller = EmController::connect(config)?;
    if !controller.is_connected() {
        if let Some(fault) = controller.last_fault() {
            println!("Not connected: {}", fault);
        }
        return Ok(());
    }

    for axis in 1..=EmController::MAX_DEVICE {
        controller.add_channel(axis)?;
    }
    report(controller.load_one(1, args.integration_time)?);
    if let Some(mode) = args.trigger {
        report(controller.set_trigger_mode(mode)?);
    }
    for setting in args.show {
        for axis in 2..=EmController::MAX_DEVICE {
            if let Outcome::Done(value) = controller.channel_setting(axis, setting)? {
                println!("channel {} {}: {}", axis, setting, value);
            }
        }
    }

    for cycle in 1..=args.cycles {
        report(controller.pre_start_all()?);
        for axis in 1..=EmController::MAX_DEVICE {
            controller.pre_start_one(axis)?;
        }
        report(controller.start_all()?);

        let begin = Instant::now();
        loop {
            match controller.state_all()? {
                Outcome::Done(LogicalState::Acquiring) => {
                    thread::sleep(Duration::from_millis(10));
                }
                Outcome::Done(_) => break,
                Outcome::Reported(diagnostic) => {
                    println!("   {}", diagnostic);
                    break;
                }
            }
        }

        report(controller.read_all()?);
        println!("{}. acquired in {:?}", cycle, begin.elapsed());
        println!("   timer: {} s", controller.read_one(1)?);
        for axis in 2..=EmController::MAX_DEVICE {
            println!("   channel {}: {:e} A", axis, controller.read_one(axis)?);
        }
    }

    report(controller.abort_all()?);
    println!("\n{} fault(s) reported", controller.fault_count());
    Ok(())
}

fn report<T>(outcome: Outcome<T>) {
    if let Outcome::Reported(diagnostic) = outcome {
        println!("   {}", diagnostic);
    }
}
