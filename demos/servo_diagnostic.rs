// Read-only bus check: ping each eye servo and print its position
use animeyes_runtime::config::{DEFAULT_SERVO_PINS, SERVO_NAMES, SERVO_PORT};
use animeyes_runtime::servo::FeetechBus;
use clap::Parser;
use tracing::{info, warn};

#[derive(Parser)]
struct Args {
    /// Serial port of the servo bus
    #[arg(long, default_value = SERVO_PORT)]
    port: String,
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let mut bus = FeetechBus::open(&args.port)?;
    info!("Scanning {} for eye servos", args.port);

    for (name, id) in SERVO_NAMES.iter().zip(DEFAULT_SERVO_PINS) {
        match bus.ping(id) {
            Ok(true) => match bus.read_angle(id) {
                Ok(angle) => info!("{} (id {}): {} deg", name, id, angle),
                Err(e) => warn!("{} (id {}): read failed: {}", name, id, e),
            },
            Ok(false) => warn!("{} (id {}): no response", name, id),
            Err(e) => warn!("{} (id {}): {}", name, id, e),
        }
    }

    Ok(())
}
