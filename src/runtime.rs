// 200 Hz cooperative loop around the Rig
// Commands come in over zenoh, state snapshots and lifecycle events go out

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::interval;
use tracing::{info, warn};

use crate::config::{
    LOOP_HZ, SERVO_PORT, STATE_INTERVAL, TOPIC_CMD, TOPIC_EVENTS, TOPIC_REPLY, TOPIC_STATE,
};
use crate::messages::Command;
use crate::rig::Rig;
use crate::sequence::DirSource;
use crate::servo::{FeetechDriver, ServoDriver, SimDriver};
use crate::store::JsonFileStore;

#[derive(Debug, Clone, Parser)]
#[command(name = "animeyes-runtime", about = "Animatronic eye rig runtime")]
pub struct RunOptions {
    /// Serial port of the Feetech servo bus
    #[arg(long, default_value = SERVO_PORT)]
    pub port: String,

    /// Record servo writes instead of driving hardware
    #[arg(long)]
    pub simulate: bool,

    /// Root holding modes/ and impulses/
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Settings file, defaults to <data-dir>/settings.json
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Fixed RNG seed for reproducible behavior
    #[arg(long)]
    pub seed: Option<u64>,
}

fn open_driver(opts: &RunOptions) -> Box<dyn ServoDriver> {
    if opts.simulate {
        info!("Simulating servos");
        return Box::new(SimDriver::new());
    }
    match FeetechDriver::open(&opts.port) {
        Ok(driver) => {
            info!("Servo bus open on {}", opts.port);
            Box::new(driver)
        }
        Err(e) => {
            warn!("Failed to open {}: {}, simulating servos", opts.port, e);
            Box::new(SimDriver::new())
        }
    }
}

/// Assemble the rig from command-line options
pub fn build_rig(opts: &RunOptions) -> Rig {
    let settings_path = opts
        .settings
        .clone()
        .unwrap_or_else(|| opts.data_dir.join("settings.json"));
    let rng = match opts.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    Rig::new(
        open_driver(opts),
        Box::new(JsonFileStore::open(settings_path)),
        Box::new(DirSource::new(&opts.data_dir)),
        rng,
    )
}

pub async fn run(opts: RunOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut rig = build_rig(&opts);
    rig.boot(Instant::now());

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD).await?;
    let pub_state = session.declare_publisher(TOPIC_STATE).await?;
    let pub_events = session.declare_publisher(TOPIC_EVENTS).await?;
    let pub_reply = session.declare_publisher(TOPIC_REPLY).await?;

    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let mut last_state: Option<Instant> = None;

    info!(
        "Runtime started: {}Hz loop, state every {}ms",
        LOOP_HZ,
        STATE_INTERVAL.as_millis()
    );
    info!("Subscribed to: {}", TOPIC_CMD);
    info!(
        "Publishing to: {}, {}, {}",
        TOPIC_STATE, TOPIC_EVENTS, TOPIC_REPLY
    );

    loop {
        tick.tick().await;
        let now = Instant::now();

        // 1. Apply every pending command in arrival order
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<Command>(&payload) {
                Ok(cmd) => {
                    if let Some(reply) = rig.apply(cmd, now) {
                        pub_reply.put(serde_json::to_string(&reply)?).await?;
                    }
                }
                Err(e) => {
                    warn!("Failed to parse command: {}", e);
                }
            }
        }

        // 2. Advance every component
        rig.tick(now);

        // 3. Lifecycle events
        for event in rig.drain_events() {
            pub_events.put(serde_json::to_string(&event)?).await?;
        }

        // 4. Throttled state snapshot
        if last_state.is_none_or(|t| now.duration_since(t) >= STATE_INTERVAL) {
            pub_state.put(serde_json::to_string(&rig.snapshot())?).await?;
            last_state = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = RunOptions::parse_from(["animeyes-runtime"]);
        assert_eq!(opts.port, SERVO_PORT);
        assert!(!opts.simulate);
        assert_eq!(opts.data_dir, PathBuf::from("data"));
        assert!(opts.settings.is_none());
        assert!(opts.seed.is_none());
    }

    #[test]
    fn test_simulated_rig_boots() {
        let dir = tempfile::tempdir().unwrap();
        let opts = RunOptions::parse_from([
            "animeyes-runtime",
            "--simulate",
            "--seed",
            "3",
            "--data-dir",
            dir.path().to_str().unwrap(),
        ]);
        let mut rig = build_rig(&opts);
        rig.boot(Instant::now());
        assert_eq!(rig.modes().mode().name(), "follow");
    }
}
