// Keyboard gaze teleop: WASD look, R/F focus depth, B blink, N/M wink, C center, Q quit
use animeyes_runtime::config::TOPIC_CMD;
use animeyes_runtime::eye::BlinkEye;
use animeyes_runtime::messages::Command;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::Duration;
use tracing::info;

const STEP: f32 = 10.0; // logical units per key press
const DEPTH_STEP: f32 = 20.0;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD).await?;

    info!("Controls: WASD=look, R/F=depth, B=blink, N/M=wink, C=center, Q=quit");

    // Manual gaze only makes sense in follow mode
    let follow = Command::SetMode {
        mode: "follow".to_string(),
    };
    publisher.put(serde_json::to_string(&follow)?).await?;

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (mut x, mut y, mut z) = (0.0f32, 0.0f32, 100.0f32);

    loop {
        if !event::poll(Duration::from_millis(20))? {
            continue;
        }
        let Event::Key(KeyEvent { code, kind, .. }) = event::read()? else {
            continue;
        };
        if kind != KeyEventKind::Press && kind != KeyEventKind::Repeat {
            continue;
        }

        let cmd = match code {
            KeyCode::Char('w') => {
                y = (y + STEP).min(100.0);
                None
            }
            KeyCode::Char('s') => {
                y = (y - STEP).max(-100.0);
                None
            }
            KeyCode::Char('a') => {
                x = (x - STEP).max(-100.0);
                None
            }
            KeyCode::Char('d') => {
                x = (x + STEP).min(100.0);
                None
            }
            KeyCode::Char('r') => {
                z = (z + DEPTH_STEP).min(100.0);
                None
            }
            KeyCode::Char('f') => {
                z = (z - DEPTH_STEP).max(-100.0);
                None
            }
            KeyCode::Char('c') => {
                (x, y, z) = (0.0, 0.0, 100.0);
                None
            }
            KeyCode::Char('b') => Some(Command::Blink {
                eye: BlinkEye::Both,
                duration: 0,
            }),
            KeyCode::Char('n') => Some(Command::Blink {
                eye: BlinkEye::Left,
                duration: 0,
            }),
            KeyCode::Char('m') => Some(Command::Blink {
                eye: BlinkEye::Right,
                duration: 0,
            }),
            KeyCode::Char('q') | KeyCode::Esc => break,
            _ => continue,
        };

        let cmd = cmd.unwrap_or(Command::SetGaze { x, y, z });
        publisher.put(serde_json::to_string(&cmd)?).await?;
    }

    Ok(())
}
