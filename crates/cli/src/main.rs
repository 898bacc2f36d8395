use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use clap::Parser;
use stream_engine::{Engine, ListenerConfig, Session, SessionHandler, SessionState};

#[derive(Parser)]
#[command(
    name = "stream-engine-echo",
    about = "Standalone line-echo server demonstrating the session engine"
)]
struct Args {
    /// Bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:7000")]
    bind: String,

    /// Maximum concurrent sessions.
    #[arg(long, default_value_t = 10)]
    allowed_sessions: u32,

    /// Per-session input cap, in bytes.
    #[arg(long, default_value_t = 65536)]
    max_input_buffer: usize,
}

/// Echoes every byte received straight back to the peer.
struct EchoHandler;

impl SessionHandler for EchoHandler {
    fn init(&self, session: &mut Session) -> stream_engine::Result<()> {
        tracing::info!(peer = %session.peer_addr(), "session opened");
        Ok(())
    }

    fn receive_data(&self, session: &mut Session) -> SessionState {
        let data = session.input().as_slice().to_vec();
        session.output_mut().extend(&data);
        session.input_mut().clear();
        SessionState::Active
    }

    fn cleanup(&self, session: &Session) {
        tracing::info!(peer = %session.peer_addr(), "session closed");
    }
}

fn main() -> io::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let addr = args
        .bind
        .parse()
        .unwrap_or_else(|_| panic!("invalid bind address: {}", args.bind));

    let config = ListenerConfig::default()
        .with_allowed_sessions(args.allowed_sessions)
        .with_max_input_buffer(args.max_input_buffer);

    let mut engine = Engine::init().expect("engine init");
    engine
        .add_listener(addr, config, Arc::new(EchoHandler))
        .expect("failed to bind listener");

    tracing::info!(bind = %args.bind, "stream-engine-echo listening");

    let running = Arc::new(AtomicBool::new(true));
    let loop_running = running.clone();
    let handle = thread::spawn(move || {
        while loop_running.load(Ordering::SeqCst) {
            if let Err(e) = engine.turn(Some(Duration::from_millis(200))) {
                tracing::warn!(error = %e, "engine turn failed");
            }
        }
    });

    println!(
        "stream-engine-echo listening on {} — press Enter to stop",
        args.bind
    );
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    running.store(false, Ordering::SeqCst);
    handle.join().expect("engine loop thread panicked");
    Ok(())
}
