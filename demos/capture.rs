use std::env;
use std::process;
use std::time::Instant;

use v4l_capture::{Config, Session, Transport};

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // usage: capture [device] [read|mmap|userptr] [count]
    let mut args = env::args().skip(1);
    let mut config = Config::default();
    if let Some(path) = args.next() {
        config = config.device(path);
    }
    if let Some(transport) = args.next() {
        match transport.parse::<Transport>() {
            Ok(transport) => config = config.transport(transport),
            Err(e) => {
                eprintln!("{}", e);
                process::exit(2);
            }
        }
    }
    let count = args.next().and_then(|c| c.parse().ok()).unwrap_or(70);

    if let Err(e) = run(&config, count) {
        eprintln!("{}", e);
        process::exit(1);
    }
}

fn run(config: &Config, count: usize) -> v4l_capture::Result<()> {
    println!("Using device: {}\n", config.path.display());

    let mut session = Session::from_config(config)?;
    print!("{}", session.capabilities());
    if let Some(format) = session.format() {
        println!("Negotiated format:\n{}", format);
    }

    let start = Instant::now();
    let mut bytes = 0usize;
    session
        .start(config.buffers)?
        .capture(count, Some(config.timeout), |frame| {
            let meta = frame.metadata();
            println!("Buffer");
            println!("  index     : {}", frame.index());
            println!("  sequence  : {}", meta.sequence);
            println!("  timestamp : {}", meta.timestamp);
            println!("  flags     : {}", meta.flags);
            println!("  length    : {}", frame.len());
            bytes += frame.len();
        })?;
    let elapsed = start.elapsed().as_secs_f64();
    session.stop()?;

    println!();
    println!("FPS: {}", count as f64 / elapsed);
    println!("MB/s: {}", bytes as f64 / 1_048_576.0 / elapsed);
    Ok(())
}
