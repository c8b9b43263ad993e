//! Example Collector (Reader)
//!
//! Launches a program with the agent environment, creates its ring buffer and
//! prints every kernel span the program reports until it exits.
//!
//! ```text
//! cargo run --example collector -- target/debug/examples/agent
//! ```

use log::{error, info};
use rustix::event::{poll, PollFd, PollFlags};
use shmtrace::{Collector, CollectorConfig, Process, SpanRecord};
use std::process::Command;
use std::time::Duration;

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let Some(program) = args.next() else {
        eprintln!("usage: collector <program> [args...]");
        std::process::exit(2);
    };

    let config = CollectorConfig {
        read_interval: Duration::from_millis(50),
        ..CollectorConfig::default()
    };

    let mut child = match Command::new(&program)
        .args(args)
        .envs(config.agent_env())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            error!("Failed to launch {}: {}", program, e);
            std::process::exit(1);
        }
    };

    // The agent retries attaching until this ring exists
    let process = Process::new(child.id());
    let mut collector = match Collector::new(process, &config) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create ring buffer: {}", e);
            let _ = child.kill();
            std::process::exit(1);
        }
    };

    let mut spans: Vec<SpanRecord> = Vec::new();
    loop {
        let ready = {
            let timer = collector.timer_fd();
            let mut fds = [PollFd::new(&timer, PollFlags::IN)];
            poll(&mut fds, 1000).unwrap_or(0)
        };

        if ready > 0 {
            if let Err(e) = collector.on_timer(&mut spans) {
                error!("Drain failed: {}", e);
                break;
            }
            print_spans(&mut spans);
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                info!("{} exited with {}", process, status);
                break;
            }
            Ok(None) => {}
            Err(e) => {
                error!("Failed to wait for {}: {}", process, e);
                break;
            }
        }
    }

    let last = collector.finish(&mut spans);
    print_spans(&mut spans);
    println!("[Collector] Final drain: {} spans", last);
}

fn print_spans(spans: &mut Vec<SpanRecord>) {
    for span in spans.drain(..) {
        println!(
            "[Collector] {} {} {:>24} {:>12} ns",
            span.process,
            span.thread,
            span.name,
            span.duration()
        );
    }
}
