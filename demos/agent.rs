//! Example Agent (Writer)
//!
//! Stands in for an instrumented program: attaches to the ring buffer the
//! collector created for this process and reports synthetic kernel runs.

use log::{error, info};
use shmtrace::{AgentConfig, AgentSession};
use std::thread;
use std::time::Duration;

const KERNELS: [&str; 4] = ["vec_add", "gemm_128x128", "reduce_sum", "softmax"];

fn main() {
    env_logger::init();

    let count: usize = std::env::args()
        .nth(1)
        .and_then(|n| n.parse().ok())
        .unwrap_or(100);

    let config = match AgentConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Bad agent environment: {}", e);
            std::process::exit(1);
        }
    };

    // The collector creates the ring right after launching us
    let pid = std::process::id();
    let mut session = None;
    for _ in 0..100 {
        match AgentSession::attach(pid, &config) {
            Ok(s) => {
                session = Some(s);
                break;
            }
            Err(e) if e.is_retryable() => thread::sleep(Duration::from_millis(10)),
            Err(e) => {
                error!("Failed to attach: {}", e);
                break;
            }
        }
    }
    let Some(mut session) = session else {
        error!("No ring buffer for process {}, running uninstrumented", pid);
        return;
    };

    for i in 0..count {
        let start = session.now();
        thread::sleep(Duration::from_micros(200 + (i as u64 % 7) * 100));
        let end = session.now();
        session.record_kernel(start, end, KERNELS[i % KERNELS.len()].as_bytes());
    }

    info!(
        "Recorded {} kernels, dropped {}",
        session.recorded(),
        session.dropped()
    );
}
