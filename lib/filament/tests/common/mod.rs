use std::thread;
use std::time::{Duration, Instant};

pub const DEADLINE: Duration = Duration::from_secs(10);

/// Spins until the condition holds or the deadline passes. Returns whether
/// the condition was observed.
pub fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let start = Instant::now();

    while start.elapsed() < DEADLINE {
        if condition() {
            return true;
        }

        thread::sleep(Duration::from_millis(1));
    }

    condition()
}

/// Loopback settings pointing at the given ephemeral port.
pub fn loopback(port: u16, threads: usize) -> filament::Settings {
    let mut settings = filament::Settings::default();
    settings.address = "127.0.0.1".to_string();
    settings.port = port;
    settings.threads = threads;
    settings
}
