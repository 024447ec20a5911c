//! Console output for lifecycle events.

use devvm_host::{HostEvent, Reporter};
use tracing::debug;

/// Prints lifecycle events for a person at a terminal.
///
/// Progress goes to stdout, warnings to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn report(&self, event: &HostEvent) {
        debug!(event = ?event, "Host event");
        if event.is_warning() {
            eprintln!("{} {}", event.style(), event);
        } else {
            println!("{} {}", event.style(), event);
        }
    }
}
