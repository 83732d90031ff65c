use std::io::{self, Write};
use std::panic;

use log::error;

/// Debug builds get better-panic backtraces, release builds a human-panic
/// report. Either way the panic is logged before the process exits.
pub fn initialize_panic_handler() {
    if cfg!(debug_assertions) {
        better_panic::install();
    } else {
        human_panic::setup_panic!();
    }

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        error!("panic: {panic_info}");
        flush_output();

        default_hook(panic_info);

        std::process::exit(1);
    }));
}

/// Flush anything a subcommand already printed so the panic report is not
/// interleaved with partial output.
pub fn flush_output() {
    let _ = io::stdout().flush();
    let _ = writeln!(io::stderr());
}
