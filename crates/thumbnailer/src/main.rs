//! Thumbnailer.
//!
//! Thumbnailer is a standalone web service that serves video thumbnails. Thumbnails are
//! downloaded from the origin once and then answered from a local sqlite cache for as long as
//! they are fresh.

#![warn(missing_debug_implementations, clippy::all)]

mod cli;
mod endpoints;
mod healthcheck;
mod logging;
mod server;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
