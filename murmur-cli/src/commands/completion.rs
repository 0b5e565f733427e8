//! Module for generating shell completion scripts for the CLI.

use clap::CommandFactory;
use clap_complete::{generate, shells::Shell};
use std::io::Write;

/// Generates shell completion scripts for the CLI.
///
/// # Arguments
/// * `shell` - The [`Shell`] type for which to generate the completion script.
/// * `out` - Where the script is written, usually stdout.
pub fn generate_completion(shell: Shell, out: &mut dyn Write) {
    let mut app = crate::Cli::command();
    generate(shell, &mut app, "murmur", out);
}
