//! Shell completion generation.

use std::io::Write;

use clap::{CommandFactory, ValueEnum};
use clap_complete::{generate, Shell};

/// Supported shells for completion generation.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

impl From<CompletionShell> for Shell {
    fn from(shell: CompletionShell) -> Self {
        match shell {
            CompletionShell::Bash => Shell::Bash,
            CompletionShell::Zsh => Shell::Zsh,
            CompletionShell::Fish => Shell::Fish,
            CompletionShell::PowerShell => Shell::PowerShell,
            CompletionShell::Elvish => Shell::Elvish,
        }
    }
}

/// Write the completion script for `C` to `out`.
pub fn generate_completions<C: CommandFactory>(
    shell: CompletionShell,
    bin_name: &str,
    out: &mut dyn Write,
) {
    let mut cmd = C::command();
    let shell_type: Shell = shell.into();
    generate(shell_type, &mut cmd, bin_name, out);
}
