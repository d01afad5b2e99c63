//! Shell completion scripts for bash, zsh, fish, elvish and powershell

use clap::CommandFactory;
use clap_complete::Shell;

use super::Cli;
use crate::exit_code::ExitCode;

/// Arguments for the completions command
#[derive(clap::Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

fn render(shell: Shell, out: &mut dyn std::io::Write) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, out);
}

/// Print the completion script to stdout
pub fn execute(args: CompletionsArgs) -> ExitCode {
    render(args.shell, &mut std::io::stdout());
    ExitCode::Success
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(shell: Shell) -> String {
        let mut buf = Vec::new();
        render(shell, &mut buf);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_scripts_name_the_binary() {
        let bash = script(Shell::Bash);
        assert!(bash.contains("_stow"));
        assert!(bash.contains("complete"));

        assert!(script(Shell::Zsh).contains("#compdef stow"));
    }

    #[test]
    fn test_scripts_cover_subcommands() {
        let fish = script(Shell::Fish);
        for sub in ["cp", "legal-hold", "versioning", "share"] {
            assert!(fish.contains(sub), "missing {sub}");
        }
        assert!(script(Shell::PowerShell).contains("Register-ArgumentCompleter"));
    }
}
