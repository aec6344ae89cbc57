/// CLI module - command-line interface for tandem
mod cli;

fn main() {
    cli::run_cli();
}
