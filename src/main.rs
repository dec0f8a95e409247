use clap::Parser;
use sandbox_monitor::app::{self, Cli};

fn main() {
    // Whatever happens, the hook must not fail the command it was invoked for
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            if !err.use_stderr() {
                let _ = err.print();
            }
            return;
        }
    };

    if let Err(err) = app::run(cli) {
        log::error!("{err:#}");
    }
}
