use std::process::ExitCode;

use mirdex::cli::run;

fn main() -> ExitCode {
    run()
}
