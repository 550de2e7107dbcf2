use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match switchyardd::run_dispatcher() {
        Ok(_) => ExitCode::SUCCESS,
        Err(error) => {
            writeln!(io::stderr(), "switchyardd: {error}").ok();
            ExitCode::FAILURE
        }
    }
}
