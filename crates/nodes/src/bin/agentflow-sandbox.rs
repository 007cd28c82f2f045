//! `agentflow-sandbox`: runs one transform script per process, JSON over stdio.

use std::process::ExitCode;

fn main() -> ExitCode {
    match nodes::sandbox::worker::serve_stdio() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("agentflow-sandbox: {e}");
            ExitCode::FAILURE
        }
    }
}
