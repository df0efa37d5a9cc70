use std::process;

fn main() {
    if let Err(err) = payload_guest::run() {
        eprintln!("payload_guest fatal error: {err}");
        process::exit(1);
    }
}
