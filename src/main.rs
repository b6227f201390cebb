fn main() {
    if let Err(e) = message_consensus::cli::run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
