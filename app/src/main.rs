fn main() {
    if let Err(err) = chatter::run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}
