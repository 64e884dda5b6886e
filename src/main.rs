fn main() {
    if let Err(e) = ml_datasets::run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
