fn main() {
    if let Err(err) = vault_probe::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
