fn main() {
    if let Err(err) = pg_upserter::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
