fn main() {
    if let Err(err) = dataset_managed::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
