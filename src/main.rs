fn main() {
    if let Err(err) = station_monitor::app::run() {
        eprintln!("application startup failed: {err}");
        std::process::exit(1);
    }
}
