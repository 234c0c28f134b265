fn main() {
    if let Err(err) = station_monitor::app::run_api() {
        eprintln!("api startup failed: {err}");
        std::process::exit(1);
    }
}
