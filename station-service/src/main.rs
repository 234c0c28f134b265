fn main() {
    if let Err(err) = station_monitor::app::run_service() {
        eprintln!("service startup failed: {err}");
        std::process::exit(1);
    }
}
