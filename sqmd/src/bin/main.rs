use std::time::Duration;

use sqmd::{config, open_station, ReportLine, StationError};

fn main() -> Result<(), StationError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Initializing soil monitor station");

    let mut station = match open_station() {
        Ok(station) => station,
        Err(e) => {
            log::error!("Error opening station hardware {e:}");
            return Err(e);
        }
    };

    log::info!("=== Testing combo sensor communication ===");
    if station.discover().is_err() {
        log::warn!("Continuing with slave ID {}", station.bus().address());
    }

    let interval = Duration::from_secs(config::cycle_interval_s());

    loop {
        let report = station.sample_cycle();
        match ReportLine::now(&report).to_json() {
            Ok(line) => println!("{line}"),
            Err(e) => log::error!("Error serializing report {e:}"),
        }
        std::thread::sleep(interval);
    }
}
