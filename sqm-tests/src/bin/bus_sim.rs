use sqm_tests::{ConstantAdc, Reply, SimBus, SimSlave};
use sqmp_sensor::analog::KValueCalibration;
use sqmp_sensor::station::AnalogProbes;
use sqmp_sensor::Station;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    log::info!("Initializing simulated RS485 segment");

    // combo sensor strapped to 0x10: answers the probe, reports "no data"
    // once, then one good value before going quiet
    let bus = SimBus::new().with_slave(
        SimSlave::new(0x10, Reply::Register(0))
            .then(Reply::Register(0))
            .then(Reply::Register(680))
            .then(Reply::Silent),
    );

    let probes = AnalogProbes {
        ph: ConstantAdc(512),
        ec: ConstantAdc(336),
        soil: ConstantAdc(285),
    };
    let mut station = Station::new(
        probes,
        KValueCalibration::default(),
        bus.transport(),
        bus.delay(),
    );

    if station.discover().is_err() {
        log::warn!("Continuing with slave ID {}", station.bus().address());
    }

    for cycle in 0..3 {
        let report = station.sample_cycle();
        println!("{}", serde_json::to_string(&report)?);
        log::info!(
            "Cycle {cycle} done at {} ms, {} frames sent",
            bus.elapsed_ms(),
            bus.requests().len()
        );
    }

    if bus.is_transmitting() || bus.unguarded_writes() > 0 {
        log::error!("Transceiver direction was mishandled");
        return Err("direction check failed".into());
    }

    Ok(())
}
