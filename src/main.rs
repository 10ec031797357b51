//! OCPP charge point agent.
//!
//! A thin host around the library: reads a TOML settings file, opens the
//! WebSocket to the Central System and drives a simulated single-connector
//! EVSE so the charge point can be exercised end to end against a real
//! backend.

use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};

use ocpp_chargepoint::{
    BootCredentials, ChargePoint, ChargePointOptions, FilesystemOpt, Reason, StdFilesystem,
};
use ocpp_chargepoint::transport::WsTransport;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct AgentConfig {
    backend_url: String,
    charge_box_id: String,
    connectors: usize,
    vendor: String,
    model: String,
    firmware_version: String,
    data_dir: Option<PathBuf>,
    voltage: f64,
    ping_interval_s: u64,
    /// Id tag the simulated driver presents.
    sim_id_tag: String,
    /// Seconds until the simulated vehicle plugs in; 0 disables the
    /// simulation.
    sim_plug_after_s: u64,
    /// Simulated session length.
    sim_charge_for_s: u64,
    log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            backend_url: "ws://127.0.0.1:8180/steve/websocket/CentralSystemService".into(),
            charge_box_id: "CP001".into(),
            connectors: 1,
            vendor: "OcppChargepoint".into(),
            model: "Agent".into(),
            firmware_version: env!("CARGO_PKG_VERSION").into(),
            data_dir: None,
            voltage: 230.0,
            ping_interval_s: 5,
            sim_id_tag: "A0000000".into(),
            sim_plug_after_s: 10,
            sim_charge_for_s: 120,
            log_level: "info".into(),
        }
    }
}

fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ocpp-agent")
        .join("config.toml")
}

fn load_config() -> AgentConfig {
    let path = std::env::var("OCPP_AGENT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_config_path());
    match std::fs::read_to_string(&path) {
        Ok(raw) => match toml::from_str(&raw) {
            Ok(cfg) => {
                info!("configuration loaded from {}", path.display());
                cfg
            }
            Err(e) => {
                error!("invalid config {}: {e}. Using defaults.", path.display());
                AgentConfig::default()
            }
        },
        Err(_) => {
            info!("no config at {}, using defaults", path.display());
            AgentConfig::default()
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = load_config();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_level)),
        )
        .init();

    info!(charge_box_id = %cfg.charge_box_id, backend = %cfg.backend_url, "starting agent");

    let data_dir = cfg.data_dir.clone().unwrap_or_else(|| {
        dirs_next::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ocpp-agent")
            .join(&cfg.charge_box_id)
    });
    let fs = Arc::new(StdFilesystem::mount(
        FilesystemOpt::new(data_dir).format_on_fail(true),
    )?);

    let url = format!(
        "{}/{}",
        cfg.backend_url.trim_end_matches('/'),
        cfg.charge_box_id
    );
    let transport = WsTransport::spawn(url, Duration::from_secs(cfg.ping_interval_s.max(1)));

    let credentials = BootCredentials {
        charge_point_vendor: cfg.vendor.clone(),
        charge_point_model: cfg.model.clone(),
        firmware_version: Some(cfg.firmware_version.clone()),
        charge_point_serial_number: Some(cfg.charge_box_id.clone()),
        ..Default::default()
    };

    let mut cp = ChargePoint::new(
        ChargePointOptions::new(Box::new(transport), credentials)
            .with_filesystem(fs)
            .with_connectors(cfg.connectors)
            .with_voltage(cfg.voltage),
    );

    // ── Simulated EVSE wiring ──────────────────────────────
    // A vehicle that plugs in after a while, draws power against the
    // published limit, and leaves again.
    let plugged = Rc::new(Cell::new(false));
    let energy_wh = Rc::new(Cell::new(0i32));
    let limit_a = Rc::new(Cell::new(32.0f64));

    {
        let plugged = plugged.clone();
        cp.set_connector_plugged_input(1, Box::new(move || plugged.get()));
    }
    {
        let energy_wh = energy_wh.clone();
        cp.set_energy_meter_input(1, Box::new(move || energy_wh.get()));
    }
    {
        let limit_a = limit_a.clone();
        let voltage = cfg.voltage;
        cp.set_power_meter_input(
            1,
            Box::new(move || (limit_a.get() * voltage) as f32),
        );
    }
    {
        let limit_a = limit_a.clone();
        cp.set_smart_charging_output(
            1,
            Box::new(move |rate| {
                let amps = rate.current_a.unwrap_or(32.0);
                info!(limit_a = amps, power_w = ?rate.power_w, "charging limit changed");
                limit_a.set(amps);
            }),
        );
    }
    cp.set_tx_notification_output(Box::new(|connector_id, event| {
        info!(connector_id, ?event, "session event");
    }));
    cp.set_on_reset_execute(Box::new(|hard| {
        info!(hard, "reset requested by central system, exiting");
        std::process::exit(0);
    }));

    // ── Main loop ──────────────────────────────────────────
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let started = std::time::Instant::now();
    let mut session_opened = false;

    loop {
        ticker.tick().await;

        // Drive the simulated vehicle.
        if cfg.sim_plug_after_s > 0 {
            let elapsed = started.elapsed().as_secs();
            if !session_opened && elapsed >= cfg.sim_plug_after_s {
                session_opened = true;
                info!(id_tag = %cfg.sim_id_tag, "simulated vehicle arrives");
                cp.begin_transaction(1, &cfg.sim_id_tag);
                plugged.set(true);
            }
            if session_opened && elapsed >= cfg.sim_plug_after_s + cfg.sim_charge_for_s {
                if cp.is_transaction_running(1) {
                    info!("simulated vehicle leaves");
                    cp.end_transaction(1, Reason::Local, None);
                    plugged.set(false);
                }
            }
            if cp.is_transaction_running(1) && cp.ocpp_permits_charge(1) {
                // Integrate the simulated meter: limit amps at nominal
                // voltage over one tick.
                let delta_wh = limit_a.get() * cfg.voltage * 0.1 / 3600.0;
                energy_wh.set(energy_wh.get() + delta_wh.ceil() as i32);
            }
        }

        cp.step();
    }
}
