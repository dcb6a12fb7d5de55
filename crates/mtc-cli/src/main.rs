use std::process::ExitCode;
use std::sync::{Arc, PoisonError, RwLock};

use mtc_core::config::AgentConfig;
use mtc_core::device::{Device, DeviceSummary};
use mtc_core::engine::ExecutionEngine;
use mtc_core::logging;
use mtc_core::models::{
    ASSET_CHANGED, ASSET_REMOVED, AVAILABILITY, CoreError, CoreErrorKind, DataItem,
};

type Registry = Arc<RwLock<Vec<Device>>>;

fn main() -> ExitCode {
    logging::init("info");

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: mtc-agent <config.json>");
        return ExitCode::from(2);
    };

    match run(&path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(kind = ?error.kind, device = ?error.device, message = %error.message, "agent failed");
            ExitCode::FAILURE
        }
    }
}

fn run(path: &str) -> Result<(), CoreError> {
    let config = AgentConfig::from_path(path)?;
    let devices: Vec<Device> = config
        .devices
        .iter()
        .map(|device_config| {
            let mut device = Device::from_config(device_config, &config.options);
            device.initialize();
            device
        })
        .collect();
    tracing::info!(devices = devices.len(), "device registry initialized");

    let registry: Registry = Arc::new(RwLock::new(devices));
    let engine = Arc::new(ExecutionEngine::from_options(&config.options));

    let device_count = read(&registry).len();
    for index in 0..device_count {
        let registry = registry.clone();
        engine.post(move || probe(&registry, index));
    }

    {
        let pauser = engine.clone();
        let registry = registry.clone();
        engine.post(move || {
            pauser.pause(move |engine| {
                reconcile_well_known_items(&registry);
                engine.stop();
            });
        });
    }

    engine.start()?;

    let summaries: Vec<DeviceSummary> = read(&registry).iter().map(Device::summary).collect();
    let json = serde_json::to_string_pretty(&summaries).map_err(|error| {
        CoreError::new(
            CoreErrorKind::Internal,
            format!("failed to serialize registry summary: {error}"),
        )
    })?;
    println!("{json}");
    Ok(())
}

fn probe(registry: &Registry, index: usize) {
    let devices = read(registry);
    let Some(device) = devices.get(index) else {
        return;
    };
    tracing::info!(
        device = %device.name(),
        worker = ?mtc_core::current_worker(),
        data_items = device.device_data_items().len(),
        availability = ?device.availability().map(|item| item.id().to_string()),
        "device probed"
    );
}

/// Every device reports availability and asset changes; synthesize the
/// items a configuration left out.
fn reconcile_well_known_items(registry: &Registry) {
    let mut devices = registry.write().unwrap_or_else(PoisonError::into_inner);
    for device in devices.iter_mut() {
        let id = device.id().to_string();
        if device.availability().is_none() {
            device.attach_data_item(DataItem::new(format!("{id}_avail"), AVAILABILITY));
            tracing::info!(device = %device.name(), "added availability data item");
        }
        if device.asset_changed().is_none() {
            device.attach_data_item(DataItem::new(format!("{id}_asset_chg"), ASSET_CHANGED));
        }
        if device.asset_removed().is_none() {
            device.attach_data_item(DataItem::new(format!("{id}_asset_rem"), ASSET_REMOVED));
        }
    }
}

fn read(registry: &Registry) -> std::sync::RwLockReadGuard<'_, Vec<Device>> {
    registry.read().unwrap_or_else(PoisonError::into_inner)
}
