//! List capture devices.

use lenscast_capture_engine::list_devices;

pub fn run() -> anyhow::Result<()> {
    let devices = list_devices()?;

    if devices.is_empty() {
        println!("No capture devices found.");
        return Ok(());
    }

    println!("Capture devices:");
    for device in &devices {
        if device.description.is_empty() {
            println!("  {}  {}", device.id, device.name);
        } else {
            println!("  {}  {} ({})", device.id, device.name, device.description);
        }
    }

    Ok(())
}
