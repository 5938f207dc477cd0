//! Check system capabilities.

use lenscast_capture_engine::{find_ffmpeg, list_devices};
use lenscast_merge_engine::command_exists;

pub fn run() -> anyhow::Result<()> {
    println!("Lenscast System Check");
    println!("{}", "=".repeat(50));

    match find_ffmpeg() {
        Ok(path) => println!("[OK] ffmpeg: {}", path.display()),
        Err(_) => println!("[FAIL] ffmpeg not found (required for capture and merge)"),
    }

    if command_exists("ffprobe") {
        println!("[OK] ffprobe available (accurate merge progress)");
    } else {
        println!("[WARN] ffprobe not found; merge progress will use estimates");
    }

    if command_exists("v4l2-ctl") {
        println!("[OK] v4l2-ctl available (device names)");
    } else {
        println!("[WARN] v4l2-ctl not found; device listing falls back to /dev scan");
    }

    let devices = list_devices().unwrap_or_default();
    if devices.is_empty() {
        println!("[WARN] No capture devices detected");
    } else {
        println!("[OK] Capture devices detected: {}", devices.len());
        for device in &devices {
            println!("     {}  {}", device.id, device.name);
        }
    }

    Ok(())
}
