//! List-ports command - show the driver's current port list.
//!
//! The JSON form is also what the router's fresh enumeration parses.

use anyhow::Result;
use midicable_core::engine::CLIENT_NAME;
use midicable_core::MidiDriver;

pub fn run(json: bool) -> Result<()> {
    let driver = MidiDriver::new(format!("{}-list", CLIENT_NAME))?;
    let ports = driver.raw_ports()?;

    if json {
        println!("{}", serde_json::to_string(&ports)?);
        return Ok(());
    }

    if ports.inputs.is_empty() && ports.outputs.is_empty() {
        println!("No MIDI ports found.");
        return Ok(());
    }

    println!("{:<8} NAME", "KIND");
    println!("{}", "-".repeat(40));
    for name in &ports.inputs {
        println!("{:<8} {}", "readable", name);
    }
    for name in &ports.outputs {
        println!("{:<8} {}", "writable", name);
    }

    println!(
        "\nTotal: {} readable, {} writable",
        ports.inputs.len(),
        ports.outputs.len()
    );
    Ok(())
}
