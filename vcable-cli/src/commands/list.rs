// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `vcable list` command - List endpoints from configuration.

use vcable_core::ConfigLoader;

pub async fn execute(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load_file(config_path)?;
    let layout = &config.layout;

    println!("╔══════════════════════════════════════════════════════════════════════════════╗");
    println!("║                           CONFIGURED ENDPOINTS                               ║");
    println!("╠═══════════════════╦════════════╦══════════╦═══════════════╦══════════════════╣");
    println!("║ Name              ║ Direction  ║ Channels ║ Ring (bytes)  ║ Samples / tick   ║");
    println!("╠═══════════════════╬════════════╬══════════╬═══════════════╬══════════════════╣");

    for endpoint in &config.endpoints {
        let ring = layout.ring_size(endpoint.ring_size, endpoint.channels)?;
        println!(
            "║ {:<17} ║ {:<10} ║ {:<8} ║ {:<13} ║ {:<16} ║",
            endpoint.name.as_str(),
            endpoint.direction.name(),
            endpoint.channels.value(),
            ring,
            layout.samples_per_tick(endpoint.channels)
        );
    }

    println!("╚═══════════════════╩════════════╩══════════╩═══════════════╩══════════════════╝");
    println!();
    println!("Total: {} endpoint(s)", config.endpoints.len());

    Ok(())
}
