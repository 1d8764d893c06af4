// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `vcable validate` command - Validate configuration file.

use vcable_core::ConfigLoader;

pub async fn execute(file: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file, "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            let layout = &config.layout;
            println!("✓ Configuration is valid");
            println!();
            println!("Buffer Layout:");
            println!("  Buffer Size:     {} bytes ({} cells)", layout.buffer_size, layout.cell_count());
            println!("  Frame Size:      {} bytes", layout.frame_size);
            println!("  Sample Rate:     {}", layout.sample_rate);
            println!("  Sample Depth:    {}", layout.sample_depth);
            println!("  Min Frame Count: {}", layout.min_frame_count);
            println!();
            println!("Engine:");
            println!("  Period:          {}us", config.engine.period.as_micros());
            println!("  Slots:           {}", config.engine.slots);
            println!(
                "  Region:          {}",
                config.engine.region_name.as_deref().unwrap_or("(anonymous)")
            );
            if let Some(cpu) = config.engine.cpu {
                println!("  Tick CPU:        {}", cpu);
            }
            println!();
            println!("Endpoints ({}):", config.endpoints.len());
            for endpoint in &config.endpoints {
                println!(
                    "  - {} ({}, {} ch, ring: {} bytes, notifications: {})",
                    endpoint.name,
                    endpoint.direction,
                    endpoint.channels,
                    layout.ring_size(endpoint.ring_size, endpoint.channels)?,
                    endpoint.notification_count.raw()
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
