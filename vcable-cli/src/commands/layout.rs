// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `vcable layout` command - Show region geometry and ring placement.
//!
//! Builds the session in-process against the loopback host, prints where
//! everything landed, then tears it down again.

use std::sync::Arc;

use vcable_core::{ConfigLoader, DriverRegistry, LoopbackHost};

use crate::provision::provision;

pub async fn execute(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load_file(config_path)?;
    let registry = DriverRegistry::new_shared(Arc::new(LoopbackHost::new()));
    let provisioned = provision(&registry, &config).await?;
    let region = &provisioned.region;

    println!("Region:");
    println!(
        "  Name:            {}",
        region.region_name.as_deref().unwrap_or("(anonymous)")
    );
    println!("  Size:            {} bytes", region.actual_size);
    println!("  Register Area:   offset {}", region.register_area_offset);
    println!(
        "  Cell Area:       offset {} ({} cells)",
        region.cell_area_offset, region.cell_count
    );
    println!();
    println!("Rings:");
    for endpoint in &provisioned.endpoints {
        println!(
            "  {:<4} {:<17} offset {:<10} size {:<10} cells {}..{}",
            endpoint.index.to_string(),
            endpoint.config.name.as_str(),
            endpoint.ring.offset,
            endpoint.ring.size,
            endpoint.ring.first_cell,
            endpoint.ring.first_cell + endpoint.ring.cell_count
        );
    }

    let stats = provisioned.session.stats();
    println!();
    println!("Cells used: {}/{}", stats.cells_used, stats.cells_total);

    registry.disconnect(provisioned.session.id())?;
    Ok(())
}
