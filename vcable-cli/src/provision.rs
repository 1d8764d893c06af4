// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Bring a session up from a validated configuration.

use std::sync::Arc;

use vcable_core::{
    CableError, CableResult, Config, DriverRegistry, EndpointConfig, EndpointIndex, RegionInfo,
    RingInfo, Session, SessionOptions, SignalHandle,
};

/// One configured endpoint after creation.
pub struct ProvisionedEndpoint {
    pub config: EndpointConfig,
    pub index: EndpointIndex,
    pub ring: RingInfo,
    /// The client's end of the notification handle, if one was attached.
    pub signal: Option<SignalHandle>,
}

pub struct Provisioned {
    pub session: Arc<Session>,
    pub region: RegionInfo,
    pub endpoints: Vec<ProvisionedEndpoint>,
}

/// Connect, apply the layout, create every endpoint and size its ring.
///
/// Endpoints with a notification count get a fresh signal handle attached.
pub async fn provision(registry: &DriverRegistry, config: &Config) -> CableResult<Provisioned> {
    let session = registry.connect(SessionOptions {
        region_name: config.engine.region_name.clone(),
    });
    let region = session.apply_layout(config.layout)?;

    let mut endpoints = Vec::with_capacity(config.endpoints.len());
    for endpoint in &config.endpoints {
        let index = session
            .create_endpoint(
                endpoint.direction,
                endpoint.channels.value(),
                endpoint.name.as_str(),
            )?
            .confirmed()
            .await?;
        session.set_notification_count(index, endpoint.notification_count.raw())?;
        let ring = session.allocate_ring(index, endpoint.ring_size)?;

        let signal = if endpoint.notification_count.raw() > 0 {
            let handle = SignalHandle::new().map_err(|source| CableError::Io {
                context: "creating notification handle",
                source,
            })?;
            session.attach_notification(index, &handle)?;
            Some(handle)
        } else {
            None
        };

        tracing::debug!(
            endpoint = %index,
            name = %endpoint.name,
            offset = ring.offset,
            size = ring.size,
            "Endpoint provisioned"
        );
        endpoints.push(ProvisionedEndpoint {
            config: endpoint.clone(),
            index,
            ring,
            signal,
        });
    }

    Ok(Provisioned {
        session,
        region,
        endpoints,
    })
}
