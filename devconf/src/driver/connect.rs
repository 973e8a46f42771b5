//! Opening a device session from a driver.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use super::engine::EngineClient;
use crate::device::DeviceId;
use crate::error::{Error, Result};
use crate::transport::{ClientTransport, get_transport};

/// Metadata key naming the transport (`telnet`, `ssh`, `ftp`, `serial`).
pub const TRANSPORT_META_KEY: &str = "transport";

/// Metadata key holding the transport-specific device location.
pub const LOCATION_META_KEY: &str = "location";

/// Dial device `id` with the transport and location recorded in its
/// metadata. The transport gets the engine as its credential source and
/// `timeout` as its dial timeout.
///
/// Every failure is reported as [`Error::DeviceConnection`].
pub async fn connect_to_device(
    engine: &EngineClient,
    id: DeviceId,
    caller: &str,
    timeout: Duration,
) -> Result<Box<dyn ClientTransport>> {
    let wrap = |source: Error| Error::DeviceConnection {
        device: id,
        source: Box::new(source),
    };

    let kind = engine.get_meta(id, TRANSPORT_META_KEY).await.map_err(wrap)?;
    let location = engine.get_meta(id, LOCATION_META_KEY).await.map_err(wrap)?;
    debug!("{caller}: device {id} via {kind} at {location}");

    let mut transport = get_transport(&kind, caller).map_err(wrap)?;
    transport.set_credential_fn(Arc::new(engine.clone()));
    transport.set_timeout(timeout);
    transport.dial(id, &location).await.map_err(wrap)?;

    info!("{caller}: connected to device {id} over {}", transport.name());
    Ok(transport)
}
