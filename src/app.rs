//! Wiring of the camera, session, sink and dispatcher from settings.

use std::sync::Arc;

use crate::camera::Camera;
use crate::config::Settings;
use crate::driver::{CcdDriver, SimulatedCcd};
use crate::error::AppResult;
use crate::protocol::Dispatcher;
use crate::server::Server;
use crate::session::ExposureSession;
use crate::sink::{FitsSink, FrameSink};

/// Build a dispatcher around `driver`, writing FITS files under the configured data directory.
pub fn dispatcher_with(settings: &Settings, driver: Box<dyn CcdDriver>) -> Dispatcher {
    let camera = Arc::new(Camera::new(driver, settings.camera.clone()));
    let sink: Arc<dyn FrameSink> = Arc::new(FitsSink::new(
        settings.storage.data_dir.clone(),
        settings.fits.clone(),
    ));
    Dispatcher::new(Arc::new(ExposureSession::new(camera, sink)))
}

/// Build a dispatcher driving the simulated detector.
pub fn simulated_dispatcher(settings: &Settings) -> Dispatcher {
    tracing::info!(
        width = settings.simulator.width,
        height = settings.simulator.height,
        time_scale = settings.simulator.time_scale,
        "using simulated CCD"
    );
    dispatcher_with(settings, Box::new(SimulatedCcd::new(settings.simulator.clone())))
}

/// Bind and serve until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the address is invalid or cannot be bound.
pub async fn serve(settings: Settings) -> AppResult<()> {
    let addr = settings.bind_addr()?;
    let dispatcher = simulated_dispatcher(&settings);
    tracing::info!(
        name = %settings.application.name,
        data_dir = %settings.storage.data_dir.display(),
        "starting"
    );
    Server::bind(addr, dispatcher).await?.run().await
}
