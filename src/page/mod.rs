use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use log::{error, info, warn};
use tokio::net::TcpListener;

use crate::controller::{ControllerError, PinController, PinReport};
use crate::io::gpio::GPIOManager;
use crate::registry::PinId;
use crate::shutdown::ShutdownSignal;

pub type SharedController<G> = Arc<Mutex<PinController<G>>>;

#[derive(Debug)]
pub struct PageError(ControllerError);

impl From<ControllerError> for PageError {
    fn from(e: ControllerError) -> Self {
        PageError(e)
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            ControllerError::InvalidPin(_) => StatusCode::NOT_FOUND,
            _ => {
                error!("Failed to serve pin page: {}", self.0);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.0.to_string()).into_response()
    }
}

fn lock<G: GPIOManager>(controller: &SharedController<G>) -> MutexGuard<'_, PinController<G>> {
    controller.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn router<G: GPIOManager + 'static>(controller: SharedController<G>) -> Router {
    Router::new()
        .route("/pin/:id", get(get_pin::<G>))
        .route("/pins", get(get_pins::<G>))
        .with_state(controller)
}

async fn get_pin<G: GPIOManager + 'static>(
    State(controller): State<SharedController<G>>,
    Path(id): Path<PinId>,
) -> Result<Html<String>, PageError> {
    let description = lock(&controller).describe(id)?;
    Ok(Html(render_pin(id, &description)))
}

async fn get_pins<G: GPIOManager + 'static>(
    State(controller): State<SharedController<G>>,
) -> Result<Json<Vec<PinReport>>, PageError> {
    let mut controller = lock(&controller);
    controller.refresh_all()?;
    Ok(Json(controller.snapshot()))
}

fn render_pin(id: PinId, description: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><title>GPIO pin {}</title></head>\n<body>\n<h1>GPIO pin {}</h1>\n<p>{}</p>\n</body>\n</html>\n",
        id, id, description
    )
}

/// Serves the pin pages until `shutdown` fires, then hands the controller
/// back for cleanup. The controller is shut down even if binding fails.
pub async fn run<G: GPIOManager + 'static>(
    controller: PinController<G>,
    bind: SocketAddr,
    shutdown: ShutdownSignal,
) -> std::io::Result<()> {
    let shared = Arc::new(Mutex::new(controller));
    let result = serve(shared.clone(), bind, shutdown).await;

    match Arc::try_unwrap(shared) {
        Ok(controller) => controller
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .shutdown(),
        Err(_) => warn!("Pin controller still in use after the server stopped, GPIO not cleaned up"),
    }
    result
}

async fn serve<G: GPIOManager + 'static>(
    shared: SharedController<G>,
    bind: SocketAddr,
    mut shutdown: ShutdownSignal,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!("Serving pin pages on http://{}", listener.local_addr()?);
    axum::serve(listener, router(shared))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
}
