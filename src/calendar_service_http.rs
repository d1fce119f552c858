use anyhow::Error;
use log::error;

use calendar_service_http::app::start_app;

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::init();
    start_app().await.map_err(|e| {
        error!("{e}");
        e.into()
    })
}
