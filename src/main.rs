use anyhow::Result;
use helios::coordinator::Coordinator;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the coordinator (loads config, sets up logging)
    let (mut coordinator, handle) =
        Coordinator::new().map_err(|e| anyhow::anyhow!("Failed to create coordinator: {}", e))?;

    info!("Helios price scheduler starting up");

    // Spawn web server
    #[cfg(feature = "web")]
    let web_task = {
        let web_handle = handle.clone();
        let web_config = coordinator.config().web.clone();
        tokio::spawn(async move {
            if let Err(e) = helios::web::serve(web_handle, &web_config.host, web_config.port).await
            {
                error!("Web server error: {}", e);
            }
        })
    };
    #[cfg(not(feature = "web"))]
    let _ = &handle;

    // Run the coordinator in the current task
    let result = coordinator.run().await;

    #[cfg(feature = "web")]
    web_task.abort();

    match result {
        Ok(()) => {
            info!("Coordinator shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Coordinator failed with error: {}", e);
            Err(anyhow::anyhow!("Coordinator error: {}", e))
        }
    }
}
