use chord_node::{api, server, spawn_maintenance, ChordNode, Config, NodeError};
use log::{error, info};

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), NodeError> {
    let config = Config::from_env()?;
    let node = ChordNode::from_config(&config)?;

    // Bind before joining so peers can reach us as soon as they learn our address
    let listener = server::bind(&config.listen_address()).await?;

    node.join_network(config.bootstrap_address.as_deref()).await;

    let maintenance = spawn_maintenance(&node, &config.maintenance);

    if let Some(api_address) = config.api_address.clone() {
        let api_node = node.clone();
        tokio::spawn(async move {
            if let Err(e) = api::run(api_node, &api_address).await {
                error!("{}", e);
            }
        });
    }

    tokio::select! {
        _ = server::serve(node.clone(), listener, config.rpc_workers, config.rpc_timeout) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("[{}] Shutting down", node.info);
        }
    }
    maintenance.shutdown();
    Ok(())
}
