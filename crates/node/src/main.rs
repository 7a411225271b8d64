//! Node entry point: runs a demo order through the fulfillment saga.

use node::fulfillment::OrderRequest;
use node::{Config, Node};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Wire the node and seed demo data
    let node = Node::build(config).await.expect("failed to build node");
    node.inventory().restock("WIDGET", 10);
    node.ledger().deposit("demo-customer", 10_000);

    let order = OrderRequest {
        order_id: "demo-1".to_string(),
        customer_id: "demo-customer".to_string(),
        sku: "WIDGET".to_string(),
        quantity: 2,
        amount_cents: 2_500,
    };

    // 4. Run the demo order unless a signal arrives first
    tokio::select! {
        result = node.run_fulfillment(order) => match result {
            Ok(receipt) => tracing::info!(
                order_id = %receipt.order_id,
                saga_id = %receipt.saga_id,
                reservation_id = %receipt.reservation_id,
                transaction_id = %receipt.transaction_id,
                "demo order fulfilled"
            ),
            Err(e) => tracing::error!(error = %e, "demo order failed"),
        },
        () = shutdown_signal() => {}
    }

    // 5. Shut down and dump metrics
    if let Err(e) = node.shutdown().await {
        tracing::error!(error = %e, "node did not shut down cleanly");
    }
    tracing::info!(metrics = %metrics_handle.render(), "final metrics snapshot");
}
