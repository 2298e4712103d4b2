//! Nodeflow Server
//!
//! Loads pipeline definitions, builds them and serves their endpoints.

#![warn(missing_docs)]
#![warn(clippy::all)]

use anyhow::{Context, Result};
use clap::Parser;
use nodeflow::events::LoggingEventSink;
use nodeflow::observability::init_tracing;
use nodeflow::pipeline::{PipelineRegistry, RegistryResources};
use nodeflow_server::{router, Args};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format).map_err(|e| anyhow::anyhow!(e))?;

    let definitions = args.loader().load()?;
    let resources = RegistryResources::new(args.node_factory()?)
        .with_event_sink(Arc::new(LoggingEventSink::debug()));
    let registry = PipelineRegistry::build(definitions, &resources);
    let app = router(&registry);

    let addr = args.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!(addr = %addr, "Listening");
    axum::serve(listener, app).await?;

    Ok(())
}
