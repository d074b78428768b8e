use std::time::Duration;

use hyper::StatusCode;
use serde_json::json;

use way::{logger, Config, Context, Way};

fn main() -> way::Result<()> {
    let cfg = Config::load()?;
    logger::init(&cfg.logging);

    // Create the Tokio runtime with the configured number of worker threads
    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();

    if let Some(workers) = cfg.server.workers {
        runtime_builder.worker_threads(workers);
        tracing::info!("[CONFIG] Using {workers} worker threads");
    } else {
        tracing::info!("[CONFIG] Using default worker threads (CPU cores)");
    }

    let runtime = runtime_builder.build()?;

    runtime.block_on(async_main(cfg))
}

async fn async_main(cfg: Config) -> way::Result<()> {
    let addr = cfg.socket_addr()?;
    let mut app = Way::new(&cfg)?;

    if cfg.database.is_configured() {
        let kind = cfg.database.driver_kind()?;
        app.db_mut().open(kind, &cfg.database).await?;
    } else {
        tracing::info!("[CONFIG] WAY_DB_HOST not set, running without a database");
    }

    app.get("/", hello)?;
    app.get("/health", health)?;

    let deadline = Duration::from_secs(cfg.server.shutdown_timeout);
    way::server::signal::shutdown_on_signal(app.server_handle(), deadline);

    app.start(addr).await?;
    Ok(())
}

async fn hello(ctx: Context) {
    ctx.string(StatusCode::OK, "Hello, World!");
}

async fn health(ctx: Context) {
    let database = if ctx.db().is_open() {
        match ctx.db().query_row("SELECT 1", &[]).await.get::<i64, _>(0) {
            Ok(_) => "ok",
            Err(e) => {
                tracing::warn!("health check query failed: {e}");
                "unavailable"
            }
        }
    } else {
        "not configured"
    };

    let status = if database == "unavailable" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    ctx.json(
        status,
        &json!({
            "status": if status == StatusCode::OK { "ok" } else { "degraded" },
            "driver": ctx.db().driver_name(),
            "database": database,
        }),
    );
}
