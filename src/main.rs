//! observerd
//!
//! Daemon that drives observer collection on a fixed interval and serves
//! the latest snapshot over HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           observerd                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │    Meter     │───▶│  Collection  │───▶│  Exporters   │       │
//! │  │  (observers) │    │     Loop     │    │ (Prom, logs) │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │                                                 │               │
//! │                                          /metrics, /healthz     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use observer_metrics::error::{Error, Result};
use observer_metrics::export::{LoggingExporter, MetricExporter, PrometheusExporter};
use observer_metrics::meter::Meter;
use observer_metrics::observer::LabelSet;
use observer_metrics::scheduler::{CollectionLoop, CollectorConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// observerd - periodic collection of observer instruments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Seconds between collection cycles
    #[arg(long, env = "OBSERVERD_INTERVAL_SECONDS", default_value = "15")]
    interval_seconds: u64,

    /// Per-observer collection budget in milliseconds
    #[arg(long, env = "OBSERVERD_COLLECT_TIMEOUT_MS", default_value = "5000")]
    collect_timeout_ms: u64,

    /// Per-exporter budget in milliseconds
    #[arg(long, env = "OBSERVERD_EXPORT_TIMEOUT_MS", default_value = "10000")]
    export_timeout_ms: u64,

    /// Metric name prefix for the Prometheus endpoint
    #[arg(long, env = "OBSERVERD_NAMESPACE", default_value = "observerd")]
    namespace: String,

    /// Also write every observation to the log
    #[arg(long, env = "LOG_EXPORTS")]
    log_exports: bool,

    /// Metrics and health server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9464")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            interval: Duration::from_secs(self.interval_seconds),
            collect_timeout: Duration::from_millis(self.collect_timeout_ms),
            export_timeout: Duration::from_millis(self.export_timeout_ms),
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = args.collector_config();
    info!("Starting observerd");
    info!("  Interval: {:?}", config.interval);
    info!("  Collect timeout: {:?}", config.collect_timeout);
    info!("  Export timeout: {:?}", config.export_timeout);
    info!("  Metrics address: {}", args.metrics_addr);

    let meter = Arc::new(Meter::new("observerd"));
    register_process_observers(&meter)?;

    let prometheus = Arc::new(PrometheusExporter::with_namespace(args.namespace.clone()));
    let mut exporters: Vec<Arc<dyn MetricExporter>> = vec![prometheus.clone()];
    if args.log_exports {
        exporters.push(Arc::new(LoggingExporter::info_level()));
    }

    let collector = CollectionLoop::new(Arc::clone(&meter), exporters, config)?;
    register_collector_observer(&meter, Arc::downgrade(&collector))?;

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_http_server(&metrics_addr, prometheus).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Stop on Ctrl-C
    let shutdown = collector.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt");
            shutdown.cancel();
        }
    });

    Arc::clone(&collector).run().await;

    info!("observerd shutdown complete");
    Ok(())
}

// =============================================================================
// Built-in Observers
// =============================================================================

fn register_process_observers(meter: &Meter) -> Result<()> {
    let started = Instant::now();
    let uptime = meter
        .f64_observer("process.uptime")
        .with_description("Seconds since observerd started")
        .with_unit("s")
        .build()?;
    let uptime_bound = uptime.get_default_bound();
    uptime.set_callback(move |sink| {
        sink.put(&uptime_bound, started.elapsed().as_secs_f64());
        Ok(())
    });

    let runtime = tokio::runtime::Handle::current();
    let workers = meter
        .i64_observer("runtime.workers")
        .with_description("Worker threads of the async runtime")
        .with_unit("{thread}")
        .build()?;
    let workers_bound = workers.get_default_bound();
    workers.set_callback(move |sink| {
        sink.put(&workers_bound, runtime.metrics().num_workers() as i64);
        Ok(())
    });

    Ok(())
}

fn register_collector_observer(meter: &Meter, collector: Weak<CollectionLoop>) -> Result<()> {
    let events = meter
        .i64_observer("collector.events")
        .with_description("Cumulative collection loop activity")
        .with_label_keys(["kind"])
        .build()?;

    let kind = |k: &str| events.bind_checked(LabelSet::from([("kind", k)]));
    let sweeps = kind("sweeps")?;
    let records = kind("records")?;
    let instrument_failures = kind("instrument_failures")?;
    let overruns = kind("overruns")?;
    let export_failures = kind("export_failures")?;

    events.set_callback(move |sink| {
        let Some(collector) = collector.upgrade() else {
            anyhow::bail!("collection loop has been dropped");
        };
        let stats = collector.stats();
        sink.put(&sweeps, stats.sweeps as i64);
        sink.put(&records, stats.records as i64);
        sink.put(&instrument_failures, stats.instrument_failures as i64);
        sink.put(&overruns, stats.overruns as i64);
        sink.put(&export_failures, stats.export_failures as i64);
        Ok(())
    });

    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "tokio=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_http_server(addr: &str, exporter: Arc<PrometheusExporter>) -> Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    fn respond(
        status: StatusCode,
        content_type: &'static str,
        body: impl Into<Bytes>,
    ) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(body.into()));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        response
    }

    async fn handler(
        req: Request<hyper::body::Incoming>,
        exporter: Arc<PrometheusExporter>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/metrics" => match exporter.render() {
                Ok(body) => respond(StatusCode::OK, exporter.format_type(), body),
                Err(e) => respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    e.to_string(),
                ),
            },
            "/healthz" | "/livez" | "/readyz" => respond(StatusCode::OK, "text/plain", "ok"),
            _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid metrics server address: {}", e)))?;

    let listener = TcpListener::bind(addr).await?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener.accept().await?;

        let io = TokioIo::new(stream);
        let exporter = Arc::clone(&exporter);

        tokio::spawn(async move {
            let service = service_fn(move |req| handler(req, Arc::clone(&exporter)));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Metrics server connection error: {}", e);
            }
        });
    }
}
