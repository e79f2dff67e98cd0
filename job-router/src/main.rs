use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{http::StatusCode, routing::get, Router};
use futures::future::{ready, select_all};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use job_router::broker::Broker;
use job_router::config::Config;
use job_router::provisioner::TopicProvisioner;
use job_router::router::{RouterHandle, RouterState, StreamRouter};

type RouterStates = Arc<Vec<(String, watch::Receiver<RouterState>)>>;

fn setup_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install metrics recorder")
}

/// 200 while every router is running, 500 listing the states otherwise.
fn liveness(routers: &RouterStates) -> (StatusCode, String) {
    let states: Vec<String> = routers
        .iter()
        .map(|(topic, state)| format!("{topic}: {:?}", *state.borrow()))
        .collect();

    if routers
        .iter()
        .all(|(_, state)| *state.borrow() == RouterState::Running)
    {
        (StatusCode::OK, states.join("\n"))
    } else {
        error!("Health check FAILED - router states: [{}]", states.join(", "));
        (StatusCode::INTERNAL_SERVER_ERROR, states.join("\n"))
    }
}

fn start_server(
    config: &Config,
    routers: RouterStates,
    recorder_handle: Option<PrometheusHandle>,
) -> JoinHandle<()> {
    let router = Router::new()
        .route("/", get(|| async { "job router" }))
        .route("/_readiness", get(|| async { "ok" }))
        .route(
            "/_liveness",
            get(move || {
                let routers = routers.clone();
                async move { liveness(&routers) }
            }),
        );

    let router = match recorder_handle {
        Some(recorder_handle) => {
            router.route("/metrics", get(move || ready(recorder_handle.render())))
        }
        None => router,
    };

    let bind = config.bind_address.clone();

    tokio::task::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(&bind).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind metrics server to {}: {}", bind, e);
                return;
            }
        };
        if let Err(e) = axum::serve(listener, router).await {
            error!("Metrics server stopped: {}", e);
        }
    })
}

async fn shutdown_signal() -> Result<()> {
    let mut term = signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;
    let mut interrupt =
        signal(SignalKind::interrupt()).context("failed to register SIGINT handler")?;

    tokio::select! {
        _ = term.recv() => info!("received SIGTERM"),
        _ = interrupt.recv() => info!("received SIGINT"),
    };
    Ok(())
}

async fn shutdown_all(handles: Vec<RouterHandle>) -> bool {
    for handle in &handles {
        handle.shutdown();
    }

    let mut clean = true;
    for handle in handles {
        let source_topic = handle.source_topic().to_string();
        match handle.join().await {
            Ok(stats) => info!("Router for {} stopped: {:?}", source_topic, stats),
            Err(e) => {
                error!("Router for {} failed: {}", source_topic, e);
                clean = false;
            }
        }
    }
    clean
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::init_with_defaults()
        .context("Failed to load configuration from environment variables")?;

    let log_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true)
        .with_filter(EnvFilter::from_default_env())
        .boxed();

    tracing_subscriber::registry().with(log_layer).init();

    info!("Starting job router");
    info!("Configuration loaded: {:?}", config);

    let recorder_handle = if config.export_prometheus {
        Some(setup_metrics()?)
    } else {
        None
    };

    let broker = config.kafka_broker();
    let admin = broker
        .open_admin()
        .await
        .context("Failed to create Kafka admin client")?;
    let provisioner = Arc::new(TopicProvisioner::new(admin, config.max_known_topics));

    let router_configs = config.router_configs();
    if router_configs.is_empty() {
        anyhow::bail!("KAFKA_SOURCE_TOPICS names no source topics");
    }

    let mut handles = Vec::with_capacity(router_configs.len());
    for router_config in router_configs {
        let source_topic = router_config.source_topic.clone();
        let started = match StreamRouter::new(router_config, broker.clone()) {
            Ok(router) => router
                .with_provisioner(provisioner.clone())
                .start()
                .await
                .map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };

        match started {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                shutdown_all(handles).await;
                return Err(e).with_context(|| format!("Failed to start router for {source_topic}"));
            }
        }
    }

    let states: RouterStates = Arc::new(
        handles
            .iter()
            .map(|handle| (handle.source_topic().to_string(), handle.state_receiver()))
            .collect(),
    );
    let server_handle = start_server(&config, states, recorder_handle);
    info!("Started metrics server on {}", config.bind_address);

    {
        let any_closed = select_all(handles.iter().map(|handle| Box::pin(handle.closed())));

        tokio::select! {
            signal = shutdown_signal() => {
                if let Err(e) = signal {
                    error!("Signal handling failed, shutting down: {:#}", e);
                }
            }
            (_, index, _) = any_closed => {
                warn!(
                    "Router for {} closed on its own, shutting down",
                    handles[index].source_topic()
                );
            }
        }
    }

    let clean = shutdown_all(handles).await;
    server_handle.abort();

    if !clean {
        anyhow::bail!("one or more routers exited with an error");
    }
    info!("Job router stopped");
    Ok(())
}
