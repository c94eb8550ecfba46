use hyper::{
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use lazy_static::lazy_static;
use prometheus::{
    register_int_counter_vec_with_registry, register_int_gauge_with_registry, Encoder,
    IntCounterVec, IntGauge, Registry, TextEncoder,
};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;

// Create a new registry named `chatter`
lazy_static! {
    pub static ref CHATTER_REGISTRY: Registry =
        Registry::new_custom(Some("chatter".to_string()), None).unwrap();
}

// Register metrics with the `chatter` registry
lazy_static! {
    pub static ref EVENTS_RECEIVED: IntCounterVec = register_int_counter_vec_with_registry!(
        "events_received_total",
        "Inbound events by admission outcome",
        &["outcome"],
        CHATTER_REGISTRY
    )
    .unwrap();
    pub static ref DELIVERIES_CREATED: IntCounterVec = register_int_counter_vec_with_registry!(
        "deliveries_created_total",
        "Pending deliveries requested from the dispatch backend",
        &["topic", "status"],
        CHATTER_REGISTRY
    )
    .unwrap();
    pub static ref GC_DELETIONS: IntCounterVec = register_int_counter_vec_with_registry!(
        "gc_deletions_total",
        "Pending deliveries deleted by the garbage collector",
        &["status"],
        CHATTER_REGISTRY
    )
    .unwrap();
    pub static ref MOOD_TRANSITIONS: IntCounterVec = register_int_counter_vec_with_registry!(
        "mood_transitions_total",
        "Mood changes at run time",
        &["from", "to"],
        CHATTER_REGISTRY
    )
    .unwrap();
    pub static ref LIVE_ACTORS: IntGauge = register_int_gauge_with_registry!(
        "live_actors",
        "Actors currently running in this process",
        CHATTER_REGISTRY
    )
    .unwrap();
}

async fn handle_request(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let metric_families = CHATTER_REGISTRY.gather();
            let encoder = TextEncoder::new();
            let mut buffer = Vec::new();
            match encoder.encode(&metric_families, &mut buffer) {
                Ok(()) => Response::builder()
                    .status(StatusCode::OK)
                    .header(hyper::header::CONTENT_TYPE, encoder.format_type())
                    .body(Body::from(buffer)),
                Err(err) => Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Body::from(err.to_string())),
            }
        }
        (&Method::GET, "/health") => {
            let health_status = json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "live_actors": LIVE_ACTORS.get(),
            });
            Response::builder()
                .status(StatusCode::OK)
                .header(hyper::header::CONTENT_TYPE, "application/json")
                .body(Body::from(health_status.to_string()))
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from("Not Found")),
    };

    Ok(response.unwrap_or_else(|_| Response::new(Body::empty())))
}

pub async fn start_server(port_number: Option<u16>) {
    // Default port is 9001 if not specified
    const DEFAULT_PORT: u16 = 9001;

    let port = port_number.unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let make_svc =
        make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(handle_request)) });

    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            tracing::error!("Metrics server could not bind {}: {}", addr, e);
            return;
        }
    };

    tokio::spawn(async move {
        tracing::info!("Starting metrics server on {}", addr);

        if let Err(e) = server.await {
            tracing::error!("Metrics server error: {}", e);
        }
    });
}
