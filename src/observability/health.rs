//! Health check HTTP server
//!
//! Exposes modem connectivity, broker connection state and the sent counter
//! for supervisors and container orchestration.

use crate::gateway::{ConnectivityTracker, DeviceStatus, SentCounter, StatusSnapshot};
use crate::transport::ConnectionState;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use warp::http::StatusCode;
use warp::Filter;

/// HTTP health check server
pub struct HealthServer {
    port: u16,
    started_at: Instant,
    mqtt_connected: Arc<AtomicBool>,
    connectivity: Arc<ConnectivityTracker>,
    counter: Arc<SentCounter>,
}

impl HealthServer {
    pub fn new(port: u16, connectivity: Arc<ConnectivityTracker>, counter: Arc<SentCounter>) -> Self {
        Self {
            port,
            started_at: Instant::now(),
            mqtt_connected: Arc::new(AtomicBool::new(false)),
            connectivity,
            counter,
        }
    }

    pub fn set_mqtt_connected(&self, connected: bool) {
        self.mqtt_connected.store(connected, Ordering::Relaxed);
    }

    /// Keep the MQTT flag in sync with a transport state channel
    pub fn follow_mqtt_state(&self, mut state_rx: watch::Receiver<ConnectionState>) {
        let flag = self.mqtt_connected.clone();
        tokio::spawn(async move {
            loop {
                let connected = state_rx.borrow_and_update().is_connected();
                flag.store(connected, Ordering::Relaxed);
                if state_rx.changed().await.is_err() {
                    flag.store(false, Ordering::Relaxed);
                    break;
                }
            }
        });
    }

    /// Bind the listening socket; the returned future serves requests
    pub fn bind(
        self: Arc<Self>,
    ) -> Result<(SocketAddr, impl Future<Output = ()> + 'static), warp::Error> {
        let port = self.port;
        let (address, server) =
            warp::serve(self.routes()).try_bind_ephemeral(([0, 0, 0, 0], port))?;
        tracing::info!("Health server listening on {}", address);
        Ok((address, server))
    }

    /// Start the HTTP health server; fails if the port cannot be bound
    pub async fn start(self: Arc<Self>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let (_, server) = self.bind()?;
        server.await;
        Ok(())
    }

    pub fn routes(
        self: Arc<Self>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let health_server = self.clone();
        let ready_server = self.clone();

        // GET /health - modem, broker and counter state
        let health_route = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = health_server.clone();
                async move {
                    let status = server.health_status();
                    let code = if status.status == "healthy" {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    };
                    Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&status), code))
                }
            });

        // GET /ready - broker connection established
        let ready_route = warp::path("ready")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = ready_server.clone();
                async move {
                    let ready = server.mqtt_connected.load(Ordering::Relaxed);
                    let response = ReadinessResponse {
                        ready,
                        timestamp: current_timestamp(),
                    };
                    let code = if ready {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    };
                    Ok::<_, Infallible>(warp::reply::with_status(
                        warp::reply::json(&response),
                        code,
                    ))
                }
            });

        // GET /live - process is running
        let live_route = warp::path("live")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| {
                warp::reply::json(&LivenessResponse {
                    alive: true,
                    timestamp: current_timestamp(),
                })
            });

        // GET / - endpoint listing
        let root_route = warp::path::end().and(warp::get()).map(|| {
            let mut endpoints = HashMap::new();
            endpoints.insert(
                "/health".to_string(),
                "Modem connectivity, MQTT state and SMS counter".to_string(),
            );
            endpoints.insert("/ready".to_string(), "Readiness probe".to_string());
            endpoints.insert("/live".to_string(), "Liveness probe".to_string());
            warp::reply::json(&ApiDocumentationResponse { endpoints })
        });

        health_route
            .or(ready_route)
            .unify()
            .or(live_route.map(|reply| warp::reply::with_status(reply, StatusCode::OK)))
            .unify()
            .or(root_route.map(|reply| warp::reply::with_status(reply, StatusCode::OK)))
            .unify()
    }

    fn health_status(&self) -> HealthStatus {
        let modem = self.connectivity.snapshot();
        let mqtt_connected = self.mqtt_connected.load(Ordering::Relaxed);
        let healthy = mqtt_connected && modem.status == DeviceStatus::Online;

        HealthStatus {
            status: if healthy { "healthy" } else { "degraded" }.to_string(),
            timestamp: current_timestamp(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            mqtt_connected,
            sms_sent: self.counter.get(),
            modem,
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    timestamp: u64,
    uptime_seconds: u64,
    mqtt_connected: bool,
    sms_sent: u64,
    modem: StatusSnapshot,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct ApiDocumentationResponse {
    endpoints: HashMap<String, String>,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
