#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;

use rbac_api::app::services::AppServices;
use rbac_auth::{SigningSecret, TokenService};
use rbac_infra::InMemoryEntityStore;

pub const SECRET: &str = "black-box-secret";
pub const ADMIN: &str = "admin";
pub const ADMIN_PASSWORD: &str = "123456";

/// HTTP and RPC gateways over one in-memory store, on ephemeral ports.
pub struct TestServer {
    pub base_url: String,
    pub rpc_addr: SocketAddr,
    pub services: Arc<AppServices>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(None).await
    }

    /// `admin_permission` switches on the live guard for administrative calls.
    pub async fn spawn_with(admin_permission: Option<&str>) -> Self {
        let tokens = Arc::new(TokenService::new(
            &SigningSecret::new(SECRET).unwrap(),
            ChronoDuration::hours(2),
        ));
        let services = Arc::new(AppServices::new(
            Arc::new(InMemoryEntityStore::new()),
            tokens,
            admin_permission.map(str::to_string),
            Duration::from_secs(5),
        ));
        services
            .accounts()
            .bootstrap(ADMIN, ADMIN_PASSWORD)
            .await
            .expect("bootstrap");

        // Same router as prod, bound to an ephemeral port.
        let app = rbac_api::app::build_app(services.clone());
        let http = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let base_url = format!("http://{}", http.local_addr().unwrap());

        let rpc = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let rpc_addr = rpc.local_addr().unwrap();

        let rpc_services = services.clone();
        let handles = vec![
            tokio::spawn(async move {
                axum::serve(http, app).await.unwrap();
            }),
            tokio::spawn(async move {
                rbac_api::rpc::serve(rpc, rpc_services, std::future::pending())
                    .await
                    .unwrap();
            }),
        ];

        Self {
            base_url,
            rpc_addr,
            services,
            handles,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
