//! Ephemeral HTTP server shared by the fakes

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Router served on a random localhost port, stopped on drop
pub(crate) struct TestServer {
    url: String,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub(crate) async fn start(router: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test server");
        let addr = listener
            .local_addr()
            .expect("Failed to read test server address");

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "Test server stopped");
            }
        });

        tracing::debug!(%addr, "Test server listening");

        Self {
            url: format!("http://{}", addr),
            handle,
        }
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
