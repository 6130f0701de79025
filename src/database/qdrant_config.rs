use qdrant_client::{config::QdrantConfig, Qdrant};
use std::time::Duration;

use super::vector_db::StoreError;

/// Maps a REST url (port 6333) to the gRPC endpoint the client speaks (6334).
pub fn grpc_url(url: &str) -> String {
    let clean_url = match url.split_once("://") {
        Some((_, rest)) => rest,
        None => url,
    }
    .trim_end_matches('/');

    let grpc_url = match clean_url.strip_suffix(":6333") {
        Some(host) => format!("{}:6334", host),
        None => clean_url.to_string(),
    };

    format!("http://{}", grpc_url)
}

pub async fn create_qdrant_client(url: &str) -> Result<Qdrant, StoreError> {
    let url_with_scheme = grpc_url(url);
    log::info!("Attempting to connect to Qdrant with URL: {}", url_with_scheme);

    let mut config = QdrantConfig::from_url(&url_with_scheme);
    config.check_compatibility = false;
    config.timeout = Duration::from_secs(30);
    config.connect_timeout = Duration::from_secs(10);

    let client = Qdrant::new(config).map_err(|e| StoreError::Connection(e.to_string()))?;

    // Test the connection
    match client.list_collections().await {
        Ok(_) => {
            log::info!("Successfully connected to Qdrant");
            Ok(client)
        }
        Err(e) => {
            log::error!("Connection test failed: {}", e);
            Err(StoreError::Connection(format!("Failed to connect to Qdrant: {}", e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_rest_port_to_grpc() {
        assert_eq!(grpc_url("http://localhost:6333"), "http://localhost:6334");
        assert_eq!(grpc_url("localhost:6333/"), "http://localhost:6334");
    }

    #[test]
    fn keeps_custom_ports() {
        assert_eq!(grpc_url("https://qdrant.internal:7000"), "http://qdrant.internal:7000");
    }
}
