use std::net::IpAddr;

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

/// Creates a truncated, salted hash of an identifier for safe logging.
///
/// # Arguments
/// * `id` - The identifier to hash (account uuid, login).
/// * `salt` - A salt value from the application's configuration.
///
/// # Returns
/// A short, hexadecimal string representing the salted hash.
pub fn log_safe_id(id: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(id.as_bytes());
    let hash = hasher.finalize();

    hex::encode(&hash[..4])
}

/// Extracts the client IP, preferring proxy headers over the socket address.
///
/// Order: first entry of `X-Forwarded-For`, then `X-Real-IP`, then the
/// direct connection address.
pub fn extract_client_ip(headers: &HeaderMap, direct_ip: Option<IpAddr>) -> String {
    if let Some(forwarded_for) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        let first_ip = forwarded_for.split(',').next().unwrap_or("").trim();
        if let Ok(ip) = first_ip.parse::<IpAddr>() {
            return ip.to_string();
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if let Ok(ip) = real_ip.trim().parse::<IpAddr>() {
            return ip.to_string();
        }
    }

    direct_ip
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_safe_id_is_salted() {
        let a = log_safe_id("alice", "salt-one");
        let b = log_safe_id("alice", "salt-two");
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
        assert_eq!(a, log_safe_id("alice", "salt-one"));
    }

    #[test]
    fn test_extract_client_ip_order() {
        let mut headers = HeaderMap::new();
        let direct: IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(extract_client_ip(&headers, Some(direct)), "10.0.0.1");

        headers.insert("x-real-ip", "192.168.1.5".parse().unwrap());
        assert_eq!(extract_client_ip(&headers, Some(direct)), "192.168.1.5");

        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.2".parse().unwrap());
        assert_eq!(extract_client_ip(&headers, Some(direct)), "203.0.113.7");

        assert_eq!(extract_client_ip(&HeaderMap::new(), None), "unknown");
    }
}
