use std::env;
use std::path::PathBuf;

use url::Url;

/// Collector endpoint configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Host name of the collector, as sent in the Host header and checked
    /// during certificate verification.
    pub host: String,
    /// TCP port of the collector (443 unless the URL overrides it).
    pub port: u16,
    /// Optional CA bundle file overriding the system trust anchors.
    pub ca_file: Option<PathBuf>,
}

impl ReporterConfig {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        // Load environment variables
        dotenv::dotenv().ok();

        let collector_url =
            env::var("COLLECTOR_URL").map_err(|_| "COLLECTOR_URL environment variable not set")?;

        let url = Url::parse(&collector_url)
            .map_err(|e| format!("COLLECTOR_URL is not a valid URL: {}", e))?;

        if url.scheme() != "https" {
            return Err(format!(
                "COLLECTOR_URL must use the https scheme, got '{}'",
                url.scheme()
            )
            .into());
        }

        let host = url
            .host_str()
            .ok_or("COLLECTOR_URL has no host component")?
            .to_string();
        let port = url.port().unwrap_or(443);

        let ca_file = env::var("COLLECTOR_CA_FILE").ok().map(PathBuf::from);

        Ok(ReporterConfig {
            host,
            port,
            ca_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_url_parses_into_host_and_default_port() {
        let url = Url::parse("https://collector.example.net").unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("collector.example.net"));
        assert_eq!(url.port().unwrap_or(443), 443);
    }

    #[test]
    fn explicit_port_is_honored() {
        let url = Url::parse("https://collector.example.net:8443").unwrap();
        assert_eq!(url.port().unwrap_or(443), 8443);
    }
}
