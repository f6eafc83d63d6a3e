//! HTTP geolocation lookups.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tally_core::traits::Locator;
use tally_core::types::Location;
use tracing::debug;

/// Resolves node IPs against a JSON endpoint answering `{lat, lon, city}`.
pub struct HttpLocator {
    client: Client,
    url_template: String,
}

#[derive(Deserialize)]
struct GeoResponse {
    lat: f64,
    lon: f64,
    #[serde(default)]
    city: String,
}

impl HttpLocator {
    /// `url_template` may contain `{ip}`; otherwise the IP is appended.
    pub fn new(url_template: &str) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(10)).build()?,
            url_template: url_template.to_owned(),
        })
    }

    fn url_for(&self, ip: &str) -> String {
        if self.url_template.contains("{ip}") {
            self.url_template.replace("{ip}", ip)
        } else {
            format!("{}/{}", self.url_template.trim_end_matches('/'), ip)
        }
    }

    async fn fetch(&self, ip: &str) -> Result<GeoResponse> {
        Ok(self
            .client
            .get(self.url_for(ip))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}

#[async_trait]
impl Locator for HttpLocator {
    async fn locate(&self, ip: &str) -> Option<Location> {
        match self.fetch(ip).await {
            Ok(geo) => Some(Location {
                lat: geo.lat,
                lon: geo.lon,
                city: geo.city,
            }),
            Err(e) => {
                debug!(ip, error = %e, "geolocation lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_substitutes_ip() {
        let locator = HttpLocator::new("http://geo.local/json/{ip}?fields=lat,lon,city").unwrap();
        assert_eq!(
            locator.url_for("1.2.3.4"),
            "http://geo.local/json/1.2.3.4?fields=lat,lon,city"
        );
    }

    #[test]
    fn bare_url_gets_ip_appended() {
        let locator = HttpLocator::new("http://geo.local/").unwrap();
        assert_eq!(locator.url_for("1.2.3.4"), "http://geo.local/1.2.3.4");
    }
}
