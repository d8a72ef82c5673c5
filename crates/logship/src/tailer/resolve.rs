// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::TailEndpoint;
use crate::config::Config;
use crate::error::{Error, Result};
use rand::seq::IndexedRandom;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_TAIL_SETTINGS_FILE: &str = "/nail/srv/configs/yelp_clog.json";
pub const DEFAULT_ECOSYSTEM_FILE: &str = "/nail/etc/ecosystem";
pub const DEFAULT_REGION_FILE: &str = "/nail/etc/region";

/// Marks hosts whose tail host depends on where we run.
const LOCAL_TAIL_HOST: &str = "local";

/// Tail host mapping document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TailSettings {
    #[serde(rename = "DEFAULT_SCRIBE_TAIL_HOST", default)]
    pub default_scribe_tail_host: Option<String>,
    #[serde(rename = "HOST_TO_TAIL_HOST", default)]
    pub host_to_tail_host: HashMap<String, String>,
    #[serde(rename = "REGION_TO_TAIL_HOST", default)]
    pub region_to_tail_host: HashMap<String, String>,
    #[serde(rename = "ECOSYSTEM_TO_TAIL_HOST", default)]
    pub ecosystem_to_tail_host: HashMap<String, String>,
}

impl TailSettings {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| {
            Error::Config(format!(
                "invalid tail settings in {}: {}",
                path.display(),
                e
            ))
        })
    }
}

#[derive(Debug, Clone)]
pub struct TailHostResolver {
    settings: TailSettings,
    ecosystem_file: PathBuf,
    region_file: PathBuf,
}

impl TailHostResolver {
    pub fn new(settings: TailSettings) -> Self {
        TailHostResolver {
            settings,
            ecosystem_file: PathBuf::from(DEFAULT_ECOSYSTEM_FILE),
            region_file: PathBuf::from(DEFAULT_REGION_FILE),
        }
    }

    #[must_use]
    pub fn with_location_files(
        mut self,
        ecosystem_file: impl Into<PathBuf>,
        region_file: impl Into<PathBuf>,
    ) -> Self {
        self.ecosystem_file = ecosystem_file.into();
        self.region_file = region_file.into();
        self
    }

    pub fn settings(&self) -> &TailSettings {
        &self.settings
    }

    /// Maps `host` (or the default tail host) to the host actually serving
    /// tails. Unknown hosts map to themselves; failing to read the
    /// ecosystem or region file is an error.
    pub fn find_tail_host(&self, host: Option<&str>) -> Result<String> {
        let host = match host.filter(|host| !host.is_empty()) {
            Some(host) => host.to_string(),
            None => self.settings.default_scribe_tail_host.clone().ok_or_else(|| {
                Error::Config("no tail host given and DEFAULT_SCRIBE_TAIL_HOST is not set".to_string())
            })?,
        };

        let Some(tail_host) = self.settings.host_to_tail_host.get(&host) else {
            return Ok(host);
        };
        if tail_host != LOCAL_TAIL_HOST {
            return Ok(tail_host.clone());
        }

        let ecosystem = read_single_line(&self.ecosystem_file)?;
        let mapped = if ecosystem == "prod" {
            let region = read_single_line(&self.region_file)?;
            self.settings.region_to_tail_host.get(&region)
        } else {
            self.settings.ecosystem_to_tail_host.get(&ecosystem)
        };
        Ok(mapped.cloned().unwrap_or(host))
    }
}

fn read_single_line(path: &Path) -> Result<String> {
    let contents = fs::read_to_string(path)?;
    Ok(contents.trim().to_string())
}

/// Resolves `host` with the settings document at `settings_file`.
pub fn find_tail_host(settings_file: impl AsRef<Path>, host: Option<&str>) -> Result<String> {
    TailHostResolver::new(TailSettings::from_file(settings_file)?).find_tail_host(host)
}

/// Picks the endpoint to tail from: `explicit` when given, else one of the
/// configured tail services at random, else the resolved default tail host
/// on the default tail port.
pub fn resolve_endpoint(explicit: Option<TailEndpoint>, config: &Config) -> Result<TailEndpoint> {
    if let Some(endpoint) = explicit {
        return Ok(endpoint);
    }
    if let Some(endpoint) = config.scribe_tail_services.choose(&mut rand::rng()) {
        debug!("Tailing from configured service {}", endpoint);
        return Ok(endpoint.clone());
    }

    let settings_file = config
        .tail_settings_file
        .as_deref()
        .unwrap_or(Path::new(DEFAULT_TAIL_SETTINGS_FILE));
    let host = find_tail_host(settings_file, None)?;
    Ok(TailEndpoint::new(host, config.default_scribe_tail_port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn settings() -> TailSettings {
        serde_json::from_value(serde_json::json!({
            "DEFAULT_SCRIBE_TAIL_HOST": "default-host",
            "HOST_TO_TAIL_HOST": {
                "fake-host": "foo.bar.fake-host.com",
                "local-host": "local",
            },
            "REGION_TO_TAIL_HOST": {"uswest1-prod": "tail.uswest1.com"},
            "ECOSYSTEM_TO_TAIL_HOST": {"devc": "tail.devc.com"},
        }))
        .unwrap()
    }

    fn location(ecosystem: &str, region: &str) -> (TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let ecosystem_file = dir.path().join("ecosystem");
        let region_file = dir.path().join("region");
        fs::write(&ecosystem_file, format!("{ecosystem}\n")).unwrap();
        fs::write(&region_file, format!("{region}\n")).unwrap();
        (dir, ecosystem_file, region_file)
    }

    #[test]
    fn test_find_tail_host() {
        let resolver = TailHostResolver::new(settings());
        assert_eq!(
            resolver.find_tail_host(Some("fake-host")).unwrap(),
            "foo.bar.fake-host.com"
        );
    }

    #[test]
    fn test_find_tail_host_unknown_host_maps_to_itself() {
        let resolver = TailHostResolver::new(settings());
        assert_eq!(resolver.find_tail_host(Some("other-host")).unwrap(), "other-host");
        assert_eq!(resolver.find_tail_host(None).unwrap(), "default-host");
    }

    #[test]
    fn test_find_tail_host_local_uses_region_in_prod() {
        let (_dir, ecosystem, region) = location("prod", "uswest1-prod");
        let resolver = TailHostResolver::new(settings()).with_location_files(ecosystem, region);
        assert_eq!(
            resolver.find_tail_host(Some("local-host")).unwrap(),
            "tail.uswest1.com"
        );
    }

    #[test]
    fn test_find_tail_host_local_uses_ecosystem_elsewhere() {
        let (_dir, ecosystem, region) = location("devc", "ignored");
        let resolver = TailHostResolver::new(settings()).with_location_files(ecosystem, region);
        assert_eq!(resolver.find_tail_host(Some("local-host")).unwrap(), "tail.devc.com");

        let (_dir, ecosystem, region) = location("stagef", "ignored");
        let resolver = TailHostResolver::new(settings()).with_location_files(ecosystem, region);
        assert_eq!(resolver.find_tail_host(Some("local-host")).unwrap(), "local-host");
    }

    #[test]
    fn test_find_tail_host_missing_ecosystem_file() {
        let resolver = TailHostResolver::new(settings())
            .with_location_files("/nonexistent/ecosystem", "/nonexistent/region");
        assert!(matches!(
            resolver.find_tail_host(Some("local-host")),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_find_tail_host_from_settings_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"HOST_TO_TAIL_HOST": {{"fake-host": "foo.bar.fake-host.com"}}}}"#).unwrap();

        assert_eq!(
            find_tail_host(file.path(), Some("fake-host")).unwrap(),
            "foo.bar.fake-host.com"
        );
        assert!(matches!(find_tail_host(file.path(), None), Err(Error::Config(_))));
        assert!(find_tail_host("/nonexistent/settings.json", Some("fake-host")).is_err());
    }

    #[test]
    fn test_resolve_endpoint_prefers_explicit() {
        let config = Config {
            scribe_tail_services: vec![TailEndpoint::new("configured", 1)],
            ..Config::default()
        };
        let explicit = TailEndpoint::new("explicit", 2);
        assert_eq!(
            resolve_endpoint(Some(explicit.clone()), &config).unwrap(),
            explicit
        );
    }

    #[test]
    fn test_resolve_endpoint_picks_configured_service() {
        let services = vec![
            TailEndpoint::new("scribekafkaservices-fake-host-1", 1234),
            TailEndpoint::new("scribekafkaservices-fake-host-2", 5678),
        ];
        let config = Config {
            scribe_tail_services: services.clone(),
            ..Config::default()
        };
        for _ in 0..10 {
            let endpoint = resolve_endpoint(None, &config).unwrap();
            assert!(services.contains(&endpoint));
        }
    }

    #[test]
    fn test_resolve_endpoint_falls_back_to_tail_host() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"DEFAULT_SCRIBE_TAIL_HOST": "tail-default"}}"#).unwrap();
        let config = Config {
            tail_settings_file: Some(file.path().to_path_buf()),
            ..Config::default()
        };

        assert_eq!(
            resolve_endpoint(None, &config).unwrap(),
            TailEndpoint::new("tail-default", 3535)
        );
    }
}
