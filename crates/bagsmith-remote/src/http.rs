use crate::{FetchConfig, Fetcher, RemoteError, USER_AGENT};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Fetcher for `http://`, `https://`, `file://` locations and plain paths.
///
/// Every read stops after `max_bytes + 1` bytes so an oversized body is
/// detected without buffering it entirely.
pub struct HttpFetcher {
    config: FetchConfig,
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(config: FetchConfig) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout()))
            .build();
        let agent = ureq::Agent::new_with_config(agent_config);
        Self { config, agent }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn read_bounded(&self, location: &str, reader: impl Read) -> Result<Vec<u8>, std::io::Error> {
        let mut body = Vec::new();
        reader
            .take(self.config.max_bytes.saturating_add(1))
            .read_to_end(&mut body)?;
        debug!("read {} bytes from {location}", body.len());
        Ok(body)
    }

    fn check_size(&self, location: &str, body: Vec<u8>) -> Result<Vec<u8>, RemoteError> {
        if body.len() as u64 > self.config.max_bytes {
            return Err(RemoteError::TooLarge {
                location: location.to_owned(),
                limit: self.config.max_bytes,
            });
        }
        Ok(body)
    }

    fn do_get(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        let req = self.agent.get(url).header("User-Agent", USER_AGENT);
        let resp = match req.call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(404)) => {
                return Err(RemoteError::NotFound(url.to_owned()));
            }
            Err(ureq::Error::StatusCode(code)) => {
                return Err(RemoteError::Http(format!("HTTP {code} for {url}")));
            }
            Err(ureq::Error::Timeout(_)) => {
                return Err(RemoteError::Timeout(url.to_owned()));
            }
            Err(e) => {
                return Err(RemoteError::Http(e.to_string()));
            }
        };

        let code = resp.status().as_u16();
        if code == 404 {
            return Err(RemoteError::NotFound(url.to_owned()));
        }
        if code >= 400 {
            return Err(RemoteError::Http(format!("HTTP {code} for {url}")));
        }

        let reader = resp.into_body().into_reader();
        let body = self.read_bounded(url, reader).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                RemoteError::Timeout(url.to_owned())
            } else {
                RemoteError::Http(e.to_string())
            }
        })?;
        self.check_size(url, body)
    }

    fn do_read_local(&self, location: &str, path: &Path) -> Result<Vec<u8>, RemoteError> {
        let io_err = |source: std::io::Error| {
            if source.kind() == std::io::ErrorKind::NotFound {
                RemoteError::NotFound(location.to_owned())
            } else {
                RemoteError::Io {
                    location: location.to_owned(),
                    source,
                }
            }
        };
        let file = File::open(path).map_err(io_err)?;
        let body = self.read_bounded(location, file).map_err(io_err)?;
        self.check_size(location, body)
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(FetchConfig::default())
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, location: &str) -> Result<Vec<u8>, RemoteError> {
        let lower = location.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            debug!("GET {location}");
            return self.do_get(location);
        }
        if !self.config.allow_local {
            return Err(RemoteError::UnsupportedScheme(location.to_owned()));
        }
        if let Some(path) = location.strip_prefix("file://") {
            debug!("reading {path}");
            return self.do_read_local(location, Path::new(path));
        }
        if location.contains("://") {
            return Err(RemoteError::UnsupportedScheme(location.to_owned()));
        }
        debug!("reading {location}");
        self.do_read_local(location, Path::new(location))
    }
}
