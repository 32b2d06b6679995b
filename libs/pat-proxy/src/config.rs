use url::Url;

use crate::signing::codecommit_host;

/// Where and how authenticated requests are forwarded.
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    /// AWS region of the CodeCommit endpoint; part of the signing scope.
    pub region: String,
    /// Base URL requests are forwarded to, e.g. `https://git-codecommit.us-east-1.amazonaws.com/v1/repos/`.
    pub upstream: Url,
}

impl ProxyConfig {
    pub fn new(region: impl Into<String>, upstream: Url) -> Self {
        Self {
            region: region.into(),
            upstream,
        }
    }

    /// `Host` header sent upstream.
    pub fn upstream_host(&self) -> String {
        codecommit_host(&self.region)
    }

    /// Join the upstream base path and an inbound path with exactly one slash between them.
    pub fn target_path(&self, inbound: &str) -> String {
        let base = self.upstream.path();
        match (base.ends_with('/'), inbound.starts_with('/')) {
            (true, true) => format!("{}{}", base, &inbound[1..]),
            (false, false) => format!("{base}/{inbound}"),
            _ => format!("{base}{inbound}"),
        }
    }
}
