//! Image reference resolution.
//!
//! `IMAGE:TAG` is split on its last colon. A repository with a transport
//! prefix is used verbatim; one containing both a `/` (not leading) and a `.`
//! names a third-party registry host; anything else is qualified against the
//! default registry.

use std::path::Path;

use crate::error::DockrootError;

/// Registry host that short references resolve against.
pub const DEFAULT_REGISTRY: &str = "registry.linkease.net:5443";

const TRANSPORT_PREFIX: &str = "docker://";

/// Host names under which Docker Hub mirrors apply.
const DOCKER_HUB_HOSTS: &[&str] = &["docker.io", "registry-1.docker.io", "index.docker.io"];

/// How the source registry was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The reference carried its own transport prefix.
    Explicit,
    /// Host-qualified reference, pulled directly from that host.
    ThirdParty,
    /// Short reference, pulled from [`DEFAULT_REGISTRY`].
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    repository: String,
    tag: String,
    route: Route,
    source: String,
}

impl ImageReference {
    pub fn parse(reference: &str) -> Result<Self, DockrootError> {
        let invalid = || DockrootError::InvalidReference(reference.to_string());

        let (repository, tag) = reference.rsplit_once(':').ok_or_else(invalid)?;
        if repository.is_empty() || tag.is_empty() || tag.contains('/') {
            return Err(invalid());
        }

        let (route, source) = if repository.starts_with(TRANSPORT_PREFIX) {
            if repository.len() == TRANSPORT_PREFIX.len() {
                return Err(invalid());
            }
            (Route::Explicit, format!("{}:{}", repository, tag))
        } else if repository.find('/').is_some_and(|i| i > 0) && repository.contains('.') {
            (
                Route::ThirdParty,
                format!("{}{}:{}", TRANSPORT_PREFIX, repository, tag),
            )
        } else {
            (
                Route::Default,
                format!(
                    "{}{}/{}:{}",
                    TRANSPORT_PREFIX, DEFAULT_REGISTRY, repository, tag
                ),
            )
        };

        Ok(Self {
            repository: repository.to_string(),
            tag: tag.to_string(),
            route,
            source,
        })
    }

    /// Fully qualified source locator handed to the image copier.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn route(&self) -> Route {
        self.route
    }

    /// Registry host the source locator points at.
    pub fn host(&self) -> &str {
        let qualified = self
            .source
            .strip_prefix(TRANSPORT_PREFIX)
            .unwrap_or(&self.source);
        qualified.split('/').next().unwrap_or(qualified)
    }

    /// Whether configured Docker Hub mirrors apply to this reference.
    pub fn is_docker_hub(&self) -> bool {
        self.route != Route::Default && DOCKER_HUB_HOSTS.contains(&self.host())
    }

    /// Destination locator of the local OCI layout store under `instance_dir`.
    pub fn store_locator(&self, instance_dir: &Path) -> String {
        format!("oci:{}/images:{}", instance_dir.display(), self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_reference_uses_default_registry() {
        let r = ImageReference::parse("alpine:latest").unwrap();
        assert_eq!(r.route(), Route::Default);
        assert_eq!(
            r.source(),
            "docker://registry.linkease.net:5443/alpine:latest"
        );
        assert_eq!(r.host(), DEFAULT_REGISTRY);
        assert_eq!(r.tag(), "latest");
    }

    #[test]
    fn namespaced_reference_without_dot_uses_default_registry() {
        let r = ImageReference::parse("homeassistant/home-assistant:stable").unwrap();
        assert_eq!(r.route(), Route::Default);
        assert_eq!(
            r.source(),
            "docker://registry.linkease.net:5443/homeassistant/home-assistant:stable"
        );
    }

    #[test]
    fn host_qualified_reference_goes_direct() {
        let r = ImageReference::parse("myhost.example.com/app:1.0").unwrap();
        assert_eq!(r.route(), Route::ThirdParty);
        assert_eq!(r.source(), "docker://myhost.example.com/app:1.0");
        assert_eq!(r.host(), "myhost.example.com");
        assert!(!r.is_docker_hub());
    }

    #[test]
    fn explicit_transport_used_verbatim() {
        let r = ImageReference::parse("docker://custom/x:1").unwrap();
        assert_eq!(r.route(), Route::Explicit);
        assert_eq!(r.source(), "docker://custom/x:1");
        assert_eq!(r.repository(), "docker://custom/x");
        assert_eq!(r.tag(), "1");
    }

    #[test]
    fn registry_port_is_not_mistaken_for_tag() {
        let r = ImageReference::parse("docker.io/library/alpine:3.20").unwrap();
        assert_eq!(r.route(), Route::ThirdParty);
        assert_eq!(r.tag(), "3.20");
        assert!(r.is_docker_hub());
    }

    #[test]
    fn leading_slash_is_not_host_qualified() {
        let r = ImageReference::parse("/foo.bar:1").unwrap();
        assert_eq!(r.route(), Route::Default);
    }

    #[test]
    fn rejects_missing_tag() {
        for bad in ["alpine", "alpine:", ":latest", "docker://custom/x", "docker://:1"] {
            let err = ImageReference::parse(bad).unwrap_err();
            assert!(
                matches!(err, DockrootError::InvalidReference(_)),
                "expected invalid reference for {bad}"
            );
        }
    }

    #[test]
    fn store_locator_keyed_by_tag() {
        let r = ImageReference::parse("alpine:edge").unwrap();
        assert_eq!(
            r.store_locator(Path::new("/data/alpine")),
            "oci:/data/alpine/images:edge"
        );
    }
}
