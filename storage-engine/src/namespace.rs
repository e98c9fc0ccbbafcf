use crate::record::VoidTime;
use aerocache::Expiration;
use shared::{Error, Result};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// Per-namespace settings of an embedded store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespaceConfig {
    pub name: String,
    /// How often expired records are purged; `None` disables supervision
    pub nsup_period: Option<Duration>,
    pub allow_ttl_without_nsup: bool,
}

impl NamespaceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nsup_period: None,
            allow_ttl_without_nsup: false,
        }
    }

    pub fn with_nsup_period(mut self, period: Duration) -> Self {
        self.nsup_period = Some(period).filter(|p| !p.is_zero());
        self
    }

    pub fn allow_ttl_without_nsup(mut self) -> Self {
        self.allow_ttl_without_nsup = true;
        self
    }

    pub fn is_supervised(&self) -> bool {
        self.nsup_period.is_some()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Namespaces {
    configs: HashMap<String, NamespaceConfig>,
}

impl Namespaces {
    pub fn new(configs: impl IntoIterator<Item = NamespaceConfig>) -> Self {
        Self {
            configs: configs.into_iter().map(|c| (c.name.clone(), c)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Result<&NamespaceConfig> {
        self.configs
            .get(name)
            .ok_or_else(|| Error::NamespaceNotFound(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamespaceConfig> {
        self.configs.values()
    }

    /// Void time of a write, refusing TTLs the namespace cannot enforce
    pub fn resolve(&self, namespace: &str, expiration: Expiration, now: i64) -> Result<VoidTime> {
        let config = self.get(namespace)?;

        Ok(match expiration {
            Expiration::Never => VoidTime::Never,
            Expiration::Expired => VoidTime::Expired,
            Expiration::Seconds(seconds) => {
                if !config.is_supervised() && !config.allow_ttl_without_nsup {
                    return Err(Error::Forbidden(format!(
                        "TTL rejected for namespace '{}': nsup-period is zero",
                        namespace
                    )));
                }
                VoidTime::At(now + i64::from(seconds) * 1000)
            }
        })
    }
}

/// Runs `op` under the policy's total timeout, if any
pub async fn with_deadline<T, F>(total_timeout: Option<Duration>, name: &str, op: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match total_timeout {
        Some(limit) => tokio::time::timeout(limit, op)
            .await
            .map_err(|_| Error::Timeout(format!("{} exceeded {:?}", name, limit)))?,
        None => op.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namespaces() -> Namespaces {
        Namespaces::new([
            NamespaceConfig::new("cache").with_nsup_period(Duration::from_secs(1)),
            NamespaceConfig::new("nonsup"),
            NamespaceConfig::new("lenient").allow_ttl_without_nsup(),
        ])
    }

    #[test]
    fn test_resolve_void_time() {
        let ns = namespaces();
        assert_eq!(
            ns.resolve("cache", Expiration::Seconds(2), 1_000).unwrap(),
            VoidTime::At(3_000)
        );
        assert_eq!(ns.resolve("cache", Expiration::Never, 1_000).unwrap(), VoidTime::Never);
        assert_eq!(
            ns.resolve("cache", Expiration::Expired, 1_000).unwrap(),
            VoidTime::Expired
        );
    }

    #[test]
    fn test_ttl_forbidden_without_nsup() {
        let ns = namespaces();
        let err = ns.resolve("nonsup", Expiration::Seconds(2), 0).unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
        assert_eq!(err.code(), 22);

        assert!(ns.resolve("nonsup", Expiration::Never, 0).is_ok());
        assert!(ns.resolve("lenient", Expiration::Seconds(2), 0).is_ok());
    }

    #[test]
    fn test_unknown_namespace() {
        let err = namespaces().resolve("missing", Expiration::Never, 0).unwrap_err();
        assert_eq!(err, Error::NamespaceNotFound("missing".to_string()));
    }

    #[test]
    fn test_zero_period_disables_supervision() {
        let config = NamespaceConfig::new("cache").with_nsup_period(Duration::ZERO);
        assert!(!config.is_supervised());
    }

    #[tokio::test]
    async fn test_with_deadline_times_out() {
        let result: Result<()> = with_deadline(Some(Duration::from_millis(10)), "get", async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout(_))));

        let result = with_deadline(None, "get", async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }
}
