use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use zamek::pool::PoolConfig;

/// On-disk pool description, e.g.:
///
/// ```toml
/// targets = ["rpi4-01", "rpi4-02", "imx8-01"]
/// admins = ["root"]
/// priority_floor = 100
/// idle_timeout = "30m"
/// session_limit = "12h"
/// ```
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PoolConfFile {
    targets: Vec<String>,
    #[serde(default)]
    admins: Vec<String>,
    #[serde(default)]
    priority_floor: Option<u32>,
    #[serde(default)]
    idle_timeout: Option<String>,
    #[serde(default)]
    session_limit: Option<String>,
}

fn parse_duration(field: &str, value: Option<&str>) -> anyhow::Result<Option<Duration>> {
    value
        .map(|text| {
            humantime::parse_duration(text).with_context(|| format!("Invalid {field}: '{text}'"))
        })
        .transpose()
}

pub fn parse_pool_conf(text: &str) -> anyhow::Result<PoolConfig> {
    let file: PoolConfFile = toml::from_str(text)?;
    if file.targets.is_empty() {
        anyhow::bail!("The pool configuration names no targets");
    }

    let defaults = PoolConfig::default();
    Ok(PoolConfig {
        inventory: file.targets.into_iter().map(|t| t.into()).collect(),
        admins: file.admins.into_iter().collect(),
        priority_floor: file.priority_floor.unwrap_or(defaults.priority_floor),
        idle_timeout: parse_duration("idle_timeout", file.idle_timeout.as_deref())?
            .unwrap_or(defaults.idle_timeout),
        session_limit: parse_duration("session_limit", file.session_limit.as_deref())?
            .unwrap_or(defaults.session_limit),
    })
}

pub fn load_pool_conf(path: &Path) -> anyhow::Result<PoolConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read pool configuration {}", path.display()))?;
    parse_pool_conf(&text).with_context(|| format!("Cannot parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::parse_pool_conf;
    use std::time::Duration;

    #[test]
    fn parse_full_configuration() {
        let conf = parse_pool_conf(
            r#"
            targets = ["rpi4-01", "rpi4-02"]
            admins = ["root"]
            priority_floor = 100
            idle_timeout = "10m"
            session_limit = "2h"
            "#,
        )
        .unwrap();
        assert_eq!(conf.inventory.len(), 2);
        assert!(conf.inventory.contains(&zamek::ResourceId::from("rpi4-01")));
        assert!(conf.admins.contains("root"));
        assert_eq!(conf.priority_floor, 100);
        assert_eq!(conf.idle_timeout, Duration::from_secs(600));
        assert_eq!(conf.session_limit, Duration::from_secs(7200));
    }

    #[test]
    fn defaults_apply() {
        let conf = parse_pool_conf("targets = [\"t\"]").unwrap();
        assert_eq!(conf.priority_floor, 0);
        assert_eq!(conf.idle_timeout, Duration::from_secs(30 * 60));
    }

    #[test]
    fn reject_bad_configurations() {
        assert!(parse_pool_conf("targets = []").is_err());
        assert!(parse_pool_conf("").is_err());
        assert!(parse_pool_conf("targets = [\"t\"]\nidle_timeout = \"soon\"").is_err());
        assert!(parse_pool_conf("targets = [\"t\"]\nunknown_field = 1").is_err());
    }
}
