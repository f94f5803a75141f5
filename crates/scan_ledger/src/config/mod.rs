use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, anyhow};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing_subscriber::{EnvFilter, fmt};

use crate::records;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub config_dir: PathBuf,
    pub server: ServerConfig,
    pub scan: ScanConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
}

/// Settings that shape how runs are named, launched and listed.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Process-wide zone used to render and parse run identifiers.
    pub time_zone: ScanZone,
    pub scanner: ScannerConfig,
    pub default_page_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_scanner_program")]
    pub program: String,
    #[serde(default = "default_scanner_args")]
    pub args: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ScanFile {
    #[serde(default = "default_time_zone")]
    time_zone: String,
    #[serde(default)]
    scanner: ScannerConfig,
    #[serde(default = "default_page_size")]
    default_page_size: usize,
}

impl Default for ScanFile {
    fn default() -> Self {
        Self {
            time_zone: default_time_zone(),
            scanner: ScannerConfig::default(),
            default_page_size: default_page_size(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            program: default_scanner_program(),
            args: default_scanner_args(),
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let root = match env::var("SCAN_LEDGER_ROOT") {
            Ok(path) => PathBuf::from(path),
            Err(_) => env::current_dir()?,
        };
        let bind_addr =
            env::var("SCAN_LEDGER_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        Self::from_root(&root, bind_addr)
    }

    /// Build a config rooted at `root` without consulting the environment.
    pub fn from_root(root: &Path, bind_addr: impl Into<String>) -> anyhow::Result<Self> {
        let data_dir = root.join("data");
        let config_dir = root.join("config");

        let scan_file = {
            let path = config_dir.join("scan.yml");
            if path.exists() {
                load_yaml::<ScanFile>(path)?
            } else {
                ScanFile::default()
            }
        };
        let time_zone = parse_time_zone(&scan_file.time_zone)
            .with_context(|| format!("invalid time_zone {:?} in scan.yml", scan_file.time_zone))?;

        records::ensure_data_layout(&data_dir)?;

        Ok(Self {
            data_dir,
            config_dir,
            server: ServerConfig {
                bind_addr: bind_addr.into(),
            },
            scan: ScanConfig {
                time_zone,
                scanner: scan_file.scanner,
                default_page_size: scan_file.default_page_size.max(1),
            },
        })
    }
}

impl ServerConfig {
    pub fn addr(&self) -> &str {
        &self.bind_addr
    }
}

pub fn load_yaml<T: DeserializeOwned>(path: PathBuf) -> anyhow::Result<T> {
    let content = fs::read_to_string(&path).with_context(|| format!("reading yaml {:?}", path))?;
    let parsed =
        serde_yaml::from_str(&content).with_context(|| format!("parsing yaml {:?}", path))?;
    Ok(parsed)
}

/// Zone in which run ids are rendered and read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanZone {
    /// IANA zone such as `Asia/Shanghai`; follows daylight saving rules.
    Named(Tz),
    Fixed(FixedOffset),
}

impl ScanZone {
    /// Wall-clock time of `instant` in this zone.
    pub fn local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        match self {
            ScanZone::Named(tz) => instant.with_timezone(tz).naive_local(),
            ScanZone::Fixed(offset) => instant.with_timezone(offset).naive_local(),
        }
    }

    /// Instant of a wall-clock time in this zone.
    ///
    /// Times skipped by a DST transition have no instant. Times repeated by
    /// one resolve to the earlier instant.
    pub fn to_utc(&self, local: &NaiveDateTime) -> Option<DateTime<Utc>> {
        match self {
            ScanZone::Named(tz) => tz
                .from_local_datetime(local)
                .earliest()
                .map(|ts| ts.with_timezone(&Utc)),
            ScanZone::Fixed(offset) => offset
                .from_local_datetime(local)
                .single()
                .map(|ts| ts.with_timezone(&Utc)),
        }
    }
}

impl Default for ScanZone {
    fn default() -> Self {
        ScanZone::Named(Tz::UTC)
    }
}

/// Parse an IANA zone name (`America/New_York`), a fixed offset (`+08:00`,
/// `-0530`) or `Z`.
pub fn parse_time_zone(raw: &str) -> anyhow::Result<ScanZone> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("z") {
        return Ok(ScanZone::default());
    }
    if let Ok(tz) = trimmed.parse::<Tz>() {
        return Ok(ScanZone::Named(tz));
    }
    trimmed
        .parse::<FixedOffset>()
        .map(ScanZone::Fixed)
        .map_err(|_| anyhow!("expected an IANA zone name or an offset like +08:00"))
}

fn default_time_zone() -> String {
    "UTC".to_string()
}

fn default_scanner_program() -> String {
    "clamdscan".to_string()
}

fn default_scanner_args() -> Vec<String> {
    vec!["--fdpass".to_string()]
}

fn default_page_size() -> usize {
    10
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn instant(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn parses_zone_names_and_offsets() {
        assert_eq!(
            parse_time_zone("Asia/Shanghai").unwrap(),
            ScanZone::Named(chrono_tz::Asia::Shanghai)
        );
        assert_eq!(
            parse_time_zone("+08:00").unwrap(),
            ScanZone::Fixed(FixedOffset::east_opt(8 * 3600).unwrap())
        );
        assert_eq!(
            parse_time_zone("-0530").unwrap(),
            ScanZone::Fixed(FixedOffset::west_opt(5 * 3600 + 30 * 60).unwrap())
        );
        assert_eq!(parse_time_zone("Z").unwrap(), ScanZone::default());
        assert_eq!(parse_time_zone("UTC").unwrap(), ScanZone::default());
        assert!(parse_time_zone("Mars/Olympus").is_err());
        assert!(parse_time_zone("+25:00").is_err());
    }

    #[test]
    fn named_zone_follows_daylight_saving() {
        let new_york = parse_time_zone("America/New_York").unwrap();
        let winter = instant("2024-01-03T17:00:00Z");
        let summer = instant("2024-07-01T16:00:00Z");

        assert_eq!(new_york.local(winter).to_string(), "2024-01-03 12:00:00");
        assert_eq!(new_york.local(summer).to_string(), "2024-07-01 12:00:00");
        assert_eq!(new_york.to_utc(&new_york.local(summer)), Some(summer));

        // 02:30 on 2024-03-10 does not exist in New York
        let skipped = NaiveDateTime::parse_from_str("20240310023000", "%Y%m%d%H%M%S").unwrap();
        assert!(new_york.to_utc(&skipped).is_none());
    }

    #[test]
    fn missing_scan_file_uses_defaults_and_creates_layout() {
        let tmp = TempDir::new().expect("tempdir");
        let config = AppConfig::from_root(tmp.path(), "127.0.0.1:0").expect("config");

        assert_eq!(config.scan.time_zone, ScanZone::Named(Tz::UTC));
        assert_eq!(config.scan.scanner.program, "clamdscan");
        assert_eq!(config.scan.scanner.args, vec!["--fdpass".to_string()]);
        assert_eq!(config.scan.default_page_size, 10);
        assert!(tmp.path().join("data/scan-result").is_dir());
    }

    #[test]
    fn scan_file_overrides_defaults() {
        let tmp = TempDir::new().expect("tempdir");
        fs::create_dir_all(tmp.path().join("config")).unwrap();
        fs::write(
            tmp.path().join("config/scan.yml"),
            "time_zone: Asia/Shanghai\nscanner:\n  program: /usr/bin/clamscan\n  args: []\ndefault_page_size: 25\n",
        )
        .unwrap();

        let config = AppConfig::from_root(tmp.path(), "127.0.0.1:0").expect("config");
        assert_eq!(
            config.scan.time_zone,
            ScanZone::Named(chrono_tz::Asia::Shanghai)
        );
        assert_eq!(config.scan.scanner.program, "/usr/bin/clamscan");
        assert!(config.scan.scanner.args.is_empty());
        assert_eq!(config.scan.default_page_size, 25);
    }

    #[test]
    fn invalid_time_zone_fails_load() {
        let tmp = TempDir::new().expect("tempdir");
        fs::create_dir_all(tmp.path().join("config")).unwrap();
        fs::write(tmp.path().join("config/scan.yml"), "time_zone: nowhere\n").unwrap();

        assert!(AppConfig::from_root(tmp.path(), "127.0.0.1:0").is_err());
    }

    #[test]
    #[serial]
    fn load_reads_root_and_bind_from_env() {
        let tmp = TempDir::new().expect("tempdir");

        unsafe {
            env::set_var("SCAN_LEDGER_ROOT", tmp.path());
            env::set_var("SCAN_LEDGER_BIND", "127.0.0.1:0");
        }

        let config = AppConfig::load().expect("load config");
        assert_eq!(config.data_dir, tmp.path().join("data"));
        assert_eq!(config.server.addr(), "127.0.0.1:0");

        unsafe {
            env::remove_var("SCAN_LEDGER_ROOT");
            env::remove_var("SCAN_LEDGER_BIND");
        }
    }
}
