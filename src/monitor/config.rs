// Check configuration
//
// Two inputs: the line-oriented check file (groups, checks, proxy and mail
// sender) and an optional TOML file with run settings.
//
//   # comment
//   !socks.example.com:1080          proxy for following checks (!direct clears)
//   =smtp.example.com:587:certs@example.com:user:secret
//   @ops@example.com                  opens a notification group
//   www.example.com:443:tls:14d[:sha512-hex]

use super::types::{NotificationGroup, Protocol, ServerCheck};
use crate::error::{Error, Result};
use crate::utils::ProxyConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Outgoing mail settings (`=` line)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailConfig {
    pub host: String,
    pub port: u16,
    pub from: String,
    pub username: String,
    pub password: String,
}

/// Parsed check file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckConfig {
    pub groups: Vec<NotificationGroup>,
    pub mail: Option<MailConfig>,
}

impl CheckConfig {
    /// Load and parse a check file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileSystem {
            path: path.display().to_string(),
            source: e,
        })?;
        parse_check_config(&content)
    }

    pub fn check_count(&self) -> usize {
        self.groups.iter().map(|g| g.checks.len()).sum()
    }
}

/// Parse a warning lead time: `<n>[s|m|h|d|w]`, bare numbers are seconds
pub fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    let value = value.trim().to_lowercase();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);

    let amount: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration: {:?}", value))?;
    let factor = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        "w" => 7 * 86_400,
        _ => return Err(format!("invalid duration unit: {:?}", unit)),
    };

    amount
        .checked_mul(factor)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration out of range: {:?}", value))
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn parse_check_line(
    line: &str,
    proxy: &Option<Arc<ProxyConfig>>,
) -> std::result::Result<ServerCheck, String> {
    let fields: Vec<&str> = line.split(':').map(str::trim).collect();
    if fields.len() < 4 || fields.len() > 5 {
        return Err("format error, expected host:param:protocol:deadline[:hash]".to_string());
    }

    let hostname = fields[0].to_lowercase();
    let param = fields[1];
    if hostname.is_empty() {
        return Err("empty hostname".to_string());
    }
    if param.is_empty() {
        return Err("empty parameter".to_string());
    }

    let protocol: Protocol = fields[2].parse()?;
    if protocol.is_network() && param.parse::<u16>().is_err() {
        return Err(format!("invalid port number: {}", param));
    }

    let deadline = parse_duration(fields[3])?;
    let mut check = ServerCheck::new(&hostname, param, protocol, deadline);

    if let Some(hash) = fields.get(4).filter(|h| !h.is_empty()) {
        if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err("hash must be hexadecimal".to_string());
        }
        check = check.with_expected_hash(hash);
    }

    if protocol.is_network() {
        check = check.with_proxy(proxy.clone());
    }
    Ok(check)
}

fn parse_mail_line(line: &str) -> std::result::Result<MailConfig, String> {
    // The password is the remainder and may contain ':'
    let fields: Vec<&str> = line.splitn(5, ':').collect();
    if fields.len() != 5 {
        return Err("format error, expected host:port:from:username:password".to_string());
    }

    let port = fields[1]
        .trim()
        .parse::<u16>()
        .map_err(|_| format!("invalid mail port: {}", fields[1].trim()))?;

    Ok(MailConfig {
        host: fields[0].trim().to_lowercase(),
        port,
        from: fields[2].trim().to_lowercase(),
        username: fields[3].trim().to_string(),
        password: fields[4].trim().to_string(),
    })
}

/// Parse check file content
///
/// Every malformed line is reported; any error rejects the whole file.
pub fn parse_check_config(content: &str) -> Result<CheckConfig> {
    let mut groups: Vec<NotificationGroup> = Vec::new();
    let mut mail = None;
    let mut proxy: Option<Arc<ProxyConfig>> = None;
    let mut errors = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix('!') {
            match ProxyConfig::parse(rest) {
                Ok(parsed) => proxy = parsed.map(Arc::new),
                Err(e) => errors.push(format!("line {}: {}", line_no, e)),
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix('=') {
            match parse_mail_line(rest) {
                Ok(parsed) => mail = Some(parsed),
                Err(e) => errors.push(format!("line {}: {}", line_no, e)),
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix('@') {
            let recipient = rest.trim().to_lowercase();
            if recipient.is_empty() || !recipient.contains('@') {
                errors.push(format!("line {}: invalid recipient address", line_no));
                continue;
            }
            groups.push(NotificationGroup::new(Some(recipient)));
            continue;
        }

        match parse_check_line(line, &proxy) {
            Ok(mut check) => {
                if groups.is_empty() {
                    groups.push(NotificationGroup::new(None));
                }
                let group_index = groups.len() - 1;
                check.group_index = group_index;
                groups[group_index].push(check);
            }
            Err(e) => errors.push(format!("line {}: {}", line_no, e)),
        }
    }

    if !errors.is_empty() {
        return Err(Error::Config { errors });
    }

    for group in &mut groups {
        group.outstanding = group.checks.len();
    }

    Ok(CheckConfig { groups, mail })
}

/// Run settings, loaded from TOML
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Concurrent checks
    pub workers: usize,
    /// Per-check retrieval timeout
    pub timeout_seconds: u64,
    /// Deduplicate identical checks within a run
    pub use_cache: bool,
    /// 0 silent, 1 process errors, 2 errors and status
    pub debug: u8,
    /// 0 silent, 1 failed checks, 2 every check
    pub verbose: u8,
    pub mail_template: Option<PathBuf>,
    /// Extra PEM trust anchors, used instead of the bundled roots
    pub ca_bundle: Option<PathBuf>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            workers: 10,
            timeout_seconds: 10,
            use_cache: true,
            debug: 1,
            verbose: 1,
            mail_template: None,
            ca_bundle: None,
        }
    }
}

impl RunSettings {
    /// Load settings from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileSystem {
            path: path.display().to_string(),
            source: e,
        })?;
        let settings: RunSettings = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Create example settings file
    pub fn create_example<P: AsRef<Path>>(path: P) -> Result<()> {
        let toml = toml::to_string_pretty(&Self::default())?;
        std::fs::write(path, toml)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::config("workers must be at least 1"));
        }
        if self.timeout_seconds == 0 {
            return Err(Error::config("timeout must be at least 1 second"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}
