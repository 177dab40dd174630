use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::warn;

use crate::dhcp::{DhcpConfig, DHCP_SERVER_PORT};
use crate::domain::{FILE_LEN, SNAME_LEN};
use crate::error::{ConfigError, LeaseError};
use crate::lease::LeaseAllocator;
use crate::tftp::TFTP_PORT;

const DEFAULT_INTERFACE: &str = "eth0";
const DEFAULT_SERVER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const DEFAULT_RANGE_START: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 100);
const DEFAULT_RANGE_END: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 200);
const DEFAULT_SUBNET_MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
const DEFAULT_BOOT_FILE: &str = "bootx64.efi";
const DEFAULT_TFTP_ROOT: &str = "./tftp";
const DEFAULT_HTTP_ROOT: &str = "./http";
const DEFAULT_HTTP_PORT: u16 = 8080;

/// Prefix for environment overrides, e.g. `PXEBOOT_SERVER_IP`.
pub const ENV_PREFIX: &str = "PXEBOOT_";

/// Every key accepted in the config file and as an environment override.
pub const KEYS: &[&str] = &[
    "interface",
    "server_ip",
    "range_start",
    "range_end",
    "subnet_mask",
    "boot_file",
    "tftp_server",
    "tftp_root",
    "http_root",
    "http_port",
    "tftp_port",
    "dhcp_port",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub interface: String,
    pub server_ip: Ipv4Addr,
    pub range_start: Ipv4Addr,
    pub range_end: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub boot_file: String,
    /// Name advertised in option 66. Defaults to the server address.
    pub tftp_server: Option<String>,
    pub tftp_root: PathBuf,
    pub http_root: PathBuf,
    pub http_port: u16,
    pub tftp_port: u16,
    pub dhcp_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            interface: DEFAULT_INTERFACE.to_string(),
            server_ip: DEFAULT_SERVER_IP,
            range_start: DEFAULT_RANGE_START,
            range_end: DEFAULT_RANGE_END,
            subnet_mask: DEFAULT_SUBNET_MASK,
            boot_file: DEFAULT_BOOT_FILE.to_string(),
            tftp_server: None,
            tftp_root: PathBuf::from(DEFAULT_TFTP_ROOT),
            http_root: PathBuf::from(DEFAULT_HTTP_ROOT),
            http_port: DEFAULT_HTTP_PORT,
            tftp_port: TFTP_PORT,
            dhcp_port: DHCP_SERVER_PORT,
        }
    }
}

impl ServerConfig {
    /// Defaults, then the config file (if given), then `PXEBOOT_*` variables.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = config_path {
            config.apply_file(path)?;
        }

        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.apply_str(&content)
    }

    /// Apply `key = value` lines. Blank lines and `#` comments are skipped.
    pub fn apply_str(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::Invalid(format!("Expected key = value: {}", line)));
            };

            let key = key.trim();
            if !self.set(key, value.trim())? {
                warn!("Ignoring unknown config key: {}", key);
            }
        }
        Ok(())
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, called with each `PXEBOOT_<KEY>` name.
    pub fn apply_env_with(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        for key in KEYS {
            let name = format!("{}{}", ENV_PREFIX, key.to_uppercase());
            if let Some(value) = lookup(&name) {
                self.set(key, value.trim())?;
            }
        }
        Ok(())
    }

    /// Set one key. Returns `false` when the key is not recognized.
    pub fn set(&mut self, key: &str, value: &str) -> Result<bool, ConfigError> {
        match key {
            "interface" => self.interface = value.to_string(),
            "server_ip" => self.server_ip = parse_value(key, value)?,
            "range_start" => self.range_start = parse_value(key, value)?,
            "range_end" => self.range_end = parse_value(key, value)?,
            "subnet_mask" => self.subnet_mask = parse_value(key, value)?,
            "boot_file" => self.boot_file = value.to_string(),
            "tftp_server" => {
                self.tftp_server = (!value.is_empty()).then(|| value.to_string())
            }
            "tftp_root" => self.tftp_root = PathBuf::from(value),
            "http_root" => self.http_root = PathBuf::from(value),
            "http_port" => self.http_port = parse_value(key, value)?,
            "tftp_port" => self.tftp_port = parse_value(key, value)?,
            "dhcp_port" => self.dhcp_port = parse_value(key, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Check the settings hang together before any service is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mask = u32::from(self.subnet_mask);
        if mask.leading_ones() + mask.trailing_zeros() != 32 {
            return Err(ConfigError::Invalid(format!(
                "Subnet mask {} is not contiguous",
                self.subnet_mask
            )));
        }

        let start = u32::from(self.range_start);
        let end = u32::from(self.range_end);
        if start > end {
            return Err(ConfigError::Invalid(format!(
                "Range start {} is after range end {}",
                self.range_start, self.range_end
            )));
        }

        let network = u32::from(self.server_ip) & mask;
        if start & mask != network || end & mask != network {
            return Err(ConfigError::Invalid(format!(
                "Range {} - {} is outside the subnet of {}/{}",
                self.range_start, self.range_end, self.server_ip, self.subnet_mask
            )));
        }

        // /31 and /32 have no network or broadcast address to avoid.
        let broadcast = network | !mask;
        if mask.leading_ones() <= 30 && (start == network || end == broadcast) {
            return Err(ConfigError::Invalid(format!(
                "Range {} - {} includes the network or broadcast address of {}/{}",
                self.range_start, self.range_end, self.server_ip, self.subnet_mask
            )));
        }

        let server = u32::from(self.server_ip);
        if (start..=end).contains(&server) {
            return Err(ConfigError::Invalid(format!(
                "Server address {} lies inside the range {} - {}",
                self.server_ip, self.range_start, self.range_end
            )));
        }

        if self.boot_file.is_empty() || self.boot_file.len() > FILE_LEN {
            return Err(ConfigError::InvalidValue {
                key: "boot_file".to_string(),
                value: self.boot_file.clone(),
            });
        }

        if let Some(name) = &self.tftp_server {
            if name.len() > SNAME_LEN {
                return Err(ConfigError::InvalidValue {
                    key: "tftp_server".to_string(),
                    value: name.clone(),
                });
            }
        }

        Ok(())
    }

    pub fn dhcp_config(&self) -> DhcpConfig {
        let mut config = DhcpConfig::new(
            self.interface.clone(),
            self.server_ip,
            self.subnet_mask,
            self.boot_file.clone(),
        );
        config.bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.dhcp_port);
        if let Some(name) = &self.tftp_server {
            config.tftp_server = name.clone();
        }
        config
    }

    pub fn lease_allocator(&self) -> Result<LeaseAllocator, LeaseError> {
        LeaseAllocator::new(self.range_start, self.range_end)
    }

    pub fn tftp_bind_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.tftp_port))
    }

    pub fn http_bind_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.http_port))
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
