//! Engine-specific generation options (the non-policy parts of an artifact).
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MihomoOptions {
    pub mixed_port: u16,
    pub allow_lan: bool,
    /// rule / global / direct
    pub mode: String,
    pub log_level: String,
    pub ipv6: bool,
    pub external_controller: String,
    pub secret: String,
    pub unified_delay: bool,
    pub tcp_concurrent: bool,
    pub find_process_mode: String,
    pub global_client_fingerprint: String,
    pub tproxy_port: Option<u16>,
    pub dns: MihomoDns,
}

impl Default for MihomoOptions {
    fn default() -> Self {
        Self {
            mixed_port: 7890,
            allow_lan: true,
            mode: "rule".into(),
            log_level: "info".into(),
            ipv6: false,
            external_controller: "127.0.0.1:9090".into(),
            secret: String::new(),
            unified_delay: true,
            tcp_concurrent: true,
            find_process_mode: "off".into(),
            global_client_fingerprint: "chrome".into(),
            tproxy_port: None,
            dns: MihomoDns::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MihomoDns {
    pub enable: bool,
    pub listen: String,
    /// fake-ip / redir-host
    pub enhanced_mode: String,
    pub nameservers: Vec<String>,
    pub fallback: Vec<String>,
}

impl Default for MihomoDns {
    fn default() -> Self {
        Self {
            enable: true,
            listen: "0.0.0.0:53".into(),
            enhanced_mode: "fake-ip".into(),
            nameservers: vec!["223.5.5.5".into(), "119.29.29.29".into()],
            fallback: vec!["https://1.1.1.1/dns-query".into(), "https://8.8.8.8/dns-query".into()],
        }
    }
}

/// How sing-box captures traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SingBoxMode {
    #[default]
    Tun,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SingBoxOptions {
    pub mode: SingBoxMode,
    pub fake_ip: bool,
    pub mixed_port: u16,
    pub clash_api_addr: String,
    pub clash_api_secret: String,
    pub tun_stack: String,
    pub tun_mtu: u32,
    pub dns_strategy: String,
    pub log_level: String,
    /// Prepend a `sniff` action rule for the inbounds.
    pub sniff: bool,
}

impl Default for SingBoxOptions {
    fn default() -> Self {
        Self {
            mode: SingBoxMode::Tun,
            fake_ip: true,
            mixed_port: 7890,
            clash_api_addr: "127.0.0.1:9090".into(),
            clash_api_secret: String::new(),
            tun_stack: "system".into(),
            tun_mtu: 9000,
            dns_strategy: "prefer_ipv4".into(),
            log_level: "info".into(),
            sniff: true,
        }
    }
}

/// Options for both engines; each adapter reads its own half.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    pub mihomo: MihomoOptions,
    pub singbox: SingBoxOptions,
}
