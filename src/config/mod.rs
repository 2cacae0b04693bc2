use clap::Parser;
use std::time::Duration;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5001";
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(author, version, about = "In-memory key-value server speaking RESP", long_about = None)]
pub struct Config {
    /// Address to listen on. `:port` listens on all interfaces.
    #[arg(long, default_value = DEFAULT_LISTEN_ADDR)]
    pub listen_addr: String,

    /// How often expired keys are swept, in milliseconds.
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    pub sweep_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL.as_millis() as u64,
        }
    }
}

impl Config {
    /// The address to bind, with empty and `:port` forms filled in.
    pub fn bind_addr(&self) -> String {
        let addr = self.listen_addr.trim();
        if addr.is_empty() {
            DEFAULT_LISTEN_ADDR.to_string()
        } else if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::try_parse_from(["redis-kv-server"]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.bind_addr(), "0.0.0.0:5001");
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
    }

    #[test]
    fn parses_flags() {
        let config = Config::try_parse_from([
            "redis-kv-server",
            "--listen-addr",
            "127.0.0.1:6380",
            "--sweep-interval-ms",
            "250",
        ])
        .unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:6380");
        assert_eq!(config.sweep_interval(), Duration::from_millis(250));
    }

    #[test]
    fn port_shorthand_and_empty_address() {
        let config = Config {
            listen_addr: ":6000".to_string(),
            ..Config::default()
        };
        assert_eq!(config.bind_addr(), "0.0.0.0:6000");

        let config = Config {
            listen_addr: String::new(),
            ..Config::default()
        };
        assert_eq!(config.bind_addr(), DEFAULT_LISTEN_ADDR);
    }

    #[test]
    fn rejects_zero_sweep_interval() {
        assert!(Config::try_parse_from(["redis-kv-server", "--sweep-interval-ms", "0"]).is_err());
    }
}
