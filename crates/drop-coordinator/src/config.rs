use anyhow::anyhow;
use clap::Parser;
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{
    env,
    fs::{self, File},
    io::{Read, Write},
    path::PathBuf,
};
use time::{format_description::well_known::Iso8601, OffsetDateTime};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to Settings.toml file holding configuration options
    #[arg(short, long)]
    pub config: Option<String>,

    /// Log level to run with the service (default: info)
    #[arg(short, long)]
    pub level: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Settings {
    pub config: Option<String>,
    pub level: Option<String>,
    pub db_settings: DbSettings,
    pub api_settings: ApiSettings,
    pub drop_settings: DropDefaultsSettings,
    pub security_settings: SecuritySettings,
}

impl ConfigurableSettings for Settings {
    fn apply_cli_overrides(&mut self, cli_settings: &CliSettings) {
        if let Some(level) = &cli_settings.level {
            self.level = Some(level.clone());
        }
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("./config/local.toml")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DbSettings {
    pub data_folder: String,
    pub read_max_connections: u32,
    pub read_min_connections: u32,
    pub write_max_connections: u32,
    pub write_min_connections: u32,
    pub idle_timeout_secs: u64,
    pub acquire_timeout_secs: u64,
    pub sqlite_config: SqliteConfigSerde,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SqliteConfigSerde {
    pub mode: String,
    pub cache: String,
    pub busy_timeout_ms: u32,
    pub journal_mode: String,
    pub synchronous: String,
    pub cache_size: i32,
    pub foreign_keys: bool,
    pub wal_autocheckpoint: Option<u32>,
    pub temp_store: String,
    pub mmap_size: Option<u64>,
    pub page_size: Option<u32>,
}

impl Default for DbSettings {
    fn default() -> Self {
        DbSettings {
            data_folder: String::from("./data"),
            read_max_connections: 12,
            read_min_connections: 2,
            write_max_connections: 5,
            write_min_connections: 1,
            idle_timeout_secs: 600,   // 10 minutes
            acquire_timeout_secs: 15, // 15 seconds
            sqlite_config: SqliteConfigSerde::default(),
        }
    }
}

impl Default for SqliteConfigSerde {
    fn default() -> Self {
        Self {
            mode: "ReadWriteCreate".to_string(),
            cache: "Shared".to_string(),
            busy_timeout_ms: 5000,
            journal_mode: "WAL".to_string(),
            synchronous: "NORMAL".to_string(),
            cache_size: 1000000,
            foreign_keys: true,
            wal_autocheckpoint: Some(1000),
            temp_store: "Memory".to_string(),
            mmap_size: Some(268435456), // 256MB
            page_size: Some(4096),
        }
    }
}

impl SqliteConfigSerde {
    pub fn development() -> Self {
        Self {
            busy_timeout_ms: 10000,
            cache_size: 100000,
            ..Default::default()
        }
    }

    pub fn production() -> Self {
        Self {
            synchronous: "FULL".to_string(),
            cache_size: 2000000,
            wal_autocheckpoint: Some(10000),
            mmap_size: Some(1073741824), // 1GB
            ..Default::default()
        }
    }

    pub fn testing() -> Self {
        Self {
            mode: "Memory".to_string(),
            journal_mode: "MEMORY".to_string(),
            synchronous: "OFF".to_string(),
            temp_store: "Memory".to_string(),
            busy_timeout_ms: 1000,
            cache_size: 10000,
            wal_autocheckpoint: None,
            mmap_size: None,
            page_size: None,
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiSettings {
    pub domain: String,
    pub port: String,
    pub origins: Vec<String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            domain: String::from("127.0.0.1"),
            port: String::from("9990"),
            origins: vec![String::from("http://localhost:9990")],
        }
    }
}

/// Operator-tunable defaults that back a drop's own configuration, applied
/// when a drop doesn't override them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DropDefaultsSettings {
    /// Minimum allowed geo-fence radius, in meters.
    pub min_geo_radius_meters: f64,
    /// Maximum allowed geo-fence radius, in meters.
    pub max_geo_radius_meters: f64,
    /// Loyalty tier threshold (cumulative completed purchases) to reach silver.
    pub silver_threshold: u32,
    /// Loyalty tier threshold (cumulative completed purchases) to reach gold.
    pub gold_threshold: u32,
    /// Weight multiplier applied to a silver-tier participant's lottery weight.
    pub silver_multiplier: f64,
    /// Weight multiplier applied to a gold-tier participant's lottery weight.
    pub gold_multiplier: f64,
    /// How long an admission queue token stays `ready` before expiring unused.
    pub queue_token_ttl_secs: u64,
    /// How often the admission loop promotes `waiting` tokens to `ready`.
    pub queue_admission_interval_secs: u64,
    /// Default purchase window duration once a user is admitted past the lottery.
    pub purchase_window_secs: u64,
    /// Maximum registrations accepted from a single device fingerprint per drop.
    pub max_registrations_per_fingerprint: u32,
    /// Maximum registrations accepted from a single IP per drop.
    pub max_registrations_per_ip: u32,
    /// Minimum combined trust score (0-100) required to pass registration.
    pub trust_score_threshold: f64,
    /// Minimum fingerprint confidence (0-100) required for the fingerprint to count as valid.
    pub fingerprint_confidence_threshold: f64,
    /// Default ticket price unit applied when a drop doesn't specify one.
    pub default_ticket_price_unit: String,
    /// Default cap on tickets a single user may request, when a drop doesn't override it.
    pub default_max_tickets_per_user: u32,
    /// Default multiplier applied to primary winner count to size the backup pool.
    pub default_backup_multiplier: f64,
    /// How often the scheduled-task drainer polls for due self-invocations.
    pub scheduler_tick_interval_secs: u64,
    /// Admission queue: how many tokens may be `ready` at once, per drop.
    pub queue_ready_cap: u32,
    /// Admission queue: tokens promoted out of `waiting` per second, used to
    /// estimate a joining caller's wait time.
    pub queue_issue_rate_per_sec: f64,
    /// Ceiling a user's rollover balance is capped at, both when it's funded
    /// by a paid losing entry and on an administrative override.
    pub max_rollover_balance: u32,
}

impl Default for DropDefaultsSettings {
    fn default() -> Self {
        DropDefaultsSettings {
            min_geo_radius_meters: 50.0,
            max_geo_radius_meters: 50_000.0,
            silver_threshold: 3,
            gold_threshold: 10,
            silver_multiplier: 1.25,
            gold_multiplier: 1.5,
            queue_token_ttl_secs: 300,
            queue_admission_interval_secs: 2,
            purchase_window_secs: 900,
            max_registrations_per_fingerprint: 3,
            max_registrations_per_ip: 5,
            trust_score_threshold: 70.0,
            fingerprint_confidence_threshold: 50.0,
            default_ticket_price_unit: String::from("usd"),
            default_max_tickets_per_user: 5,
            default_backup_multiplier: 1.5,
            scheduler_tick_interval_secs: 2,
            queue_ready_cap: 200,
            queue_issue_rate_per_sec: 10.0,
            max_rollover_balance: 50,
        }
    }
}

/// Key material backing the purchase token HMAC and the hashed-IP admission
/// checks. File paths point at secrets mounted outside the repo; values are
/// wrapped in `SecretString` once loaded so they don't leak into debug output.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecuritySettings {
    pub token_secret_file: String,
    pub ip_hash_salt_file: String,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        SecuritySettings {
            token_secret_file: String::from("./creds/token_secret"),
            ip_hash_salt_file: String::from("./creds/ip_hash_salt"),
        }
    }
}

pub fn get_settings() -> Result<Settings, anyhow::Error> {
    get_settings_with_cli(Cli::parse().into())
}

pub struct CliSettings {
    pub config: Option<String>,
    pub level: Option<String>,
}

impl From<Cli> for CliSettings {
    fn from(cli: Cli) -> Self {
        Self {
            config: cli.config,
            level: cli.level,
        }
    }
}
pub trait ConfigurableSettings: Serialize + for<'de> Deserialize<'de> + Default {
    /// Apply CLI settings after loading from file
    fn apply_cli_overrides(&mut self, cli_settings: &CliSettings);

    /// Get the default config file path
    fn default_config_path() -> PathBuf {
        PathBuf::from("./config/settings.toml")
    }

    /// Get the config directory path
    fn config_directory() -> PathBuf {
        PathBuf::from("./config")
    }
}

pub fn get_settings_with_cli<T: ConfigurableSettings>(
    cli_settings: CliSettings,
) -> Result<T, anyhow::Error> {
    let mut settings = if let Some(config_path) = cli_settings.config.clone() {
        let path = PathBuf::from(config_path);

        let absolute_path = if path.is_absolute() {
            path
        } else {
            env::current_dir()?.join(path)
        };

        let file_settings = match File::open(absolute_path) {
            Ok(mut file) => {
                let mut content = String::new();
                file.read_to_string(&mut content)
                    .map_err(|e| anyhow!("Failed to read config: {}", e))?;
                toml::from_str(&content)
                    .map_err(|e| anyhow!("Failed to map config to settings: {}", e))?
            }
            Err(err) => return Err(anyhow!("Failed to find file: {}", err)),
        };
        file_settings
    } else {
        let default_path = T::default_config_path();
        match File::open(&default_path) {
            Ok(mut file) => {
                let mut content = String::new();
                file.read_to_string(&mut content)
                    .map_err(|e| anyhow!("Failed to read default config: {}", e))?;
                toml::from_str(&content)
                    .map_err(|e| anyhow!("Failed to parse default config: {}", e))?
            }
            Err(_) => {
                // Create default settings
                let default_settings = T::default();

                // Create config directory if it doesn't exist
                fs::create_dir_all(T::config_directory())
                    .map_err(|e| anyhow!("Failed to create config directory: {}", e))?;

                let toml_content = toml::to_string(&default_settings)
                    .map_err(|e| anyhow!("Failed to serialize default settings: {}", e))?;

                let mut file = fs::File::create(&default_path)
                    .map_err(|e| anyhow!("Failed to create config file: {}", e))?;
                file.write_all(toml_content.as_bytes())
                    .map_err(|e| anyhow!("Failed to write default config: {}", e))?;

                default_settings
            }
        }
    };

    settings.apply_cli_overrides(&cli_settings);

    Ok(settings)
}

pub fn setup_logger(
    level: Option<String>,
    filter_targets: Vec<String>,
) -> Result<(), fern::InitError> {
    let rust_log = get_log_level(level);
    let colors = ColoredLevelConfig::new()
        .trace(Color::White)
        .debug(Color::Cyan)
        .info(Color::Blue)
        .warn(Color::Yellow)
        .error(Color::Magenta);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{} {}] {}: {}",
                OffsetDateTime::now_utc().format(&Iso8601::DEFAULT).unwrap(),
                colors.color(record.level()),
                record.target(),
                message
            ));
        })
        .level(rust_log)
        .filter(move |metadata| {
            !filter_targets
                .iter()
                .any(|filter| metadata.target().starts_with(filter))
        })
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

pub fn get_log_level(level: Option<String>) -> LevelFilter {
    if let Some(level) = &level {
        match level.as_ref() {
            "trace" => LevelFilter::Trace,
            "debug" => LevelFilter::Debug,
            "info" => LevelFilter::Info,
            "warn" => LevelFilter::Warn,
            "error" => LevelFilter::Error,
            _ => LevelFilter::Info,
        }
    } else {
        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| String::from(""));
        match rust_log.to_lowercase().as_str() {
            "trace" => LevelFilter::Trace,
            "debug" => LevelFilter::Debug,
            "info" => LevelFilter::Info,
            "warn" => LevelFilter::Warn,
            "error" => LevelFilter::Error,
            _ => LevelFilter::Info,
        }
    }
}
