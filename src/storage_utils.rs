use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

// CONFIGURATION STRUCTS
// `config.json` in the storage directory deserializes straight into these.
// Every section has defaults, so a partial file is fine.

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SymbolConfig {
    pub list_url: String, // CSV with a "Symbol" column
    pub suffix: String,   // exchange suffix, e.g. ".NS"
    pub fallback: Vec<String>,
}

impl Default for SymbolConfig {
    fn default() -> Self {
        Self {
            list_url: "https://archives.nseindia.com/content/indices/ind_nifty500list.csv"
                .to_string(),
            suffix: ".NS".to_string(),
            fallback: FALLBACK_SYMBOLS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct QuoteConfig {
    pub lookback_days: u64,    // calendar days requested before the as-of date
    pub request_delay_ms: u64, // pause between symbols
    pub retry_once: bool,
    pub timeout_secs: u64,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            lookback_days: 7,
            request_delay_ms: 200,
            retry_once: true,
            timeout_secs: 15,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    pub file: String,
    pub details_prefix: String,
    pub sector_file: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            file: "stock_movements_history.csv".to_string(),
            details_prefix: "stock_details".to_string(),
            sector_file: "sector_movements_history.csv".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ReportConfig {
    pub moving_average_window: usize,
    pub history_rows: usize, // rows shown in the console history table
    pub sector_min_stocks: u32, // smaller sectors are left out of rankings
    pub sector_rows: usize,     // best and worst sectors shown
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            moving_average_window: 5,
            history_rows: 20,
            sector_min_stocks: 5,
            sector_rows: 5,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BackfillConfig {
    pub days_back: u32,
    pub day_delay_ms: u64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            days_back: 14,
            day_delay_ms: 1000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub symbols: SymbolConfig,
    pub quotes: QuoteConfig,
    pub history: HistoryConfig,
    pub report: ReportConfig,
    pub backfill: BackfillConfig,
}

/// Large caps used when the index constituent list cannot be downloaded.
pub const FALLBACK_SYMBOLS: &[&str] = &[
    "RELIANCE", "TCS", "HDFCBANK", "INFY", "HINDUNILVR", "ICICIBANK", "KOTAKBANK", "SBIN",
    "BHARTIARTL", "BAJFINANCE", "ITC", "ASIANPAINT", "MARUTI", "AXISBANK", "LT", "TITAN",
    "SUNPHARMA", "ULTRACEMCO", "NESTLEIND", "WIPRO", "TATAMOTORS", "HCLTECH", "ADANIENT", "ONGC",
    "NTPC", "POWERGRID", "BAJAJFINSV", "M&M", "COALINDIA", "DRREDDY", "JSWSTEEL", "TATASTEEL",
    "INDUSINDBK", "TECHM", "HINDALCO", "ADANIPORTS", "EICHERMOT", "APOLLOHOSP", "GRASIM", "CIPLA",
    "DIVISLAB", "HEROMOTOCO", "BRITANNIA", "SHREECEM", "BPCL", "TATACONSUM", "UPL", "BAJAJ-AUTO",
    "PIDILITIND", "SIEMENS",
];

// STORAGE MANAGER

#[derive(Clone)]
pub struct AsyncStorageManager {
    // Absolute path of the storage directory (e.g. ".../target/debug/storage")
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Storage directory relative to the running executable, created on
    /// first use.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> anyhow::Result<Self> {
        let exe_path = std::env::current_exe()?;

        let base_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Could not find binary directory"))?
            .join(relative_path);

        Self::new(base_dir).await
    }

    pub async fn new<P: Into<PathBuf>>(base_dir: P) -> anyhow::Result<Self> {
        let base_dir = base_dir.into();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).await?;
        }
        Ok(Self { base_dir })
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.base_dir.join(file_name)
    }

    /// Writes `bytes` to `<file_name>.tmp` and renames it over the target,
    /// so a crash mid-write never leaves a truncated file behind.
    pub async fn write_atomic(&self, file_name: &str, bytes: &[u8]) -> std::io::Result<()> {
        let final_path = self.path(file_name);
        let tmp_path = self.path(&format!("{}.tmp", file_name));

        fs::write(&tmp_path, bytes).await?;
        fs::rename(tmp_path, final_path).await?;
        Ok(())
    }

    /// Raw file contents, or `None` when the file does not exist.
    pub async fn read_optional(&self, file_name: &str) -> std::io::Result<Option<Vec<u8>>> {
        match fs::read(self.path(file_name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Serializes `data` as pretty JSON into `<filename>.json`.
    pub async fn save<T: Serialize>(&self, filename: &str, data: &T) -> anyhow::Result<()> {
        let json_bytes = serde_json::to_vec_pretty(data)?;
        self.write_atomic(&format!("{}.json", filename), &json_bytes)
            .await?;
        Ok(())
    }

    pub async fn load<T: DeserializeOwned>(&self, filename: &str) -> anyhow::Result<T> {
        let path = self.path(&format!("{}.json", filename));
        let content = fs::read(path).await?;
        let data = serde_json::from_slice(&content)?;
        Ok(data)
    }

    /// Loads `config.json`, writing the defaults out first if it is missing.
    pub async fn load_config(&self) -> anyhow::Result<AppConfig> {
        if self.read_optional("config.json").await?.is_none() {
            let config = AppConfig::default();
            self.save("config", &config).await?;
            info!("Wrote default config to {:?}", self.path("config.json"));
            return Ok(config);
        }
        self.load("config").await
    }
}
