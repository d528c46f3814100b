//! 設定ファイル管理モジュール
//!
//! エミュレータの設定をJSON形式で永続化

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 設定ファイルのデフォルトファイル名
const CONFIG_FILENAME: &str = "fdrs_config.json";

/// 実行ファイルのディレクトリを取得
pub fn get_exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// 設定ファイルのパスを取得
pub fn get_config_path() -> PathBuf {
    get_exe_dir().join(CONFIG_FILENAME)
}

/// エミュレータ設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// 最後に使用したドライブ0のイメージパス
    #[serde(default)]
    pub last_disk1: Option<String>,
    /// 最後に使用したドライブ1のイメージパス
    #[serde(default)]
    pub last_disk2: Option<String>,
    /// ドライブ0をライトプロテクト扱いにする
    #[serde(default)]
    pub write_protect1: bool,
    /// ドライブ1をライトプロテクト扱いにする
    #[serde(default)]
    pub write_protect2: bool,
    /// OS本体のロードアドレス
    #[serde(default = "default_os_load_addr")]
    pub os_load_addr: u16,
    /// ブート後の実行開始アドレス
    #[serde(default = "default_exec_addr")]
    pub exec_addr: u16,
    /// FDCトレースレベル（"flow+state"形式）
    #[serde(default)]
    pub fdc_log: String,
}

fn default_os_load_addr() -> u16 { 0xD000 }
fn default_exec_addr() -> u16 { 0xC000 }

impl Default for Config {
    fn default() -> Self {
        Config {
            last_disk1: None,
            last_disk2: None,
            write_protect1: false,
            write_protect2: false,
            os_load_addr: default_os_load_addr(),
            exec_addr: default_exec_addr(),
            fdc_log: String::new(),
        }
    }
}

impl Config {
    /// 設定ファイルを読み込む（実行ファイルと同じディレクトリから）
    pub fn load() -> Self {
        Self::load_from(get_config_path())
    }

    /// 指定したパスから設定を読み込む
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Failed to parse config {:?}: {}, using defaults", path.as_ref(), e);
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        }
    }

    /// 設定ファイルを保存する（実行ファイルと同じディレクトリに）
    pub fn save(&self) -> Result<(), String> {
        self.save_to(get_config_path())
    }

    /// 指定したパスに設定を保存する
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        fs::write(path, json)
            .map_err(|e| format!("Failed to write config: {}", e))?;
        Ok(())
    }
}
