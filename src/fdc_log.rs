//! FDCトレースログ
//!
//! 原則:
//! 1. ログは「現象」ではなく「判断」を記録
//! 2. 状態遷移のみ記録（毎回のポートI/Oは記録しない）
//! 3. レベル分離: FLOW / STATE / DATA

use std::sync::atomic::{AtomicU32, Ordering};

bitflags::bitflags! {
    /// ログカテゴリ
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FdcLogLevel: u32 {
        /// L1: 何が起きているか（コマンド・ブートイベント、人間向け）
        const FLOW  = 0b001;
        /// L2: フェーズ遷移（開発者向け）
        const STATE = 0b010;
        /// L3: リザルト/パラメータの生バイト（短時間のみ）
        const DATA  = 0b100;
    }
}

/// グローバルログレベル
static LOG_LEVEL: AtomicU32 = AtomicU32::new(0);

/// ログレベルを設定
pub fn set_log_level(level: FdcLogLevel) {
    LOG_LEVEL.store(level.bits(), Ordering::Relaxed);
}

/// 現在のログレベルを取得
pub fn get_log_level() -> FdcLogLevel {
    FdcLogLevel::from_bits_truncate(LOG_LEVEL.load(Ordering::Relaxed))
}

/// ログレベルが有効かチェック
#[inline]
pub fn is_enabled(flag: FdcLogLevel) -> bool {
    (LOG_LEVEL.load(Ordering::Relaxed) & flag.bits()) != 0
}

/// "flow+state" のような+区切り文字列をパースする
pub fn parse_level(s: &str) -> FdcLogLevel {
    let mut level = FdcLogLevel::empty();
    for part in s.to_lowercase().split('+') {
        match part.trim() {
            "none" => {}
            "flow" => level |= FdcLogLevel::FLOW,
            "state" => level |= FdcLogLevel::STATE,
            "data" => level |= FdcLogLevel::DATA,
            "all" => level = FdcLogLevel::FLOW | FdcLogLevel::STATE | FdcLogLevel::DATA,
            _ => {}
        }
    }
    level
}

/// コマンド受理（FLOW）
pub fn log_command(opcode: u8, name: &str) {
    if is_enabled(FdcLogLevel::FLOW) {
        println!("[FDC] Command {:02X} ({})", opcode, name);
    }
}

/// FLOWイベント（ブート進行・書き込み拒否など）
pub fn log_flow(message: &str) {
    if is_enabled(FdcLogLevel::FLOW) {
        println!("[FDC] {}", message);
    }
}

/// フェーズ遷移（STATE）
pub fn log_phase(phase: &str) {
    if is_enabled(FdcLogLevel::STATE) {
        println!("[FDC] Phase -> {}", phase);
    }
}

/// リザルトバイト列（DATA）
pub fn log_result(bytes: &[u8]) {
    if is_enabled(FdcLogLevel::DATA) {
        let hex: Vec<String> = bytes.iter().map(|b| format!("{:02X}", b)).collect();
        println!("[FDC] Result [{}]", hex.join(" "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("none"), FdcLogLevel::empty());
        assert_eq!(parse_level("flow"), FdcLogLevel::FLOW);
        assert_eq!(
            parse_level("flow+state"),
            FdcLogLevel::FLOW | FdcLogLevel::STATE
        );
        assert_eq!(
            parse_level("all"),
            FdcLogLevel::FLOW | FdcLogLevel::STATE | FdcLogLevel::DATA
        );
        assert_eq!(parse_level("garbage"), FdcLogLevel::empty());
    }

    #[test]
    fn test_log_level() {
        set_log_level(FdcLogLevel::FLOW | FdcLogLevel::STATE);
        assert_eq!(get_log_level(), FdcLogLevel::FLOW | FdcLogLevel::STATE);
        assert!(is_enabled(FdcLogLevel::FLOW));
        assert!(is_enabled(FdcLogLevel::STATE));
        assert!(!is_enabled(FdcLogLevel::DATA));
        set_log_level(FdcLogLevel::empty());
    }
}
