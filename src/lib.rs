//! FDRS - Floppy disk subsystem emulator in Rust
//!
//! 1980年代8ビット機のフロッピーディスクサブシステムを実装:
//! - D88形式ディスクイメージコンテナ
//! - uPD765系フェーズ式FDCコマンドプロトコル（2ドライブ）
//! - I/Oポートマップとエッジトリガ割り込み
//! - IPL/OSブートストラップローダ

pub mod bus;
pub mod config;
pub mod d88;
pub mod fdc;
pub mod fdc_log;
pub mod io;
pub mod ipl;
pub mod memory;
