//! 外部コラボレータのインタフェース
//!
//! メインメモリとCPUはこのコアの外側にある。バンク切り替え等の実装は
//! 完全に委譲され、ここからは16ビット空間のバイト読み書きと
//! プログラムカウンタの設定だけが見える

/// 16ビットアドレス空間へのバイト単位アクセス
pub trait MemoryBus {
    fn read_byte(&mut self, address: u16) -> u8;
    fn write_byte(&mut self, address: u16, value: u8);
}

/// CPU制御: ブート後の実行引き渡しにのみ使う
pub trait CpuControl {
    fn set_program_counter(&mut self, address: u16);
}
