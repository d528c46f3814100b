//! フラット64KBメインメモリ
//!
//! 実機のバンク切り替えメモリはこのコアの範囲外なので、
//! ヘッドレス実行とテストにはこの素のRAMをコラボレータとして使う

use crate::bus::MemoryBus;

/// 64KBのフラットRAM
#[derive(Clone)]
pub struct Memory {
    pub ram: Box<[u8; 0x10000]>,
}

impl Default for Memory {
    fn default() -> Self {
        Memory::new()
    }
}

impl Memory {
    pub fn new() -> Self {
        Memory {
            ram: Box::new([0; 0x10000]),
        }
    }

    /// 連続領域の読み出し（ダンプ表示用）
    pub fn slice(&self, start: u16, len: usize) -> &[u8] {
        let start = start as usize;
        let end = (start + len).min(self.ram.len());
        &self.ram[start..end]
    }
}

impl MemoryBus for Memory {
    fn read_byte(&mut self, address: u16) -> u8 {
        self.ram[address as usize]
    }

    fn write_byte(&mut self, address: u16, value: u8) {
        self.ram[address as usize] = value;
    }
}
