//! I/Oポートバスと割り込みアダプタ
//!
//! 固定ポートをFDCエンジンの操作へマップし、コマンド完了のたびに
//! 共有割り込み要求レジスタのFDCビットを立てる（エッジトリガ）
//! CPU側は (requests & !mask) を観測し、制御ポートへの書き込みで
//! 要求ビットをクリアする

use crate::fdc::FdcEngine;
use crate::fdc_log;

/// コマンド（書き込み）/ステータス（読み出し）レジスタ
pub const PORT_FDC_COMMAND: u8 = 0xD8;
/// データレジスタ（読み書き）
pub const PORT_FDC_DATA: u8 = 0xD9;
/// 割り込み制御: 読み出し=マスク後の要求、書き込み=要求ビットのクリア
pub const PORT_IRQ_CONTROL: u8 = 0xDA;
/// 割り込みマスク（読み書き）
pub const PORT_IRQ_MASK: u8 = 0xDB;

/// 割り込み源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqSource {
    Vblank,
    Timer,
    Keyboard,
    Fdc,
}

impl IrqSource {
    /// 要求レジスタ内のビット
    pub fn bit(&self) -> u8 {
        match self {
            IrqSource::Vblank => 0x01,
            IrqSource::Timer => 0x02,
            IrqSource::Keyboard => 0x04,
            IrqSource::Fdc => 0x08,
        }
    }
}

/// 共有のマスク可能な割り込み要求レジスタ
#[derive(Debug, Default, Clone)]
pub struct IrqRegister {
    requests: u8,
    mask: u8,
}

impl IrqRegister {
    pub fn new() -> Self {
        IrqRegister::default()
    }

    /// 要求ビットを立てる
    pub fn request(&mut self, source: IrqSource) {
        self.requests |= source.bit();
    }

    /// 書き込まれたビットの要求をクリアする
    pub fn acknowledge(&mut self, bits: u8) {
        self.requests &= !bits;
    }

    pub fn set_mask(&mut self, mask: u8) {
        self.mask = mask;
    }

    pub fn mask(&self) -> u8 {
        self.mask
    }

    /// CPUが観測する値
    pub fn pending(&self) -> u8 {
        self.requests & !self.mask
    }

    /// マスク前の生の要求ビット
    pub fn raw_requests(&self) -> u8 {
        self.requests
    }
}

/// ポートバス本体
///
/// エンジンとIRQレジスタを所有し、エンジン呼び出し後に
/// ラッチされたIRQエッジを要求レジスタへ移す
pub struct IoBus {
    pub fdc: FdcEngine,
    pub irq: IrqRegister,
}

impl Default for IoBus {
    fn default() -> Self {
        IoBus::new()
    }
}

impl IoBus {
    pub fn new() -> Self {
        IoBus {
            fdc: FdcEngine::new(),
            irq: IrqRegister::new(),
        }
    }

    /// ポート読み出し。未マップポートは0xFF
    pub fn io_read(&mut self, port: u8) -> u8 {
        match port {
            PORT_FDC_COMMAND => self.fdc.read_status(),
            PORT_FDC_DATA => {
                let value = self.fdc.read_data();
                self.sync_irq();
                value
            }
            PORT_IRQ_CONTROL => self.irq.pending(),
            PORT_IRQ_MASK => self.irq.mask(),
            _ => 0xFF,
        }
    }

    /// ポート書き込み。未マップポートは無視
    pub fn io_write(&mut self, port: u8, value: u8) {
        match port {
            PORT_FDC_COMMAND => {
                self.fdc.send_command(value);
                self.sync_irq();
            }
            PORT_FDC_DATA => {
                self.fdc.send_data(value);
                self.sync_irq();
            }
            PORT_IRQ_CONTROL => self.irq.acknowledge(value),
            PORT_IRQ_MASK => self.irq.set_mask(value),
            _ => {}
        }
    }

    /// エンジンのIRQエッジを要求レジスタへ反映する
    fn sync_irq(&mut self) {
        if self.fdc.take_irq() {
            fdc_log::log_flow("IRQ raised (fdc)");
            self.irq.request(IrqSource::Fdc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fdc::{CMD_SEEK, CMD_SENSE_INTERRUPT_STATUS};

    #[test]
    fn test_port_map_command_cycle() {
        let mut bus = IoBus::new();
        // Seek: コマンド + パラメータ2バイト
        bus.io_write(PORT_FDC_COMMAND, CMD_SEEK);
        assert_eq!(bus.io_read(PORT_FDC_COMMAND), 0x90);
        bus.io_write(PORT_FDC_DATA, 0x00);
        bus.io_write(PORT_FDC_DATA, 0x05);
        assert_eq!(bus.io_read(PORT_FDC_COMMAND), 0x00);
        assert_eq!(bus.fdc.current_track(0), 5);
        // 完了でFDCビットが立つ
        assert_eq!(bus.io_read(PORT_IRQ_CONTROL), IrqSource::Fdc.bit());
    }

    #[test]
    fn test_irq_raised_on_result_drain() {
        let mut bus = IoBus::new();
        bus.io_write(PORT_FDC_COMMAND, CMD_SENSE_INTERRUPT_STATUS);
        // SenseInterruptStatusの完了は割り込みを生まない
        assert_eq!(bus.io_read(PORT_FDC_DATA), 0x80);
        assert_eq!(bus.io_read(PORT_FDC_DATA), 0x00);
        assert_eq!(bus.io_read(PORT_IRQ_CONTROL), 0);
    }

    #[test]
    fn test_irq_acknowledge_clears_request() {
        let mut bus = IoBus::new();
        bus.io_write(PORT_FDC_COMMAND, CMD_SEEK);
        bus.io_write(PORT_FDC_DATA, 0x00);
        bus.io_write(PORT_FDC_DATA, 0x01);
        assert_ne!(bus.io_read(PORT_IRQ_CONTROL), 0);
        // 制御ポートへの書き込みで要求クリア
        bus.io_write(PORT_IRQ_CONTROL, IrqSource::Fdc.bit());
        assert_eq!(bus.io_read(PORT_IRQ_CONTROL), 0);
    }

    #[test]
    fn test_irq_mask_hides_but_keeps_request() {
        let mut bus = IoBus::new();
        bus.io_write(PORT_IRQ_MASK, IrqSource::Fdc.bit());
        bus.io_write(PORT_FDC_COMMAND, CMD_SEEK);
        bus.io_write(PORT_FDC_DATA, 0x00);
        bus.io_write(PORT_FDC_DATA, 0x01);
        assert_eq!(bus.io_read(PORT_IRQ_CONTROL), 0);
        assert_eq!(bus.irq.raw_requests(), IrqSource::Fdc.bit());
        // マスク解除で見えるようになる
        bus.io_write(PORT_IRQ_MASK, 0x00);
        assert_eq!(bus.io_read(PORT_IRQ_CONTROL), IrqSource::Fdc.bit());
    }

    #[test]
    fn test_edge_triggered_single_request() {
        let mut bus = IoBus::new();
        bus.io_write(PORT_FDC_COMMAND, CMD_SEEK);
        bus.io_write(PORT_FDC_DATA, 0x00);
        bus.io_write(PORT_FDC_DATA, 0x02);
        bus.io_write(PORT_IRQ_CONTROL, IrqSource::Fdc.bit());
        // ステータスポーリングでは再度立たない
        bus.io_read(PORT_FDC_COMMAND);
        bus.io_read(PORT_FDC_COMMAND);
        assert_eq!(bus.io_read(PORT_IRQ_CONTROL), 0);
    }

    #[test]
    fn test_unmapped_ports() {
        let mut bus = IoBus::new();
        assert_eq!(bus.io_read(0x00), 0xFF);
        bus.io_write(0x00, 0x12); // 副作用なし
        assert_eq!(bus.io_read(PORT_IRQ_CONTROL), 0);
    }

    #[test]
    fn test_other_sources_share_register() {
        let mut bus = IoBus::new();
        bus.irq.request(IrqSource::Vblank);
        bus.irq.request(IrqSource::Keyboard);
        assert_eq!(
            bus.io_read(PORT_IRQ_CONTROL),
            IrqSource::Vblank.bit() | IrqSource::Keyboard.bit()
        );
        bus.io_write(PORT_IRQ_CONTROL, IrqSource::Vblank.bit());
        assert_eq!(bus.io_read(PORT_IRQ_CONTROL), IrqSource::Keyboard.bit());
    }
}
