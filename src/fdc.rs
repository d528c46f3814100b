//! フロッピーディスクコントローラ（FDC）エンジン
//!
//! uPD765系のフェーズ式コマンドプロトコルを実装
//! Idle -> Command（パラメータ受理）-> Execution -> Result（リザルトFIFO排出）
//!
//! メディア不在・セクタ不一致などの周辺機器レベルの失敗はすべて
//! リザルトバイト（0x40系コード）とステータスビットで返し、
//! ホスト側に例外として見せない

use std::collections::VecDeque;

use crate::d88::{DiskMedia, SectorAddress};
use crate::fdc_log;

bitflags::bitflags! {
    /// メインステータスレジスタのビット
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FdcStatus: u8 {
        /// コマンド処理中
        const BUSY = 0x10;
        /// ドライブレディ
        const DRIVE_READY = 0x20;
        /// 転送完了（リザルトフェーズ）
        const TRANSFER_COMPLETE = 0x40;
        /// データレジスタ転送要求
        const DATA_REQUEST = 0x80;
    }
}

// コマンドオペコード（下位5ビットで判別）
pub const CMD_SPECIFY: u8 = 0x03;
pub const CMD_SENSE_DRIVE_STATUS: u8 = 0x04;
pub const CMD_WRITE_DATA: u8 = 0x05;
pub const CMD_READ_DATA: u8 = 0x06;
pub const CMD_RECALIBRATE: u8 = 0x07;
pub const CMD_SENSE_INTERRUPT_STATUS: u8 = 0x08;
pub const CMD_READ_ID: u8 = 0x0A;
pub const CMD_FORMAT_TRACK: u8 = 0x0D;
pub const CMD_SEEK: u8 = 0x0F;

/// 物理ドライブスロット数
pub const DRIVE_SLOTS: usize = 2;
/// コマンドで指定可能なユニット数（セレクタビット0-1）
const UNIT_COUNT: usize = 4;

/// コマンドのライフサイクルフェーズ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// コマンド待ち
    Idle,
    /// パラメータバイト受理中（残り needed バイト）
    Command { needed: usize },
    /// WriteDataペイロード受理中（残り needed バイト）
    Execution { needed: usize },
    /// リザルトFIFO排出中
    Result,
}

fn command_name(opcode: u8) -> &'static str {
    match opcode & 0x1F {
        CMD_SPECIFY => "Specify",
        CMD_SENSE_DRIVE_STATUS => "SenseDriveStatus",
        CMD_WRITE_DATA => "WriteData",
        CMD_READ_DATA => "ReadData",
        CMD_RECALIBRATE => "Recalibrate",
        CMD_SENSE_INTERRUPT_STATUS => "SenseInterruptStatus",
        CMD_READ_ID => "ReadID",
        CMD_FORMAT_TRACK => "FormatTrack",
        CMD_SEEK => "Seek",
        _ => "Invalid",
    }
}

/// FDCエンジン本体
///
/// 厳密にシングルコマンド: 並行コマンドは存在せず、順序付けは
/// フェーズフィールドのみで強制される（ロック不使用）
pub struct FdcEngine {
    phase: Phase,
    /// 受理中/直前のコマンドオペコード
    opcode: u8,
    /// パラメータバッファ
    params: Vec<u8>,
    /// WriteDataペイロードバッファ
    payload: Vec<u8>,
    /// リザルトFIFO
    results: VecDeque<u8>,
    status: FdcStatus,
    /// completeCommandでセット、SenseInterruptStatusで1回だけクリア
    pending_interrupt: bool,
    /// アダプタが取り出すエッジトリガIRQ
    irq_edge: bool,
    /// 最後にアドレスされたユニット
    current_drive: usize,
    /// ユニットごとのヘッド位置（コマンドをまたいで保持）
    track: [u8; UNIT_COUNT],
    head: [u8; UNIT_COUNT],
    sector: [u8; UNIT_COUNT],
    /// ドライブスロット（0/1のみ実体あり）
    drives: [Option<Box<dyn DiskMedia>>; DRIVE_SLOTS],
}

impl Default for FdcEngine {
    fn default() -> Self {
        FdcEngine::new()
    }
}

impl FdcEngine {
    pub fn new() -> Self {
        FdcEngine {
            phase: Phase::Idle,
            opcode: 0,
            params: Vec::new(),
            payload: Vec::new(),
            results: VecDeque::new(),
            status: FdcStatus::empty(),
            pending_interrupt: false,
            irq_edge: false,
            current_drive: 0,
            track: [0; UNIT_COUNT],
            head: [0; UNIT_COUNT],
            sector: [0; UNIT_COUNT],
            drives: [None, None],
        }
    }

    /// 一時状態をすべてクリアする。マウント済みメディアは保持
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.opcode = 0;
        self.params.clear();
        self.payload.clear();
        self.results.clear();
        self.status = FdcStatus::empty();
        self.pending_interrupt = false;
        self.irq_edge = false;
        self.current_drive = 0;
        self.track = [0; UNIT_COUNT];
        self.head = [0; UNIT_COUNT];
        self.sector = [0; UNIT_COUNT];
    }

    /// メディアをスロットへマウントする（アトミックな差し替え）
    pub fn mount(&mut self, drive: usize, media: Box<dyn DiskMedia>) {
        if drive < DRIVE_SLOTS {
            self.drives[drive] = Some(media);
        }
    }

    /// メディアを取り出す
    pub fn eject(&mut self, drive: usize) -> Option<Box<dyn DiskMedia>> {
        if drive < DRIVE_SLOTS {
            self.drives[drive].take()
        } else {
            None
        }
    }

    /// マウント中メディアの参照（検査用）
    pub fn media(&self, drive: usize) -> Option<&dyn DiskMedia> {
        self.drives.get(drive)?.as_deref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn pending_interrupt(&self) -> bool {
        self.pending_interrupt
    }

    pub fn current_track(&self, drive: usize) -> u8 {
        self.track[drive & (UNIT_COUNT - 1)]
    }

    /// ユニットの (track, head, sector) 位置
    pub fn current_position(&self, drive: usize) -> (u8, u8, u8) {
        let unit = drive & (UNIT_COUNT - 1);
        (self.track[unit], self.head[unit], self.sector[unit])
    }

    /// completeCommandで立てたIRQエッジを取り出す（取り出しでクリア）
    pub fn take_irq(&mut self) -> bool {
        std::mem::take(&mut self.irq_edge)
    }

    /// コマンドレジスタ書き込み
    pub fn send_command(&mut self, opcode: u8) {
        fdc_log::log_command(opcode, command_name(opcode));
        self.opcode = opcode;
        self.params.clear();
        self.payload.clear();
        self.results.clear();
        self.status = FdcStatus::BUSY;

        match opcode & 0x1F {
            CMD_READ_DATA | CMD_WRITE_DATA => self.await_params(8),
            CMD_FORMAT_TRACK => self.await_params(5),
            CMD_SPECIFY => self.await_params(2),
            CMD_SENSE_DRIVE_STATUS => self.await_params(1),
            CMD_SEEK => self.await_params(2),
            // 即時実行コマンド
            CMD_READ_ID => self.exec_read_id(),
            CMD_RECALIBRATE => self.exec_recalibrate(),
            CMD_SENSE_INTERRUPT_STATUS => self.exec_sense_interrupt(),
            _ => self.complete_command(),
        }
    }

    /// データレジスタ書き込み
    /// DATA_REQUESTが立っている間だけ受理する
    pub fn send_data(&mut self, value: u8) {
        if !self.status.contains(FdcStatus::DATA_REQUEST) {
            return;
        }
        match self.phase {
            Phase::Command { needed } => {
                self.params.push(value);
                if self.params.len() >= needed {
                    self.execute_command();
                }
            }
            Phase::Execution { needed } => {
                self.payload.push(value);
                if self.payload.len() >= needed {
                    self.finish_write();
                }
            }
            _ => {}
        }
    }

    /// ステータスレジスタ読み出し（副作用なし）
    pub fn read_status(&self) -> u8 {
        self.status.bits()
    }

    /// データレジスタ読み出し: リザルトFIFOの先頭を取り出す
    /// 最後の1バイトを取り出した時点でコマンド完了となる
    pub fn read_data(&mut self) -> u8 {
        match self.results.pop_front() {
            Some(value) => {
                if self.results.is_empty() {
                    self.complete_command();
                }
                value
            }
            None => 0xFF,
        }
    }

    fn await_params(&mut self, needed: usize) {
        self.status = FdcStatus::BUSY | FdcStatus::DATA_REQUEST;
        self.phase = Phase::Command { needed };
        fdc_log::log_phase("Command");
    }

    fn enter_result_phase(&mut self) {
        self.status = FdcStatus::DATA_REQUEST | FdcStatus::TRANSFER_COMPLETE;
        self.phase = Phase::Result;
        fdc_log::log_phase("Result");
        let bytes: Vec<u8> = self.results.iter().copied().collect();
        fdc_log::log_result(&bytes);
    }

    /// コマンド完了: ステータス全クリア、Idleへ戻り、割り込みを要求する
    /// SenseInterruptStatusは割り込みの応答側なので新たな割り込みを立てない
    fn complete_command(&mut self) {
        self.status = FdcStatus::empty();
        self.phase = Phase::Idle;
        fdc_log::log_phase("Idle");
        if self.opcode & 0x1F != CMD_SENSE_INTERRUPT_STATUS {
            self.pending_interrupt = true;
            self.irq_edge = true;
        }
    }

    /// パラメータが揃ったコマンドの実行
    fn execute_command(&mut self) {
        match self.opcode & 0x1F {
            CMD_READ_DATA => self.exec_read(),
            CMD_WRITE_DATA => self.exec_write(),
            CMD_SENSE_DRIVE_STATUS => self.exec_sense_drive_status(),
            CMD_SEEK => self.exec_seek(),
            // FormatTrack/Specify: パラメータ消費のみでリザルトなし
            _ => self.complete_command(),
        }
    }

    /// ユニットセレクタからドライブ番号とヘッドを取り出す
    fn decode_unit(selector: u8) -> (usize, u8) {
        ((selector & 0x03) as usize, (selector >> 2) & 0x01)
    }

    /// ReadData/WriteData共通: ユニット解決とヘッド位置更新
    /// 戻り値は (drive, side, 対象セクタアドレス)
    fn resolve_transfer(&mut self) -> (usize, u8, SectorAddress) {
        let (drive, side) = Self::decode_unit(self.params[0]);
        let addr = SectorAddress::new(
            self.params[1],
            self.params[2],
            self.params[3],
            self.params[4],
        );
        self.current_drive = drive;
        self.track[drive] = addr.cylinder;
        self.head[drive] = side;
        self.sector[drive] = addr.record;
        (drive, side, addr)
    }

    fn exec_read(&mut self) {
        let (drive, side, addr) = self.resolve_transfer();
        match self.drives.get(drive).and_then(|d| d.as_deref()) {
            None => {
                // メディア不在はセクタ不一致と区別できない形で返す
                self.results.extend([0x40, 0, 0, 0, 0, 0, 0]);
            }
            Some(media) => match media.read_sector(addr.cylinder, side, &addr) {
                Some(data) => {
                    self.results.extend([
                        0x00,
                        addr.cylinder,
                        addr.head,
                        addr.record,
                        addr.size_code,
                        0,
                        0,
                    ]);
                    self.results.extend(data.iter().copied());
                }
                None => {
                    self.results.extend([
                        0x40,
                        addr.cylinder,
                        addr.head,
                        addr.record,
                        addr.size_code,
                        0,
                        0,
                    ]);
                }
            },
        }
        self.enter_result_phase();
    }

    fn exec_write(&mut self) {
        let (drive, _side, addr) = self.resolve_transfer();
        if self.drives.get(drive).and_then(|d| d.as_ref()).is_none() {
            self.results.extend([0x40, 0, 0, 0, 0, 0, 0]);
            self.enter_result_phase();
            return;
        }
        // ペイロードはsize_codeの公称長ぶん受け取る
        // 実際の格納長への切り詰め/ゼロ埋めはメディア側が行う
        self.payload.clear();
        self.status = FdcStatus::BUSY | FdcStatus::DATA_REQUEST;
        self.phase = Phase::Execution {
            needed: addr.byte_size(),
        };
        fdc_log::log_phase("Execution");
    }

    /// WriteDataペイロードが揃った後の実書き込み
    fn finish_write(&mut self) {
        let (drive, side) = Self::decode_unit(self.params[0]);
        let addr = SectorAddress::new(
            self.params[1],
            self.params[2],
            self.params[3],
            self.params[4],
        );
        let ok = match self.drives.get_mut(drive).and_then(|d| d.as_deref_mut()) {
            Some(media) => media.write_sector(addr.cylinder, side, &addr, &self.payload),
            None => false,
        };
        // ライトプロテクト・不一致も0x40系コードで返す
        let st0 = if ok { 0x00 } else { 0x40 };
        self.results.extend([
            st0,
            addr.cylinder,
            addr.head,
            addr.record,
            addr.size_code,
            0,
            0,
        ]);
        self.enter_result_phase();
    }

    fn exec_sense_drive_status(&mut self) {
        let (drive, _side) = Self::decode_unit(self.params[0]);
        let media = self.drives.get(drive).and_then(|d| d.as_deref());
        let mut st3 = 0u8;
        if media.is_some() {
            st3 |= 0x20; // Ready
        }
        if media.map(|m| m.disk_status().write_protected).unwrap_or(false) {
            st3 |= 0x40; // Write protected
        }
        if self.track[drive] == 0 {
            st3 |= 0x10; // Track 0
        }
        self.results.push_back(st3);
        self.enter_result_phase();
    }

    fn exec_seek(&mut self) {
        let (drive, _side) = Self::decode_unit(self.params[0]);
        let target = self.params[1];
        self.current_drive = drive;
        self.track[drive] = target;
        fdc_log::log_flow(&format!("Seek drive {} -> track {}", drive, target));
        self.complete_command();
    }

    fn exec_read_id(&mut self) {
        // コマンド受理時点でパラメータバッファは空なのでユニットは0になる
        let selector = self.params.first().copied().unwrap_or(0);
        let (drive, side) = Self::decode_unit(selector);
        self.current_drive = drive;
        let track = self.track[drive];
        let ids = self
            .drives
            .get(drive)
            .and_then(|d| d.as_deref())
            .map(|m| m.sector_ids(track, side))
            .unwrap_or_default();
        match ids.first() {
            Some(id) => {
                self.results.extend([
                    0x00,
                    id.cylinder,
                    id.head,
                    id.record,
                    id.size_code,
                    0,
                    0,
                ]);
            }
            None => {
                self.results.extend([0x40, track, side, 1, 0, 0, 0]);
            }
        }
        self.enter_result_phase();
    }

    fn exec_recalibrate(&mut self) {
        let selector = self.params.first().copied().unwrap_or(0);
        let (drive, _side) = Self::decode_unit(selector);
        self.current_drive = drive;
        self.track[drive] = 0;
        fdc_log::log_flow(&format!("Recalibrate drive {}", drive));
        self.complete_command();
    }

    fn exec_sense_interrupt(&mut self) {
        if self.pending_interrupt {
            self.pending_interrupt = false;
            self.results.push_back(0x00);
            self.results.push_back(self.track[self.current_drive]);
        } else {
            // 未完了コマンドなしの応答コード
            self.results.push_back(0x80);
            self.results.push_back(0x00);
        }
        self.enter_result_phase();
    }
}
