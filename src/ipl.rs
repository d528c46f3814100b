//! IPLブートストラップローダ
//!
//! ディスクイメージからIPL（Initial Program Loader）とOS本体を
//! 取り出してメモリへ展開し、CPUへ実行を引き渡す一回限りの処理
//!
//! IPLはトラック0/サイド0のレコード1に置かれた256バイトの
//! ブートコード。OS本体はそれ以外の全セクタを格納順に連結したもの

use crate::bus::{CpuControl, MemoryBus};
use crate::d88::{DiskMedia, SectorAddress};
use crate::fdc_log;

/// IPLの固定ロードアドレス
pub const IPL_LOAD_ADDR: u16 = 0xC000;
/// IPLコードのサイズ
pub const IPL_SIZE: usize = 256;
/// OS領域のサイズ（ロード前にゼロクリアされる）
pub const OS_REGION_SIZE: usize = 12 * 1024;

/// 16ビット空間からはみ出すアドレスへの書き込みは黙って捨てる
fn poke(memory: &mut dyn MemoryBus, address: u32, value: u8) {
    if address <= 0xFFFF {
        memory.write_byte(address as u16, value);
    }
}

/// イメージからIPLとOSをロードしてCPUを起動アドレスへ向ける
///
/// 戻り値がfalseになるのはIPLセクタが無い/短すぎる、または
/// OSセクタ集合が空のときのみ。その場合メモリには一切書き込まない
/// アドレスクリップの発生は失敗にしない
pub fn load_and_execute(
    media: &dyn DiskMedia,
    memory: &mut dyn MemoryBus,
    cpu: &mut dyn CpuControl,
    load_addr: u16,
    exec_addr: u16,
) -> bool {
    // 1. IPLセクタ（トラック0/サイド0/レコード1）
    let ipl_addr = SectorAddress::new(0, 0, 1, 0);
    let ipl = match media.read_sector(0, 0, &ipl_addr) {
        Some(data) if data.len() >= IPL_SIZE => data,
        Some(data) => {
            log::warn!("IPL sector too short: {} bytes (need {})", data.len(), IPL_SIZE);
            return false;
        }
        None => {
            log::warn!("IPL sector not found (track 0, side 0, record 1)");
            return false;
        }
    };

    // 2. OSセクタ集合: IPL以外の全セクタを格納順で連結
    // 空判定はセクタ数で行う（宣言長0のセクタも集合には数える）
    let status = media.disk_status();
    let mut os_bytes: Vec<u8> = Vec::new();
    let mut os_sector_count = 0usize;
    for track in 0..status.track_count {
        for side in 0..status.side_count {
            for id in media.sector_ids(track, side) {
                if track == 0 && side == 0 && id.record == 1 {
                    continue;
                }
                os_sector_count += 1;
                if let Some(data) = media.read_sector(track, side, &id) {
                    os_bytes.extend_from_slice(data);
                }
            }
        }
    }
    if os_sector_count == 0 {
        log::warn!("No OS sectors found on disk");
        return false;
    }

    fdc_log::log_flow(&format!(
        "Boot: IPL {} bytes at {:04X}, OS {} bytes at {:04X}",
        IPL_SIZE,
        IPL_LOAD_ADDR,
        os_bytes.len(),
        load_addr
    ));

    // 3. OS領域のゼロクリア（空間の終端で黙って打ち切る）
    for offset in 0..OS_REGION_SIZE {
        let address = load_addr as u32 + offset as u32;
        if address > 0xFFFF {
            break;
        }
        memory.write_byte(address as u16, 0);
    }

    // 4. IPLとOS本体の書き込み
    for (offset, &value) in ipl[..IPL_SIZE].iter().enumerate() {
        poke(memory, IPL_LOAD_ADDR as u32 + offset as u32, value);
    }
    for (offset, &value) in os_bytes.iter().enumerate() {
        poke(memory, load_addr as u32 + offset as u32, value);
    }

    // 5. CPUへ引き渡し
    cpu.set_program_counter(exec_addr);
    true
}
