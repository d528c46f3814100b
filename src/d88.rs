//! D88形式ディスクイメージコンテナ
//!
//! 0x2B0バイトの固定ヘッダ + 164エントリのトラックオフセットテーブル +
//! セクタ単位の16バイトヘッダ&ペイロードという構造を実装
//! セクタ検索は (cylinder, head, record) の三つ組のみで行う（Nは比較しない）

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::fdc_log;

/// 固定ヘッダ領域のサイズ（ディスク名 + フラグ + トラックテーブル）
pub const HEADER_SIZE: usize = 0x2B0;
/// ディスク名フィールドのサイズ
pub const NAME_SIZE: usize = 16;
/// ライトプロテクトフラグのオフセット（非0で保護）
pub const WRITE_PROTECT_OFFSET: usize = 0x1A;
/// ディスク種別バイトのオフセット
pub const DISK_TYPE_OFFSET: usize = 0x1B;
/// トラックオフセットテーブルの開始位置
pub const TRACK_TABLE_OFFSET: usize = 0x20;
/// トラックテーブルのエントリ数（82トラック × 2面）
pub const TRACK_TABLE_ENTRIES: usize = 164;
/// セクタヘッダのサイズ
pub const SECTOR_HEADER_SIZE: usize = 16;

/// デコード失敗
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// 入力がディスク名/フラグ領域すら保持できない
    TooSmall,
    /// トラックオフセットテーブルが途中で切れている
    Truncated,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::TooSmall => write!(f, "image too small for disk header"),
            DecodeError::Truncated => write!(f, "track offset table truncated"),
        }
    }
}

/// 物理セクタの識別子（CHRN）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorAddress {
    pub cylinder: u8,
    pub head: u8,
    pub record: u8,
    pub size_code: u8,
}

impl SectorAddress {
    pub fn new(cylinder: u8, head: u8, record: u8, size_code: u8) -> Self {
        SectorAddress { cylinder, head, record, size_code }
    }

    /// size_codeから導出される公称セクタ長
    /// フォーマットが表現できるのはN=0..=7（128..16384バイト）まで
    /// 範囲外のNはゲスト由来の値なので7へクランプする
    pub fn byte_size(&self) -> usize {
        128usize << usize::from(self.size_code.min(7))
    }

    /// 検索用の一致判定: (cylinder, head, record) のみ比較する
    /// size_codeはメディアによって非標準値が入るため比較に使わない
    pub fn same_chr(&self, other: &SectorAddress) -> bool {
        self.cylinder == other.cylinder
            && self.head == other.head
            && self.record == other.record
    }
}

/// コンテナから読み出した1セクタ
#[derive(Debug, Clone)]
pub struct Sector {
    /// セクタID（CHRN）
    pub id: SectorAddress,
    /// ペイロード
    pub data: Vec<u8>,
    /// ヘッダに記録されていたペイロード長
    /// size_codeの公称長とは独立で、こちらが常に優先される
    pub declared_len: u16,
}

/// ディスク状態のサマリ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskStatus {
    pub write_protected: bool,
    pub track_count: u8,
    pub side_count: u8,
}

/// ディスクメディアへのアクセスインタフェース
///
/// FDCエンジンとIPLローダはこのトレイト経由でのみメディアに触れる
/// テストダブルは実装クラスを継承せずこのトレイトを直接実装する
pub trait DiskMedia {
    /// (track, side) 上で最初にCHRが一致したセクタのペイロード
    fn read_sector(&self, track: u8, side: u8, addr: &SectorAddress) -> Option<&[u8]>;
    /// セクタ書き換え。ライトプロテクト中または不一致ならfalse
    /// データは対象セクタの既存長に切り詰め/ゼロ埋めされる
    fn write_sector(&mut self, track: u8, side: u8, addr: &SectorAddress, data: &[u8]) -> bool;
    /// (track, side) 上のセクタIDをデコード時の出現順で返す
    fn sector_ids(&self, track: u8, side: u8) -> Vec<SectorAddress>;
    /// ディスク状態のサマリ
    fn disk_status(&self) -> DiskStatus;
}

/// デコード済みディスクイメージ
///
/// decode成功時にのみ生成され、セクタ数と並びはその後不変
/// write_sectorによるデータ書き換えだけが許される
#[derive(Debug, Clone)]
pub struct DiskImage {
    /// ディスク名（トリム済み）
    pub name: String,
    /// ライトプロテクト
    pub write_protected: bool,
    /// ディスク種別バイト（解釈せず保持のみ）
    pub disk_type: u8,
    /// (track, side) -> セクタ列（出現順）
    tracks: HashMap<(u8, u8), Vec<Sector>>,
    /// デコード時に観測した最大トラック+1
    track_count: u8,
    /// デコード時に観測した最大サイド+1
    side_count: u8,
}

fn read_u16le(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32le(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

impl DiskImage {
    /// バイト列からイメージをデコードする
    ///
    /// トラック途中でデータが尽きた場合はそのトラックの残りだけを捨てる
    /// （致命的エラーになるのは固定ヘッダ領域が読めないときのみ）
    pub fn decode(bytes: &[u8]) -> Result<DiskImage, DecodeError> {
        if bytes.len() < TRACK_TABLE_OFFSET {
            return Err(DecodeError::TooSmall);
        }
        if bytes.len() < HEADER_SIZE {
            return Err(DecodeError::Truncated);
        }

        // ディスク名: NUL終端 + 前後空白を除去
        let raw_name = &bytes[0..NAME_SIZE];
        let name_end = raw_name.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
        let name = String::from_utf8_lossy(&raw_name[..name_end]).trim().to_string();

        let write_protected = bytes[WRITE_PROTECT_OFFSET] != 0;
        let disk_type = bytes[DISK_TYPE_OFFSET];

        let mut tracks: HashMap<(u8, u8), Vec<Sector>> = HashMap::new();
        let mut track_count: u8 = 0;
        let mut side_count: u8 = 0;

        for entry in 0..TRACK_TABLE_ENTRIES {
            let offset = read_u32le(bytes, TRACK_TABLE_OFFSET + entry * 4) as usize;
            // 0はトラック欠落、入力範囲外のオフセットは無視
            if offset == 0 || offset >= bytes.len() {
                continue;
            }
            if offset + SECTOR_HEADER_SIZE > bytes.len() {
                continue;
            }

            let track = (entry / 2) as u8;
            let side = (entry % 2) as u8;

            // セクタ数は先頭セクタヘッダのバイト4-5に入っている
            let sector_count = read_u16le(bytes, offset + 4);

            let mut sectors = Vec::new();
            let mut pos = offset;
            for _ in 0..sector_count {
                if pos + SECTOR_HEADER_SIZE > bytes.len() {
                    break; // ヘッダが読めない: このトラックを打ち切り
                }
                let id = SectorAddress::new(
                    bytes[pos],
                    bytes[pos + 1],
                    bytes[pos + 2],
                    bytes[pos + 3],
                );
                let declared_len = read_u16le(bytes, pos + 14);
                let data_start = pos + SECTOR_HEADER_SIZE;
                let data_end = data_start + declared_len as usize;
                if data_end > bytes.len() {
                    break; // ペイロードが読めない: このトラックを打ち切り
                }
                sectors.push(Sector {
                    id,
                    data: bytes[data_start..data_end].to_vec(),
                    declared_len,
                });
                pos = data_end;
            }

            if !sectors.is_empty() {
                if track + 1 > track_count {
                    track_count = track + 1;
                }
                if side + 1 > side_count {
                    side_count = side + 1;
                }
                tracks.insert((track, side), sectors);
            }
        }

        Ok(DiskImage {
            name,
            write_protected,
            disk_type,
            tracks,
            track_count,
            side_count,
        })
    }

    /// イメージを同じレイアウトのバイト列へエンコードする
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_SIZE];

        // 名前フィールドは16バイト全部が有効（NUL終端は16バイト未満のときのみ）
        let name_bytes = self.name.as_bytes();
        let n = name_bytes.len().min(NAME_SIZE);
        out[..n].copy_from_slice(&name_bytes[..n]);
        out[WRITE_PROTECT_OFFSET] = if self.write_protected { 0x10 } else { 0x00 };
        out[DISK_TYPE_OFFSET] = self.disk_type;

        for entry in 0..TRACK_TABLE_ENTRIES {
            let track = (entry / 2) as u8;
            let side = (entry % 2) as u8;
            let sectors = match self.tracks.get(&(track, side)) {
                Some(s) if !s.is_empty() => s,
                _ => continue,
            };

            let track_offset = out.len() as u32;
            let table_pos = TRACK_TABLE_OFFSET + entry * 4;
            out[table_pos..table_pos + 4].copy_from_slice(&track_offset.to_le_bytes());

            let count = sectors.len() as u16;
            for sector in sectors {
                let mut header = [0u8; SECTOR_HEADER_SIZE];
                header[0] = sector.id.cylinder;
                header[1] = sector.id.head;
                header[2] = sector.id.record;
                header[3] = sector.id.size_code;
                header[4..6].copy_from_slice(&count.to_le_bytes());
                header[14..16].copy_from_slice(&sector.declared_len.to_le_bytes());
                out.extend_from_slice(&header);
                out.extend_from_slice(&sector.data);
            }
        }

        // 全体サイズ（オフセット0x1C、デコードでは未使用だが実機ツール互換）
        let total = out.len() as u32;
        out[0x1C..0x20].copy_from_slice(&total.to_le_bytes());
        out
    }

    /// ファイルからイメージを読み込む
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<DiskImage, String> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .map_err(|e| format!("Failed to read disk image {:?}: {}", path, e))?;
        let image = DiskImage::decode(&bytes)
            .map_err(|e| format!("Failed to decode disk image {:?}: {}", path, e))?;
        log::info!(
            "Loaded disk image {:?}: \"{}\" ({} tracks, {} sides{})",
            path,
            image.name,
            image.track_count,
            image.side_count,
            if image.write_protected { ", write-protected" } else { "" }
        );
        Ok(image)
    }

    /// イメージをファイルへ保存する
    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let path = path.as_ref();
        fs::write(path, self.encode())
            .map_err(|e| format!("Failed to write disk image {:?}: {}", path, e))
    }

    fn find_sector(&self, track: u8, side: u8, addr: &SectorAddress) -> Option<&Sector> {
        self.tracks
            .get(&(track, side))?
            .iter()
            .find(|s| s.id.same_chr(addr))
    }
}

impl DiskMedia for DiskImage {
    fn read_sector(&self, track: u8, side: u8, addr: &SectorAddress) -> Option<&[u8]> {
        self.find_sector(track, side, addr).map(|s| s.data.as_slice())
    }

    fn write_sector(&mut self, track: u8, side: u8, addr: &SectorAddress, data: &[u8]) -> bool {
        if self.write_protected {
            fdc_log::log_flow("write rejected: disk is write-protected");
            return false;
        }
        let sector = match self
            .tracks
            .get_mut(&(track, side))
            .and_then(|v| v.iter_mut().find(|s| s.id.same_chr(addr)))
        {
            Some(s) => s,
            None => return false,
        };
        // 既存長を維持して書き換える（溢れは捨て、不足はゼロ埋め）
        let len = sector.data.len();
        let n = data.len().min(len);
        sector.data[..n].copy_from_slice(&data[..n]);
        for b in &mut sector.data[n..] {
            *b = 0;
        }
        true
    }

    fn sector_ids(&self, track: u8, side: u8) -> Vec<SectorAddress> {
        self.tracks
            .get(&(track, side))
            .map(|v| v.iter().map(|s| s.id).collect())
            .unwrap_or_default()
    }

    fn disk_status(&self) -> DiskStatus {
        DiskStatus {
            write_protected: self.write_protected,
            track_count: self.track_count,
            side_count: self.side_count,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::build_image;
    use super::*;

    fn sector(r: u8, data: &[u8]) -> (u8, u8, SectorAddress, Vec<u8>) {
        (0, 0, SectorAddress::new(0, 0, r, 1), data.to_vec())
    }

    #[test]
    fn test_decode_too_small() {
        assert!(matches!(DiskImage::decode(&[]), Err(DecodeError::TooSmall)));
        let short = vec![0u8; TRACK_TABLE_OFFSET - 1];
        assert!(matches!(DiskImage::decode(&short), Err(DecodeError::TooSmall)));
    }

    #[test]
    fn test_decode_truncated_table() {
        let short = vec![0u8; HEADER_SIZE - 1];
        assert!(matches!(DiskImage::decode(&short), Err(DecodeError::Truncated)));
    }

    #[test]
    fn test_decode_empty_image() {
        let image = DiskImage::decode(&vec![0u8; HEADER_SIZE]).unwrap();
        let status = image.disk_status();
        assert_eq!(status.track_count, 0);
        assert_eq!(status.side_count, 0);
        assert!(!status.write_protected);
        assert!(image.sector_ids(0, 0).is_empty());
    }

    #[test]
    fn test_decode_name_trimmed() {
        let mut bytes = build_image("  CPM22 ", false, &[sector(1, &[0u8; 16])]);
        // 名前の後ろはNUL埋めされている
        let image = DiskImage::decode(&bytes).unwrap();
        assert_eq!(image.name, "CPM22");
        // NULなしの16バイトフル名
        bytes[..NAME_SIZE].copy_from_slice(b"ABCDEFGHIJKLMNOP");
        let image = DiskImage::decode(&bytes).unwrap();
        assert_eq!(image.name, "ABCDEFGHIJKLMNOP");
    }

    #[test]
    fn test_roundtrip_preserves_layout() {
        let src = build_image(
            "ROUNDTRIP",
            false,
            &[
                (0, 0, SectorAddress::new(0, 0, 1, 1), vec![0xAA; 256]),
                (0, 0, SectorAddress::new(0, 0, 3, 1), vec![0xBB; 256]),
                (0, 0, SectorAddress::new(0, 0, 2, 1), vec![0xCC; 128]),
                (1, 0, SectorAddress::new(1, 0, 1, 0), vec![0x55; 128]),
                (1, 1, SectorAddress::new(1, 1, 1, 2), vec![0x66; 512]),
                (40, 1, SectorAddress::new(40, 1, 9, 1), vec![1, 2, 3, 4]),
            ],
        );
        let first = DiskImage::decode(&src).unwrap();
        let second = DiskImage::decode(&first.encode()).unwrap();

        assert_eq!(first.name, second.name);
        assert_eq!(first.disk_status(), second.disk_status());
        for track in 0..first.disk_status().track_count {
            for side in 0..2u8 {
                let ids = first.sector_ids(track, side);
                assert_eq!(ids, second.sector_ids(track, side));
                for id in ids {
                    assert_eq!(
                        first.read_sector(track, side, &id),
                        second.read_sector(track, side, &id)
                    );
                }
            }
        }
    }

    #[test]
    fn test_sector_ids_insertion_order() {
        // 物理順が非連続でも並べ替えない
        let bytes = build_image(
            "ORDER",
            false,
            &[sector(5, &[5]), sector(1, &[1]), sector(3, &[3])],
        );
        let image = DiskImage::decode(&bytes).unwrap();
        let records: Vec<u8> = image.sector_ids(0, 0).iter().map(|s| s.record).collect();
        assert_eq!(records, vec![5, 1, 3]);
    }

    #[test]
    fn test_duplicate_ids_first_match_wins() {
        let bytes = build_image(
            "DUP",
            false,
            &[sector(1, &[0x11, 0x11]), sector(1, &[0x22, 0x22])],
        );
        let image = DiskImage::decode(&bytes).unwrap();
        let addr = SectorAddress::new(0, 0, 1, 1);
        assert_eq!(image.read_sector(0, 0, &addr), Some(&[0x11, 0x11][..]));
        assert_eq!(image.sector_ids(0, 0).len(), 2);
    }

    #[test]
    fn test_lookup_ignores_size_code() {
        let bytes = build_image("N", false, &[sector(1, &[0xEE; 256])]);
        let image = DiskImage::decode(&bytes).unwrap();
        // 格納時はN=1。N=3で検索しても同じセクタに当たる
        let addr = SectorAddress::new(0, 0, 1, 3);
        assert!(image.read_sector(0, 0, &addr).is_some());
    }

    #[test]
    fn test_declared_len_overrides_size_code() {
        // N=1（公称256バイト）だが実長2バイトのセクタ
        let bytes = build_image("SHORT", false, &[sector(7, &[0xDE, 0xAD])]);
        let image = DiskImage::decode(&bytes).unwrap();
        let addr = SectorAddress::new(0, 0, 7, 1);
        assert_eq!(image.read_sector(0, 0, &addr).unwrap().len(), 2);
    }

    #[test]
    fn test_truncated_sector_chain_drops_track_tail() {
        let mut bytes = build_image(
            "TRUNC",
            false,
            &[sector(1, &[0xAA; 256]), sector(2, &[0xBB; 256])],
        );
        // 2番目のセクタのペイロード途中で切断
        bytes.truncate(bytes.len() - 100);
        let image = DiskImage::decode(&bytes).unwrap();
        let ids = image.sector_ids(0, 0);
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].record, 1);
    }

    #[test]
    fn test_offset_beyond_input_ignored() {
        let mut bytes = build_image("BAD", false, &[sector(1, &[0xAA; 64])]);
        // トラック1のオフセットを入力長より先に向ける
        let pos = TRACK_TABLE_OFFSET + 2 * 4;
        let bogus = (bytes.len() as u32 + 1000).to_le_bytes();
        bytes[pos..pos + 4].copy_from_slice(&bogus);
        let image = DiskImage::decode(&bytes).unwrap();
        assert!(image.sector_ids(1, 0).is_empty());
        assert_eq!(image.sector_ids(0, 0).len(), 1);
    }

    #[test]
    fn test_write_sector_pads_and_truncates() {
        let bytes = build_image("W", false, &[sector(1, &[0xFF; 8])]);
        let mut image = DiskImage::decode(&bytes).unwrap();
        let addr = SectorAddress::new(0, 0, 1, 1);

        // 短いデータはゼロ埋め
        assert!(image.write_sector(0, 0, &addr, &[1, 2, 3]));
        assert_eq!(
            image.read_sector(0, 0, &addr).unwrap(),
            &[1, 2, 3, 0, 0, 0, 0, 0]
        );

        // 長いデータは切り詰め
        assert!(image.write_sector(0, 0, &addr, &[9u8; 20]));
        assert_eq!(image.read_sector(0, 0, &addr).unwrap(), &[9u8; 8]);
    }

    #[test]
    fn test_write_sector_not_found() {
        let bytes = build_image("W", false, &[sector(1, &[0u8; 8])]);
        let mut image = DiskImage::decode(&bytes).unwrap();
        let addr = SectorAddress::new(0, 0, 9, 1);
        assert!(!image.write_sector(0, 0, &addr, &[1]));
    }

    #[test]
    fn test_write_protected_rejects_and_preserves() {
        let bytes = build_image("WP", true, &[sector(1, &[0x42; 8])]);
        let mut image = DiskImage::decode(&bytes).unwrap();
        let addr = SectorAddress::new(0, 0, 1, 1);
        assert!(!image.write_sector(0, 0, &addr, &[0u8; 8]));
        assert_eq!(image.read_sector(0, 0, &addr).unwrap(), &[0x42; 8]);
    }

    #[test]
    fn test_disk_status_counts() {
        let bytes = build_image(
            "GEOM",
            true,
            &[
                (0, 0, SectorAddress::new(0, 0, 1, 1), vec![0; 4]),
                (39, 1, SectorAddress::new(39, 1, 1, 1), vec![0; 4]),
            ],
        );
        let image = DiskImage::decode(&bytes).unwrap();
        let status = image.disk_status();
        assert!(status.write_protected);
        assert_eq!(status.track_count, 40);
        assert_eq!(status.side_count, 2);
    }

    #[test]
    fn test_byte_size_formula() {
        assert_eq!(SectorAddress::new(0, 0, 1, 0).byte_size(), 128);
        assert_eq!(SectorAddress::new(0, 0, 1, 1).byte_size(), 256);
        assert_eq!(SectorAddress::new(0, 0, 1, 3).byte_size(), 1024);
        assert_eq!(SectorAddress::new(0, 0, 1, 7).byte_size(), 16384);
    }

    #[test]
    fn test_byte_size_clamps_out_of_range_code() {
        // N>=8はフォーマット外。最大長へクランプされパニックしない
        assert_eq!(SectorAddress::new(0, 0, 1, 8).byte_size(), 16384);
        assert_eq!(SectorAddress::new(0, 0, 1, 0xFF).byte_size(), 16384);
    }

    #[test]
    fn test_encode_preserves_full_length_name() {
        let mut bytes = build_image("X", false, &[sector(1, &[0u8; 16])]);
        bytes[..NAME_SIZE].copy_from_slice(b"ABCDEFGHIJKLMNOP");
        let first = DiskImage::decode(&bytes).unwrap();
        assert_eq!(first.name, "ABCDEFGHIJKLMNOP");
        let second = DiskImage::decode(&first.encode()).unwrap();
        assert_eq!(second.name, "ABCDEFGHIJKLMNOP");
    }

    #[test]
    fn test_save_and_load_file() {
        let bytes = build_image("FILE", false, &[sector(1, &[0x5A; 64])]);
        let image = DiskImage::decode(&bytes).unwrap();
        let path = std::env::temp_dir().join("fdrs_test_save.d88");
        image.save_file(&path).unwrap();
        let loaded = DiskImage::load_file(&path).unwrap();
        let addr = SectorAddress::new(0, 0, 1, 1);
        assert_eq!(loaded.read_sector(0, 0, &addr), Some(&[0x5A; 64][..]));
        let _ = std::fs::remove_file(&path);
    }
}
