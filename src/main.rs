//! FDRS - Floppy disk subsystem emulator in Rust
//!
//! ディスクイメージの検査・セクタダンプ・ヘッドレスブートを行う
//! フロントエンド
//!
//! # 使用方法
//! ```
//! fdrs -1 os.d88 --info
//! fdrs -1 os.d88 --dump 0,0,1
//! fdrs -1 os.d88 --boot
//! ```

use fdrs::bus::CpuControl;
use fdrs::config::Config;
use fdrs::d88::{DiskImage, DiskMedia, SectorAddress};
use fdrs::fdc_log;
use fdrs::io::{IoBus, PORT_FDC_COMMAND, PORT_FDC_DATA, PORT_IRQ_CONTROL};
use fdrs::ipl;
use fdrs::memory::Memory;

use clap::Parser;

/// FDRS - Floppy disk subsystem emulator in Rust
#[derive(Parser, Debug)]
#[command(name = "fdrs")]
#[command(author = "FDRS Project")]
#[command(version = "0.2.0")]
#[command(about = "FDRS - Floppy disk subsystem emulator", long_about = None)]
struct Args {
    /// ディスクイメージファイル（ドライブ0）
    #[arg(short = '1', long)]
    disk1: Option<String>,

    /// ディスクイメージファイル（ドライブ1）
    #[arg(short = '2', long)]
    disk2: Option<String>,

    /// イメージ情報とセクタIDを表示
    #[arg(long)]
    info: bool,

    /// セクタをダンプ（"track,side,record"形式）
    #[arg(long)]
    dump: Option<String>,

    /// ヘッドレスブート（IPL/OSをメモリへ展開してPCを設定）
    #[arg(long)]
    boot: bool,

    /// ポートバス経由でReadID/SenseInterruptStatusを発行
    #[arg(long)]
    probe: bool,

    /// OSロードアドレス（例: 0xD000）
    #[arg(long, value_parser = parse_addr)]
    load_addr: Option<u16>,

    /// 実行開始アドレス（例: 0xC000）
    #[arg(long, value_parser = parse_addr)]
    exec_addr: Option<u16>,

    /// ドライブ0をライトプロテクト扱いにする
    #[arg(long)]
    write_protect: bool,

    /// 処理後のイメージを指定パスへ保存
    #[arg(long)]
    save: Option<String>,

    /// FDCトレースレベル (none, flow, state, data, all, flow+state, ...)
    #[arg(long, default_value = "")]
    fdc_log: String,
}

/// "0xD000"または"53248"形式のアドレスをパース
fn parse_addr(s: &str) -> Result<u16, String> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", s, e))
}

/// "track,side,record"形式のセクタ指定をパース
fn parse_sector_spec(s: &str) -> Result<(u8, u8, u8), String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 3 {
        return Err(format!("invalid sector spec '{}' (expected track,side,record)", s));
    }
    let mut values = [0u8; 3];
    for (i, part) in parts.iter().enumerate() {
        values[i] = part
            .trim()
            .parse()
            .map_err(|e| format!("invalid sector spec '{}': {}", s, e))?;
    }
    Ok((values[0], values[1], values[2]))
}

/// PCを受け取るだけのヘッドレスCPU
struct HeadlessCpu {
    pc: u16,
}

impl CpuControl for HeadlessCpu {
    fn set_program_counter(&mut self, address: u16) {
        self.pc = address;
    }
}

fn print_info(image: &DiskImage) {
    let status = image.disk_status();
    println!("Disk name:      \"{}\"", image.name);
    println!("Disk type byte: 0x{:02X}", image.disk_type);
    println!(
        "Geometry:       {} tracks, {} sides{}",
        status.track_count,
        status.side_count,
        if status.write_protected { " (write-protected)" } else { "" }
    );
    for track in 0..status.track_count {
        for side in 0..status.side_count {
            let ids = image.sector_ids(track, side);
            if ids.is_empty() {
                continue;
            }
            let list: Vec<String> = ids
                .iter()
                .map(|id| format!("C{}H{}R{}N{}", id.cylinder, id.head, id.record, id.size_code))
                .collect();
            println!("  track {:2} side {}: {}", track, side, list.join(" "));
        }
    }
}

fn dump_sector(image: &DiskImage, track: u8, side: u8, record: u8) {
    let addr = SectorAddress::new(track, side, record, 0);
    match image.read_sector(track, side, &addr) {
        Some(data) => {
            println!(
                "Sector track {} side {} record {} ({} bytes):",
                track,
                side,
                record,
                data.len()
            );
            for (i, chunk) in data.chunks(16).enumerate() {
                let hex: Vec<String> = chunk.iter().map(|b| format!("{:02X}", b)).collect();
                println!("  {:04X}: {}", i * 16, hex.join(" "));
            }
        }
        None => println!("Sector not found (track {} side {} record {})", track, side, record),
    }
}

/// ポートバス経由でFDCを叩いてみる（動作確認用）
fn probe_fdc(image: DiskImage) {
    let mut bus = IoBus::new();
    bus.fdc.mount(0, Box::new(image));

    bus.io_write(PORT_FDC_COMMAND, 0x0A); // ReadID
    print!("ReadID result:");
    while bus.io_read(PORT_FDC_COMMAND) & 0x40 != 0 {
        print!(" {:02X}", bus.io_read(PORT_FDC_DATA));
    }
    println!();
    println!("IRQ pending: 0x{:02X}", bus.io_read(PORT_IRQ_CONTROL));

    bus.io_write(PORT_FDC_COMMAND, 0x08); // SenseInterruptStatus
    print!("SenseInterruptStatus result:");
    while bus.io_read(PORT_FDC_COMMAND) & 0x40 != 0 {
        print!(" {:02X}", bus.io_read(PORT_FDC_DATA));
    }
    println!();
}

fn main() {
    env_logger::init();

    let args = Args::parse();
    let mut config = Config::load();

    // トレースレベル: コマンドライン指定が設定ファイルより優先
    let level_spec = if args.fdc_log.is_empty() {
        config.fdc_log.clone()
    } else {
        args.fdc_log.clone()
    };
    fdc_log::set_log_level(fdc_log::parse_level(&level_spec));

    let disk1_path = match args.disk1.clone().or_else(|| config.last_disk1.clone()) {
        Some(path) => path,
        None => {
            eprintln!("No disk image specified (use -1 <path>)");
            std::process::exit(1);
        }
    };

    let mut image = match DiskImage::load_file(&disk1_path) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    if args.write_protect || config.write_protect1 {
        image.write_protected = true;
    }

    // ドライブ1は指定があれば読むだけ確認しておく
    if let Some(ref disk2_path) = args.disk2 {
        match DiskImage::load_file(disk2_path) {
            Ok(_) => config.last_disk2 = Some(disk2_path.clone()),
            Err(e) => log::warn!("{}", e),
        }
    }

    if args.info {
        print_info(&image);
    } else if let Some(ref spec) = args.dump {
        match parse_sector_spec(spec) {
            Ok((track, side, record)) => dump_sector(&image, track, side, record),
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        }
    } else if args.boot {
        let load_addr = args.load_addr.unwrap_or(config.os_load_addr);
        let exec_addr = args.exec_addr.unwrap_or(config.exec_addr);
        let mut memory = Memory::new();
        let mut cpu = HeadlessCpu { pc: 0 };

        if ipl::load_and_execute(&image, &mut memory, &mut cpu, load_addr, exec_addr) {
            println!("Boot OK: PC=0x{:04X}", cpu.pc);
            let head: Vec<String> = memory
                .slice(ipl::IPL_LOAD_ADDR, 8)
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect();
            println!("IPL at 0x{:04X}: {}", ipl::IPL_LOAD_ADDR, head.join(" "));
            let os: Vec<String> = memory
                .slice(load_addr, 8)
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect();
            println!("OS at 0x{:04X}: {}", load_addr, os.join(" "));
        } else {
            eprintln!("Boot failed: no bootable IPL/OS on {}", disk1_path);
            std::process::exit(1);
        }
    } else if args.probe {
        probe_fdc(image.clone());
    } else {
        // デフォルトはイメージ情報表示
        print_info(&image);
    }

    // ライトプロテクト変更などを反映したイメージの書き出し
    if let Some(ref save_path) = args.save {
        match image.save_file(save_path) {
            Ok(()) => println!("Saved disk image to {}", save_path),
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        }
    }

    config.last_disk1 = Some(disk1_path);
    if let Err(e) = config.save() {
        log::warn!("{}", e);
    }
}
