use std::process::ExitCode;
use std::str::FromStr;

use clap::{value_parser, Arg, Command};
use log::{error, info, LevelFilter};

use memes_blk::blk::{
    self, create_device_with, destroy_device, BlkResult, DeviceConfig, DeviceHandle, Request,
    HDIO_GETGEO,
};
use memes_blk::device::{MemHost, VecQueue};
use memes_blk::logging;

fn main() -> ExitCode {
    let matches = Command::new("memes block device")
        .arg(
            Arg::new("sectors")
                .short('n')
                .long("sectors")
                .value_parser(value_parser!(usize))
                .default_value("10")
                .help("Number of sectors on the virtual disk"),
        )
        .arg(
            Arg::new("sector-size")
                .short('s')
                .long("sector-size")
                .value_parser(value_parser!(usize))
                .default_value("512")
                .help("Bytes per sector"),
        )
        .arg(
            Arg::new("name")
                .long("name")
                .default_value(blk::DISK_NAME)
                .help("Disk name registered with the host"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .default_value("info")
                .help("Log verbosity"),
        )
        .get_matches();

    let level = matches
        .get_one::<String>("log-level")
        .and_then(|level| LevelFilter::from_str(level).ok())
        .unwrap_or(LevelFilter::Info);
    if let Err(err) = logging::init(level) {
        eprintln!("failed to install logger: {}", err);
    }

    let defaults = DeviceConfig::default();
    let config = DeviceConfig {
        name: matches
            .get_one::<String>("name")
            .cloned()
            .unwrap_or(defaults.name),
        sector_size: matches
            .get_one::<usize>("sector-size")
            .copied()
            .unwrap_or(defaults.sector_size),
        sectors: matches
            .get_one::<usize>("sectors")
            .copied()
            .unwrap_or(defaults.sectors),
        minors: defaults.minors,
    };

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("Failed to initialize device: {}", err);
            ExitCode::FAILURE
        }
    }
}

/// 建立设备, 跑一遍演示请求, 然后销毁设备并检查宿主没有残留资源
fn run(config: &DeviceConfig) -> BlkResult<()> {
    let mut host = MemHost::new();
    let dev = create_device_with(&mut host, config)?;
    info!(
        "{}: major {}, {} bytes in {}-byte sectors",
        dev.name(),
        dev.major().0,
        dev.capacity_bytes(),
        dev.sector_size()
    );
    if let Some(disk) = host.disk(dev.disk()) {
        info!("published capacity: {} kernel sectors", disk.capacity);
    }

    demo(&dev, config);

    match dev.ioctl(HDIO_GETGEO) {
        Ok(geo) => println!("HDIO_GETGEO: {}", geo),
        Err(err) => error!("HDIO_GETGEO: {}", err),
    }

    destroy_device(&mut host, dev);
    if !host.is_idle() {
        error!("host still holds resources after teardown");
    }
    Ok(())
}

fn demo(dev: &DeviceHandle, config: &DeviceConfig) {
    let sector_size = config.sector_size;
    let last = config.sectors.saturating_sub(1);
    // 写到第 3 个扇区 (磁盘太小时写最后一个)
    let target = last.min(3);
    let neighbour = (target + 1).min(last);

    let mut queue = VecQueue::new();
    queue.submit(Request::write(target, 1, vec![0xaa; sector_size]));
    queue.submit(Request::read(target, 1, sector_size));
    queue.submit(Request::read(neighbour, 1, sector_size));
    queue.submit(Request::read(config.sectors, 1, sector_size));
    queue.submit(Request::control());

    let done = dev.process_requests(&mut queue);
    info!("{} request(s) completed", done);
    for (rq, status) in queue.take_completed() {
        let data = rq.data();
        let preview = &data[..data.len().min(8)];
        match status {
            Ok(()) => println!(
                "{:?} sector {}: ok {:02x?}",
                rq.direction(),
                rq.sector(),
                preview
            ),
            Err(err) => println!("{:?} sector {}: {}", rq.direction(), rq.sector(), err),
        }
    }
}
