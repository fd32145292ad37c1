mod config;
mod error;
mod geometry;
mod host;
mod lifecycle;
mod request;
mod store;
mod transfer;

/// 设备默认的扇区大小
pub const SECTOR_SIZE: usize = 512;
/// 默认的扇区数
pub const NSECTORS: usize = 10;
/// 内核 (宿主) 计算容量时使用的扇区大小, 与设备自身的扇区大小无关
pub const KERNEL_SECTOR_SIZE: usize = 512;
/// 次设备号数量
pub const MINORS: u32 = 16;
/// 磁盘名
pub const DISK_NAME: &str = "memes";
/// 宿主磁盘名缓冲区的长度, 包括结尾的 '\0'
pub const DISK_NAME_MAX: usize = 32;
/// 获取磁盘几何信息的控制命令
pub const HDIO_GETGEO: u32 = 0x0301;

pub use config::DeviceConfig;
pub use error::{BlkError, BlkResult};
pub use geometry::{geometry, HdGeometry, GEO_HEADS, GEO_SECTORS, GEO_START};
pub use host::{BlockHost, DiskDescriptor, DiskId, MajorId, QueueId, RequestSource};
pub use lifecycle::{create_device, create_device_with, destroy_device, DeviceHandle};
pub use request::{BlkQueue, Request, RequestKind, Segment};
pub use store::BackingStore;
pub use transfer::{check, transfer, Direction};
