//! 设备参数

use super::{BlkError, BlkResult, DISK_NAME, DISK_NAME_MAX, MINORS, NSECTORS, SECTOR_SIZE};

/// 创建一个设备所需的全部参数.
///
/// 容量不单独保存, 总是由 `sectors * sector_size` 推导.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceConfig {
    /// 磁盘名, 同时用于申请主设备号
    pub name: String,
    /// 每个扇区的字节数
    pub sector_size: usize,
    /// 扇区总数
    pub sectors: usize,
    /// 次设备号数量
    pub minors: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: String::from(DISK_NAME),
            sector_size: SECTOR_SIZE,
            sectors: NSECTORS,
            minors: MINORS,
        }
    }
}

impl DeviceConfig {
    /// 由字节容量和扇区大小构造, 容量必须是扇区大小的整数倍
    pub fn with_capacity(capacity_bytes: usize, sector_size: usize) -> BlkResult<Self> {
        if capacity_bytes == 0 || sector_size == 0 || capacity_bytes % sector_size != 0 {
            return Err(BlkError::InvalidConfig);
        }
        Ok(Self {
            sector_size,
            sectors: capacity_bytes / sector_size,
            ..Self::default()
        })
    }

    pub fn capacity_bytes(&self) -> BlkResult<usize> {
        self.sectors
            .checked_mul(self.sector_size)
            .ok_or(BlkError::InvalidConfig)
    }

    pub fn validate(&self) -> BlkResult<()> {
        if self.sector_size == 0 || self.sectors == 0 || self.minors == 0 {
            return Err(BlkError::InvalidConfig);
        }
        // 宿主那边的名字缓冲区还要留一个结尾的 '\0'
        if self.name.is_empty() || self.name.len() >= DISK_NAME_MAX {
            return Err(BlkError::InvalidConfig);
        }
        self.capacity_bytes().map(|_| ())
    }
}
