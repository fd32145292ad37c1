//! 合成的磁盘几何信息 (CHS)
//!
//! 内存盘没有真实的几何结构, 但分区工具需要 HDIO_GETGEO 的结果,
//! 所以这里用固定的磁头数和每磁道扇区数编一个出来.

use std::fmt;

use super::{BackingStore, KERNEL_SECTOR_SIZE};

/// 每磁道扇区数
pub const GEO_SECTORS: u8 = 16;
/// 磁头数
pub const GEO_HEADS: u8 = 4;
/// 保留的第一个磁道
pub const GEO_START: u64 = 4;

/// Same layout as `struct hd_geometry`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HdGeometry {
    pub heads: u8,
    pub sectors: u8,
    pub cylinders: u16,
    pub start: u64,
}

impl HdGeometry {
    /// 由字节容量推导几何信息.
    ///
    /// 先把容量换算成 512 字节的内核扇区数, 再除以 heads * sectors;
    /// 柱面数超过 u16 时饱和, 因此 cylinders * heads * sectors 永远不会超过总扇区数.
    pub fn from_capacity(capacity_bytes: usize) -> Self {
        let total = (capacity_bytes / KERNEL_SECTOR_SIZE) as u64;
        let per_cylinder = GEO_SECTORS as u64 * GEO_HEADS as u64;
        let cylinders = u16::try_from(total / per_cylinder).unwrap_or(u16::MAX);
        Self {
            heads: GEO_HEADS,
            sectors: GEO_SECTORS,
            cylinders,
            start: GEO_START,
        }
    }
}

/// 查询设备的几何信息, 纯函数, 不会失败
pub fn geometry(store: &BackingStore) -> HdGeometry {
    HdGeometry::from_capacity(store.capacity_bytes())
}

impl fmt::Display for HdGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cylinders: {}, heads: {}, sectors: {}, start: {}",
            self.cylinders, self.heads, self.sectors, self.start
        )
    }
}
