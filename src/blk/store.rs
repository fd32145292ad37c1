//! 后备存储: 用一段连续的内存模拟整块磁盘的内容
//!
//! 容量只由缓冲区长度决定, 扇区数则由容量和扇区大小推导,
//! 这样二者永远不会不同步.
//! 读写接口只对 transfer 模块可见, 其他代码不能绕过边界检查直接访问缓冲区.

use std::ops::Range;

use super::{BlkError, BlkResult};

/// In-memory disk content
pub struct BackingStore {
    /// 磁盘内容, 由设备独占
    data: Box<[u8]>,
    /// 每个扇区的字节数, 创建后不再改变
    sector_size: usize,
}

impl BackingStore {
    /// 分配 `capacity_bytes` 字节的零初始化缓冲区.
    ///
    /// 分配失败时返回 [`BlkError::OutOfMemory`] 而不是直接 abort.
    pub fn create(capacity_bytes: usize, sector_size: usize) -> BlkResult<Self> {
        if sector_size == 0 || capacity_bytes == 0 || capacity_bytes % sector_size != 0 {
            return Err(BlkError::InvalidConfig);
        }
        let mut data = Vec::new();
        data.try_reserve_exact(capacity_bytes)
            .map_err(|_| BlkError::OutOfMemory)?;
        data.resize(capacity_bytes, 0u8);
        Ok(Self {
            data: data.into_boxed_slice(),
            sector_size,
        })
    }

    pub fn capacity_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    pub fn sector_count(&self) -> usize {
        self.data.len() / self.sector_size
    }

    /// 检查 [offset, offset + length) 是否完全落在设备内
    pub(super) fn range(&self, offset: usize, length: usize) -> BlkResult<Range<usize>> {
        let end = offset.checked_add(length).ok_or(BlkError::OutOfRange)?;
        if end > self.data.len() {
            return Err(BlkError::OutOfRange);
        }
        Ok(offset..end)
    }

    /// 从 offset 处读出 out.len() 个字节; 越界时不拷贝任何数据
    pub(super) fn read(&self, offset: usize, out: &mut [u8]) -> BlkResult<()> {
        let range = self.range(offset, out.len())?;
        out.copy_from_slice(&self.data[range]);
        Ok(())
    }

    /// 把 input 写入 offset 处; 越界时不修改存储
    pub(super) fn write(&mut self, offset: usize, input: &[u8]) -> BlkResult<()> {
        let range = self.range(offset, input.len())?;
        self.data[range].copy_from_slice(input);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_rejects_bad_sizes() {
        assert_eq!(BackingStore::create(0, 512).err(), Some(BlkError::InvalidConfig));
        assert_eq!(BackingStore::create(512, 0).err(), Some(BlkError::InvalidConfig));
        assert_eq!(BackingStore::create(1000, 512).err(), Some(BlkError::InvalidConfig));
    }

    #[test]
    fn huge_allocation_reports_out_of_memory() {
        assert_eq!(
            BackingStore::create(usize::MAX, 1).err(),
            Some(BlkError::OutOfMemory)
        );
    }

    #[test]
    fn out_of_range_leaves_data_untouched() {
        let mut store = BackingStore::create(1024, 512).unwrap();
        assert_eq!(store.sector_count(), 2);
        assert_eq!(store.write(1000, &[0xff; 100]), Err(BlkError::OutOfRange));
        assert_eq!(store.write(usize::MAX, &[1]), Err(BlkError::OutOfRange));

        let mut out = [0xeeu8; 1024];
        store.read(0, &mut out).unwrap();
        assert!(out.iter().all(|b| *b == 0));
    }

    #[test]
    fn write_then_read_at_edge() {
        let mut store = BackingStore::create(1024, 512).unwrap();
        store.write(1020, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        store.read(1020, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }
}
