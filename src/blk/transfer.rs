//! 传输引擎: 扇区地址到字节范围的换算, 以及调用方缓冲区与后备存储之间的拷贝.
//!
//! 所有 I/O 路径都要经过这里, 这是唯一的边界检查点.

use log::debug;

use super::{BackingStore, BlkError, BlkResult};

/// 数据传输方向
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// 从设备读到缓冲区
    Read,
    /// 从缓冲区写入设备
    Write,
}

/// 把扇区区间换算成字节区间, 溢出视为越界
fn byte_span(store: &BackingStore, sector: usize, nsect: usize) -> BlkResult<(usize, usize)> {
    let sector_size = store.sector_size();
    let off = sector.checked_mul(sector_size).ok_or(BlkError::OutOfRange)?;
    let nbytes = nsect.checked_mul(sector_size).ok_or(BlkError::OutOfRange)?;
    Ok((off, nbytes))
}

/// 检查 [sector, sector + nsect) 整个区间是否都在设备内, 不做任何拷贝
pub fn check(store: &BackingStore, sector: usize, nsect: usize) -> BlkResult<()> {
    let (off, nbytes) = byte_span(store, sector, nsect)?;
    store.range(off, nbytes).map(|_| ())
}

/// 检查一段传输: 先检查范围, 再检查缓冲区长度, 返回字节偏移和长度
pub fn check_segment(
    store: &BackingStore,
    sector: usize,
    nsect: usize,
    buf_len: usize,
) -> BlkResult<(usize, usize)> {
    let (off, nbytes) = byte_span(store, sector, nsect)?;
    store.range(off, nbytes)?;
    if buf_len < nbytes {
        return Err(BlkError::ShortBuffer);
    }
    Ok((off, nbytes))
}

/// 在 sector 处传输 nsect 个扇区.
///
/// 读时数据写入 `buf` 的前 `nsect * sector_size` 个字节, 写时从这部分取数据.
/// 越界返回 [`BlkError::OutOfRange`], 范围合法但缓冲区不够长返回 [`BlkError::ShortBuffer`],
/// 两种情况下存储和缓冲区都不会被修改.
pub fn transfer(
    store: &mut BackingStore,
    sector: usize,
    nsect: usize,
    buf: &mut [u8],
    direction: Direction,
) -> BlkResult<()> {
    let (off, nbytes) = check_segment(store, sector, nsect, buf.len()).map_err(|err| {
        debug!("Failed to transfer: {}", err);
        err
    })?;
    debug!("transfer {:?}: off: {}, nbytes: {}", direction, off, nbytes);

    let buf = &mut buf[..nbytes];
    match direction {
        Direction::Write => store.write(off, buf),
        Direction::Read => store.read(off, buf),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_addressing() {
        let mut store = BackingStore::create(4 * 512, 512).unwrap();
        let mut data = vec![0x5au8; 512];
        transfer(&mut store, 2, 1, &mut data, Direction::Write).unwrap();

        let mut out = vec![0u8; 1024];
        transfer(&mut store, 1, 2, &mut out, Direction::Read).unwrap();
        assert!(out[..512].iter().all(|b| *b == 0));
        assert!(out[512..].iter().all(|b| *b == 0x5a));
    }

    #[test]
    fn short_buffer_is_rejected() {
        let mut store = BackingStore::create(4 * 512, 512).unwrap();
        let mut data = vec![1u8; 511];
        assert_eq!(
            transfer(&mut store, 0, 1, &mut data, Direction::Write),
            Err(BlkError::ShortBuffer)
        );
    }

    #[test]
    fn range_is_checked_before_buffer_length() {
        let mut store = BackingStore::create(4 * 512, 512).unwrap();
        let mut data = vec![1u8; 10];
        assert_eq!(
            transfer(&mut store, 4, 1, &mut data, Direction::Write),
            Err(BlkError::OutOfRange)
        );
        assert_eq!(check_segment(&store, 3, 1, 10), Err(BlkError::ShortBuffer));
        assert_eq!(check_segment(&store, 3, 1, 512), Ok((1536, 512)));
    }

    #[test]
    fn check_covers_whole_extent() {
        let store = BackingStore::create(4 * 512, 512).unwrap();
        assert!(check(&store, 0, 4).is_ok());
        assert_eq!(check(&store, 3, 2), Err(BlkError::OutOfRange));
        assert_eq!(check(&store, usize::MAX, 1), Err(BlkError::OutOfRange));
    }
}
